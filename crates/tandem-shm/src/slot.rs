//! The versioned handshake primitive.
//!
//! A slot is a one-byte `version` counter, a one-byte `claimed` counter, and
//! an adjoining payload. Turn-taking is three CAS primitives:
//!
//! - [`Slot::claim`] — spin until `claimed` can advance from `version` to
//!   `version + 1`; only succeeds when nobody holds the turn.
//! - [`Slot::commit`] — advance `version` to match `claimed`, finalizing a
//!   write turn.
//! - [`Slot::rollback`] — retract `claimed` to `version`, ending a read turn
//!   without advancing state.
//!
//! `claimed - version ∈ {0, 1} (mod 256)` holds at all times; anything else
//! means the shared state is corrupt and the process dies. Successful CAS on
//! these two bytes is the *only* ordering between the processes: payload
//! writes are published by the commit CAS's release, observed by the next
//! claim's acquire.
//!
//! Wait predicates gate *when* a claim is attempted, not the CAS itself.
//! There is no timeout: two sides configured with jointly unsatisfiable
//! predicates spin forever.

use std::sync::atomic::Ordering;

use crate::fatal;
use crate::layout::{SlotHeader, SLOT_HEADER_SIZE};
use crate::region::RawRegion;

/// When a claim may be attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitMode {
    /// Attempt immediately.
    Immediate,
    /// Spin until `version % modulus == residue`. Encodes turn cadences:
    /// a writer on even residues and a reader on odd ones alternate without
    /// any further signalling.
    Residue { modulus: u8, residue: u8 },
    /// Spin until `version` equals the target exactly.
    Target(u8),
    /// Spin while the supplied function of `version` returns false.
    Custom(fn(u8) -> bool),
}

/// A handshake slot over a registered region.
///
/// Cheap to clone; all clones refer to the same shared bytes.
#[derive(Clone)]
pub struct Slot {
    id: u16,
    region: RawRegion,
}

impl Slot {
    pub(crate) fn new(id: u16, region: RawRegion) -> Self {
        assert!(region.len() >= SLOT_HEADER_SIZE);
        Self { id, region }
    }

    fn header(&self) -> &SlotHeader {
        // SAFETY: the region starts 8-aligned and is at least header-sized;
        // SlotHeader is atomics plus padding, any bytes are valid.
        unsafe { &*(self.region.as_ptr() as *const SlotHeader) }
    }

    /// Id this slot was registered under.
    #[inline]
    pub fn id(&self) -> u16 {
        self.id
    }

    /// Current committed version.
    #[inline]
    pub fn version(&self) -> u8 {
        self.header().version.load(Ordering::Acquire)
    }

    /// The payload region following the header.
    pub fn payload(&self) -> RawRegion {
        self.region
            .subregion(SLOT_HEADER_SIZE, self.region.len() - SLOT_HEADER_SIZE)
    }

    /// Spin until `mode` is satisfied by the current version.
    pub fn wait(&self, mode: WaitMode) {
        let header = self.header();
        match mode {
            WaitMode::Immediate => {}
            WaitMode::Residue { modulus, residue } => {
                if modulus == 0 {
                    fatal!("slot {}: residue wait with modulus 0", self.id);
                }
                while header.version.load(Ordering::Acquire) % modulus != residue {
                    std::hint::spin_loop();
                }
            }
            WaitMode::Target(target) => {
                while header.version.load(Ordering::Acquire) != target {
                    std::hint::spin_loop();
                }
            }
            WaitMode::Custom(cond) => {
                while !cond(header.version.load(Ordering::Acquire)) {
                    std::hint::spin_loop();
                }
            }
        }
    }

    /// Take the turn: wait for `mode`, then spin-CAS `claimed` from
    /// `version` to `version + 1`. Returns once the turn is exclusively
    /// ours; the acquire pairs with the peer's committing release.
    pub fn claim(&self, mode: WaitMode) {
        self.wait(mode);
        let header = self.header();
        loop {
            let version = header.version.load(Ordering::Acquire);
            if header
                .claimed
                .compare_exchange_weak(
                    version,
                    version.wrapping_add(1),
                    Ordering::AcqRel,
                    Ordering::Relaxed,
                )
                .is_ok()
            {
                tracing::trace!(id = self.id, version, "turn claimed");
                return;
            }
            std::hint::spin_loop();
        }
    }

    /// Finalize a write turn: advance `version` to match `claimed`. The
    /// release publishes every payload write made during the turn. Must only
    /// be called while holding the claim; anything else is a protocol
    /// violation and fatal.
    pub fn commit(&self) {
        let header = self.header();
        let next = header.claimed.load(Ordering::Acquire);
        let held = next.wrapping_sub(1);
        if header
            .version
            .compare_exchange(held, next, Ordering::AcqRel, Ordering::Relaxed)
            .is_err()
        {
            fatal!("slot {}: commit without a held claim", self.id);
        }
        tracing::trace!(id = self.id, version = next, "turn committed");
    }

    /// End a read turn: retract `claimed` back to `version`, leaving the
    /// version untouched. Must only be called while holding the claim.
    pub fn rollback(&self) {
        let header = self.header();
        let version = header.version.load(Ordering::Acquire);
        if header
            .claimed
            .compare_exchange(
                version.wrapping_add(1),
                version,
                Ordering::AcqRel,
                Ordering::Relaxed,
            )
            .is_err()
        {
            fatal!("slot {}: rollback without a held claim", self.id);
        }
        tracing::trace!(id = self.id, version, "turn rolled back");
    }

    /// An empty write turn: claim immediately and commit, advancing the
    /// version by one without touching the payload.
    pub fn bump(&self) {
        self.claim(WaitMode::Immediate);
        self.commit();
    }

    /// Flip the advisory shutdown flag. Idempotent; independent of the
    /// version protocol.
    pub fn set_finished(&self) {
        let _ = self.header().finished.compare_exchange(
            0,
            1,
            Ordering::AcqRel,
            Ordering::Relaxed,
        );
    }

    /// Whether the peer has flipped the shutdown flag. Advisory only: it
    /// does not interrupt a spin already in progress.
    #[inline]
    pub fn is_finished(&self) -> bool {
        self.header().finished.load(Ordering::Acquire) != 0
    }

    /// Snapshot of the handshake bytes, for diagnostics.
    pub fn status(&self) -> SlotStatus {
        let header = self.header();
        SlotStatus {
            version: header.version.load(Ordering::Acquire),
            claimed: header.claimed.load(Ordering::Acquire),
            finished: header.finished.load(Ordering::Acquire) != 0,
        }
    }
}

/// Snapshot of a slot's handshake state.
#[derive(Debug, Clone, Copy)]
pub struct SlotStatus {
    pub version: u8,
    pub claimed: u8,
    pub finished: bool,
}

impl SlotStatus {
    /// `claimed - version (mod 256)`; 0 when idle, 1 while a turn is held.
    pub fn claim_delta(&self) -> u8 {
        self.claimed.wrapping_sub(self.version)
    }
}

impl std::fmt::Display for SlotStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "version={} claimed={}{}",
            self.version,
            self.claimed,
            if self.finished { " finished" } else { "" }
        )
    }
}
