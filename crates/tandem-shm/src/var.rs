//! Single-value exchange over a raw region.
//!
//! A lighter cousin of the slot handshake for scalar-sized data: one value
//! cell guarded by a pair of direction tags that flip between SETTABLE
//! (0x00) and READABLE (0xFF). Each endpoint publishes through its outbound
//! tag and consumes through its inbound tag; the two endpoints of a pair
//! must use mirrored mappings, so construct one side with
//! [`ExchangeVar::new`] and the other with [`ExchangeVar::peer`].
//!
//! No version counter and no turn claim: a direction's tag is a one-deep
//! baton. Like everything here, waiting is a plain spin with no timeout.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use crate::fatal;
use crate::layout::{align_up, REGION_ALIGN};
use crate::pool::ShmPool;
use crate::region::{Payload, RawRegion, Region};

/// Tag value: the owning direction may write.
pub const TAG_SETTABLE: u8 = 0x00;
/// Tag value: a value is ready to be consumed.
pub const TAG_READABLE: u8 = 0xFF;

/// Tag pair at the start of an exchange-var region (8 bytes); the value
/// cell follows 8-byte aligned.
#[repr(C, align(8))]
struct VarHeader {
    tag_rd: AtomicU8,
    tag_wt: AtomicU8,
    _pad: [u8; 6],
}

const VAR_HEADER_SIZE: usize = 8;
const _: () = assert!(core::mem::size_of::<VarHeader>() == VAR_HEADER_SIZE);

/// One endpoint of a single-value exchange.
pub struct ExchangeVar<T: Payload> {
    region: RawRegion,
    value: Region<T>,
    /// Which tag this endpoint publishes through.
    outbound_is_wt: bool,
}

impl<T: Payload> ExchangeVar<T> {
    /// Register (or re-attach to) the exchange region under `id`. The peer
    /// process must construct its endpoint with [`ExchangeVar::peer`].
    pub fn new(pool: &Arc<ShmPool>, id: u16) -> Self {
        Self::with_mapping(pool, id, true)
    }

    /// The mirrored endpoint: publishes through the tag [`ExchangeVar::new`]
    /// consumes from, and vice versa.
    pub fn peer(pool: &Arc<ShmPool>, id: u16) -> Self {
        Self::with_mapping(pool, id, false)
    }

    fn with_mapping(pool: &Arc<ShmPool>, id: u16, outbound_is_wt: bool) -> Self {
        let size = VAR_HEADER_SIZE + align_up(core::mem::size_of::<T>(), REGION_ALIGN);
        let region = pool.register(id, size as u32);
        let value = region
            .subregion(VAR_HEADER_SIZE, region.len() - VAR_HEADER_SIZE)
            .cast();
        Self {
            region,
            value,
            outbound_is_wt,
        }
    }

    fn header(&self) -> &VarHeader {
        // SAFETY: the region starts 8-aligned and is at least header-sized;
        // VarHeader is atomics plus padding.
        unsafe { &*(self.region.as_ptr() as *const VarHeader) }
    }

    fn outbound(&self) -> &AtomicU8 {
        let header = self.header();
        if self.outbound_is_wt {
            &header.tag_wt
        } else {
            &header.tag_rd
        }
    }

    fn inbound(&self) -> &AtomicU8 {
        let header = self.header();
        if self.outbound_is_wt {
            &header.tag_rd
        } else {
            &header.tag_wt
        }
    }

    /// Publish a value for the peer: spin until the previous one has been
    /// consumed, write, then flip the outbound tag to READABLE.
    pub fn set(&self, value: T) {
        let tag = self.outbound();
        while tag.load(Ordering::Acquire) != TAG_SETTABLE {
            std::hint::spin_loop();
        }
        // SAFETY: the SETTABLE tag means the peer is not reading this cell.
        unsafe { self.value.write(value) };
        if tag
            .compare_exchange(
                TAG_SETTABLE,
                TAG_READABLE,
                Ordering::AcqRel,
                Ordering::Relaxed,
            )
            .is_err()
        {
            fatal!("exchange var: outbound tag changed under us");
        }
    }

    /// Consume the value the peer published: spin until the inbound tag is
    /// READABLE, read, then flip it back to SETTABLE.
    pub fn get(&self) -> T {
        let tag = self.inbound();
        while tag.load(Ordering::Acquire) != TAG_READABLE {
            std::hint::spin_loop();
        }
        // SAFETY: the READABLE tag means the peer finished writing the cell.
        let value = unsafe { self.value.read() };
        if tag
            .compare_exchange(
                TAG_READABLE,
                TAG_SETTABLE,
                Ordering::AcqRel,
                Ordering::Relaxed,
            )
            .is_err()
        {
            fatal!("exchange var: inbound tag changed under us");
        }
        value
    }
}
