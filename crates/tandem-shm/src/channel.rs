//! Channels: a slot bound to named payload regions and a wait predicate.
//!
//! A channel is a stateless veneer over one registered slot — it can be
//! reconstructed from the id at any time — plus one piece of process-local
//! state: the `holding` flag that remembers whether this side currently owns
//! the turn. Accessors claim the turn on first touch; one completion call
//! ends it. [`Channel::set_completed`] commits (write turn, version
//! advances); [`Channel::get_completed`] rolls back (read turn, version
//! unchanged). Pairing the wrong completion with a turn desynchronizes the
//! version parity between the two sides — the completion choice is the
//! caller's statement of intent, not something the channel can infer.
//!
//! Region offsets are computed once at construction from the declared region
//! sizes, each region starting 8-byte aligned, in declaration order.

use std::cell::Cell;
use std::sync::Arc;

use crate::layout::align_up;
use crate::layout::REGION_ALIGN;
use crate::pool::ShmPool;
use crate::region::RawRegion;
use crate::slot::{Slot, SlotStatus, WaitMode};

/// An untyped channel: one slot, `n` byte regions, a configured predicate.
///
/// Deliberately `!Sync`: a channel endpoint is a single logical turn-taker.
pub struct Channel {
    slot: Slot,
    regions: Vec<RawRegion>,
    mode: WaitMode,
    holding: Cell<bool>,
    finish_on_drop: bool,
}

impl Channel {
    /// Register (or re-attach to) slot `id` sized for `region_sizes` and
    /// bind one region per entry. The registered payload size is the aligned
    /// sum of the declared sizes, so both sides must declare identical
    /// regions in identical order.
    pub fn new(pool: &Arc<ShmPool>, id: u16, region_sizes: &[usize]) -> Self {
        let mut offsets = Vec::with_capacity(region_sizes.len());
        let mut cursor = 0usize;
        for &size in region_sizes {
            let start = align_up(cursor, REGION_ALIGN);
            offsets.push((start, size));
            cursor = start + size;
        }
        let total = align_up(cursor, REGION_ALIGN);

        let slot = pool.register_slot(id, total as u32);
        let payload = slot.payload();
        let regions = offsets
            .into_iter()
            .map(|(start, size)| payload.subregion(start, size))
            .collect();

        Self {
            slot,
            regions,
            mode: WaitMode::Immediate,
            holding: Cell::new(false),
            finish_on_drop: false,
        }
    }

    /// Set the default predicate for all unqualified accessor calls to a
    /// residue class of the version.
    pub fn set_condition(&mut self, modulus: u8, residue: u8) {
        self.mode = WaitMode::Residue { modulus, residue };
    }

    /// Set the default predicate to a custom function of the version.
    pub fn set_condition_fn(&mut self, cond: fn(u8) -> bool) {
        self.mode = WaitMode::Custom(cond);
    }

    /// The currently configured default predicate.
    #[inline]
    pub fn wait_mode(&self) -> WaitMode {
        self.mode
    }

    /// Claim the turn with the configured predicate, unless already held.
    pub fn acquire_default(&self) {
        self.acquire(self.mode);
    }

    /// Claim the turn when the version reaches `target`, unless already held.
    pub fn acquire_target(&self, target: u8) {
        self.acquire(WaitMode::Target(target));
    }

    /// Claim the turn when `cond(version)` holds, unless already held.
    pub fn acquire_when(&self, cond: fn(u8) -> bool) {
        self.acquire(WaitMode::Custom(cond));
    }

    fn acquire(&self, mode: WaitMode) {
        if !self.holding.get() {
            self.slot.claim(mode);
            self.holding.set(true);
        }
    }

    /// Number of bound regions.
    #[inline]
    pub fn region_count(&self) -> usize {
        self.regions.len()
    }

    /// The raw handle for region `index`.
    pub fn region(&self, index: usize) -> &RawRegion {
        &self.regions[index]
    }

    /// Read view of region `index`, claiming with the configured predicate
    /// if the turn is not already held.
    pub fn bytes(&self, index: usize) -> &[u8] {
        self.acquire_default();
        // SAFETY: we hold the turn; the peer's claim cannot succeed until a
        // completion call, which needs `&mut self` and therefore outlives no
        // borrow returned here.
        unsafe { self.regions[index].bytes() }
    }

    /// Write view of region `index`, claiming like [`Channel::bytes`].
    pub fn bytes_mut(&mut self, index: usize) -> &mut [u8] {
        self.acquire_default();
        let region = &self.regions[index];
        // SAFETY: as in `bytes`, plus `&mut self` makes this view unique
        // within this process.
        unsafe { std::slice::from_raw_parts_mut(region.as_ptr(), region.len()) }
    }

    /// Finish a write turn: commit, advancing the version. No-op if the
    /// turn is not held.
    pub fn set_completed(&mut self) {
        if self.holding.get() {
            self.slot.commit();
            self.holding.set(false);
        }
    }

    /// Finish a read turn: roll back, leaving the version unchanged. No-op
    /// if the turn is not held.
    pub fn get_completed(&mut self) {
        if self.holding.get() {
            self.slot.rollback();
            self.holding.set(false);
        }
    }

    /// Whether this endpoint currently holds the turn.
    #[inline]
    pub fn is_holding(&self) -> bool {
        self.holding.get()
    }

    /// Current committed version of the underlying slot.
    #[inline]
    pub fn version(&self) -> u8 {
        self.slot.version()
    }

    /// Flip the advisory shutdown flag for the peer to poll.
    pub fn set_finished(&self) {
        self.slot.set_finished();
    }

    /// Whether the peer has flipped the shutdown flag.
    #[inline]
    pub fn is_finished(&self) -> bool {
        self.slot.is_finished()
    }

    /// Arrange for the shutdown flag to flip when this channel drops. Off by
    /// default: only the producing side should signal shutdown.
    pub fn finish_on_drop(&mut self, yes: bool) {
        self.finish_on_drop = yes;
    }

    /// Handshake snapshot of the underlying slot.
    pub fn status(&self) -> SlotStatus {
        self.slot.status()
    }

    /// The underlying slot.
    pub fn slot(&self) -> &Slot {
        &self.slot
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        if self.finish_on_drop {
            self.slot.set_finished();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::ShmPool;

    fn pair_of_channels(sizes: &[usize]) -> (Channel, Channel) {
        let (a, b) = ShmPool::heap_pair(4096);
        (Channel::new(&a, 1, sizes), Channel::new(&b, 1, sizes))
    }

    #[test]
    fn test_regions_are_laid_out_in_order() {
        let (chan, _peer) = pair_of_channels(&[3, 16, 5]);
        assert_eq!(chan.region_count(), 3);
        let base = chan.region(0).offset();
        assert_eq!(chan.region(1).offset(), base + 8);
        assert_eq!(chan.region(2).offset(), base + 24);
        assert_eq!(chan.region(2).len(), 5);
    }

    #[test]
    fn test_accessors_share_one_turn() {
        let (mut chan, _peer) = pair_of_channels(&[8, 8]);
        chan.bytes_mut(0)[0] = 1;
        assert!(chan.is_holding());
        // Second accessor re-uses the held turn; the version has not moved.
        chan.bytes_mut(1)[0] = 2;
        assert_eq!(chan.version(), 0);
        chan.set_completed();
        assert!(!chan.is_holding());
        assert_eq!(chan.version(), 1);
    }

    #[test]
    fn test_write_then_read_round_trip() {
        let (mut writer, mut reader) = pair_of_channels(&[8]);
        writer.bytes_mut(0).copy_from_slice(&[9, 8, 7, 6, 5, 4, 3, 2]);
        writer.set_completed();

        assert_eq!(reader.bytes(0), &[9, 8, 7, 6, 5, 4, 3, 2]);
        reader.get_completed();
        // A read turn leaves the version alone.
        assert_eq!(reader.version(), 1);
    }

    #[test]
    fn test_completion_without_turn_is_noop() {
        let (mut chan, _peer) = pair_of_channels(&[8]);
        chan.set_completed();
        chan.get_completed();
        assert_eq!(chan.version(), 0);
    }

    #[test]
    fn test_finish_on_drop() {
        let (mut chan, peer) = pair_of_channels(&[8]);
        chan.finish_on_drop(true);
        assert!(!peer.is_finished());
        drop(chan);
        assert!(peer.is_finished());
    }

    #[test]
    fn test_channel_is_reconstructible_from_id() {
        let (a, _b) = ShmPool::heap_pair(4096);
        let mut chan = Channel::new(&a, 5, &[8]);
        chan.bytes_mut(0)[0] = 42;
        chan.set_completed();
        drop(chan);

        let again = Channel::new(&a, 5, &[8]);
        assert_eq!(again.version(), 1);
    }
}
