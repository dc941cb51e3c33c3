//! Typed channel instantiations.
//!
//! Thin parameter bindings over [`Channel`]: a fixed set of named regions
//! with compile-time-typed accessors instead of raw byte views. No protocol
//! logic of their own. Region record types must satisfy [`Payload`] — in
//! practice `#[repr(C)]` plus `#[derive(Clone, Copy, bytemuck::Pod,
//! bytemuck::Zeroable)]` — and be compiled identically on both sides.

use std::sync::Arc;

use crate::channel::Channel;
use crate::pool::ShmPool;
use crate::region::{Payload, Region};
use crate::slot::SlotStatus;

/// Accessor family for one named region: read and write views, each with
/// default-predicate, exact-target, and custom-predicate variants. Read
/// turns end with `get_completed`, write turns with `set_completed`.
macro_rules! region_accessors {
    ($region:ident, $ty:ident,
     $get:ident, $get_at:ident, $get_when:ident,
     $set:ident, $set_at:ident, $set_when:ident) => {
        /// Read view, claiming the turn with the configured predicate if it
        /// is not already held.
        pub fn $get(&self) -> &$ty {
            self.inner.acquire_default();
            // SAFETY: the turn is held until a completion call, which takes
            // `&mut self` and so cannot overlap this borrow; the region was
            // validated by the audited cast at construction.
            unsafe { &*self.$region.as_ptr() }
        }

        /// Read view, claiming when the version equals `target`.
        pub fn $get_at(&self, target: u8) -> &$ty {
            self.inner.acquire_target(target);
            // SAFETY: as above.
            unsafe { &*self.$region.as_ptr() }
        }

        /// Read view, claiming when `cond(version)` holds.
        pub fn $get_when(&self, cond: fn(u8) -> bool) -> &$ty {
            self.inner.acquire_when(cond);
            // SAFETY: as above.
            unsafe { &*self.$region.as_ptr() }
        }

        /// Write view, claiming the turn with the configured predicate if it
        /// is not already held.
        pub fn $set(&mut self) -> &mut $ty {
            self.inner.acquire_default();
            // SAFETY: as above, and `&mut self` makes this view unique
            // within this process.
            unsafe { &mut *self.$region.as_ptr() }
        }

        /// Write view, claiming when the version equals `target`.
        pub fn $set_at(&mut self, target: u8) -> &mut $ty {
            self.inner.acquire_target(target);
            // SAFETY: as above.
            unsafe { &mut *self.$region.as_ptr() }
        }

        /// Write view, claiming when `cond(version)` holds.
        pub fn $set_when(&mut self, cond: fn(u8) -> bool) -> &mut $ty {
            self.inner.acquire_when(cond);
            // SAFETY: as above.
            unsafe { &mut *self.$region.as_ptr() }
        }
    };
}

/// The configuration and completion surface shared by every typed channel.
macro_rules! channel_common {
    () => {
        /// Set the default predicate to a residue class of the version.
        pub fn set_condition(&mut self, modulus: u8, residue: u8) {
            self.inner.set_condition(modulus, residue);
        }

        /// Set the default predicate to a custom function of the version.
        pub fn set_condition_fn(&mut self, cond: fn(u8) -> bool) {
            self.inner.set_condition_fn(cond);
        }

        /// Finish a write turn: commit, advancing the version.
        pub fn set_completed(&mut self) {
            self.inner.set_completed();
        }

        /// Finish a read turn: roll back, leaving the version unchanged.
        pub fn get_completed(&mut self) {
            self.inner.get_completed();
        }

        /// Current committed version of the underlying slot.
        #[inline]
        pub fn version(&self) -> u8 {
            self.inner.version()
        }

        /// Whether this endpoint currently holds the turn.
        #[inline]
        pub fn is_holding(&self) -> bool {
            self.inner.is_holding()
        }

        /// Flip the advisory shutdown flag for the peer to poll.
        pub fn set_finished(&self) {
            self.inner.set_finished();
        }

        /// Whether the peer has flipped the shutdown flag.
        #[inline]
        pub fn is_finished(&self) -> bool {
            self.inner.is_finished()
        }

        /// Arrange for the shutdown flag to flip when this channel drops.
        pub fn finish_on_drop(&mut self, yes: bool) {
            self.inner.finish_on_drop(yes);
        }

        /// Handshake snapshot of the underlying slot.
        pub fn status(&self) -> SlotStatus {
            self.inner.status()
        }
    };
}

/// Two-region channel: a request record and a response record sharing one
/// slot. The usual cadence puts the requesting side on even version residues
/// and the responding side on odd ones.
pub struct PairChannel<Q: Payload, A: Payload> {
    inner: Channel,
    request: Region<Q>,
    response: Region<A>,
}

impl<Q: Payload, A: Payload> PairChannel<Q, A> {
    /// Register (or re-attach to) slot `id` shaped for `Q` then `A`.
    pub fn new(pool: &Arc<ShmPool>, id: u16) -> Self {
        let inner = Channel::new(
            pool,
            id,
            &[core::mem::size_of::<Q>(), core::mem::size_of::<A>()],
        );
        let request = inner.region(0).cast();
        let response = inner.region(1).cast();
        Self {
            inner,
            request,
            response,
        }
    }

    region_accessors!(
        request, Q, request, request_at, request_when, request_mut, request_mut_at,
        request_mut_when
    );
    region_accessors!(
        response, A, response, response_at, response_when, response_mut, response_mut_at,
        response_mut_when
    );
    channel_common!();
}

/// Three-region channel: feature, prediction, and side-target records
/// sharing one slot — the model-serving shape, where one side publishes
/// features and the other returns predictions (and optionally a training
/// target alongside).
pub struct TernaryChannel<F: Payload, P: Payload, T: Payload> {
    inner: Channel,
    feature: Region<F>,
    prediction: Region<P>,
    target: Region<T>,
}

impl<F: Payload, P: Payload, T: Payload> TernaryChannel<F, P, T> {
    /// Register (or re-attach to) slot `id` shaped for `F`, `P`, then `T`.
    pub fn new(pool: &Arc<ShmPool>, id: u16) -> Self {
        let inner = Channel::new(
            pool,
            id,
            &[
                core::mem::size_of::<F>(),
                core::mem::size_of::<P>(),
                core::mem::size_of::<T>(),
            ],
        );
        let feature = inner.region(0).cast();
        let prediction = inner.region(1).cast();
        let target = inner.region(2).cast();
        Self {
            inner,
            feature,
            prediction,
            target,
        }
    }

    region_accessors!(
        feature, F, feature, feature_at, feature_when, feature_mut, feature_mut_at,
        feature_mut_when
    );
    region_accessors!(
        prediction, P, prediction, prediction_at, prediction_when, prediction_mut,
        prediction_mut_at, prediction_mut_when
    );
    region_accessors!(
        target, T, target, target_at, target_when, target_mut, target_mut_at, target_mut_when
    );
    channel_common!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytemuck::{Pod, Zeroable};

    #[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
    #[repr(C)]
    struct Observation {
        sinr: f64,
        mcs: u32,
        retries: u32,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
    #[repr(C)]
    struct Action {
        next_mcs: u32,
        power: u32,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
    #[repr(C)]
    struct Reward {
        value: f64,
    }

    fn pools() -> (Arc<ShmPool>, Arc<ShmPool>) {
        ShmPool::heap_pair(4096)
    }

    #[test]
    fn test_pair_round_trip() {
        let (pa, pb) = pools();
        let mut writer = PairChannel::<Observation, Action>::new(&pa, 1);
        let mut reader = PairChannel::<Observation, Action>::new(&pb, 1);

        *writer.request_mut() = Observation {
            sinr: 17.25,
            mcs: 7,
            retries: 1,
        };
        writer.set_completed();

        assert_eq!(
            *reader.request(),
            Observation {
                sinr: 17.25,
                mcs: 7,
                retries: 1,
            }
        );
        reader.get_completed();
        assert_eq!(reader.version(), 1);
    }

    #[test]
    fn test_pair_both_regions_one_turn() {
        let (pa, _pb) = pools();
        let mut chan = PairChannel::<Observation, Action>::new(&pa, 1);

        chan.request_mut().mcs = 3;
        chan.response_mut().next_mcs = 4;
        assert!(chan.is_holding());
        chan.set_completed();
        assert_eq!(chan.version(), 1);

        assert_eq!(chan.request().mcs, 3);
        assert_eq!(chan.response().next_mcs, 4);
        chan.get_completed();
        assert_eq!(chan.version(), 1);
    }

    #[test]
    fn test_ternary_round_trip() {
        let (pa, pb) = pools();
        let mut model = TernaryChannel::<Observation, Action, Reward>::new(&pa, 9);
        let mut sim = TernaryChannel::<Observation, Action, Reward>::new(&pb, 9);

        *sim.feature_mut() = Observation {
            sinr: -3.5,
            mcs: 0,
            retries: 9,
        };
        *sim.target_mut() = Reward { value: 0.5 };
        sim.set_completed();

        assert_eq!(model.feature_at(1).retries, 9);
        assert_eq!(model.target().value, 0.5);
        model.prediction_mut().next_mcs = 1;
        model.set_completed();
        assert_eq!(model.version(), 2);

        assert_eq!(sim.prediction().next_mcs, 1);
        sim.get_completed();
    }

    #[test]
    fn test_configured_residue_gates_unqualified_accessors() {
        let (pa, _pb) = pools();
        let mut chan = PairChannel::<Observation, Action>::new(&pa, 2);
        chan.set_condition(2, 0);
        // Version 0 satisfies residue 0, so this does not spin.
        chan.request_mut().retries = 2;
        chan.set_completed();
        // Version is now 1; a target-qualified call can still proceed.
        assert_eq!(chan.request_at(1).retries, 2);
        chan.get_completed();
    }

    #[test]
    fn test_min_sized_regions() {
        #[derive(Clone, Copy, Pod, Zeroable)]
        #[repr(C)]
        struct Byte {
            b: u8,
        }
        let (pa, pb) = pools();
        let mut w = PairChannel::<Byte, Byte>::new(&pa, 3);
        let mut r = PairChannel::<Byte, Byte>::new(&pb, 3);
        w.request_mut().b = 0xEE;
        w.set_completed();
        assert_eq!(r.request().b, 0xEE);
        r.get_completed();
    }
}
