//! tandem: turn-taking shared-memory exchange between two processes.
//!
//! # Quick Start
//!
//! Declare the records both sides will exchange, open the pool, and bind a
//! typed channel:
//!
//! ```no_run
//! use tandem::prelude::*;
//!
//! #[derive(Clone, Copy, tandem::bytemuck::Pod, tandem::bytemuck::Zeroable)]
//! #[repr(C)]
//! struct Env {
//!     a: u32,
//!     b: u32,
//! }
//!
//! #[derive(Clone, Copy, tandem::bytemuck::Pod, tandem::bytemuck::Zeroable)]
//! #[repr(C)]
//! struct Act {
//!     c: u32,
//!     _pad: u32,
//! }
//!
//! let pool = ShmPool::open(PoolConfig::from_env()).expect("segment");
//! let mut chan = PairChannel::<Env, Act>::new(&pool, 1);
//! chan.set_condition(2, 0); // our turns: even versions
//!
//! chan.request_mut().a = 1;
//! chan.request_mut().b = 2;
//! chan.set_completed();
//!
//! let sum = chan.response().c; // claims our next even turn
//! chan.get_completed();
//! # let _ = sum;
//! ```
//!
//! The peer process runs the mirror image on residue 1. The record types
//! must be compiled bit-identically on both sides: `#[repr(C)]`, fixed
//! widths, no implicit padding — the `Pod` derive rejects padded layouts.

// Core types
pub use tandem_shm::{
    Channel, ExchangeVar, PairChannel, Payload, PoolConfig, RawRegion, Region, Segment,
    SegmentError, ShmPool, Slot, SlotStatus, TernaryChannel, WaitMode,
};

// Module access for the less-travelled paths (raw layout, segments).
pub use tandem_shm::{channel, layout, pool, region, segment, slot, typed, var};

// Re-export the layout-contract derives for record types.
pub use bytemuck;

/// Prelude module for convenient imports.
///
/// ```ignore
/// use tandem::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        Channel, ExchangeVar, PairChannel, Payload, PoolConfig, ShmPool, TernaryChannel, WaitMode,
    };
}
