//! tandem-shm: two-process data exchange over one shared-memory segment.
//!
//! Two independent OS processes — typically a simulation engine and an
//! external analysis or control process — exchange fixed-layout records
//! through a single System V segment, with no mutex, semaphore, or socket.
//! Synchronization is compare-and-swap plus spin-wait, end to end.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │  Payload regions (bump-allocated upward from offset 0)               │
//! │    - raw regions, slot-bearing regions, exchange vars                │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │  Free space                                                          │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │  Control blocks (12 bytes each, growing downward)                    │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │  Directory header (16 bytes at the tail)                             │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! - [`pool::ShmPool`] owns the segment: a bump allocator for payload
//!   regions and a self-describing directory each attacher discovers
//!   independently.
//! - [`slot::Slot`] is the handshake primitive: a one-byte version counter
//!   and a one-byte claim counter implementing exclusive turns with
//!   exactly-once delivery.
//! - [`channel::Channel`] binds a slot to named payload regions and a wait
//!   predicate; [`typed::PairChannel`] and [`typed::TernaryChannel`] are its
//!   compile-time-typed shapes.
//!
//! # Example
//!
//! ```no_run
//! use tandem_shm::pool::{PoolConfig, ShmPool};
//! use tandem_shm::typed::PairChannel;
//!
//! #[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
//! #[repr(C)]
//! struct Request {
//!     a: u32,
//!     b: u32,
//! }
//!
//! #[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
//! #[repr(C)]
//! struct Response {
//!     sum: u32,
//!     _pad: u32,
//! }
//!
//! let pool = ShmPool::open(PoolConfig::from_env()).expect("segment");
//! let mut chan = PairChannel::<Request, Response>::new(&pool, 1);
//! chan.set_condition(2, 0);
//!
//! chan.request_mut().a = 2;
//! chan.request_mut().b = 3;
//! chan.set_completed(); // peer's turn
//! ```
//!
//! # Fatality
//!
//! Allocation errors (id reuse with a different size, pool exhaustion) and
//! protocol-invariant violations (a completion CAS that cannot succeed) are
//! fatal: the shared state can no longer be trusted, so the process logs a
//! diagnostic and dies. Only OS-level open errors come back as `Result`s.
//! Waits have no timeout — jointly unsatisfiable predicates spin forever.

#![forbid(unsafe_op_in_unsafe_fn)]

/// Log a diagnostic and terminate: used for the error classes the protocol
/// cannot recover from.
macro_rules! fatal {
    ($($arg:tt)*) => {{
        tracing::error!($($arg)*);
        panic!($($arg)*);
    }};
}

pub(crate) use fatal;

pub mod channel;
pub mod layout;
pub mod pool;
pub mod region;
pub mod segment;
pub mod slot;
pub mod typed;
pub mod var;

pub use channel::Channel;
pub use pool::{PoolConfig, ShmPool};
pub use region::{Payload, RawRegion, Region};
pub use segment::{Segment, SegmentError};
pub use slot::{Slot, SlotStatus, WaitMode};
pub use typed::{PairChannel, TernaryChannel};
pub use var::ExchangeVar;
