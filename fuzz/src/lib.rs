//! Pure in-memory models of the tandem protocols.
//!
//! These mirror the shared-memory state machines without any shared memory,
//! spinning, or atomics, so property tests can drive arbitrary operation
//! sequences and check invariants after every step.

pub mod pool_model;
pub mod slot_model;
