//! Shared record definitions for the A-plus-B demo.
//!
//! Run the pair from two shells (creator first):
//!
//! ```text
//! cargo run --bin apb_sim
//! cargo run --bin apb_agent
//! ```
//!
//! `TANDEM_SHM_KEY` / `TANDEM_SHM_SIZE` select the segment; both sides must
//! agree.

use bytemuck::{Pod, Zeroable};

/// Slot id the demo channel registers under.
pub const APB_CHANNEL: u16 = 1;

/// Rounds the simulator drives before signalling shutdown.
pub const ROUNDS: u32 = 10_000;

/// Two operands, simulator → agent.
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
#[repr(C)]
pub struct ApbEnv {
    pub a: u32,
    pub b: u32,
}

/// The sum, agent → simulator.
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
#[repr(C)]
pub struct ApbAct {
    pub c: u32,
}
