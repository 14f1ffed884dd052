//! Turn orchestration.
//!
//! A single-consumer loop over a FIFO of queued turns. Each turn carries an
//! effective conversation mode (permission policy plus model); a mode-hash
//! change disposes the running agent session and hands the turn to a fresh
//! one. The loop also owns the per-turn accumulators (reasoning, diff
//! dedup) and the permission mediator resets that keep requests from
//! leaking across turns.

pub mod backend;
pub mod mode;
pub mod turn_loop;

pub use backend::{AcpBackend, SessionBackend};
pub use mode::{ModeOverride, TurnMode};
pub use turn_loop::{Orchestrator, Turn, TurnCommand};
