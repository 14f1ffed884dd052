#![forbid(unsafe_code)]

//! Bridge between a local application and an ACP-speaking agent subprocess.
//!
//! The crate spawns an agent as a child process, speaks the Agent Client
//! Protocol (JSON-RPC 2.0 over NDJSON) with it, and relays a normalized
//! event stream upstream: message deltas, tool calls, diffs, reasoning
//! sections, and permission requests. Turns are serialized by the
//! [`orchestrator`]; permission policy lives in [`policy`].

pub mod acp;
pub mod config;
pub mod diff;
pub mod errors;
pub mod orchestrator;
pub mod policy;
pub mod prefs;
pub mod reasoning;
pub mod relay;
pub mod session;
pub mod stdio;

pub use config::BridgeConfig;
pub use errors::{AppError, Result};
