//! Agent Client Protocol (ACP) stream handling.
//!
//! This module manages bidirectional NDJSON stream communication with the
//! agent subprocess. Frames are newline-delimited JSON-RPC 2.0 messages over
//! the child's stdio.
//!
//! Submodules:
//! - `codec`: [`LinesCodec`](tokio_util::codec::LinesCodec)-based framing
//!   that validates JSON and drops incidental diagnostic lines.
//! - `rpc`: request/response correlation, outbound notifications, and
//!   inbound routing for the session pump.
//! - `protocol`: serde model of the ACP payloads the bridge exchanges.

pub mod codec;
pub mod protocol;
pub mod rpc;
