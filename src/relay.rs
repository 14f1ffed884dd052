//! Upstream relay abstraction.
//!
//! The [`RelayTransport`] trait decouples the bridge core (session, policy,
//! orchestrator) from whatever carries normalized events to the remote UI.
//! All outbound traffic routes through this trait; the binary ships an NDJSON
//! stdout implementation, tests substitute a recording one.

use std::future::Future;
use std::pin::Pin;

use serde::Serialize;
use serde_json::Value;

use crate::acp::protocol::PermissionOption;
use crate::Result;

/// Normalized events delivered to the upstream relay.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum OutboundEvent {
    /// Streamed model output text.
    MessageDelta {
        /// Chunk of model output.
        text: String,
    },
    /// A tool invocation started (real or synthetic).
    ToolCall {
        /// Invocation identifier.
        id: String,
        /// Resolved tool name.
        name: String,
        /// Raw input arguments, when reported.
        #[serde(skip_serializing_if = "Option::is_none")]
        input: Option<Value>,
    },
    /// A tool invocation finished.
    ToolCallResult {
        /// Invocation identifier.
        id: String,
        /// Resolved tool name.
        name: String,
        /// Terminal status (`completed`, `failed`, `cancelled`).
        status: String,
        /// Result text, when available.
        #[serde(skip_serializing_if = "Option::is_none")]
        output: Option<String>,
        /// Error description for failed invocations.
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// Human-readable status or classified error message.
    Status {
        /// Message text.
        message: String,
    },
    /// A permission decision is needed from the remote operator.
    PermissionRequest {
        /// Correlation id for the eventual response.
        id: String,
        /// Resolved tool name.
        tool_name: String,
        /// Invocation awaiting authorization.
        tool_call_id: String,
        /// Candidate answers offered by the agent.
        options: Vec<PermissionOption>,
    },
    /// The conversation entered or left the "thinking" state.
    Thinking {
        /// Whether the agent is currently working on a turn.
        active: bool,
    },
    /// Plain reasoning text that never produced a titled section.
    ReasoningNote {
        /// The reasoning text.
        text: String,
    },
    /// A deduplicated file change.
    FileEdit {
        /// Target file path.
        path: String,
        /// Unified diff text.
        diff: String,
    },
    /// Token usage snapshot reported by the agent.
    TokenCount {
        /// Raw usage payload; the relay schema owns its interpretation.
        usage: Value,
    },
    /// No turns queued and nothing in flight.
    Ready,
}

/// Transport carrying normalized events to the remote party.
///
/// Methods return boxed futures so the trait stays object-safe; the
/// orchestrator holds it as `Arc<dyn RelayTransport>`.
pub trait RelayTransport: Send + Sync {
    /// Deliver one normalized event upstream.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Relay`](crate::AppError::Relay) if the transport
    /// cannot deliver the event.
    fn send_event(
        &self,
        event: OutboundEvent,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Keep-alive heartbeat with the current busy flag.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Relay`](crate::AppError::Relay) on delivery failure.
    fn keepalive(&self, busy: bool) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Flush and close the transport. Called once during kill.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Relay`](crate::AppError::Relay) on flush failure.
    fn close(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}
