//! Agent Process Session.
//!
//! Owns the agent subprocess and its ACP conversation: spawn, the
//! initialize/new-session handshake, prompt submission, cancellation, and
//! idempotent disposal. Inbound `session/update` notifications are
//! translated into the normalized [`SessionEvent`] model consumed by the
//! turn orchestrator.
//!
//! Submodules:
//! - `spawner`: process spawning and stderr scanning.
//! - `agent_session`: the session state machine and its pump task.
//! - `updates`: `session/update` dispatch, idle debounce, tool routing.
//! - `tool_calls`: active-call tracking, timeouts, identity repair.
//! - `classify`: heuristic backend-error classification.

pub mod agent_session;
pub mod classify;
pub mod spawner;
pub mod tool_calls;
pub mod updates;

use serde_json::Value;

use crate::acp::protocol::PermissionOption;

/// Normalized events emitted by an agent session.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Streamed model output text.
    MessageChunk {
        /// Chunk of model output.
        text: String,
    },
    /// Streamed reasoning text (thought chunks and bold-title message
    /// fragments), to be fed to the reasoning accumulator.
    Thought {
        /// Reasoning fragment.
        text: String,
    },
    /// A tool invocation entered the active set.
    ToolCallStarted {
        /// Invocation identifier.
        id: String,
        /// Resolved canonical name.
        name: String,
        /// Raw input arguments, when reported.
        input: Option<Value>,
    },
    /// A tool invocation left the active set.
    ToolCallFinished {
        /// Invocation identifier.
        id: String,
        /// Resolved canonical name.
        name: String,
        /// Terminal status (`completed`, `failed`, `cancelled`).
        status: String,
        /// Extracted result text, when available.
        output: Option<String>,
        /// Extracted error description for failures.
        error: Option<String>,
    },
    /// A diff-bearing tool result touched a file.
    Diff {
        /// Target file path.
        path: String,
        /// Unified diff text.
        diff: String,
    },
    /// A permission decision could not be made by policy and awaits the
    /// remote operator.
    PermissionPending {
        /// Correlation id (the tool-call id).
        request_id: String,
        /// Resolved tool name.
        tool_name: String,
        /// Invocation awaiting authorization.
        tool_call_id: String,
        /// Candidate answers offered by the agent.
        options: Vec<PermissionOption>,
    },
    /// The agent published an execution plan.
    Plan {
        /// Rendered one-line-per-entry summary.
        summary: String,
    },
    /// Token usage reported with a prompt response.
    TokenUsage {
        /// Raw usage payload.
        usage: Value,
    },
    /// Classified or free-form status message.
    Status {
        /// Message text.
        message: String,
    },
    /// No model output pending and no tool call active.
    Idle,
    /// The session failed fatally (stream decode failure, process exit).
    Fatal {
        /// Human-readable cause.
        message: String,
    },
}

/// Fragments that mark a prompt as carrying a title-change instruction.
///
/// Feeds the tool-identity fallback: the first argument-less tool call after
/// such a prompt defaults to the title-change tool.
const TITLE_CHANGE_HINTS: &[&str] = &[
    "change_title",
    "change the title",
    "set the title",
    "update the title",
    "rename the conversation",
];

/// Whether a prompt text requests a conversation title change.
#[must_use]
pub fn prompt_requests_title_change(prompt: &str) -> bool {
    let lower = prompt.to_ascii_lowercase();
    TITLE_CHANGE_HINTS.iter().any(|hint| lower.contains(hint))
}
