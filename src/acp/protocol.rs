//! Serde model of the ACP wire messages the bridge exchanges.
//!
//! The agent speaks JSON-RPC 2.0 over NDJSON. Inbound `session/update`
//! notifications carry one payload shape with many optional sub-shapes; they
//! are modeled here as a closed, internally tagged enum so dispatch is
//! exhaustive per subtype. Unknown subtypes deserialize into
//! [`SessionUpdate::Unknown`] and are logged and ignored by the session,
//! never silently dropped without trace.
//!
//! Field names follow the wire casing (camelCase) via serde renames.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// ACP protocol version declared during the `initialize` handshake.
pub const PROTOCOL_VERSION: u32 = 1;

// ── Handshake ────────────────────────────────────────────────────────────────

/// Result payload of the `initialize` request.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    /// Protocol version the agent settled on.
    pub protocol_version: Option<u32>,
    /// Capability set advertised by the agent. Kept loose; the bridge only
    /// logs it.
    #[serde(default)]
    pub agent_capabilities: Option<Value>,
}

/// Result payload of the `session/new` request.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSessionResult {
    /// Identifier of the freshly created conversation session.
    pub session_id: String,
}

/// Result payload of the `session/prompt` request.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptResult {
    /// Why the turn stopped (`end_turn`, `cancelled`, …).
    pub stop_reason: Option<String>,
    /// Optional token usage snapshot some agents attach to the response.
    #[serde(default)]
    pub usage: Option<Value>,
}

// ── Session updates ──────────────────────────────────────────────────────────

/// Parameters of an inbound `session/update` notification.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionNotification {
    /// Session the update belongs to.
    pub session_id: String,
    /// The typed update payload.
    pub update: SessionUpdate,
}

/// One `session/update` payload, discriminated by the `sessionUpdate` field.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "sessionUpdate", rename_all = "snake_case")]
pub enum SessionUpdate {
    /// Streamed model output text.
    AgentMessageChunk {
        /// Chunk content.
        content: ContentBlock,
    },
    /// Streamed reasoning ("thinking") text.
    AgentThoughtChunk {
        /// Chunk content.
        content: ContentBlock,
    },
    /// First sighting of a tool invocation.
    ToolCall(ToolCallUpdate),
    /// Status or content change for a known tool invocation.
    ToolCallUpdate(ToolCallUpdate),
    /// Agent-produced execution plan.
    Plan {
        /// Plan entries in agent-defined order.
        #[serde(default)]
        entries: Vec<PlanEntry>,
    },
    /// The agent switched its own operating mode.
    CurrentModeUpdate {
        /// Identifier of the mode now active on the agent side.
        #[serde(rename = "currentModeId")]
        current_mode_id: String,
    },
    /// The agent refreshed its slash-command catalog. Logged only.
    AvailableCommandsUpdate {
        /// Raw command list; the bridge does not interpret it.
        #[serde(default, rename = "availableCommands")]
        available_commands: Value,
    },
    /// Any subtype this bridge does not know. Logged and ignored.
    #[serde(other)]
    Unknown,
}

/// Shared body of `tool_call` and `tool_call_update` payloads.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallUpdate {
    /// Stable identifier of the invocation.
    pub tool_call_id: String,
    /// Human-readable title, when the agent provides one.
    #[serde(default)]
    pub title: Option<String>,
    /// Raw kind label (`read`, `edit`, `execute`, `other`, …).
    #[serde(default)]
    pub kind: Option<String>,
    /// Invocation status; absent means unchanged.
    #[serde(default)]
    pub status: Option<ToolCallStatus>,
    /// Raw input arguments as reported by the agent.
    #[serde(default)]
    pub raw_input: Option<Value>,
    /// Result content blocks, including diffs.
    #[serde(default)]
    pub content: Vec<ToolCallContent>,
}

/// Status of a tool invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    /// Reported but not yet running.
    Pending,
    /// Currently executing.
    InProgress,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
    /// Aborted before completion.
    Cancelled,
}

impl ToolCallStatus {
    /// Whether this status ends the invocation.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// One content block inside a tool-call result.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolCallContent {
    /// Nested regular content.
    Content {
        /// The wrapped block.
        content: ContentBlock,
    },
    /// A proposed or applied file change.
    Diff {
        /// Target file path.
        path: String,
        /// Previous file content, absent for file creation.
        #[serde(default, rename = "oldText")]
        old_text: Option<String>,
        /// New file content.
        #[serde(rename = "newText")]
        new_text: String,
    },
    /// Any block type the bridge does not interpret.
    #[serde(other)]
    Unknown,
}

/// A single prompt or message content block.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Plain text.
    Text {
        /// The text payload.
        text: String,
    },
    /// Any block type the bridge does not interpret.
    #[serde(other)]
    Unknown,
}

impl ContentBlock {
    /// Text payload of the block, empty for non-text blocks.
    #[must_use]
    pub fn text(&self) -> &str {
        match self {
            Self::Text { text } => text,
            Self::Unknown => "",
        }
    }
}

/// One entry of an agent plan update.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanEntry {
    /// Step description.
    pub content: String,
    /// Agent-reported priority, if any.
    #[serde(default)]
    pub priority: Option<String>,
    /// Agent-reported step status, if any.
    #[serde(default)]
    pub status: Option<String>,
}

// ── Permission RPC ───────────────────────────────────────────────────────────

/// Parameters of an inbound `session/request_permission` request.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionRequestParams {
    /// Session asking for authorization.
    pub session_id: String,
    /// The invocation awaiting authorization.
    pub tool_call: ToolCallUpdate,
    /// Candidate answers offered by the agent.
    #[serde(default)]
    pub options: Vec<PermissionOption>,
}

/// One selectable answer to a permission request.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionOption {
    /// Identifier echoed back in the selection reply.
    pub option_id: String,
    /// Display label.
    #[serde(default)]
    pub name: Option<String>,
    /// Option kind (`allow_once`, `allow_always`, `reject_once`, …).
    #[serde(default)]
    pub kind: Option<String>,
}

/// Build the result payload selecting `option_id`.
#[must_use]
pub fn permission_selected(option_id: &str) -> Value {
    serde_json::json!({ "outcome": { "outcome": "selected", "optionId": option_id } })
}

/// Build the result payload for a cancelled permission request.
#[must_use]
pub fn permission_cancelled() -> Value {
    serde_json::json!({ "outcome": { "outcome": "cancelled" } })
}

// ── Outbound request builders ────────────────────────────────────────────────

/// Parameters for the `initialize` request.
///
/// The client declares that it exposes no file-system capabilities; the agent
/// must route file access through its own tools.
#[must_use]
pub fn initialize_params() -> Value {
    serde_json::json!({
        "protocolVersion": PROTOCOL_VERSION,
        "clientCapabilities": {
            "fs": { "readTextFile": false, "writeTextFile": false }
        }
    })
}

/// Parameters for the `session/new` request rooted at `cwd`.
#[must_use]
pub fn new_session_params(cwd: &str) -> Value {
    serde_json::json!({ "cwd": cwd, "mcpServers": [] })
}

/// Parameters for a `session/prompt` request carrying a single text block.
#[must_use]
pub fn prompt_params(session_id: &str, text: &str) -> Value {
    serde_json::json!({
        "sessionId": session_id,
        "prompt": [ { "type": "text", "text": text } ]
    })
}

/// Parameters for a `session/cancel` notification.
#[must_use]
pub fn cancel_params(session_id: &str) -> Value {
    serde_json::json!({ "sessionId": session_id })
}
