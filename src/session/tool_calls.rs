//! Per-call tool tracking with category timeouts and identity repair.
//!
//! The agent reports many distinct tools under a generic label, so the first
//! sighting of a call runs a name-resolution heuristic over the call id, the
//! JSON-encoded arguments, and the raw payload. The heuristic is an isolated
//! pure function ([`resolve_tool_name`]) — a known workaround for an
//! upstream protocol gap, kept separate from protocol-correct dispatch so it
//! can be removed if the agent starts reporting canonical names.
//!
//! Every active call carries a category timeout armed in a
//! [`DelayQueue`]; expiry force-removes the call so a stuck or unreported
//! invocation can never block idle detection indefinitely.

use std::collections::HashMap;
use std::time::Duration;

use futures_util::StreamExt;
use serde_json::Value;
use tokio::time::Instant;
use tokio_util::time::delay_queue::{DelayQueue, Key};
use tracing::{debug, warn};

/// Timeout for investigation-class tools (long codebase exploration).
pub const INVESTIGATION_TIMEOUT: Duration = Duration::from_secs(600);
/// Timeout for the think tool.
pub const THINK_TIMEOUT: Duration = Duration::from_secs(30);
/// Timeout for every other tool.
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(120);

/// Identifier fragments of tools the agent misreports under a generic label.
const KNOWN_FRAGMENTS: &[&str] = &["investigator", "change_title", "save_memory", "think"];

/// Context amending the heuristic for one resolution.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResolveContext {
    /// This is the very first tool call since the current prompt was sent.
    pub first_call_of_turn: bool,
    /// The current prompt itself carried a title-change instruction.
    pub prompt_requested_title_change: bool,
}

/// Resolve a canonical tool name for a call the agent reported.
///
/// Preference order:
/// 1. an explicit name (`title`) from the notification;
/// 2. a known identifier fragment inside the call id;
/// 3. the same fragments inside the JSON-encoded arguments, then inside the
///    raw protocol payload;
/// 4. only for the first call after a prompt that itself requested a title
///    change, and only when the call carries no arguments: the title-change
///    tool;
/// 5. the raw kind, else the generic `"tool"` label.
#[must_use]
pub fn resolve_tool_name(
    id: &str,
    kind: Option<&str>,
    explicit: Option<&str>,
    raw_input: Option<&Value>,
    raw_payload: &Value,
    ctx: ResolveContext,
) -> String {
    if let Some(name) = explicit {
        let trimmed = name.trim();
        if !trimmed.is_empty() {
            return trimmed.to_owned();
        }
    }

    let id_lower = id.to_ascii_lowercase();
    if let Some(fragment) = KNOWN_FRAGMENTS.iter().find(|f| id_lower.contains(**f)) {
        return (*fragment).to_owned();
    }

    let args_text = raw_input
        .map(|v| v.to_string().to_ascii_lowercase())
        .unwrap_or_default();
    if let Some(fragment) = KNOWN_FRAGMENTS.iter().find(|f| args_text.contains(**f)) {
        return (*fragment).to_owned();
    }

    let payload_text = raw_payload.to_string().to_ascii_lowercase();
    if let Some(fragment) = KNOWN_FRAGMENTS.iter().find(|f| payload_text.contains(**f)) {
        return (*fragment).to_owned();
    }

    let has_args = raw_input.is_some_and(|v| !v.is_null() && *v != Value::Object(serde_json::Map::new()));
    if ctx.first_call_of_turn && ctx.prompt_requested_title_change && !has_args {
        return "change_title".to_owned();
    }

    kind.map_or_else(|| "tool".to_owned(), str::to_owned)
}

/// Category timeout for a resolved tool name.
#[must_use]
pub fn timeout_for(name: &str) -> Duration {
    let lower = name.to_ascii_lowercase();
    if lower.contains("investigator") || lower.contains("investigation") {
        INVESTIGATION_TIMEOUT
    } else if lower.contains("think") {
        THINK_TIMEOUT
    } else {
        DEFAULT_TOOL_TIMEOUT
    }
}

/// One tracked tool invocation.
#[derive(Debug)]
pub struct ActiveToolCall {
    /// Resolved canonical name.
    pub name: String,
    /// Raw kind label as reported.
    pub raw_kind: Option<String>,
    /// When the call was first sighted.
    pub started_at: Instant,
    /// Timer key for cancellation on terminal status.
    timer_key: Key,
}

/// Active-call set with one cancellable timer per call.
///
/// The active-call **count**, not call identity, gates idle detection;
/// multiple concurrent calls are supported. All timers route through
/// [`next_timeout`](Self::next_timeout) on the session's single pump task,
/// so no locking is needed.
#[derive(Debug, Default)]
pub struct ToolCallTracker {
    active: HashMap<String, ActiveToolCall>,
    timers: DelayQueue<String>,
}

impl ToolCallTracker {
    /// Create an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `id` is currently tracked.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.active.contains_key(id)
    }

    /// Number of active calls.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Track a call under `name` with its category timeout.
    ///
    /// A call id is tracked at most once; re-inserting an already tracked id
    /// is a no-op.
    pub fn insert(&mut self, id: &str, name: &str, raw_kind: Option<String>) {
        if self.active.contains_key(id) {
            return;
        }
        let timeout = timeout_for(name);
        let timer_key = self.timers.insert(id.to_owned(), timeout);
        self.active.insert(
            id.to_owned(),
            ActiveToolCall {
                name: name.to_owned(),
                raw_kind,
                started_at: Instant::now(),
                timer_key,
            },
        );
        debug!(
            tool_call_id = id,
            name,
            timeout_secs = timeout.as_secs(),
            "tool call tracked"
        );
    }

    /// Remove a call on terminal status, cancelling its timer.
    pub fn finish(&mut self, id: &str) -> Option<ActiveToolCall> {
        let call = self.active.remove(id)?;
        self.timers.remove(&call.timer_key);
        Some(call)
    }

    /// Remove a call whose timer already fired (no timer to cancel).
    pub fn expire(&mut self, id: &str) -> Option<ActiveToolCall> {
        let call = self.active.remove(id)?;
        warn!(
            tool_call_id = id,
            name = %call.name,
            elapsed_secs = call.started_at.elapsed().as_secs(),
            "tool call timed out, force-removing"
        );
        Some(call)
    }

    /// Await the next tool timeout, yielding the expired call id.
    ///
    /// Pends forever while no timers are armed; the caller's `select!`
    /// re-polls after any insertion.
    pub async fn next_timeout(&mut self) -> String {
        loop {
            if self.timers.is_empty() {
                futures_util::future::pending::<()>().await;
            }
            if let Some(expired) = self.timers.next().await {
                return expired.into_inner();
            }
        }
    }

    /// Drop every call and timer. Runs on dispose and session reset.
    pub fn clear(&mut self) {
        let count = self.active.len();
        self.active.clear();
        self.timers.clear();
        if count > 0 {
            debug!(count, "tool tracker cleared");
        }
    }
}
