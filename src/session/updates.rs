//! Inbound `session/update` dispatch.
//!
//! [`UpdateProcessor`] owns the per-session translation state: the active
//! tool-call set with its timers, the idle-debounce deadline, and the
//! permission plumbing. It runs exclusively on the session's pump task, so
//! all mutation happens on one logical flow and no locking is needed.
//!
//! Idle detection is heuristic: the transport delivers many small message
//! chunks with no explicit "message complete" marker, so a 500 ms debounce
//! timer is re-armed after every non-reasoning chunk. When it fires with no
//! tool call active, the turn is declared idle. Per-tool timers route
//! through the same idle check, bounding how long a stuck call can block it.

use std::sync::Arc;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::acp::protocol::{
    permission_cancelled, permission_selected, PermissionRequestParams, PromptResult,
    SessionNotification, SessionUpdate, ToolCallContent, ToolCallStatus, ToolCallUpdate,
};
use crate::acp::rpc::{Inbound, RpcHandle, RpcOutcome};
use crate::diff::render_unified_diff;
use crate::policy::mediator::{MediationOutcome, PermissionMediator};
use crate::policy::{select_option, PermissionDecision, PermissionMode};
use crate::session::classify::{describe_error, extract_error_description};
use crate::session::tool_calls::{resolve_tool_name, timeout_for, ResolveContext, ToolCallTracker};
use crate::session::SessionEvent;

/// Debounce window after the last non-reasoning chunk before idle is checked.
pub const IDLE_DEBOUNCE: Duration = Duration::from_millis(500);

/// A message chunk shaped like `**Title**\n…` is a reasoning fragment the
/// agent misrouted onto the output stream, not user-visible text.
#[allow(clippy::unwrap_used)] // Pattern is a compile-time constant.
static REASONING_CHUNK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*\*\*[^*\n]{1,200}\*\*[ \t]*($|\n)").unwrap()
});

/// Whether a message chunk matches the bold-title-then-newline heuristic.
#[must_use]
pub fn looks_like_reasoning_chunk(text: &str) -> bool {
    REASONING_CHUNK.is_match(text)
}

/// Per-turn context feeding the tool-identity fallback.
#[derive(Debug, Default)]
struct TurnContext {
    /// Detached rpc id of the in-flight `session/prompt`, if any.
    active_prompt_id: Option<u64>,
    /// No tool call has been sighted since the prompt was sent.
    awaiting_first_call: bool,
    /// The prompt itself carried a title-change instruction.
    title_change_prompt: bool,
}

/// Translation state for one agent session, owned by its pump task.
pub struct UpdateProcessor {
    tracker: ToolCallTracker,
    idle_deadline: Option<Instant>,
    event_tx: mpsc::Sender<SessionEvent>,
    mediator: Arc<PermissionMediator>,
    mode: PermissionMode,
    rpc: RpcHandle,
    turn: TurnContext,
}

impl UpdateProcessor {
    /// Create a processor bound to one session's event channel and rpc
    /// handle.
    #[must_use]
    pub fn new(
        event_tx: mpsc::Sender<SessionEvent>,
        mediator: Arc<PermissionMediator>,
        mode: PermissionMode,
        rpc: RpcHandle,
    ) -> Self {
        Self {
            tracker: ToolCallTracker::new(),
            idle_deadline: None,
            event_tx,
            mediator,
            mode,
            rpc,
            turn: TurnContext::default(),
        }
    }

    /// Mutable access to the tool tracker, for the pump's timeout branch.
    pub fn tracker_mut(&mut self) -> &mut ToolCallTracker {
        &mut self.tracker
    }

    /// Deadline of the armed idle-debounce timer, if any.
    #[must_use]
    pub fn idle_deadline(&self) -> Option<Instant> {
        self.idle_deadline
    }

    /// Record the start of a turn.
    pub fn begin_turn(&mut self, prompt_rpc_id: u64, title_change_prompt: bool) {
        self.turn = TurnContext {
            active_prompt_id: Some(prompt_rpc_id),
            awaiting_first_call: true,
            title_change_prompt,
        };
    }

    /// Dispatch one inbound item from the rpc connection.
    pub async fn handle_inbound(&mut self, inbound: Inbound) {
        match inbound {
            Inbound::Notification { method, params } => match method.as_str() {
                "session/update" => self.handle_session_update(params).await,
                other => {
                    debug!(method = other, "skipping unknown inbound notification");
                }
            },
            Inbound::Request { id, method, params } => match method.as_str() {
                "session/request_permission" => self.handle_permission(id, params).await,
                other => {
                    warn!(method = other, "rejecting unknown agent request");
                    let _ = self.rpc.respond_error(id, -32601, "method not found").await;
                }
            },
            Inbound::OrphanResponse { id, outcome } => {
                if self.turn.active_prompt_id == Some(id) {
                    self.turn.active_prompt_id = None;
                    self.handle_prompt_response(outcome).await;
                } else {
                    debug!(id, "response for unknown detached request, ignoring");
                }
            }
            Inbound::StreamClosed { reason } => {
                self.emit(SessionEvent::Fatal {
                    message: format!("agent stream closed: {reason}"),
                })
                .await;
            }
        }
    }

    /// The armed idle-debounce timer fired.
    pub async fn on_idle_fire(&mut self) {
        self.idle_deadline = None;
        self.check_idle().await;
    }

    /// A tool timer fired: force-remove the call and run the idle check.
    pub async fn on_tool_timeout(&mut self, id: String) {
        let Some(call) = self.tracker.expire(&id) else {
            return;
        };
        let timeout = timeout_for(&call.name);
        self.emit(SessionEvent::ToolCallFinished {
            id,
            name: call.name.clone(),
            status: "failed".to_owned(),
            output: None,
            error: Some(format!(
                "tool call timed out after {} s",
                timeout.as_secs()
            )),
        })
        .await;
        self.check_idle().await;
    }

    /// Drop all per-session state: active calls and timers.
    pub fn shutdown(&mut self) {
        self.tracker.clear();
        self.idle_deadline = None;
        self.turn = TurnContext::default();
    }

    // ── Update dispatch ──────────────────────────────────────────────────────

    async fn handle_session_update(&mut self, params: Value) {
        let notification: SessionNotification = match serde_json::from_value(params.clone()) {
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, "malformed session/update, skipping");
                return;
            }
        };

        match notification.update {
            SessionUpdate::AgentMessageChunk { content } => {
                let text = content.text().to_owned();
                if text.is_empty() {
                    return;
                }
                if looks_like_reasoning_chunk(&text) {
                    self.emit(SessionEvent::Thought { text }).await;
                } else {
                    self.emit(SessionEvent::MessageChunk { text }).await;
                    self.arm_idle();
                }
            }
            SessionUpdate::AgentThoughtChunk { content } => {
                let text = content.text().to_owned();
                if !text.is_empty() {
                    self.emit(SessionEvent::Thought { text }).await;
                }
            }
            SessionUpdate::ToolCall(update) | SessionUpdate::ToolCallUpdate(update) => {
                self.handle_tool_update(update, &params).await;
            }
            SessionUpdate::Plan { entries } => {
                let summary = entries
                    .iter()
                    .map(|e| e.content.as_str())
                    .collect::<Vec<_>>()
                    .join("\n");
                if !summary.is_empty() {
                    self.emit(SessionEvent::Plan { summary }).await;
                }
            }
            SessionUpdate::CurrentModeUpdate { current_mode_id } => {
                debug!(current_mode_id, "agent switched its operating mode");
            }
            SessionUpdate::AvailableCommandsUpdate { .. } => {
                debug!("agent refreshed its command catalog");
            }
            SessionUpdate::Unknown => {
                warn!("unhandled session/update subtype, ignoring");
            }
        }
    }

    async fn handle_tool_update(&mut self, update: ToolCallUpdate, raw: &Value) {
        let id = update.tool_call_id.clone();

        // Diff-bearing content is forwarded regardless of status; the
        // orchestrator's deduplicator decides whether it reaches the relay.
        for block in &update.content {
            if let ToolCallContent::Diff {
                path,
                old_text,
                new_text,
            } = block
            {
                let diff = render_unified_diff(path, old_text.as_deref(), new_text);
                self.emit(SessionEvent::Diff {
                    path: path.clone(),
                    diff,
                })
                .await;
            }
        }

        let status = update.status;
        let terminal = status.is_some_and(ToolCallStatus::is_terminal);

        if !terminal && !self.tracker.contains(&id) {
            let ctx = ResolveContext {
                first_call_of_turn: self.turn.awaiting_first_call,
                prompt_requested_title_change: self.turn.title_change_prompt,
            };
            self.turn.awaiting_first_call = false;

            let name = resolve_tool_name(
                &id,
                update.kind.as_deref(),
                update.title.as_deref(),
                update.raw_input.as_ref(),
                raw,
                ctx,
            );
            self.tracker.insert(&id, &name, update.kind.clone());
            self.emit(SessionEvent::ToolCallStarted {
                id,
                name,
                input: update.raw_input,
            })
            .await;
            return;
        }

        if let Some(status) = status.filter(|s| s.is_terminal()) {
            let name = self.tracker.finish(&id).map_or_else(
                || {
                    // Terminal report for a call never seen non-terminal;
                    // resolve a name so the result event is still useful.
                    resolve_tool_name(
                        &id,
                        update.kind.as_deref(),
                        update.title.as_deref(),
                        update.raw_input.as_ref(),
                        raw,
                        ResolveContext::default(),
                    )
                },
                |call| call.name,
            );

            let output = collect_text_output(&update.content);
            let error = if status == ToolCallStatus::Failed {
                output
                    .clone()
                    .or_else(|| extract_error_description(raw))
                    .or_else(|| Some("tool call failed".to_owned()))
            } else {
                None
            };

            let status_str = match status {
                ToolCallStatus::Completed => "completed",
                ToolCallStatus::Failed => "failed",
                ToolCallStatus::Cancelled => "cancelled",
                // Unreachable: filtered to terminal statuses above.
                ToolCallStatus::Pending | ToolCallStatus::InProgress => "completed",
            };

            self.emit(SessionEvent::ToolCallFinished {
                id,
                name,
                status: status_str.to_owned(),
                output,
                error,
            })
            .await;

            // Nothing may follow the last tool result; re-arm the debounce
            // so idle is still declared.
            self.arm_idle();
        }
    }

    // ── Permission RPC ───────────────────────────────────────────────────────

    async fn handle_permission(&mut self, rpc_id: Value, params: Value) {
        let request: PermissionRequestParams = match serde_json::from_value(params.clone()) {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "malformed permission request, cancelling");
                let _ = self.rpc.respond(rpc_id, permission_cancelled()).await;
                return;
            }
        };

        let tool_call_id = request.tool_call.tool_call_id.clone();
        let tool_name = resolve_tool_name(
            &tool_call_id,
            request.tool_call.kind.as_deref(),
            request.tool_call.title.as_deref(),
            request.tool_call.raw_input.as_ref(),
            &params,
            ResolveContext::default(),
        );

        match self
            .mediator
            .submit(self.mode, &tool_name, &tool_call_id)
            .await
        {
            MediationOutcome::Decided(decision) => {
                let reply = build_permission_reply(decision, &request);
                let _ = self.rpc.respond(rpc_id, reply).await;
            }
            MediationOutcome::Pending(rx) => {
                self.emit(SessionEvent::PermissionPending {
                    request_id: tool_call_id.clone(),
                    tool_name: tool_name.clone(),
                    tool_call_id,
                    options: request.options.clone(),
                })
                .await;

                // Await the external decision off the pump so updates keep
                // flowing while the operator thinks.
                let rpc = self.rpc.clone();
                tokio::spawn(async move {
                    // A resolver dropped without an explicit answer is the
                    // transport default: proceed once.
                    let decision = rx.await.unwrap_or(PermissionDecision::Approved);
                    let reply = build_permission_reply(decision, &request);
                    let _ = rpc.respond(rpc_id, reply).await;
                });
            }
        }
    }

    // ── Prompt response ──────────────────────────────────────────────────────

    async fn handle_prompt_response(&mut self, outcome: RpcOutcome) {
        match outcome {
            Ok(result) => {
                let parsed: PromptResult = serde_json::from_value(result).unwrap_or_default();
                debug!(stop_reason = ?parsed.stop_reason, "prompt response received");
                if let Some(usage) = parsed.usage {
                    self.emit(SessionEvent::TokenUsage { usage }).await;
                }
                self.check_idle().await;
            }
            Err(error) => {
                let message = describe_error(&error);
                self.emit(SessionEvent::Status { message }).await;
                self.check_idle().await;
            }
        }
    }

    // ── Idle detection ───────────────────────────────────────────────────────

    fn arm_idle(&mut self) {
        self.idle_deadline = Some(Instant::now() + IDLE_DEBOUNCE);
    }

    async fn check_idle(&mut self) {
        if self.tracker.active_count() == 0 {
            self.idle_deadline = None;
            self.emit(SessionEvent::Idle).await;
        }
    }

    async fn emit(&self, event: SessionEvent) {
        if self.event_tx.send(event).await.is_err() {
            debug!("session event channel closed, dropping event");
        }
    }
}

/// Concatenate the text blocks of a tool result.
fn collect_text_output(content: &[ToolCallContent]) -> Option<String> {
    let mut out = String::new();
    for block in content {
        if let ToolCallContent::Content { content } = block {
            let text = content.text();
            if !text.is_empty() {
                if !out.is_empty() {
                    out.push('\n');
                }
                out.push_str(text);
            }
        }
    }
    if out.is_empty() {
        None
    } else {
        Some(out)
    }
}

/// Translate a decision into the protocol's option-selection reply.
fn build_permission_reply(
    decision: PermissionDecision,
    request: &PermissionRequestParams,
) -> Value {
    match select_option(decision, &request.options) {
        Some(option) => permission_selected(&option.option_id),
        None => permission_cancelled(),
    }
}
