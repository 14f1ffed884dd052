//! Single-consumer turn loop.
//!
//! Serializes queued turns over one agent session, restarting the session
//! whenever a turn's mode hash differs from the running session's hash.
//! Normalized session events are mapped onto the outbound relay protocol
//! here; in-flight reasoning and diff state is cleared after every turn,
//! whether it completed, failed, or was aborted.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::diff::DiffDeduplicator;
use crate::orchestrator::backend::SessionBackend;
use crate::orchestrator::mode::{ModeOverride, TurnMode};
use crate::policy::mediator::PermissionMediator;
use crate::policy::PermissionDecision;
use crate::prefs;
use crate::reasoning::{ReasoningAccumulator, ReasoningEmit};
use crate::relay::{OutboundEvent, RelayTransport};
use crate::session::agent_session::EVENT_CHANNEL_CAPACITY;
use crate::session::SessionEvent;

/// Heartbeat period for the upstream keep-alive.
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// Synthetic tool name used for deduplicated file-change notifications.
const DIFF_TOOL_NAME: &str = "diff";

/// Synthetic tool name used for titled reasoning sections.
const REASONING_TOOL_NAME: &str = "reasoning";

/// One user prompt plus its optional mode override.
#[derive(Debug, Clone, Default)]
pub struct Turn {
    /// Prompt text forwarded to the agent.
    pub prompt: String,
    /// Partial mode override; absent fields inherit the previous mode.
    pub mode_override: ModeOverride,
}

/// Commands accepted by the orchestrator loop.
#[derive(Debug)]
pub enum TurnCommand {
    /// Queue a turn.
    Submit(Turn),
    /// Cancel the active turn; the session and queue survive.
    Abort,
    /// Dispose the session and shut the loop down.
    Kill,
    /// External answer to a pending permission request.
    PermissionResponse {
        /// Correlation id from the earlier permission-request event.
        request_id: String,
        /// Operator decision.
        decision: PermissionDecision,
    },
}

/// A dequeued turn with its resolved effective mode.
#[derive(Debug)]
struct QueuedTurn {
    prompt: String,
    mode: TurnMode,
}

/// The turn orchestrator: owns the queue, the backend, and the per-turn
/// accumulators.
pub struct Orchestrator<B: SessionBackend> {
    backend: B,
    transport: Arc<dyn RelayTransport>,
    mediator: Arc<PermissionMediator>,
    reasoning: ReasoningAccumulator,
    dedup: DiffDeduplicator,
    queue: VecDeque<QueuedTurn>,
    current_mode: TurnMode,
    active_hash: Option<String>,
    running: bool,
    event_tx: mpsc::Sender<SessionEvent>,
    event_rx: mpsc::Receiver<SessionEvent>,
    prefs_path: Option<PathBuf>,
}

impl<B: SessionBackend> Orchestrator<B> {
    /// Create an orchestrator over `backend` delivering to `transport`.
    ///
    /// `initial_mode` seeds mode inheritance (config defaults plus the
    /// model-preference file); `prefs_path`, when set, receives the last
    /// explicitly selected model.
    #[must_use]
    pub fn new(
        backend: B,
        transport: Arc<dyn RelayTransport>,
        mediator: Arc<PermissionMediator>,
        initial_mode: TurnMode,
        prefs_path: Option<PathBuf>,
    ) -> Self {
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            backend,
            transport,
            mediator,
            reasoning: ReasoningAccumulator::new(),
            dedup: DiffDeduplicator::new(),
            queue: VecDeque::new(),
            current_mode: initial_mode,
            active_hash: None,
            running: false,
            event_tx,
            event_rx,
            prefs_path,
        }
    }

    /// Run the loop until a `Kill` command or command-channel closure.
    pub async fn run(mut self, mut cmd_rx: mpsc::Receiver<TurnCommand>) {
        let mut heartbeat = tokio::time::interval(KEEPALIVE_INTERVAL);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(TurnCommand::Submit(turn)) => self.submit(turn).await,
                    Some(TurnCommand::Abort) => self.abort().await,
                    Some(TurnCommand::Kill) => {
                        self.kill().await;
                        break;
                    }
                    Some(TurnCommand::PermissionResponse { request_id, decision }) => {
                        self.mediator.respond(&request_id, decision).await;
                    }
                    None => {
                        debug!("command channel closed, shutting down");
                        self.kill().await;
                        break;
                    }
                },

                Some(event) = self.event_rx.recv() => self.handle_event(event).await,

                _ = heartbeat.tick() => {
                    if let Err(e) = self.transport.keepalive(self.running).await {
                        warn!(error = %e, "keepalive failed");
                    }
                }
            }
        }
    }

    /// Resolve the turn's effective mode, queue it, and dispatch if idle.
    ///
    /// Inheritance follows queue order: the baseline is the most recently
    /// queued turn's resolved mode, so a turn queued without an override
    /// behind an override turn runs under the override.
    async fn submit(&mut self, turn: Turn) {
        let mode = self.current_mode.with_override(&turn.mode_override);
        self.current_mode = mode.clone();
        if let Some(model) = &turn.mode_override.model {
            self.remember_model(model);
        }

        debug!(
            mode = mode.permission_mode.as_str(),
            model = mode.model.as_deref().unwrap_or(""),
            queued = self.queue.len(),
            "turn queued"
        );
        self.queue.push_back(QueuedTurn {
            prompt: turn.prompt,
            mode,
        });
        if !self.running {
            self.start_next().await;
        }
    }

    /// Dequeue and dispatch turns until one is in flight or the queue is
    /// empty. A turn whose session cannot be started or prompted is dropped
    /// with a status event; the loop continues with the next one.
    async fn start_next(&mut self) {
        while let Some(turn) = self.queue.pop_front() {
            let hash = turn.mode.hash();
            let needs_restart =
                self.active_hash.as_deref() != Some(hash.as_str()) || !self.backend.is_started();

            if needs_restart {
                if self.backend.is_started() {
                    info!(
                        old = self.active_hash.as_deref().unwrap_or(""),
                        new = hash,
                        "mode changed, restarting session"
                    );
                }
                self.backend.dispose().await;
                self.active_hash = None;
                self.mediator.reset("session restart").await;

                if let Err(e) = self
                    .backend
                    .start(&turn.mode, self.event_tx.clone())
                    .await
                {
                    error!(error = %e, "failed to start agent session, dropping turn");
                    self.send(OutboundEvent::Status {
                        message: format!("failed to start agent session: {e}"),
                    })
                    .await;
                    continue;
                }
                self.active_hash = Some(hash);
            }

            if let Err(e) = self.backend.send_prompt(&turn.prompt).await {
                error!(error = %e, "failed to submit prompt, dropping turn");
                self.send(OutboundEvent::Status {
                    message: format!("failed to submit prompt: {e}"),
                })
                .await;
                continue;
            }

            self.running = true;
            self.send(OutboundEvent::Thinking { active: true }).await;
            return;
        }

        if !self.running {
            self.send(OutboundEvent::Ready).await;
        }
    }

    /// Cancel the active turn without discarding the session or the queue.
    async fn abort(&mut self) {
        info!("abort requested");
        if let Err(e) = self.backend.cancel().await {
            warn!(error = %e, "cancellation frame failed");
        }
        self.finish_turn(true).await;
    }

    /// Dispose everything and close the upstream transport.
    async fn kill(&mut self) {
        info!("kill requested");
        self.queue.clear();
        self.backend.dispose().await;
        self.active_hash = None;
        self.running = false;
        let _ = self.reasoning.abort();
        self.dedup.reset();
        self.mediator.reset("shutdown").await;
        if let Err(e) = self.transport.close().await {
            warn!(error = %e, "transport close failed");
        }
    }

    /// Map one normalized session event onto the outbound protocol.
    async fn handle_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::MessageChunk { text } => {
                self.send(OutboundEvent::MessageDelta { text }).await;
            }
            SessionEvent::Thought { text } => {
                let emissions = self.reasoning.push(&text);
                for emit in emissions {
                    self.route_reasoning(emit).await;
                }
            }
            SessionEvent::ToolCallStarted { id, name, input } => {
                self.send(OutboundEvent::ToolCall { id, name, input }).await;
            }
            SessionEvent::ToolCallFinished {
                id,
                name,
                status,
                output,
                error,
            } => {
                self.send(OutboundEvent::ToolCallResult {
                    id,
                    name,
                    status,
                    output,
                    error,
                })
                .await;
            }
            SessionEvent::Diff { path, diff } => self.handle_diff(&path, &diff).await,
            SessionEvent::PermissionPending {
                request_id,
                tool_name,
                tool_call_id,
                options,
            } => {
                self.send(OutboundEvent::PermissionRequest {
                    id: request_id,
                    tool_name,
                    tool_call_id,
                    options,
                })
                .await;
            }
            SessionEvent::Plan { summary } => {
                self.send(OutboundEvent::Status { message: summary }).await;
            }
            SessionEvent::TokenUsage { usage } => {
                self.send(OutboundEvent::TokenCount { usage }).await;
            }
            SessionEvent::Status { message } => {
                self.send(OutboundEvent::Status { message }).await;
            }
            SessionEvent::Idle => self.finish_turn(false).await,
            SessionEvent::Fatal { message } => {
                error!(message, "session failed");
                self.send(OutboundEvent::Status { message }).await;
                self.backend.dispose().await;
                self.active_hash = None;
                self.finish_turn(true).await;
            }
        }
    }

    /// Emit a deduplicated file change as a paired synthetic tool call plus
    /// a file-edit record.
    async fn handle_diff(&mut self, path: &str, diff: &str) {
        let Some(emit) = self.dedup.process(path, diff) else {
            debug!(path, "duplicate diff suppressed");
            return;
        };
        self.send(OutboundEvent::ToolCall {
            id: emit.call_id.clone(),
            name: DIFF_TOOL_NAME.to_owned(),
            input: Some(json!({ "path": emit.path })),
        })
        .await;
        self.send(OutboundEvent::ToolCallResult {
            id: emit.call_id,
            name: DIFF_TOOL_NAME.to_owned(),
            status: "completed".to_owned(),
            output: Some(emit.diff.clone()),
            error: None,
        })
        .await;
        self.send(OutboundEvent::FileEdit {
            path: emit.path,
            diff: emit.diff,
        })
        .await;
    }

    /// Close out the active turn: flush accumulators, reset per-turn state,
    /// and either dispatch the next queued turn or report readiness.
    async fn finish_turn(&mut self, aborted: bool) {
        let was_running = self.running;
        self.running = false;
        self.backend.mark_ready();

        let emissions = if aborted {
            self.reasoning.abort()
        } else {
            self.reasoning.complete()
        };
        for emit in emissions {
            self.route_reasoning(emit).await;
        }
        self.dedup.reset();
        self.mediator
            .reset(if aborted { "turn aborted" } else { "turn complete" })
            .await;
        self.send(OutboundEvent::Thinking { active: false }).await;

        if self.queue.is_empty() {
            if was_running {
                self.send(OutboundEvent::Ready).await;
            }
        } else {
            self.start_next().await;
        }
    }

    /// Map a reasoning emission onto the outbound protocol.
    async fn route_reasoning(&mut self, emit: ReasoningEmit) {
        match emit {
            ReasoningEmit::SectionStarted { call_id, title } => {
                self.send(OutboundEvent::ToolCall {
                    id: call_id,
                    name: REASONING_TOOL_NAME.to_owned(),
                    input: Some(json!({ "title": title })),
                })
                .await;
            }
            ReasoningEmit::SectionFinished {
                call_id,
                text,
                status,
            } => {
                self.send(OutboundEvent::ToolCallResult {
                    id: call_id,
                    name: REASONING_TOOL_NAME.to_owned(),
                    status: status.as_str().to_owned(),
                    output: Some(text),
                    error: None,
                })
                .await;
            }
            ReasoningEmit::Note { text } => {
                self.send(OutboundEvent::ReasoningNote { text }).await;
            }
        }
    }

    /// Persist the last explicitly selected model, best effort.
    fn remember_model(&self, model: &str) {
        let Some(path) = &self.prefs_path else {
            return;
        };
        if let Err(e) = prefs::save_last_model(path, model) {
            warn!(error = %e, "failed to persist model preference");
        }
    }

    async fn send(&self, event: OutboundEvent) {
        if let Err(e) = self.transport.send_event(event).await {
            warn!(error = %e, "outbound event delivery failed");
        }
    }
}
