//! Agent session lifecycle.
//!
//! One [`AgentSession`] owns one agent subprocess and one handshake-
//! negotiated ACP conversation. The state machine is
//! `idle → starting → handshaking → ready → (running ⇄ ready) → disposed`:
//! `starting` spawns the process, `handshaking` performs the
//! `initialize` / `session/new` exchange (both bounded by a fixed 120 s
//! timeout, surfacing a startup failure on expiry — never a silent retry),
//! `ready` accepts prompts, and `dispose` tears everything down
//! idempotently.
//!
//! Inbound traffic is consumed by a single pump task owning the
//! [`UpdateProcessor`]; prompts, cancellation, and disposal are driven from
//! the orchestrator through this handle.

use std::sync::Arc;
use std::time::Duration;

use tokio::process::Child;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::acp::protocol::{
    cancel_params, initialize_params, new_session_params, prompt_params, InitializeResult,
    NewSessionResult,
};
use crate::acp::rpc::{self, RpcHandle};
use crate::policy::mediator::PermissionMediator;
use crate::policy::PermissionMode;
use crate::session::classify::describe_error;
use crate::session::spawner::{scan_stderr, spawn_agent, SpawnConfig};
use crate::session::updates::UpdateProcessor;
use crate::session::{prompt_requests_title_change, SessionEvent};
use crate::{AppError, Result};

/// Fixed timeout for each handshake call (`initialize`, `session/new`).
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(120);

/// Bound on the graceful `session/cancel` sent during dispose.
const DISPOSE_CANCEL_TIMEOUT: Duration = Duration::from_secs(2);

/// Grace period between the termination signal and the forcible kill.
const TERMINATE_GRACE: Duration = Duration::from_secs(1);

/// Capacity of the normalized event channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Configuration for one agent session.
#[derive(Debug, Clone)]
pub struct AgentSessionConfig {
    /// Process invocation.
    pub spawn: SpawnConfig,
    /// Permission policy applied by the session's mediator calls.
    pub permission_mode: PermissionMode,
    /// Handshake bound; [`HANDSHAKE_TIMEOUT`] outside tests.
    pub handshake_timeout: Duration,
}

/// Observable session states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Handshake complete; prompts accepted.
    Ready,
    /// A turn is in flight. `cancel` intake is not blocked.
    Running,
    /// Torn down; every operation except `dispose` is rejected.
    Disposed,
}

/// Messages from the session handle to its pump task.
enum PumpMsg {
    /// A prompt was submitted; reset the per-turn context.
    BeginTurn {
        prompt_rpc_id: u64,
        title_change_prompt: bool,
    },
}

/// One spawned agent subprocess plus its ACP conversation.
pub struct AgentSession {
    session_id: String,
    rpc: RpcHandle,
    child: Option<Child>,
    cancel: CancellationToken,
    mediator: Arc<PermissionMediator>,
    pump_tx: mpsc::UnboundedSender<PumpMsg>,
    pump_handle: Option<JoinHandle<()>>,
    state: SessionState,
}

impl AgentSession {
    /// Spawn the agent process, perform the handshake, and start the pump.
    ///
    /// Normalized events flow through `event_tx`. The mediator is shared
    /// with the orchestrator so external permission responses route to the
    /// same pending map.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Startup`] on spawn failure, handshake timeout, or
    /// a handshake-level protocol error. The process is killed before the
    /// error is returned; this layer never retries.
    pub async fn start(
        config: AgentSessionConfig,
        mediator: Arc<PermissionMediator>,
        event_tx: mpsc::Sender<SessionEvent>,
    ) -> Result<Self> {
        debug!(command = %config.spawn.command, "session state: starting");
        let mut child = spawn_agent(&config.spawn)?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| AppError::Startup("failed to capture agent stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AppError::Startup("failed to capture agent stdout".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| AppError::Startup("failed to capture agent stderr".into()))?;

        let cancel = CancellationToken::new();
        let connection = rpc::connect(stdout, stdin, &cancel);
        scan_stderr(stderr, event_tx.clone(), cancel.clone());

        debug!("session state: handshaking");
        let session_id = match Self::handshake(
            &connection.handle,
            &config,
        )
        .await
        {
            Ok(id) => id,
            Err(err) => {
                cancel.cancel();
                terminate(child).await;
                return Err(err);
            }
        };

        let processor = UpdateProcessor::new(
            event_tx,
            Arc::clone(&mediator),
            config.permission_mode,
            connection.handle.clone(),
        );
        let (pump_tx, pump_rx) = mpsc::unbounded_channel();
        let pump_handle = spawn_pump(processor, connection.inbound_rx, pump_rx, cancel.clone());

        info!(session_id, "session state: ready");
        Ok(Self {
            session_id,
            rpc: connection.handle,
            child: Some(child),
            cancel,
            mediator,
            pump_tx,
            pump_handle: Some(pump_handle),
            state: SessionState::Ready,
        })
    }

    /// Perform the `initialize` / `session/new` exchange.
    async fn handshake(rpc: &RpcHandle, config: &AgentSessionConfig) -> Result<String> {
        let bound = config.handshake_timeout;

        let outcome = timeout(bound, rpc.request("initialize", initialize_params()))
            .await
            .map_err(|_| {
                AppError::Startup(format!(
                    "handshake timeout: 'initialize' not answered within {bound:?}"
                ))
            })??;
        let init = outcome.map_err(|err| {
            AppError::Startup(format!("initialize rejected: {}", describe_error(&err)))
        })?;
        let init: InitializeResult = serde_json::from_value(init)
            .map_err(|e| AppError::Startup(format!("malformed initialize result: {e}")))?;
        debug!(
            protocol_version = ?init.protocol_version,
            capabilities = ?init.agent_capabilities,
            "initialize complete"
        );

        let params = new_session_params(&config.spawn.cwd.to_string_lossy());
        let outcome = timeout(bound, rpc.request("session/new", params))
            .await
            .map_err(|_| {
                AppError::Startup(format!(
                    "handshake timeout: 'session/new' not answered within {bound:?}"
                ))
            })??;
        let created = outcome.map_err(|err| {
            AppError::Startup(format!("session/new rejected: {}", describe_error(&err)))
        })?;
        let created: NewSessionResult = serde_json::from_value(created)
            .map_err(|e| AppError::Startup(format!("malformed session/new result: {e}")))?;

        Ok(created.session_id)
    }

    /// Identifier of the negotiated protocol session.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Current observable state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Submit a prompt for the active session.
    ///
    /// Returns once the protocol acknowledges submission (the frame is
    /// written), not when the full response arrives; turn completion is
    /// observed through [`SessionEvent::Idle`].
    ///
    /// # Errors
    ///
    /// - [`AppError::Session`] if the session is disposed.
    /// - [`AppError::Acp`] if the write fails.
    pub async fn send_prompt(&mut self, prompt: &str) -> Result<()> {
        if self.state == SessionState::Disposed {
            return Err(AppError::Session("cannot prompt a disposed session".into()));
        }

        let params = prompt_params(&self.session_id, prompt);
        let prompt_rpc_id = self.rpc.request_detached("session/prompt", params).await?;
        let _ = self.pump_tx.send(PumpMsg::BeginTurn {
            prompt_rpc_id,
            title_change_prompt: prompt_requests_title_change(prompt),
        });
        self.state = SessionState::Running;
        debug!(session_id = %self.session_id, prompt_rpc_id, "session state: running");
        Ok(())
    }

    /// Cancel the active turn without tearing down the process.
    ///
    /// The session remains reusable for the next prompt. Idempotent on a
    /// disposed session.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Acp`] if the write fails on a live session.
    pub async fn cancel(&self) -> Result<()> {
        if self.state == SessionState::Disposed {
            return Ok(());
        }
        self.rpc
            .notify("session/cancel", cancel_params(&self.session_id))
            .await
    }

    /// Record that the turn reached idle; the session accepts the next
    /// prompt.
    pub fn mark_ready(&mut self) {
        if self.state == SessionState::Running {
            self.state = SessionState::Ready;
            debug!(session_id = %self.session_id, "session state: ready");
        }
    }

    /// Tear the session down.
    ///
    /// Attempts a graceful protocol cancellation bounded by 2 s, stops the
    /// stream tasks (finalizing the agent's stdin), force-resolves pending
    /// permissions, clears pending response waiters, then terminates the
    /// process — SIGTERM first, forcible kill after 1 s. Idempotent and
    /// safe to call multiple times.
    pub async fn dispose(&mut self) {
        if self.state == SessionState::Disposed {
            debug!(session_id = %self.session_id, "dispose on disposed session — no-op");
            return;
        }
        self.state = SessionState::Disposed;
        info!(session_id = %self.session_id, "session state: disposed");

        let graceful = timeout(
            DISPOSE_CANCEL_TIMEOUT,
            self.rpc
                .notify("session/cancel", cancel_params(&self.session_id)),
        )
        .await;
        if graceful.is_err() {
            warn!(session_id = %self.session_id, "graceful cancel timed out during dispose");
        }

        self.mediator.reset("session disposed").await;
        self.rpc.clear_pending().await;
        self.cancel.cancel();

        if let Some(handle) = self.pump_handle.take() {
            let _ = handle.await;
        }
        if let Some(child) = self.child.take() {
            terminate(child).await;
        }
    }
}

/// Signal the process to exit, escalating to a kill after the grace period.
async fn terminate(mut child: Child) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        if let Some(pid) = child.id().and_then(|p| i32::try_from(p).ok()) {
            let _ = kill(Pid::from_raw(pid), Signal::SIGTERM);
        }
    }
    #[cfg(not(unix))]
    {
        let _ = child.start_kill();
    }

    match timeout(TERMINATE_GRACE, child.wait()).await {
        Ok(result) => debug!(?result, "agent process exited"),
        Err(_) => {
            warn!("agent process did not exit after termination signal, killing");
            let _ = child.kill().await;
        }
    }
}

/// Run the session's single-consumer pump until cancellation or stream end.
///
/// The pump exclusively owns the [`UpdateProcessor`] (active calls, timers,
/// idle deadline); every mutation happens on this one task.
fn spawn_pump(
    mut processor: UpdateProcessor,
    mut inbound_rx: mpsc::Receiver<rpc::Inbound>,
    mut pump_rx: mpsc::UnboundedReceiver<PumpMsg>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let idle_deadline = processor.idle_deadline();
            let idle_sleep = async move {
                match idle_deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => futures_util::future::pending::<()>().await,
                }
            };

            tokio::select! {
                biased;

                () = cancel.cancelled() => {
                    debug!("session pump: cancellation received, stopping");
                    break;
                }

                msg = pump_rx.recv() => match msg {
                    Some(PumpMsg::BeginTurn { prompt_rpc_id, title_change_prompt }) => {
                        processor.begin_turn(prompt_rpc_id, title_change_prompt);
                    }
                    None => break,
                },

                inbound = inbound_rx.recv() => match inbound {
                    Some(item) => processor.handle_inbound(item).await,
                    None => {
                        debug!("session pump: inbound channel closed, stopping");
                        break;
                    }
                },

                id = processor.tracker_mut().next_timeout() => {
                    processor.on_tool_timeout(id).await;
                }

                () = idle_sleep => processor.on_idle_fire().await,
            }
        }
        processor.shutdown();
    })
}
