//! Session backend seam.
//!
//! The orchestrator drives sessions through [`SessionBackend`] so the turn
//! loop can be exercised against a scripted backend in tests. The shipped
//! implementation, [`AcpBackend`], owns at most one [`AgentSession`] and
//! rebuilds it whenever the orchestrator restarts on a mode change.

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::info;

use crate::orchestrator::mode::TurnMode;
use crate::policy::mediator::PermissionMediator;
use crate::session::agent_session::{AgentSession, AgentSessionConfig, HANDSHAKE_TIMEOUT};
use crate::session::spawner::SpawnConfig;
use crate::session::SessionEvent;
use crate::Result;

/// Environment variable carrying the model selection to the agent process.
pub const MODEL_ENV_VAR: &str = "AGENT_MODEL";

/// Driver interface between the turn loop and the agent session.
///
/// Methods return boxed futures so tests can substitute a scripted backend
/// behind the same object shape the relay transport uses.
pub trait SessionBackend: Send {
    /// Start a fresh session under `mode`, emitting events into `event_tx`.
    ///
    /// # Errors
    ///
    /// Returns a startup error when the spawn or handshake fails; the
    /// orchestrator surfaces it as a status event and drops the turn.
    fn start<'a>(
        &'a mut self,
        mode: &'a TurnMode,
        event_tx: mpsc::Sender<SessionEvent>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

    /// Whether a live session exists.
    fn is_started(&self) -> bool;

    /// Submit a prompt to the live session.
    ///
    /// # Errors
    ///
    /// Returns an error when no session is live or the write fails.
    fn send_prompt<'a>(
        &'a mut self,
        prompt: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

    /// Cancel the active turn without tearing the session down.
    ///
    /// # Errors
    ///
    /// Returns an error when the cancellation frame cannot be written.
    fn cancel(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Record that the active turn reached idle.
    fn mark_ready(&mut self);

    /// Dispose the live session, if any. Idempotent.
    fn dispose(&mut self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}

/// Production backend: one ACP agent subprocess per mode hash.
pub struct AcpBackend {
    command: String,
    args: Vec<String>,
    env: HashMap<String, String>,
    cwd: PathBuf,
    mediator: Arc<PermissionMediator>,
    session: Option<AgentSession>,
}

impl AcpBackend {
    /// Create a backend from the resolved agent invocation.
    ///
    /// `env` must already contain the resolved API credential; the model
    /// selection is merged in per session from the turn mode.
    #[must_use]
    pub fn new(
        command: String,
        args: Vec<String>,
        env: HashMap<String, String>,
        cwd: PathBuf,
        mediator: Arc<PermissionMediator>,
    ) -> Self {
        Self {
            command,
            args,
            env,
            cwd,
            mediator,
            session: None,
        }
    }

    fn spawn_config(&self, mode: &TurnMode) -> SpawnConfig {
        let mut env = self.env.clone();
        if let Some(model) = &mode.model {
            env.insert(MODEL_ENV_VAR.to_owned(), model.clone());
        }
        SpawnConfig {
            command: self.command.clone(),
            args: self.args.clone(),
            env,
            cwd: self.cwd.clone(),
        }
    }
}

impl SessionBackend for AcpBackend {
    fn start<'a>(
        &'a mut self,
        mode: &'a TurnMode,
        event_tx: mpsc::Sender<SessionEvent>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let config = AgentSessionConfig {
                spawn: self.spawn_config(mode),
                permission_mode: mode.permission_mode,
                handshake_timeout: HANDSHAKE_TIMEOUT,
            };
            let session =
                AgentSession::start(config, Arc::clone(&self.mediator), event_tx).await?;
            info!(
                session_id = session.session_id(),
                mode = mode.permission_mode.as_str(),
                model = mode.model.as_deref().unwrap_or("(inherited)"),
                "agent session started"
            );
            self.session = Some(session);
            Ok(())
        })
    }

    fn is_started(&self) -> bool {
        self.session.is_some()
    }

    fn send_prompt<'a>(
        &'a mut self,
        prompt: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            match self.session.as_mut() {
                Some(session) => session.send_prompt(prompt).await,
                None => Err(crate::AppError::Session(
                    "no live session to prompt".into(),
                )),
            }
        })
    }

    fn cancel(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            match self.session.as_ref() {
                Some(session) => session.cancel().await,
                None => Ok(()),
            }
        })
    }

    fn mark_ready(&mut self) {
        if let Some(session) = self.session.as_mut() {
            session.mark_ready();
        }
    }

    fn dispose(&mut self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            if let Some(mut session) = self.session.take() {
                session.dispose().await;
            }
        })
    }
}
