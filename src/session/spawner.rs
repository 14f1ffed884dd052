//! Agent process spawning.
//!
//! Spawns the ACP agent subprocess with:
//! - a merged environment: the parent's variables plus the resolved API
//!   credential and model selection injected explicitly;
//! - platform-specific invocation: indirect `cmd /C` on Windows (agent CLIs
//!   there are frequently `.cmd` shims that cannot be exec'd directly),
//!   direct invocation elsewhere;
//! - `kill_on_drop(true)` so processes are cleaned up even on panic paths;
//! - piped stdio; stderr is diagnostic-only and is pattern-scanned for known
//!   fatal conditions, never parsed as protocol.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::session::classify::{classify_text, user_facing_message};
use crate::session::SessionEvent;
use crate::{AppError, Result};

/// Configuration for spawning an agent process.
#[derive(Debug, Clone)]
pub struct SpawnConfig {
    /// Agent binary (e.g. `gemini`, `claude-code-acp`).
    pub command: String,
    /// Arguments passed to the binary.
    pub args: Vec<String>,
    /// Extra environment merged over the inherited one. Must include the
    /// resolved API credential and, when selected, the model identifier.
    pub env: HashMap<String, String>,
    /// Working directory for the agent; also the session's workspace root.
    pub cwd: PathBuf,
}

/// Spawn the agent subprocess with piped stdio.
///
/// # Errors
///
/// Returns [`AppError::Startup`] when the OS spawn fails or a stdio handle
/// cannot be captured.
pub fn spawn_agent(config: &SpawnConfig) -> Result<Child> {
    let mut cmd = build_command(config);

    cmd.current_dir(&config.cwd)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    for (key, value) in &config.env {
        cmd.env(key, value);
    }

    let child = cmd
        .spawn()
        .map_err(|err| AppError::Startup(format!("failed to spawn agent '{}': {err}", config.command)))?;

    info!(
        command = %config.command,
        pid = child.id(),
        cwd = %config.cwd.display(),
        "agent process spawned"
    );
    Ok(child)
}

#[cfg(windows)]
fn build_command(config: &SpawnConfig) -> Command {
    // Indirect shell invocation: npm-installed agent CLIs are .cmd shims.
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(&config.command);
    for arg in &config.args {
        cmd.arg(arg);
    }
    cmd
}

#[cfg(not(windows))]
fn build_command(config: &SpawnConfig) -> Command {
    let mut cmd = Command::new(&config.command);
    for arg in &config.args {
        cmd.arg(arg);
    }
    cmd
}

/// Spawn a background task scanning the agent's stderr.
///
/// Every line is logged at `DEBUG`. Lines matching a known fatal condition
/// (rate-limit, model-not-found, investigation timeout, …) are rewritten to
/// a user-facing message and surfaced as a status event. Stops on EOF or
/// when `cancel` fires.
pub fn scan_stderr(
    stderr: ChildStderr,
    event_tx: mpsc::Sender<SessionEvent>,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        loop {
            tokio::select! {
                biased;

                () = cancel.cancelled() => {
                    debug!("stderr scanner: cancellation received, stopping");
                    break;
                }

                line = lines.next_line() => {
                    match line {
                        Ok(Some(line)) => {
                            debug!(line = %line, "agent stderr");
                            if let Some(kind) = classify_text(&line) {
                                warn!(?kind, line = %line, "agent stderr matched fatal condition");
                                let _ = event_tx
                                    .send(SessionEvent::Status {
                                        message: user_facing_message(kind).to_owned(),
                                    })
                                    .await;
                            }
                        }
                        Ok(None) => break,
                        Err(err) => {
                            debug!(error = %err, "stderr scanner: read error, stopping");
                            break;
                        }
                    }
                }
            }
        }
    });
}
