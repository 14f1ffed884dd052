//! Standalone NDJSON relay over the bridge's own stdio.
//!
//! Lets the bridge run without an upstream service: outbound events are
//! written one JSON object per line on stdout, commands are read one JSON
//! object per line from stdin. Logs go to stderr so stdout stays a clean
//! event channel.

use std::future::Future;
use std::pin::Pin;

use serde::Deserialize;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::orchestrator::{ModeOverride, Turn, TurnCommand};
use crate::policy::PermissionDecision;
use crate::relay::{OutboundEvent, RelayTransport};
use crate::{AppError, Result};

/// Commands accepted on stdin, one JSON object per line.
#[derive(Debug, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
enum InboundCommand {
    /// Queue a prompt, optionally overriding the conversation mode.
    Prompt {
        text: String,
        #[serde(flatten)]
        mode: ModeOverride,
    },
    /// Cancel the active turn.
    Abort,
    /// Dispose the session and exit.
    Kill,
    /// Answer a pending permission request.
    Permission {
        #[serde(rename = "requestId")]
        request_id: String,
        decision: PermissionDecision,
    },
}

/// NDJSON event writer over the process's stdout.
pub struct StdioRelay {
    stdout: Mutex<tokio::io::Stdout>,
}

impl StdioRelay {
    /// Create a relay over the current process's stdout.
    #[must_use]
    pub fn new() -> Self {
        Self {
            stdout: Mutex::new(tokio::io::stdout()),
        }
    }

    async fn write_line(&self, value: &serde_json::Value) -> Result<()> {
        let mut line = value.to_string();
        line.push('\n');
        let mut stdout = self.stdout.lock().await;
        stdout
            .write_all(line.as_bytes())
            .await
            .map_err(|e| AppError::Relay(format!("stdout write failed: {e}")))?;
        stdout
            .flush()
            .await
            .map_err(|e| AppError::Relay(format!("stdout flush failed: {e}")))
    }
}

impl Default for StdioRelay {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayTransport for StdioRelay {
    fn send_event(
        &self,
        event: OutboundEvent,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            let value = serde_json::to_value(&event)
                .map_err(|e| AppError::Relay(format!("event serialization failed: {e}")))?;
            self.write_line(&value).await
        })
    }

    fn keepalive(&self, busy: bool) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            self.write_line(&json!({ "event": "keepalive", "busy": busy }))
                .await
        })
    }

    fn close(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            let mut stdout = self.stdout.lock().await;
            stdout
                .flush()
                .await
                .map_err(|e| AppError::Relay(format!("stdout flush failed: {e}")))
        })
    }
}

/// Read commands from stdin and forward them to the orchestrator.
///
/// Runs until stdin closes, a `kill` command arrives, or `cancel` fires.
/// Malformed lines are logged and skipped.
pub async fn read_commands(cmd_tx: mpsc::Sender<TurnCommand>, cancel: CancellationToken) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            line = lines.next_line() => line,
        };
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => {
                debug!("stdin closed, stopping command reader");
                let _ = cmd_tx.send(TurnCommand::Kill).await;
                break;
            }
            Err(e) => {
                warn!(error = %e, "stdin read failed, stopping command reader");
                let _ = cmd_tx.send(TurnCommand::Kill).await;
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let command = match serde_json::from_str::<InboundCommand>(&line) {
            Ok(command) => command,
            Err(e) => {
                warn!(error = %e, "ignoring malformed command line");
                continue;
            }
        };

        let is_kill = matches!(command, InboundCommand::Kill);
        let forwarded = match command {
            InboundCommand::Prompt { text, mode } => TurnCommand::Submit(Turn {
                prompt: text,
                mode_override: mode,
            }),
            InboundCommand::Abort => TurnCommand::Abort,
            InboundCommand::Kill => TurnCommand::Kill,
            InboundCommand::Permission {
                request_id,
                decision,
            } => TurnCommand::PermissionResponse {
                request_id,
                decision,
            },
        };
        if cmd_tx.send(forwarded).await.is_err() || is_kill {
            break;
        }
    }
}
