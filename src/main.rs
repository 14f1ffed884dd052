#![forbid(unsafe_code)]

//! `acp-relay` — ACP agent bridge binary.
//!
//! Bootstraps configuration, resolves the agent credential, and runs the
//! turn orchestrator with the standalone stdio relay: NDJSON events on
//! stdout, NDJSON commands on stdin, logs on stderr.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use acp_relay::config::BridgeConfig;
use acp_relay::orchestrator::{AcpBackend, Orchestrator, TurnCommand};
use acp_relay::policy::mediator::PermissionMediator;
use acp_relay::stdio::{read_commands, StdioRelay};
use acp_relay::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "acp-relay", about = "ACP agent bridge", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Override the agent's working directory.
    #[arg(long)]
    workspace: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("acp-relay bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let mut config = BridgeConfig::load_from_path(&args.config)?;

    // Override workspace root from CLI if provided.
    if let Some(ws) = args.workspace {
        let canonical = ws
            .canonicalize()
            .map_err(|err| AppError::Config(format!("invalid workspace override: {err}")))?;
        config.workspace_root = canonical;
    }

    // Load the agent credential from keyring / env var.
    config.load_credentials().await?;
    info!("configuration loaded");

    // ── Resolve the initial conversation mode ───────────
    // Config default first; the model-preference file only fills an unset
    // model.
    let prefs_path = config.prefs_path();
    let initial_mode = config.initial_mode();
    info!(
        mode = initial_mode.permission_mode.as_str(),
        model = initial_mode.model.as_deref().unwrap_or("(agent default)"),
        "initial mode resolved"
    );

    // ── Wire the orchestrator ───────────────────────────
    let mediator = Arc::new(PermissionMediator::new());
    let backend = AcpBackend::new(
        config.agent.command.clone(),
        config.agent.args.clone(),
        config.agent_env(),
        config.workspace_root.clone(),
        Arc::clone(&mediator),
    );
    let transport = Arc::new(StdioRelay::new());
    let orchestrator = Orchestrator::new(
        backend,
        transport,
        mediator,
        initial_mode,
        Some(prefs_path),
    );

    let (cmd_tx, cmd_rx) = mpsc::channel::<TurnCommand>(32);
    let ct = CancellationToken::new();

    // ── Run until kill or shutdown signal ───────────────
    let reader = tokio::spawn(read_commands(cmd_tx.clone(), ct.clone()));

    let signal_tx = cmd_tx;
    let signal_ct = ct.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received");
        signal_ct.cancel();
        let _ = signal_tx.send(TurnCommand::Kill).await;
    });

    orchestrator.run(cmd_rx).await;
    ct.cancel();
    let _ = reader.await;
    info!("acp-relay shut down");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    // Stdout carries relay events; all diagnostics go to stderr.
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter).with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
