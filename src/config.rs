//! Global configuration parsing, validation, and credential loading.

use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::warn;

use crate::orchestrator::TurnMode;
use crate::policy::PermissionMode;
use crate::{prefs, AppError, Result};

/// Keyring service name for stored credentials.
const KEYRING_SERVICE: &str = "acp-relay";

fn default_credential_env() -> String {
    "AGENT_API_KEY".into()
}

/// Agent subprocess invocation settings.
///
/// The API credential is loaded at runtime via OS keychain or environment
/// variable, not from the TOML config file.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct AgentConfig {
    /// Agent binary (e.g. `gemini`, `claude-code-acp`).
    pub command: String,
    /// Default arguments for the agent binary.
    #[serde(default)]
    pub args: Vec<String>,
    /// Extra environment merged over the inherited one.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Environment variable name the credential is exported under into the
    /// agent process, and the fallback variable it is read from.
    #[serde(default = "default_credential_env")]
    pub credential_env: String,
    /// Resolved API credential (populated at runtime).
    #[serde(skip)]
    pub api_key: String,
}

/// Default conversation mode applied when a prompt carries no override.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ModeConfig {
    /// Default permission policy.
    #[serde(default)]
    pub permission_mode: PermissionMode,
    /// Default model identifier; when unset, the model-preference file
    /// supplies the startup model.
    #[serde(default)]
    pub model: Option<String>,
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct BridgeConfig {
    /// Working directory the agent subprocess runs in.
    pub workspace_root: PathBuf,
    /// Agent invocation settings.
    pub agent: AgentConfig,
    /// Default conversation mode.
    #[serde(default)]
    pub mode: ModeConfig,
    /// Model-preference file location; defaults to
    /// `<workspace_root>/.acp-relay/model-prefs.json`.
    #[serde(default)]
    pub prefs_file: Option<PathBuf>,
}

impl BridgeConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and normalize paths.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Load the agent API credential from OS keychain with env-var fallback.
    ///
    /// Tries the `acp-relay` keyring service first, then falls back to the
    /// environment variable named by `agent.credential_env`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if neither keychain nor env var provides
    /// the credential.
    pub async fn load_credentials(&mut self) -> Result<()> {
        self.agent.api_key = load_credential("agent_api_key", &self.agent.credential_env).await?;
        Ok(())
    }

    /// Environment map for the agent subprocess: configured extras plus the
    /// resolved credential.
    #[must_use]
    pub fn agent_env(&self) -> HashMap<String, String> {
        let mut env = self.agent.env.clone();
        env.insert(self.agent.credential_env.clone(), self.agent.api_key.clone());
        env
    }

    /// Resolve the startup conversation mode.
    ///
    /// The configured model wins; the model-preference file is the
    /// lowest-precedence source and is only consulted when the
    /// configuration names no model.
    #[must_use]
    pub fn initial_mode(&self) -> TurnMode {
        TurnMode {
            permission_mode: self.mode.permission_mode,
            model: self
                .mode
                .model
                .clone()
                .or_else(|| prefs::load_last_model(&self.prefs_path())),
        }
    }

    /// Effective model-preference file path.
    #[must_use]
    pub fn prefs_path(&self) -> PathBuf {
        self.prefs_file.clone().unwrap_or_else(|| {
            self.workspace_root
                .join(".acp-relay")
                .join("model-prefs.json")
        })
    }

    fn validate(&mut self) -> Result<()> {
        if self.agent.command.trim().is_empty() {
            return Err(AppError::Config("agent.command must not be empty".into()));
        }
        if self.agent.credential_env.trim().is_empty() {
            return Err(AppError::Config(
                "agent.credential_env must not be empty".into(),
            ));
        }

        let canonical_root = self
            .workspace_root
            .canonicalize()
            .map_err(|err| AppError::Config(format!("workspace_root invalid: {err}")))?;
        self.workspace_root = canonical_root;

        Ok(())
    }
}

/// Load a single credential from OS keychain with env-var fallback.
async fn load_credential(keyring_key: &str, env_key: &str) -> Result<String> {
    let key = keyring_key.to_owned();

    // Try OS keychain first via spawn_blocking (keyring is synchronous I/O).
    let keychain_result = tokio::task::spawn_blocking(move || {
        keyring::Entry::new(KEYRING_SERVICE, &key).and_then(|entry| entry.get_password())
    })
    .await
    .map_err(|err| AppError::Config(format!("keychain task panicked: {err}")))?;

    match keychain_result {
        Ok(value) if !value.is_empty() => return Ok(value),
        Ok(_) => {
            warn!(key = keyring_key, "keychain entry is empty, trying env var");
        }
        Err(err) => {
            warn!(
                key = keyring_key,
                ?err,
                "keychain lookup failed, trying env var"
            );
        }
    }

    // Fallback to environment variable.
    env::var(env_key).map_err(|_| {
        AppError::Config(format!(
            "credential {keyring_key} not found in keychain or {env_key} env var"
        ))
    })
}
