//! Conversation mode and its stable hash.
//!
//! A turn's mode is the pair of permission policy and model selection. The
//! orchestrator hashes the effective mode per turn; a hash change forces a
//! session restart so the new policy and model take effect mid-conversation.

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::policy::PermissionMode;

/// Effective conversation mode for one turn.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnMode {
    /// Permission policy applied to tool-authorization requests.
    #[serde(default)]
    pub permission_mode: PermissionMode,
    /// Model identifier passed to the agent, when explicitly selected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// Partial mode override carried on a prompt.
///
/// Absent fields inherit from the previous turn's effective mode.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModeOverride {
    /// Permission mode, when the prompt changes it.
    #[serde(default)]
    pub permission_mode: Option<PermissionMode>,
    /// Model identifier, when the prompt changes it.
    #[serde(default)]
    pub model: Option<String>,
}

impl TurnMode {
    /// Apply a partial override, inheriting absent fields.
    #[must_use]
    pub fn with_override(&self, over: &ModeOverride) -> Self {
        Self {
            permission_mode: over.permission_mode.unwrap_or(self.permission_mode),
            model: over.model.clone().or_else(|| self.model.clone()),
        }
    }

    /// Stable hash of the effective mode fields.
    ///
    /// Equal modes always hash equal; the session is restarted whenever a
    /// turn's hash differs from the running session's.
    #[must_use]
    pub fn hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.permission_mode.as_str().as_bytes());
        hasher.update([0u8]);
        hasher.update(self.model.as_deref().unwrap_or("").as_bytes());
        let digest = hasher.finalize();

        let mut hex = String::with_capacity(16);
        for byte in digest.iter().take(8) {
            let _ = write!(hex, "{byte:02x}");
        }
        hex
    }
}
