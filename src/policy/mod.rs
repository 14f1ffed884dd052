//! Permission policy for tool-authorization requests.
//!
//! Pure decision logic lives here; pending-request correlation lives in
//! [`mediator`]. The precedence is fixed: bookkeeping tools are always
//! auto-approved, then the active [`PermissionMode`] decides.

pub mod mediator;

use serde::{Deserialize, Serialize};

use crate::acp::protocol::PermissionOption;

/// Permission policy applied to tool-authorization requests.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PermissionMode {
    /// Never auto-approve; every non-bookkeeping request goes upstream.
    #[default]
    Default,
    /// Auto-approve everything that does not look like a write.
    ReadOnly,
    /// Auto-approve everything, one request at a time.
    SafeYolo,
    /// Auto-approve everything for the whole session.
    Yolo,
}

impl PermissionMode {
    /// Canonical wire string for this mode.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::ReadOnly => "read-only",
            Self::SafeYolo => "safe-yolo",
            Self::Yolo => "yolo",
        }
    }

    /// Parse a canonical wire string; unknown strings fall back to `Default`.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        match raw {
            "read-only" => Self::ReadOnly,
            "safe-yolo" => Self::SafeYolo,
            "yolo" => Self::Yolo,
            _ => Self::Default,
        }
    }
}

/// Synchronous auto-approval decision.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum AutoDecision {
    /// Approve this single request.
    Approved,
    /// Approve and remember for the rest of the session (`yolo` only).
    ApprovedForSession,
}

/// Tool-name/id fragments that are always auto-approved.
///
/// These are side-effect-free bookkeeping calls (title updates, memory
/// saves, the think tool, and the bridge's own synthetic reasoning/diff
/// calls); blocking them on operator input would stall every turn.
const ALWAYS_ALLOWED_FRAGMENTS: &[&str] =
    &["change_title", "save_memory", "think", "reasoning", "diff"];

/// Tool-name fragments that indicate a write under `read-only` mode.
const WRITE_FRAGMENTS: &[&str] = &["write", "edit", "create", "delete", "patch", "fs-edit"];

/// Evaluate the auto-approval policy for one request.
///
/// Precedence: the always-allowed fragment list wins regardless of mode;
/// otherwise `yolo`/`safe-yolo` approve everything, `read-only` approves
/// anything that does not look like a write, and `default` approves nothing.
#[must_use]
pub fn auto_decision(
    mode: PermissionMode,
    tool_name: &str,
    tool_call_id: &str,
) -> Option<AutoDecision> {
    let name = tool_name.to_ascii_lowercase();
    let id = tool_call_id.to_ascii_lowercase();
    if ALWAYS_ALLOWED_FRAGMENTS
        .iter()
        .any(|f| name.contains(f) || id.contains(f))
    {
        return Some(match mode {
            PermissionMode::Yolo => AutoDecision::ApprovedForSession,
            _ => AutoDecision::Approved,
        });
    }

    match mode {
        PermissionMode::Yolo => Some(AutoDecision::ApprovedForSession),
        PermissionMode::SafeYolo => Some(AutoDecision::Approved),
        PermissionMode::ReadOnly => {
            if WRITE_FRAGMENTS.iter().any(|f| name.contains(f)) {
                None
            } else {
                Some(AutoDecision::Approved)
            }
        }
        PermissionMode::Default => None,
    }
}

/// Final decision for a permission request, auto or operator-supplied.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionDecision {
    /// Proceed once.
    Approved,
    /// Proceed for the rest of the session.
    ApprovedForSession,
    /// Do not proceed.
    Denied,
    /// The request was abandoned (session reset, turn abort).
    Cancelled,
}

impl From<AutoDecision> for PermissionDecision {
    fn from(auto: AutoDecision) -> Self {
        match auto {
            AutoDecision::Approved => Self::Approved,
            AutoDecision::ApprovedForSession => Self::ApprovedForSession,
        }
    }
}

/// Pick the protocol option matching `decision` from the agent's candidates.
///
/// Approvals prefer `allow_always` for session-wide grants, falling back to
/// `allow_once`, then to the first option. Denials prefer `reject_once`.
/// Returns `None` when the agent offered no options (the reply then uses the
/// `cancelled` outcome).
#[must_use]
pub fn select_option(
    decision: PermissionDecision,
    options: &[PermissionOption],
) -> Option<&PermissionOption> {
    let kind_of = |opt: &PermissionOption| opt.kind.clone().unwrap_or_default();

    let preferred: &[&str] = match decision {
        PermissionDecision::ApprovedForSession => &["allow_always", "allow_once"],
        PermissionDecision::Approved => &["allow_once", "allow_always"],
        PermissionDecision::Denied | PermissionDecision::Cancelled => {
            &["reject_once", "reject_always"]
        }
    };

    for kind in preferred {
        if let Some(opt) = options.iter().find(|o| kind_of(o) == *kind) {
            return Some(opt);
        }
    }

    match decision {
        PermissionDecision::Approved | PermissionDecision::ApprovedForSession => options.first(),
        PermissionDecision::Denied | PermissionDecision::Cancelled => None,
    }
}
