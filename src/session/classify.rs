//! Heuristic classification of backend errors.
//!
//! The agent reports failures as loosely structured payloads and as free
//! text on stderr. Known fatal conditions are detected by pattern-scanning
//! and rewritten into user-facing messages; everything else is forwarded
//! with the best available message text. Stderr is diagnostic-only and is
//! never parsed as protocol.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

/// Maximum length of extracted error descriptions kept for logging.
const MAX_ERROR_DESCRIPTION: usize = 500;

/// Known fatal backend conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendErrorKind {
    /// The backend is rate-limiting requests.
    RateLimit,
    /// The account's usage quota is exhausted.
    QuotaExceeded,
    /// The selected model does not exist on this backend.
    ModelNotFound,
    /// The agent binary itself could not be found or executed.
    MissingBinary,
    /// A long-running investigation tool timed out backend-side.
    InvestigationTimeout,
}

#[allow(clippy::unwrap_used)] // Pattern is a compile-time constant.
static RATE_LIMIT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)rate.?limit|too many requests|\b429\b").unwrap()
});
#[allow(clippy::unwrap_used)]
static QUOTA: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)quota( .*)?exceeded|exceeded .*quota|insufficient credit").unwrap()
});
#[allow(clippy::unwrap_used)]
static MODEL_NOT_FOUND: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)model .*not.?(found|exist|available)|unknown model|no such model").unwrap()
});
#[allow(clippy::unwrap_used)]
static MISSING_BINARY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)command not found|no such file or directory|ENOENT|not recognized as an")
        .unwrap()
});
#[allow(clippy::unwrap_used)]
static INVESTIGATION_TIMEOUT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)investigat\w*.{0,40}time.?(d)?.?out|time.?(d)?.?out.{0,40}investigat").unwrap()
});

/// Classify free text against the known fatal conditions.
#[must_use]
pub fn classify_text(text: &str) -> Option<BackendErrorKind> {
    if QUOTA.is_match(text) {
        Some(BackendErrorKind::QuotaExceeded)
    } else if RATE_LIMIT.is_match(text) {
        Some(BackendErrorKind::RateLimit)
    } else if MODEL_NOT_FOUND.is_match(text) {
        Some(BackendErrorKind::ModelNotFound)
    } else if INVESTIGATION_TIMEOUT.is_match(text) {
        Some(BackendErrorKind::InvestigationTimeout)
    } else if MISSING_BINARY.is_match(text) {
        Some(BackendErrorKind::MissingBinary)
    } else {
        None
    }
}

/// User-facing rewrite of a classified condition.
#[must_use]
pub fn user_facing_message(kind: BackendErrorKind) -> &'static str {
    match kind {
        BackendErrorKind::RateLimit => {
            "The model backend is rate-limiting requests. Wait a moment and try again."
        }
        BackendErrorKind::QuotaExceeded => {
            "The account's usage quota is exhausted. Check your plan or billing settings."
        }
        BackendErrorKind::ModelNotFound => {
            "The selected model is not available on this backend. Pick a different model."
        }
        BackendErrorKind::MissingBinary => {
            "The agent binary could not be found. Verify it is installed and on PATH."
        }
        BackendErrorKind::InvestigationTimeout => {
            "A codebase investigation timed out on the backend. The turn continues without it."
        }
    }
}

/// Best-effort message for an error payload: classified rewrite when a known
/// condition matches, otherwise the raw extracted text.
#[must_use]
pub fn describe_error(payload: &Value) -> String {
    let raw = extract_error_description(payload)
        .unwrap_or_else(|| truncate(&payload.to_string(), MAX_ERROR_DESCRIPTION));
    match classify_text(&raw) {
        Some(kind) => user_facing_message(kind).to_owned(),
        None => raw,
    }
}

/// Extract a human-readable description from an error-ish payload.
///
/// Accepts a bare string, or an object carrying one of the conventional
/// `error` / `message` / `status` / `reason` fields (recursing one level
/// through `error` objects). The result is truncated for logging.
#[must_use]
pub fn extract_error_description(payload: &Value) -> Option<String> {
    let text = match payload {
        Value::String(s) => Some(s.clone()),
        Value::Object(map) => ["error", "message", "status", "reason"]
            .iter()
            .find_map(|key| map.get(*key))
            .and_then(|inner| match inner {
                Value::String(s) => Some(s.clone()),
                Value::Object(_) => extract_error_description(inner),
                other => Some(other.to_string()),
            }),
        _ => None,
    }?;

    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(truncate(trimmed, MAX_ERROR_DESCRIPTION))
}

/// Truncate `text` to at most `max` bytes on a char boundary.
fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_owned();
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &text[..end])
}
