//! Local model-preference file.
//!
//! A small JSON file recording the last explicitly selected model. Read at
//! startup as the lowest-precedence model source and rewritten whenever a
//! turn's mode override names a model.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::Result;

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ModelPrefs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_model: Option<String>,
}

/// Read the last-used model, if the file exists and parses.
///
/// Missing or corrupt files yield `None`; corruption is logged, never fatal.
#[must_use]
pub fn load_last_model(path: &Path) -> Option<String> {
    let raw = fs::read_to_string(path).ok()?;
    match serde_json::from_str::<ModelPrefs>(&raw) {
        Ok(prefs) => prefs.last_model,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "ignoring corrupt model-preference file");
            None
        }
    }
}

/// Record `model` as the last-used model.
///
/// # Errors
///
/// Returns [`AppError::Io`](crate::AppError::Io) if the file or its parent
/// directory cannot be written.
pub fn save_last_model(path: &Path, model: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let prefs = ModelPrefs {
        last_model: Some(model.to_owned()),
    };
    let body = serde_json::to_string_pretty(&prefs)
        .map_err(|e| crate::AppError::Io(format!("serializing model preference: {e}")))?;
    fs::write(path, body)?;
    Ok(())
}
