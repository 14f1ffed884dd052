//! Per-file diff deduplication.
//!
//! Agents re-send the full diff of a file on every tool-call update touching
//! it, which floods the relay with identical change notifications. This
//! cache remembers the last diff seen per path within a turn and suppresses
//! exact repeats. `reset` clears the whole cache and runs whenever a turn
//! completes or aborts, so deduplication never spans turns.

use std::collections::HashMap;

use uuid::Uuid;

/// A change notification that passed deduplication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffEmit {
    /// Synthetic call id pairing the tool-call and tool-call-result events.
    pub call_id: String,
    /// Target file path.
    pub path: String,
    /// Unified diff text.
    pub diff: String,
}

/// Last-seen-diff cache keyed by file path.
#[derive(Debug, Default)]
pub struct DiffDeduplicator {
    last_seen: HashMap<String, String>,
}

impl DiffDeduplicator {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `diff` for `path`, returning an emission unless it repeats the
    /// stored value exactly. The stored value is overwritten either way.
    pub fn process(&mut self, path: &str, diff: &str) -> Option<DiffEmit> {
        let repeat = self
            .last_seen
            .get(path)
            .is_some_and(|stored| stored == diff);
        self.last_seen.insert(path.to_owned(), diff.to_owned());

        if repeat {
            return None;
        }
        Some(DiffEmit {
            call_id: format!("diff-{}", Uuid::new_v4()),
            path: path.to_owned(),
            diff: diff.to_owned(),
        })
    }

    /// Clear the cache. Invoked on turn completion or abort.
    pub fn reset(&mut self) {
        self.last_seen.clear();
    }

    /// Number of paths currently cached.
    #[must_use]
    pub fn len(&self) -> usize {
        self.last_seen.len()
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.last_seen.is_empty()
    }
}

/// Render a unified diff from a tool-reported file change.
///
/// The agent reports whole-file `oldText`/`newText` pairs rather than a
/// pre-rendered diff; `diffy::create_patch` computes real hunks from the
/// pair, so unchanged lines stay context instead of delete/insert churn. An
/// absent `old_text` means file creation and diffs against empty content.
#[must_use]
pub fn render_unified_diff(path: &str, old_text: Option<&str>, new_text: &str) -> String {
    let patch = diffy::create_patch(old_text.unwrap_or(""), new_text);
    let rendered = patch.to_string();

    // `create_patch` labels the headers `original`/`modified`; swap in the
    // reported file path so the diff names the file it changes.
    let hunks = rendered.splitn(3, '\n').nth(2).unwrap_or("");
    format!("--- {path}\n+++ {path}\n{hunks}")
}
