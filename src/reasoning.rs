//! Streamed "thinking" text accumulator.
//!
//! Thought chunks arrive as raw text fragments with no structure. This
//! parser accumulates them and decides between two renderings: a section
//! whose first characters are a bold-marker pair (`**Title**`) becomes a
//! synthetic tool call (so the consumer can render reasoning as a collapsible
//! operation), anything else is flushed as a plain reasoning note.
//!
//! The synthetic call is emitted as soon as the closing marker is seen;
//! its result — the accumulated body — is only flushed when the section is
//! completed (turn idle) or aborted (turn cancelled/reset).

use uuid::Uuid;

/// Bold marker delimiting a reasoning section title.
const BOLD_MARKER: &str = "**";

/// How a reasoning section ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionStatus {
    /// Turn reached idle with the section open.
    Completed,
    /// Turn was cancelled or the session reset.
    Cancelled,
}

impl SectionStatus {
    /// Canonical wire string.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Output produced while feeding or flushing the accumulator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReasoningEmit {
    /// A titled section opened; render as a synthetic tool call.
    SectionStarted {
        /// Freshly generated synthetic call id.
        call_id: String,
        /// Title between the bold markers.
        title: String,
    },
    /// A titled section closed; render as the synthetic call's result.
    SectionFinished {
        /// Synthetic call id from the matching [`ReasoningEmit::SectionStarted`].
        call_id: String,
        /// Accumulated body text.
        text: String,
        /// Whether the section completed or was cancelled.
        status: SectionStatus,
    },
    /// Untitled reasoning text; render as a plain note, never a tool call.
    Note {
        /// The accumulated text.
        text: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ParseState {
    /// Nothing buffered yet, or too little to classify.
    AwaitingContent,
    /// Buffer starts with a bold marker; hunting for the closing one.
    CapturingTitle,
    /// No leading marker; everything is plain content.
    PlainContent,
    /// Title recognised and announced; accumulating the body.
    Titled { call_id: String },
}

/// Stateful parser over an append-only text accumulator.
#[derive(Debug)]
pub struct ReasoningAccumulator {
    state: ParseState,
    buffer: String,
}

impl Default for ReasoningAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

impl ReasoningAccumulator {
    /// Create an empty accumulator.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: ParseState::AwaitingContent,
            buffer: String::new(),
        }
    }

    /// Whether any text is currently buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty() && self.state == ParseState::AwaitingContent
    }

    /// Append one thought chunk, possibly emitting a section start.
    pub fn push(&mut self, chunk: &str) -> Vec<ReasoningEmit> {
        if chunk.is_empty() {
            return Vec::new();
        }
        self.buffer.push_str(chunk);

        if self.state == ParseState::AwaitingContent {
            if self.buffer.starts_with(BOLD_MARKER) {
                self.state = ParseState::CapturingTitle;
            } else if self.buffer.len() >= BOLD_MARKER.len() || !self.buffer.starts_with('*') {
                // A single buffered '*' could still grow into a marker.
                self.state = ParseState::PlainContent;
            }
        }

        if self.state == ParseState::CapturingTitle {
            return self.try_close_title();
        }
        Vec::new()
    }

    /// Flush the section as completed (turn went idle) and reset.
    pub fn complete(&mut self) -> Vec<ReasoningEmit> {
        self.flush(SectionStatus::Completed)
    }

    /// Flush the section as cancelled (turn aborted or session reset) and
    /// reset. Safe to call with nothing buffered; the flush is then a no-op.
    pub fn abort(&mut self) -> Vec<ReasoningEmit> {
        self.flush(SectionStatus::Cancelled)
    }

    // ── Private helpers ──────────────────────────────────────────────────────

    /// Look for the closing bold marker and announce the section if found.
    fn try_close_title(&mut self) -> Vec<ReasoningEmit> {
        let Some(close) = self.buffer[BOLD_MARKER.len()..].find(BOLD_MARKER) else {
            return Vec::new();
        };
        let close = close + BOLD_MARKER.len();

        let title = self.buffer[BOLD_MARKER.len()..close].to_owned();
        let mut body = self.buffer[close + BOLD_MARKER.len()..].to_owned();
        if let Some(rest) = body.strip_prefix('\n') {
            body = rest.to_owned();
        }

        let call_id = format!("reasoning-{}", Uuid::new_v4());
        self.buffer = body;
        self.state = ParseState::Titled {
            call_id: call_id.clone(),
        };
        vec![ReasoningEmit::SectionStarted { call_id, title }]
    }

    /// Flush whatever is buffered with `status` and clear all state.
    fn flush(&mut self, status: SectionStatus) -> Vec<ReasoningEmit> {
        let state = std::mem::replace(&mut self.state, ParseState::AwaitingContent);
        let text = std::mem::take(&mut self.buffer);

        match state {
            ParseState::Titled { call_id } => {
                vec![ReasoningEmit::SectionFinished {
                    call_id,
                    text,
                    status,
                }]
            }
            ParseState::AwaitingContent
            | ParseState::CapturingTitle
            | ParseState::PlainContent => {
                // Unclosed titles flush as plain text; a title that never
                // closed was never announced as a call.
                if text.trim().is_empty() {
                    Vec::new()
                } else {
                    vec![ReasoningEmit::Note { text }]
                }
            }
        }
    }
}
