//! NDJSON codec for ACP agent streams.
//!
//! Wraps [`tokio_util::codec::LinesCodec`] with a configurable maximum line
//! length, and filters the inbound stream down to lines that parse as JSON
//! objects or arrays. Agent processes occasionally write incidental
//! diagnostic text to the same stdout stream as the protocol; those lines
//! are counted and dropped rather than surfaced as frames.
//!
//! # Usage
//!
//! Use [`AcpCodec`] as the codec parameter for
//! [`tokio_util::codec::FramedRead`] (inbound) and
//! [`tokio_util::codec::FramedWrite`] (outbound). Both directions enforce
//! UTF-8 line framing delimited by `\n`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};
use tracing::debug;

use crate::{AppError, Result};

/// Maximum line length accepted by the ACP codec: 1 MiB.
///
/// Lines exceeding this limit on the inbound stream cause [`AcpCodec::decode`]
/// to return [`AppError::Acp`] with `"line too long"`, protecting the bridge
/// from allocating unbounded memory for a single message.
pub const MAX_LINE_BYTES: usize = 1_048_576;

/// Shared counter of non-JSON lines dropped from an inbound stream.
pub type DroppedLines = Arc<AtomicU64>;

/// NDJSON codec for bidirectional ACP agent streams.
///
/// Delegates line-framing to [`LinesCodec`] with a fixed [`MAX_LINE_BYTES`]
/// limit. Each newline-terminated (`\n`) UTF-8 string is one candidate ACP
/// frame.
///
/// # Decoder
///
/// Only lines whose content parses as a JSON object or array are emitted.
/// Anything else (agent banner text, stray log lines) is dropped; the shared
/// [`DroppedLines`] counter records how many. Lines longer than
/// [`MAX_LINE_BYTES`] return [`AppError::Acp`]`("line too long: …")`, which
/// poisons the stream: the session treats it as a fatal decode failure.
///
/// # Encoder
///
/// Outbound strings are encoded as `item\n`. The max-length limit is a
/// decoder-side concern and is not enforced during encoding.
#[derive(Debug)]
pub struct AcpCodec {
    inner: LinesCodec,
    dropped: DroppedLines,
}

impl AcpCodec {
    /// Create a new `AcpCodec` with the default [`MAX_LINE_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: LinesCodec::new_with_max_length(MAX_LINE_BYTES),
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Counter handle recording non-JSON lines dropped by this codec.
    ///
    /// The handle stays valid after the codec is moved into a
    /// [`FramedRead`](tokio_util::codec::FramedRead).
    #[must_use]
    pub fn dropped_lines(&self) -> DroppedLines {
        Arc::clone(&self.dropped)
    }
}

impl Default for AcpCodec {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether a decoded line is a plausible ACP frame.
///
/// Accepts only JSON objects and arrays; scalars (`"x"`, `42`, `null`) are
/// treated as noise along with unparseable text, because no ACP message is
/// ever a bare scalar.
fn is_json_frame(line: &str) -> bool {
    let trimmed = line.trim_start();
    if !(trimmed.starts_with('{') || trimmed.starts_with('[')) {
        return false;
    }
    serde_json::from_str::<serde::de::IgnoredAny>(trimmed).is_ok()
}

impl Decoder for AcpCodec {
    type Item = String;
    type Error = AppError;

    /// Decode the next JSON frame from `src`, dropping non-JSON lines.
    ///
    /// Returns `Ok(None)` when `src` contains no complete frame yet.
    /// Returns `Err(AppError::Acp("line too long: …"))` when a line exceeds
    /// [`MAX_LINE_BYTES`].
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        loop {
            match self.inner.decode(src).map_err(map_codec_error)? {
                None => return Ok(None),
                Some(line) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    if is_json_frame(&line) {
                        return Ok(Some(line));
                    }
                    let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                    debug!(total, line = %line, "acp codec: dropping non-JSON line");
                }
            }
        }
    }

    /// Decode the final frame when the stream reaches EOF.
    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        loop {
            match self.inner.decode_eof(src).map_err(map_codec_error)? {
                None => return Ok(None),
                Some(line) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    if is_json_frame(&line) {
                        return Ok(Some(line));
                    }
                    let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                    debug!(total, line = %line, "acp codec: dropping non-JSON line at EOF");
                }
            }
        }
    }
}

impl Encoder<String> for AcpCodec {
    type Error = AppError;

    /// Encode `item` as a `\n`-terminated NDJSON line into `dst`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Io`] on underlying I/O failures.
    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<()> {
        // LinesCodec::encode does not enforce a max line length;
        // the limit applies only to decoding.
        self.inner.encode(item, dst).map_err(map_codec_error)
    }
}

// ── Private helper ────────────────────────────────────────────────────────────

/// Map a [`LinesCodecError`] to an [`AppError`].
fn map_codec_error(e: LinesCodecError) -> AppError {
    match e {
        LinesCodecError::MaxLineLengthExceeded => {
            AppError::Acp(format!("line too long: exceeded {MAX_LINE_BYTES} bytes"))
        }
        LinesCodecError::Io(io_err) => AppError::Io(io_err.to_string()),
    }
}
