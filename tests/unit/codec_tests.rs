//! Unit tests for the NDJSON codec.
//!
//! Covers valid-frame decoding, buffering of partial lines, non-JSON noise
//! dropping with counting, scalar rejection, and the max-line-length error.

use bytes::BytesMut;
use std::sync::atomic::Ordering;
use tokio_util::codec::{Decoder, Encoder};

use acp_relay::acp::codec::{AcpCodec, MAX_LINE_BYTES};
use acp_relay::AppError;

// ── Valid frames ─────────────────────────────────────────────────────────────

/// A complete JSON object on a newline-terminated line decodes to the line
/// content without the trailing newline.
#[test]
fn single_json_object_decodes() {
    let mut codec = AcpCodec::new();
    let mut buf = BytesMut::from("{\"jsonrpc\":\"2.0\",\"method\":\"session/update\"}\n");

    let frame = codec.decode(&mut buf).expect("valid frame decodes");

    assert_eq!(
        frame,
        Some("{\"jsonrpc\":\"2.0\",\"method\":\"session/update\"}".to_owned())
    );
}

/// Two frames delivered in one buffer are returned by successive decode calls.
#[test]
fn batched_frames_decode_in_order() {
    let mut codec = AcpCodec::new();
    let mut buf = BytesMut::from("{\"a\":1}\n[2,3]\n");

    assert_eq!(codec.decode(&mut buf).unwrap(), Some("{\"a\":1}".to_owned()));
    assert_eq!(codec.decode(&mut buf).unwrap(), Some("[2,3]".to_owned()));
    assert_eq!(codec.decode(&mut buf).unwrap(), None);
}

/// A partial line without a newline is buffered until the rest arrives.
#[test]
fn partial_line_is_buffered() {
    let mut codec = AcpCodec::new();
    let mut buf = BytesMut::from("{\"method\":\"sess");

    assert_eq!(codec.decode(&mut buf).unwrap(), None, "no newline yet");

    buf.extend_from_slice(b"ion/update\"}\n");
    assert_eq!(
        codec.decode(&mut buf).unwrap(),
        Some("{\"method\":\"session/update\"}".to_owned())
    );
}

// ── Noise dropping ───────────────────────────────────────────────────────────

/// Non-JSON lines interleaved with valid frames are dropped and counted;
/// the valid frames come through in order.
#[test]
fn non_json_noise_is_dropped_and_counted() {
    let mut codec = AcpCodec::new();
    let dropped = codec.dropped_lines();
    let mut buf = BytesMut::from("starting agent...\n{\"a\":1}\nDEBUG ready\nnot json\n{\"b\":2}\n");

    assert_eq!(codec.decode(&mut buf).unwrap(), Some("{\"a\":1}".to_owned()));
    assert_eq!(codec.decode(&mut buf).unwrap(), Some("{\"b\":2}".to_owned()));
    assert_eq!(codec.decode(&mut buf).unwrap(), None);
    assert_eq!(dropped.load(Ordering::Relaxed), 3);
}

/// Bare JSON scalars are noise: no protocol message is a bare string or
/// number.
#[test]
fn bare_scalars_are_dropped() {
    let mut codec = AcpCodec::new();
    let dropped = codec.dropped_lines();
    let mut buf = BytesMut::from("\"hello\"\n42\nnull\n{\"ok\":true}\n");

    assert_eq!(
        codec.decode(&mut buf).unwrap(),
        Some("{\"ok\":true}".to_owned())
    );
    assert_eq!(dropped.load(Ordering::Relaxed), 3);
}

/// Empty and whitespace-only lines are skipped without counting as noise.
#[test]
fn blank_lines_are_skipped_silently() {
    let mut codec = AcpCodec::new();
    let dropped = codec.dropped_lines();
    let mut buf = BytesMut::from("\n   \n{\"a\":1}\n");

    assert_eq!(codec.decode(&mut buf).unwrap(), Some("{\"a\":1}".to_owned()));
    assert_eq!(dropped.load(Ordering::Relaxed), 0);
}

/// A line containing a JSON object with leading whitespace still decodes.
#[test]
fn leading_whitespace_before_object_is_accepted() {
    let mut codec = AcpCodec::new();
    let mut buf = BytesMut::from("  {\"a\":1}\n");

    assert_eq!(
        codec.decode(&mut buf).unwrap(),
        Some("  {\"a\":1}".to_owned())
    );
}

// ── Errors ───────────────────────────────────────────────────────────────────

/// A line exceeding the maximum length surfaces an `AppError::Acp` error.
#[test]
fn oversized_line_errors() {
    let mut codec = AcpCodec::new();
    let mut line = "{\"pad\":\"".to_owned();
    line.push_str(&"x".repeat(MAX_LINE_BYTES));
    line.push_str("\"}\n");
    let mut buf = BytesMut::from(line.as_str());

    let err = codec.decode(&mut buf).expect_err("line too long must error");
    assert!(matches!(err, AppError::Acp(msg) if msg.contains("line too long")));
}

// ── Encoding ─────────────────────────────────────────────────────────────────

/// Encoding appends a newline terminator.
#[test]
fn encode_appends_newline() {
    let mut codec = AcpCodec::new();
    let mut buf = BytesMut::new();

    codec
        .encode("{\"jsonrpc\":\"2.0\"}".to_owned(), &mut buf)
        .expect("encode succeeds");

    assert_eq!(&buf[..], b"{\"jsonrpc\":\"2.0\"}\n");
}
