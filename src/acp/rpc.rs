//! JSON-RPC 2.0 correlation layer over the framed agent stream.
//!
//! Sits between the [`codec`](crate::acp::codec) framing and the agent
//! session. Outbound requests carry monotonically increasing numeric ids;
//! responses are matched against a pending map and delivered through oneshot
//! channels. Inbound traffic that is not a response (notifications and
//! agent-initiated requests such as `session/request_permission`) is routed
//! through an [`mpsc`] channel as [`Inbound`] items for the session's pump
//! task.
//!
//! Prompt submissions use [`RpcHandle::request_detached`]: the request is
//! written (acknowledging submission once the write drains) and its eventual
//! response surfaces as [`Inbound::OrphanResponse`] instead of suspending the
//! caller for the whole turn.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::acp::codec::{AcpCodec, DroppedLines};
use crate::{AppError, Result};

/// Response to an outbound request: the `result` value, or the raw JSON-RPC
/// `error` object for heuristic classification by the caller.
pub type RpcOutcome = std::result::Result<Value, Value>;

/// Inbound traffic that is not a correlated response.
#[derive(Debug)]
pub enum Inbound {
    /// A notification from the agent (`session/update`, …).
    Notification {
        /// Method name.
        method: String,
        /// Method parameters.
        params: Value,
    },
    /// An agent-initiated request that expects a reply
    /// (`session/request_permission`).
    Request {
        /// Correlation id to echo in the reply.
        id: Value,
        /// Method name.
        method: String,
        /// Method parameters.
        params: Value,
    },
    /// Response to a detached request (prompt submissions).
    OrphanResponse {
        /// Request id the response correlates to.
        id: u64,
        /// Result or error payload.
        outcome: RpcOutcome,
    },
    /// The stream ended or failed; no further traffic will arrive.
    StreamClosed {
        /// Human-readable cause (`"eof"` or a decode error description).
        reason: String,
    },
}

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<RpcOutcome>>>>;

/// Cloneable handle for issuing outbound RPC traffic.
#[derive(Debug, Clone)]
pub struct RpcHandle {
    next_id: Arc<AtomicU64>,
    out_tx: mpsc::Sender<Value>,
    pending: PendingMap,
}

impl RpcHandle {
    /// Issue a request and await its response.
    ///
    /// No timeout is applied here; callers bound the wait themselves
    /// (handshake calls use the 120 s startup timeout).
    ///
    /// # Errors
    ///
    /// - [`AppError::Acp`] if the stream is closed before the write completes
    ///   or before a response arrives.
    pub async fn request(&self, method: &str, params: Value) -> Result<RpcOutcome> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        if let Err(e) = self.send_frame(build_request(id, method, params)).await {
            self.pending.lock().await.remove(&id);
            return Err(e);
        }

        match rx.await {
            Ok(outcome) => Ok(outcome),
            Err(_) => Err(AppError::Acp(format!(
                "stream closed while awaiting response to '{method}' (id {id})"
            ))),
        }
    }

    /// Issue a request without waiting for its response.
    ///
    /// Returns once the frame is written (submission acknowledged). The
    /// eventual response is delivered as [`Inbound::OrphanResponse`] carrying
    /// the returned id.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Acp`] if the write fails.
    pub async fn request_detached(&self, method: &str, params: Value) -> Result<u64> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.send_frame(build_request(id, method, params)).await?;
        Ok(id)
    }

    /// Send a notification (no id, no response).
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Acp`] if the write fails.
    pub async fn notify(&self, method: &str, params: Value) -> Result<()> {
        self.send_frame(json!({ "jsonrpc": "2.0", "method": method, "params": params }))
            .await
    }

    /// Reply to an agent-initiated request.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Acp`] if the write fails.
    pub async fn respond(&self, id: Value, result: Value) -> Result<()> {
        self.send_frame(json!({ "jsonrpc": "2.0", "id": id, "result": result }))
            .await
    }

    /// Reply to an agent-initiated request with a JSON-RPC error.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Acp`] if the write fails.
    pub async fn respond_error(&self, id: Value, code: i64, message: &str) -> Result<()> {
        self.send_frame(json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": { "code": code, "message": message }
        }))
        .await
    }

    /// Drop every pending response waiter.
    ///
    /// Waiters observe the drop as a stream-closed error. Called from
    /// dispose so no request outlives its session.
    pub async fn clear_pending(&self) {
        let mut pending = self.pending.lock().await;
        let count = pending.len();
        pending.clear();
        if count > 0 {
            debug!(count, "rpc: cleared pending response waiters");
        }
    }

    async fn send_frame(&self, frame: Value) -> Result<()> {
        self.out_tx
            .send(frame)
            .await
            .map_err(|_| AppError::Acp("write failed: agent stream closed".into()))
    }
}

/// Build a JSON-RPC request frame.
fn build_request(id: u64, method: &str, params: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params })
}

/// Running RPC connection: the handle plus the inbound receiver and the
/// dropped-line counter of the underlying codec.
pub struct RpcConnection {
    /// Outbound handle shared with the session and the orchestrator.
    pub handle: RpcHandle,
    /// Inbound notifications/requests/orphan responses, in arrival order.
    pub inbound_rx: mpsc::Receiver<Inbound>,
    /// Count of non-JSON stdout lines dropped by the codec.
    pub dropped_lines: DroppedLines,
}

/// Capacity of the outbound frame channel. Bounded so writers feel the
/// subprocess's stdin back-pressure instead of buffering unbounded frames.
const OUT_CHANNEL_CAPACITY: usize = 32;

/// Capacity of the inbound channel feeding the session pump.
const IN_CHANNEL_CAPACITY: usize = 256;

/// Start the read/write pump tasks over the agent's stdio handles.
///
/// `writer` receives frames from the handle's bounded channel and writes them
/// through [`FramedWrite`]; a write that cannot complete immediately suspends
/// until the sink drains. `reader` decodes frames with [`AcpCodec`] (which
/// drops and counts non-JSON lines), resolves pending responses, and forwards
/// everything else as [`Inbound`] items.
///
/// Both tasks stop when `cancel` fires or their stream/channel closes. A
/// decode error poisons the stream: the reader emits
/// [`Inbound::StreamClosed`] with the error description and exits.
pub fn connect<R, W>(stdout: R, stdin: W, cancel: &CancellationToken) -> RpcConnection
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let codec = AcpCodec::new();
    let dropped_lines = codec.dropped_lines();
    let mut framed_read = FramedRead::new(stdout, codec);
    let mut framed_write = FramedWrite::new(stdin, AcpCodec::new());

    let (out_tx, mut out_rx) = mpsc::channel::<Value>(OUT_CHANNEL_CAPACITY);
    let (in_tx, inbound_rx) = mpsc::channel::<Inbound>(IN_CHANNEL_CAPACITY);

    let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
    let handle = RpcHandle {
        next_id: Arc::new(AtomicU64::new(1)),
        out_tx,
        pending: Arc::clone(&pending),
    };

    // Writer task: serialise outbound frames to the agent's stdin.
    let writer_cancel = cancel.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;

                () = writer_cancel.cancelled() => {
                    debug!("rpc writer: cancellation received, stopping");
                    break;
                }

                frame = out_rx.recv() => {
                    let Some(frame) = frame else {
                        debug!("rpc writer: frame channel closed, stopping");
                        break;
                    };
                    if let Err(e) = framed_write.send(frame.to_string()).await {
                        warn!(error = %e, "rpc writer: write to agent stdin failed");
                        break;
                    }
                }
            }
        }
        // Finalise the subprocess's input so the agent sees EOF.
        let _ = framed_write.close().await;
    });

    // Reader task: route responses to waiters, everything else inbound.
    let reader_cancel = cancel.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;

                () = reader_cancel.cancelled() => {
                    debug!("rpc reader: cancellation received, stopping");
                    break;
                }

                item = framed_read.next() => {
                    match item {
                        None => {
                            let _ = in_tx
                                .send(Inbound::StreamClosed { reason: "eof".into() })
                                .await;
                            break;
                        }
                        Some(Err(e)) => {
                            warn!(error = %e, "rpc reader: decode error, poisoning stream");
                            let _ = in_tx
                                .send(Inbound::StreamClosed { reason: e.to_string() })
                                .await;
                            break;
                        }
                        Some(Ok(line)) => {
                            if route_frame(&line, &pending, &in_tx).await.is_err() {
                                debug!("rpc reader: inbound channel closed, stopping");
                                break;
                            }
                        }
                    }
                }
            }
        }
        pending.lock().await.clear();
    });

    RpcConnection {
        handle,
        inbound_rx,
        dropped_lines,
    }
}

/// Classify one decoded frame and deliver it.
///
/// Returns `Err(())` only when the inbound channel is closed.
async fn route_frame(
    line: &str,
    pending: &PendingMap,
    in_tx: &mpsc::Sender<Inbound>,
) -> std::result::Result<(), ()> {
    let frame: Value = match serde_json::from_str(line) {
        Ok(v) => v,
        // The codec already validated JSON; this covers duplicate-key edge
        // cases only.
        Err(e) => {
            warn!(error = %e, "rpc reader: unparseable frame, skipping");
            return Ok(());
        }
    };

    if let Some(method) = frame.get("method").and_then(Value::as_str) {
        let method = method.to_owned();
        let params = frame.get("params").cloned().unwrap_or(Value::Null);
        let item = match frame.get("id") {
            Some(id) if !id.is_null() => Inbound::Request {
                id: id.clone(),
                method,
                params,
            },
            _ => Inbound::Notification { method, params },
        };
        return in_tx.send(item).await.map_err(|_| ());
    }

    // No method: a response. Ids may arrive as numbers or numeric strings.
    let id = frame.get("id").and_then(|id| {
        id.as_u64()
            .or_else(|| id.as_str().and_then(|raw| raw.parse::<u64>().ok()))
    });
    let Some(id) = id else {
        warn!(%frame, "rpc reader: response without usable id, skipping");
        return Ok(());
    };

    let outcome: RpcOutcome = match frame.get("error") {
        Some(err) if !err.is_null() => Err(err.clone()),
        _ => Ok(frame.get("result").cloned().unwrap_or(Value::Null)),
    };

    if let Some(tx) = pending.lock().await.remove(&id) {
        let _ = tx.send(outcome);
        return Ok(());
    }

    in_tx
        .send(Inbound::OrphanResponse { id, outcome })
        .await
        .map_err(|_| ())
}
