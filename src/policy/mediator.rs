//! Pending-permission correlation.
//!
//! When the policy cannot decide synchronously, the request is parked here
//! keyed by tool-call id until an external response arrives. First
//! resolution wins; later responses for the same id are no-ops. `reset`
//! force-resolves everything still pending as cancelled and must run on
//! every session restart so no request leaks indefinitely.

use std::collections::HashMap;

use tokio::sync::{oneshot, Mutex};
use tracing::{debug, warn};

use crate::policy::{auto_decision, PermissionDecision, PermissionMode};

/// Outcome of submitting a request to the mediator.
#[derive(Debug)]
pub enum MediationOutcome {
    /// Policy decided synchronously.
    Decided(PermissionDecision),
    /// The request is pending; await the receiver for the external decision.
    Pending(oneshot::Receiver<PermissionDecision>),
}

/// Policy engine plus request/response correlation for permission asks.
#[derive(Debug, Default)]
pub struct PermissionMediator {
    /// Pending resolvers keyed by tool-call id.
    pending: Mutex<HashMap<String, oneshot::Sender<PermissionDecision>>>,
}

impl PermissionMediator {
    /// Create an empty mediator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Evaluate a request under `mode`.
    ///
    /// Auto-approvals return [`MediationOutcome::Decided`] synchronously.
    /// Otherwise the request is recorded keyed by `tool_call_id` and the
    /// caller awaits the returned receiver. A second request for an id that
    /// is already pending replaces the old resolver (the old waiter observes
    /// a cancelled decision).
    pub async fn submit(
        &self,
        mode: PermissionMode,
        tool_name: &str,
        tool_call_id: &str,
    ) -> MediationOutcome {
        if let Some(auto) = auto_decision(mode, tool_name, tool_call_id) {
            debug!(
                tool_name,
                tool_call_id,
                mode = mode.as_str(),
                "permission auto-approved by policy"
            );
            return MediationOutcome::Decided(auto.into());
        }

        let (tx, rx) = oneshot::channel();
        let previous = self.pending.lock().await.insert(tool_call_id.to_owned(), tx);
        if let Some(old) = previous {
            warn!(tool_call_id, "permission request re-submitted, cancelling older waiter");
            let _ = old.send(PermissionDecision::Cancelled);
        }
        MediationOutcome::Pending(rx)
    }

    /// Resolve a pending request by id.
    ///
    /// Returns `true` if a pending entry was resolved. A response for an
    /// unknown or already-resolved id is a no-op and returns `false`.
    pub async fn respond(&self, tool_call_id: &str, decision: PermissionDecision) -> bool {
        let resolver = self.pending.lock().await.remove(tool_call_id);
        match resolver {
            Some(tx) => {
                let delivered = tx.send(decision).is_ok();
                debug!(tool_call_id, delivered, "permission response routed");
                delivered
            }
            None => {
                debug!(tool_call_id, "permission response for unknown or resolved id, ignoring");
                false
            }
        }
    }

    /// Force-resolve every still-pending request as cancelled.
    ///
    /// Runs on every session restart and turn teardown.
    pub async fn reset(&self, reason: &str) {
        let mut pending = self.pending.lock().await;
        let count = pending.len();
        for (id, tx) in pending.drain() {
            debug!(tool_call_id = %id, reason, "cancelling pending permission request");
            let _ = tx.send(PermissionDecision::Cancelled);
        }
        if count > 0 {
            warn!(count, reason, "force-resolved pending permission requests");
        }
    }

    /// Number of requests currently pending.
    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }
}
