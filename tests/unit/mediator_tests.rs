//! Unit tests for pending-permission correlation.

use acp_relay::policy::mediator::{MediationOutcome, PermissionMediator};
use acp_relay::policy::{PermissionDecision, PermissionMode};

/// An auto-approvable request is decided synchronously and leaves nothing
/// pending.
#[tokio::test]
async fn auto_approval_is_synchronous() {
    let mediator = PermissionMediator::new();

    let outcome = mediator
        .submit(PermissionMode::Yolo, "run_shell", "call-1")
        .await;

    assert!(matches!(
        outcome,
        MediationOutcome::Decided(PermissionDecision::ApprovedForSession)
    ));
    assert_eq!(mediator.pending_count().await, 0);
}

/// A non-approvable request parks until the external response arrives.
#[tokio::test]
async fn pending_request_resolves_on_respond() {
    let mediator = PermissionMediator::new();

    let MediationOutcome::Pending(rx) = mediator
        .submit(PermissionMode::Default, "edit_file", "call-1")
        .await
    else {
        panic!("default mode must not auto-approve edit_file");
    };
    assert_eq!(mediator.pending_count().await, 1);

    assert!(mediator.respond("call-1", PermissionDecision::Approved).await);
    assert_eq!(rx.await.unwrap(), PermissionDecision::Approved);
    assert_eq!(mediator.pending_count().await, 0);
}

/// First resolution wins; a second response for the same id is a no-op.
#[tokio::test]
async fn second_response_is_noop() {
    let mediator = PermissionMediator::new();

    let MediationOutcome::Pending(rx) = mediator
        .submit(PermissionMode::Default, "edit_file", "call-1")
        .await
    else {
        panic!("expected pending");
    };

    assert!(mediator.respond("call-1", PermissionDecision::Denied).await);
    assert!(!mediator.respond("call-1", PermissionDecision::Approved).await);
    assert_eq!(rx.await.unwrap(), PermissionDecision::Denied);
}

/// A response for an id that was never submitted is a no-op.
#[tokio::test]
async fn unknown_id_response_is_noop() {
    let mediator = PermissionMediator::new();
    assert!(!mediator.respond("ghost", PermissionDecision::Approved).await);
}

/// Reset force-resolves every pending request as cancelled.
#[tokio::test]
async fn reset_cancels_all_pending() {
    let mediator = PermissionMediator::new();

    let MediationOutcome::Pending(rx_a) = mediator
        .submit(PermissionMode::Default, "edit_file", "a")
        .await
    else {
        panic!("expected pending");
    };
    let MediationOutcome::Pending(rx_b) = mediator
        .submit(PermissionMode::Default, "write_file", "b")
        .await
    else {
        panic!("expected pending");
    };

    mediator.reset("session restart").await;

    assert_eq!(rx_a.await.unwrap(), PermissionDecision::Cancelled);
    assert_eq!(rx_b.await.unwrap(), PermissionDecision::Cancelled);
    assert_eq!(mediator.pending_count().await, 0);
}

/// Re-submitting an id cancels the older waiter and keeps the newer one.
#[tokio::test]
async fn resubmission_replaces_older_waiter() {
    let mediator = PermissionMediator::new();

    let MediationOutcome::Pending(rx_old) = mediator
        .submit(PermissionMode::Default, "edit_file", "call-1")
        .await
    else {
        panic!("expected pending");
    };
    let MediationOutcome::Pending(rx_new) = mediator
        .submit(PermissionMode::Default, "edit_file", "call-1")
        .await
    else {
        panic!("expected pending");
    };

    assert_eq!(rx_old.await.unwrap(), PermissionDecision::Cancelled);
    assert!(mediator.respond("call-1", PermissionDecision::Approved).await);
    assert_eq!(rx_new.await.unwrap(), PermissionDecision::Approved);
}
