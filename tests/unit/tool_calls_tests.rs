//! Unit tests for tool-call tracking: name resolution, category timeouts,
//! and timer lifecycle.

use std::time::Duration;

use serde_json::json;

use acp_relay::session::tool_calls::{
    resolve_tool_name, timeout_for, ResolveContext, ToolCallTracker, DEFAULT_TOOL_TIMEOUT,
    INVESTIGATION_TIMEOUT, THINK_TIMEOUT,
};

// ── Name resolution ──────────────────────────────────────────────────────────

/// An explicit name from the notification wins over everything else.
#[test]
fn explicit_name_wins() {
    let name = resolve_tool_name(
        "investigator-123",
        Some("other"),
        Some("read_file"),
        None,
        &json!({}),
        ResolveContext::default(),
    );
    assert_eq!(name, "read_file");
}

/// A blank explicit name is ignored.
#[test]
fn blank_explicit_name_is_ignored() {
    let name = resolve_tool_name(
        "call-think-7",
        None,
        Some("   "),
        None,
        &json!({}),
        ResolveContext::default(),
    );
    assert_eq!(name, "think");
}

/// Known fragments are recognized inside the call id.
#[test]
fn id_fragment_resolves() {
    for (id, expected) in [
        ("toolu_investigator_01", "investigator"),
        ("change_title-5", "change_title"),
        ("abc-save_memory", "save_memory"),
        ("THINK-9", "think"),
    ] {
        let name = resolve_tool_name(id, None, None, None, &json!({}), ResolveContext::default());
        assert_eq!(name, expected, "id {id}");
    }
}

/// Fragments hiding in the JSON-encoded arguments are found when the id is
/// generic.
#[test]
fn argument_fragment_resolves() {
    let input = json!({ "tool": "save_memory", "key": "notes" });
    let name = resolve_tool_name(
        "call-1",
        None,
        None,
        Some(&input),
        &json!({}),
        ResolveContext::default(),
    );
    assert_eq!(name, "save_memory");
}

/// Fragments in the raw payload are the next fallback.
#[test]
fn payload_fragment_resolves() {
    let payload = json!({ "update": { "detail": "running investigator scan" } });
    let name = resolve_tool_name(
        "call-1",
        None,
        None,
        None,
        &payload,
        ResolveContext::default(),
    );
    assert_eq!(name, "investigator");
}

/// The title-change fallback fires only for the first argument-less call
/// after a prompt that requested a title change.
#[test]
fn title_change_fallback_requires_all_conditions() {
    let ctx = ResolveContext {
        first_call_of_turn: true,
        prompt_requested_title_change: true,
    };
    let name = resolve_tool_name("call-1", None, None, None, &json!({}), ctx);
    assert_eq!(name, "change_title");

    // Not the first call of the turn.
    let ctx = ResolveContext {
        first_call_of_turn: false,
        prompt_requested_title_change: true,
    };
    let name = resolve_tool_name("call-2", None, None, None, &json!({}), ctx);
    assert_eq!(name, "tool");

    // Prompt did not ask for a title change.
    let ctx = ResolveContext {
        first_call_of_turn: true,
        prompt_requested_title_change: false,
    };
    let name = resolve_tool_name("call-1", None, None, None, &json!({}), ctx);
    assert_eq!(name, "tool");

    // Call carries arguments.
    let ctx = ResolveContext {
        first_call_of_turn: true,
        prompt_requested_title_change: true,
    };
    let input = json!({ "path": "x" });
    let name = resolve_tool_name("call-1", None, None, Some(&input), &json!({}), ctx);
    assert_eq!(name, "tool");
}

/// Without any signal the raw kind is used, then the generic label.
#[test]
fn kind_then_generic_fallback() {
    let name = resolve_tool_name(
        "call-1",
        Some("execute"),
        None,
        None,
        &json!({}),
        ResolveContext::default(),
    );
    assert_eq!(name, "execute");

    let name = resolve_tool_name(
        "call-1",
        None,
        None,
        None,
        &json!({}),
        ResolveContext::default(),
    );
    assert_eq!(name, "tool");
}

// ── Timeout categories ───────────────────────────────────────────────────────

/// Investigation-class tools get the extended timeout, think the short one,
/// everything else the default.
#[test]
fn timeout_categories() {
    assert_eq!(timeout_for("investigator"), INVESTIGATION_TIMEOUT);
    assert_eq!(timeout_for("codebase_investigation"), INVESTIGATION_TIMEOUT);
    assert_eq!(timeout_for("think"), THINK_TIMEOUT);
    assert_eq!(timeout_for("Think_Hard"), THINK_TIMEOUT);
    assert_eq!(timeout_for("read_file"), DEFAULT_TOOL_TIMEOUT);
    assert_eq!(INVESTIGATION_TIMEOUT, Duration::from_secs(600));
    assert_eq!(THINK_TIMEOUT, Duration::from_secs(30));
    assert_eq!(DEFAULT_TOOL_TIMEOUT, Duration::from_secs(120));
}

// ── Tracker lifecycle ────────────────────────────────────────────────────────

/// Inserting the same id twice keeps a single tracked call.
#[tokio::test(start_paused = true)]
async fn duplicate_insert_is_noop() {
    let mut tracker = ToolCallTracker::new();
    tracker.insert("c1", "read_file", None);
    tracker.insert("c1", "read_file", None);
    assert_eq!(tracker.active_count(), 1);
}

/// A finished call is removed and its timer never fires.
#[tokio::test(start_paused = true)]
async fn finish_cancels_timer() {
    let mut tracker = ToolCallTracker::new();
    tracker.insert("c1", "read_file", None);

    let finished = tracker.finish("c1").expect("call was tracked");
    assert_eq!(finished.name, "read_file");
    assert_eq!(tracker.active_count(), 0);

    // With no timers armed, nothing fires even past the default timeout.
    tokio::select! {
        id = tracker.next_timeout() => panic!("unexpected timeout for {id}"),
        () = tokio::time::sleep(DEFAULT_TOOL_TIMEOUT * 2) => {}
    }
}

/// An unattended call's timer fires after its category timeout and the call
/// can be expired exactly once.
#[tokio::test(start_paused = true)]
async fn timer_fires_after_category_timeout() {
    let mut tracker = ToolCallTracker::new();
    tracker.insert("c-think", "think", None);

    let started = tokio::time::Instant::now();
    let id = tracker.next_timeout().await;
    assert_eq!(id, "c-think");
    assert_eq!(started.elapsed(), THINK_TIMEOUT);

    assert!(tracker.expire("c-think").is_some());
    assert!(tracker.expire("c-think").is_none());
    assert_eq!(tracker.active_count(), 0);
}

/// Timers fire in deadline order across categories.
#[tokio::test(start_paused = true)]
async fn timers_fire_in_deadline_order() {
    let mut tracker = ToolCallTracker::new();
    tracker.insert("slow", "investigator", None);
    tracker.insert("fast", "think", None);

    assert_eq!(tracker.next_timeout().await, "fast");
    tracker.expire("fast");
    assert_eq!(tracker.next_timeout().await, "slow");
    tracker.expire("slow");
}

/// Clear drops all calls and timers.
#[tokio::test(start_paused = true)]
async fn clear_empties_everything() {
    let mut tracker = ToolCallTracker::new();
    tracker.insert("a", "read_file", None);
    tracker.insert("b", "think", None);

    tracker.clear();
    assert_eq!(tracker.active_count(), 0);

    tokio::select! {
        id = tracker.next_timeout() => panic!("unexpected timeout for {id}"),
        () = tokio::time::sleep(INVESTIGATION_TIMEOUT * 2) => {}
    }
}
