//! Integration tests for the turn loop.
//!
//! Drives the orchestrator through its command channel with a scripted
//! backend and a recording transport: mode-hash restarts, abort semantics,
//! kill teardown, per-turn diff dedup reset, and external permission
//! responses.

use std::path::PathBuf;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use std::future::Future;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use acp_relay::errors::{AppError, Result};
use acp_relay::orchestrator::{ModeOverride, Orchestrator, SessionBackend, Turn, TurnCommand, TurnMode};
use acp_relay::policy::mediator::{MediationOutcome, PermissionMediator};
use acp_relay::policy::{PermissionDecision, PermissionMode};
use acp_relay::relay::{OutboundEvent, RelayTransport};
use acp_relay::session::SessionEvent;

// ---------------------------------------------------------------------------
// Scripted backend
// ---------------------------------------------------------------------------

/// Everything the orchestrator asked of the backend, in order.
#[derive(Debug, Default)]
struct BackendLog {
    /// Mode hashes passed to `start`, one per session.
    starts: Vec<String>,
    /// Prompts with the session generation they ran under (1-based).
    prompts: Vec<(usize, String)>,
    cancels: usize,
    disposes: usize,
}

type SharedLog = Arc<Mutex<BackendLog>>;
type SharedEventTx = Arc<Mutex<Option<mpsc::Sender<SessionEvent>>>>;

/// Backend whose behavior is scripted by the test.
struct MockBackend {
    log: SharedLog,
    event_tx: SharedEventTx,
    started: bool,
    generation: usize,
    /// When set, every prompt is answered with a chunk and an idle event.
    auto_idle: bool,
    /// When set, `start` fails without creating a session.
    fail_start: bool,
}

impl MockBackend {
    fn new(log: SharedLog, event_tx: SharedEventTx, auto_idle: bool) -> Self {
        Self {
            log,
            event_tx,
            started: false,
            generation: 0,
            auto_idle,
            fail_start: false,
        }
    }
}

impl SessionBackend for MockBackend {
    fn start<'a>(
        &'a mut self,
        mode: &'a TurnMode,
        event_tx: mpsc::Sender<SessionEvent>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            if self.fail_start {
                return Err(AppError::Startup("scripted start failure".to_owned()));
            }
            self.log.lock().expect("log lock").starts.push(mode.hash());
            *self.event_tx.lock().expect("event_tx lock") = Some(event_tx);
            self.generation += 1;
            self.started = true;
            Ok(())
        })
    }

    fn is_started(&self) -> bool {
        self.started
    }

    fn send_prompt<'a>(
        &'a mut self,
        prompt: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            self.log
                .lock()
                .expect("log lock")
                .prompts
                .push((self.generation, prompt.to_owned()));
            if self.auto_idle {
                let tx = self
                    .event_tx
                    .lock()
                    .expect("event_tx lock")
                    .clone()
                    .expect("started session has an event sender");
                tokio::spawn(async move {
                    let _ = tx
                        .send(SessionEvent::MessageChunk {
                            text: "answer".to_owned(),
                        })
                        .await;
                    let _ = tx.send(SessionEvent::Idle).await;
                });
            }
            Ok(())
        })
    }

    fn cancel(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            self.log.lock().expect("log lock").cancels += 1;
            Ok(())
        })
    }

    fn mark_ready(&mut self) {}

    fn dispose(&mut self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            if self.started {
                self.log.lock().expect("log lock").disposes += 1;
                self.started = false;
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Recording transport
// ---------------------------------------------------------------------------

#[derive(Default)]
struct RecordingRelay {
    events: Mutex<Vec<OutboundEvent>>,
    closed: AtomicBool,
}

impl RecordingRelay {
    fn events(&self) -> Vec<OutboundEvent> {
        self.events.lock().expect("events lock").clone()
    }

    fn count<F: Fn(&OutboundEvent) -> bool>(&self, pred: F) -> usize {
        self.events().iter().filter(|e| pred(e)).count()
    }
}

impl RelayTransport for RecordingRelay {
    fn send_event(
        &self,
        event: OutboundEvent,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            self.events.lock().expect("events lock").push(event);
            Ok(())
        })
    }

    fn keepalive(&self, _busy: bool) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move { Ok(()) })
    }

    fn close(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        })
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct Fixture {
    log: SharedLog,
    event_tx: SharedEventTx,
    relay: Arc<RecordingRelay>,
    mediator: Arc<PermissionMediator>,
    cmd_tx: mpsc::Sender<TurnCommand>,
    loop_handle: JoinHandle<()>,
}

fn spawn_orchestrator(auto_idle: bool, fail_start: bool, prefs_path: Option<PathBuf>) -> Fixture {
    let log: SharedLog = Arc::default();
    let event_tx: SharedEventTx = Arc::default();
    let mut backend = MockBackend::new(Arc::clone(&log), Arc::clone(&event_tx), auto_idle);
    backend.fail_start = fail_start;

    let relay = Arc::new(RecordingRelay::default());
    let mediator = Arc::new(PermissionMediator::new());
    let orchestrator = Orchestrator::new(
        backend,
        Arc::clone(&relay) as Arc<dyn RelayTransport>,
        Arc::clone(&mediator),
        TurnMode::default(),
        prefs_path,
    );

    let (cmd_tx, cmd_rx) = mpsc::channel(32);
    let loop_handle = tokio::spawn(orchestrator.run(cmd_rx));
    Fixture {
        log,
        event_tx,
        relay,
        mediator,
        cmd_tx,
        loop_handle,
    }
}

impl Fixture {
    async fn submit(&self, prompt: &str, mode_override: ModeOverride) {
        self.cmd_tx
            .send(TurnCommand::Submit(Turn {
                prompt: prompt.to_owned(),
                mode_override,
            }))
            .await
            .expect("command accepted");
    }

    async fn inject(&self, event: SessionEvent) {
        let tx = self
            .event_tx
            .lock()
            .expect("event_tx lock")
            .clone()
            .expect("session started");
        tx.send(event).await.expect("event accepted");
    }
}

/// Poll until `cond` holds. Paused-clock sleeps auto-advance, so a stuck
/// condition fails fast instead of hanging the suite.
async fn wait_for<F: Fn() -> bool>(cond: F) {
    for _ in 0..500 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not met in time");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

/// Turns sharing a mode reuse one session; a mode change disposes it and
/// starts a fresh one.
#[tokio::test(start_paused = true)]
async fn mode_change_restarts_session() {
    let fx = spawn_orchestrator(true, false, None);

    fx.submit("one", ModeOverride::default()).await;
    fx.submit("two", ModeOverride::default()).await;
    fx.submit("three", ModeOverride::default()).await;
    fx.submit(
        "four",
        ModeOverride {
            permission_mode: Some(PermissionMode::Yolo),
            model: None,
        },
    )
    .await;

    let log = Arc::clone(&fx.log);
    wait_for(move || log.lock().expect("log lock").prompts.len() == 4).await;

    let log = fx.log.lock().expect("log lock");
    assert_eq!(log.starts.len(), 2, "one restart for the mode change");
    assert_ne!(log.starts[0], log.starts[1]);
    assert_eq!(log.disposes, 1);
    let prompts: Vec<_> = log.prompts.iter().map(|(_, p)| p.as_str()).collect();
    assert_eq!(prompts, ["one", "two", "three", "four"]);
    assert!(
        log.prompts[..3].iter().all(|(gen, _)| *gen == 1),
        "first three turns share the first session"
    );
    assert_eq!(log.prompts[3].0, 2, "mode change ran on the new session");
    drop(log);

    // A turn can reach idle before the next submit lands, so intermediate
    // ready events are possible; the final one must still arrive.
    let relay = Arc::clone(&fx.relay);
    wait_for(move || relay.count(|e| matches!(e, OutboundEvent::Ready)) >= 1).await;

    fx.loop_handle.abort();
}

/// Mode inheritance follows queue order: a turn queued without an override
/// behind a queued override turn runs on the override's session, never on
/// the stale mode of the turn that was running when it was queued.
#[tokio::test(start_paused = true)]
async fn queued_turn_inherits_last_queued_mode() {
    let fx = spawn_orchestrator(false, false, None);

    fx.submit("one", ModeOverride::default()).await;
    let log = Arc::clone(&fx.log);
    wait_for(move || log.lock().expect("log lock").prompts.len() == 1).await;

    // Queue an override turn and a plain turn while the first is in flight.
    fx.submit(
        "two",
        ModeOverride {
            permission_mode: Some(PermissionMode::Yolo),
            model: None,
        },
    )
    .await;
    fx.submit("three", ModeOverride::default()).await;

    fx.inject(SessionEvent::Idle).await;
    let log = Arc::clone(&fx.log);
    wait_for(move || log.lock().expect("log lock").prompts.len() == 2).await;
    fx.inject(SessionEvent::Idle).await;
    let log = Arc::clone(&fx.log);
    wait_for(move || log.lock().expect("log lock").prompts.len() == 3).await;

    let log = fx.log.lock().expect("log lock");
    assert_eq!(log.starts.len(), 2, "one restart for the override, none for the plain turn");
    let yolo_hash = TurnMode {
        permission_mode: PermissionMode::Yolo,
        model: None,
    }
    .hash();
    assert_eq!(log.starts[1], yolo_hash);
    assert_eq!(log.prompts[1].0, 2);
    assert_eq!(log.prompts[2].0, 2, "plain turn inherits the queued override");
    drop(log);

    fx.loop_handle.abort();
}

/// Aborting cancels the active turn without tearing the session down.
#[tokio::test(start_paused = true)]
async fn abort_cancels_without_dispose() {
    let fx = spawn_orchestrator(false, false, None);

    fx.submit("long running", ModeOverride::default()).await;
    let log = Arc::clone(&fx.log);
    wait_for(move || log.lock().expect("log lock").prompts.len() == 1).await;

    fx.cmd_tx
        .send(TurnCommand::Abort)
        .await
        .expect("command accepted");

    let relay = Arc::clone(&fx.relay);
    wait_for(move || {
        relay.count(|e| matches!(e, OutboundEvent::Thinking { active: false })) == 1
    })
    .await;

    let log = fx.log.lock().expect("log lock");
    assert_eq!(log.cancels, 1);
    assert_eq!(log.disposes, 0, "session survives an abort");
    drop(log);

    assert_eq!(fx.relay.count(|e| matches!(e, OutboundEvent::Ready)), 1);
    fx.loop_handle.abort();
}

/// Kill disposes the session, drains the queue, and closes the transport.
#[tokio::test(start_paused = true)]
async fn kill_disposes_and_closes_transport() {
    let fx = spawn_orchestrator(false, false, None);

    fx.submit("doomed", ModeOverride::default()).await;
    let log = Arc::clone(&fx.log);
    wait_for(move || log.lock().expect("log lock").prompts.len() == 1).await;

    fx.cmd_tx
        .send(TurnCommand::Kill)
        .await
        .expect("command accepted");
    fx.loop_handle.await.expect("loop exits cleanly");

    assert_eq!(fx.log.lock().expect("log lock").disposes, 1);
    assert!(fx.relay.closed.load(Ordering::SeqCst));
}

/// Within a turn a repeated diff is suppressed; the next turn starts with a
/// clean slate and re-emits it.
#[tokio::test(start_paused = true)]
async fn diff_dedup_resets_between_turns() {
    let fx = spawn_orchestrator(false, false, None);

    fx.submit("first", ModeOverride::default()).await;
    let log = Arc::clone(&fx.log);
    wait_for(move || log.lock().expect("log lock").prompts.len() == 1).await;

    let diff = SessionEvent::Diff {
        path: "src/lib.rs".to_owned(),
        diff: "--- src/lib.rs\n+++ src/lib.rs\n+new line".to_owned(),
    };
    fx.inject(diff.clone()).await;
    fx.inject(diff.clone()).await;
    fx.inject(SessionEvent::Idle).await;

    let relay = Arc::clone(&fx.relay);
    wait_for(move || relay.count(|e| matches!(e, OutboundEvent::Ready)) == 1).await;
    assert_eq!(
        fx.relay.count(|e| matches!(e, OutboundEvent::FileEdit { .. })),
        1,
        "repeat within a turn is suppressed"
    );

    fx.submit("second", ModeOverride::default()).await;
    let log = Arc::clone(&fx.log);
    wait_for(move || log.lock().expect("log lock").prompts.len() == 2).await;
    fx.inject(diff).await;

    let relay = Arc::clone(&fx.relay);
    wait_for(move || relay.count(|e| matches!(e, OutboundEvent::FileEdit { .. })) == 2).await;

    fx.loop_handle.abort();
}

/// An external permission response resolves the matching pending request.
#[tokio::test(start_paused = true)]
async fn permission_response_resolves_pending() {
    let fx = spawn_orchestrator(false, false, None);

    let outcome = fx
        .mediator
        .submit(PermissionMode::Default, "edit_file", "call-77")
        .await;
    let MediationOutcome::Pending(rx) = outcome else {
        panic!("default mode must not auto-approve a write");
    };

    fx.cmd_tx
        .send(TurnCommand::PermissionResponse {
            request_id: "call-77".to_owned(),
            decision: PermissionDecision::Approved,
        })
        .await
        .expect("command accepted");

    let decision = rx.await.expect("resolver kept alive");
    assert_eq!(decision, PermissionDecision::Approved);

    fx.loop_handle.abort();
}

/// A failed session start drops the turn with a status event and reports
/// readiness instead of wedging the loop.
#[tokio::test(start_paused = true)]
async fn failed_start_drops_turn() {
    let fx = spawn_orchestrator(false, true, None);

    fx.submit("never runs", ModeOverride::default()).await;

    let relay = Arc::clone(&fx.relay);
    wait_for(move || relay.count(|e| matches!(e, OutboundEvent::Ready)) == 1).await;

    let events = fx.relay.events();
    assert!(
        events.iter().any(|e| matches!(
            e,
            OutboundEvent::Status { message } if message.contains("failed to start")
        )),
        "status event expected, got {events:?}"
    );
    assert!(fx.log.lock().expect("log lock").prompts.is_empty());

    fx.loop_handle.abort();
}
