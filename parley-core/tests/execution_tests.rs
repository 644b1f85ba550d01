// ABOUTME: Integration tests for the per-room execution engine.
// ABOUTME: Drives a real engine against MockLink and RecordingHandler.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use parley_core::testing::{
    message, message_event, participant_added_event, participant_removed_event, MockLink,
    RecordingHandler,
};
use parley_core::{
    EngineConfig, EnginePhase, EventHandler, PlatformEvent, RoomContext, RoomExecutionEngine,
};

const WAIT: Duration = Duration::from_secs(5);

fn config() -> EngineConfig {
    EngineConfig {
        max_retries: 1,
        hydration_enabled: false,
        ..Default::default()
    }
}

fn engine_for(
    link: Arc<MockLink>,
    handler: Arc<RecordingHandler>,
    config: EngineConfig,
) -> Arc<RoomExecutionEngine> {
    Arc::new(RoomExecutionEngine::new("r1", link, handler, config))
}

async fn wait_for_idle(engine: &RoomExecutionEngine) {
    let mut watch = engine.phase_watch();
    tokio::time::timeout(WAIT, watch.wait_for(|phase| *phase == EnginePhase::Idle))
        .await
        .expect("engine never reached Idle")
        .expect("phase channel closed");
}

#[tokio::test]
async fn duplicate_delivery_reaches_handler_once() {
    let link = Arc::new(MockLink::builder("agent-1").build());
    let handler = Arc::new(RecordingHandler::new());
    let engine = engine_for(link, handler.clone(), config());

    engine.start();
    wait_for_idle(&engine).await;

    engine.submit(message_event("m1", "r1", "u1", "hello"));
    engine.submit(message_event("m1", "r1", "u1", "hello"));
    engine.submit(message_event("m2", "r1", "u1", "again"));

    tokio::time::timeout(WAIT, handler.wait_for(2)).await.unwrap();
    assert_eq!(handler.handled(), vec!["m1", "m2"]);
}

#[tokio::test]
async fn backlog_and_live_stream_converge_without_loss_or_duplication() {
    let link = Arc::new(
        MockLink::builder("agent-1")
            .backlog_message("r1", message("b1", "r1", "u1", "first"))
            .backlog_message("r1", message("b2", "r1", "u1", "second"))
            .backlog_message("r1", message("m", "r1", "u1", "overlap"))
            .build(),
    );
    let handler = Arc::new(RecordingHandler::new());
    let engine = engine_for(link.clone(), handler.clone(), config());

    engine.start();
    // "m" is both the backlog tail and the first live push.
    engine.submit(message_event("m", "r1", "u1", "overlap"));
    engine.submit(message_event("w1", "r1", "u1", "live one"));
    engine.submit(message_event("w2", "r1", "u1", "live two"));

    tokio::time::timeout(WAIT, handler.wait_for(5)).await.unwrap();
    assert_eq!(handler.handled(), vec!["b1", "b2", "m", "w1", "w2"]);
    assert_eq!(link.processed_ids("r1"), vec!["b1", "b2", "m", "w1", "w2"]);
}

#[tokio::test]
async fn failing_message_gets_exactly_retry_budget_invocations() {
    let link = Arc::new(
        MockLink::builder("agent-1")
            .backlog_message("r1", message("m1", "r1", "u1", "poison"))
            .build(),
    );
    let handler = Arc::new(RecordingHandler::new());
    handler.fail_next("m1", 10);
    let engine = engine_for(link.clone(), handler.clone(), config());

    engine.start();
    wait_for_idle(&engine).await;

    // max_retries = 1: two handler invocations, then terminal.
    assert_eq!(handler.handled(), vec!["m1", "m1"]);
    let failed = link.failed_ids("r1");
    assert!(failed.iter().filter(|id| *id == "m1").count() >= 2);
    assert!(link.processed_ids("r1").is_empty());

    // Redeliveries of a permanently failed message never reach the handler.
    engine.submit(message_event("m1", "r1", "u1", "poison"));
    engine.submit(message_event("m2", "r1", "u1", "healthy"));
    tokio::time::timeout(WAIT, handler.wait_for(3)).await.unwrap();
    assert_eq!(handler.handled(), vec!["m1", "m1", "m2"]);
}

#[tokio::test]
async fn transient_failure_is_retried_then_succeeds() {
    let link = Arc::new(MockLink::builder("agent-1").build());
    let handler = Arc::new(RecordingHandler::new());
    handler.fail_next("m1", 1);
    let engine = engine_for(link.clone(), handler.clone(), config());

    engine.start();
    wait_for_idle(&engine).await;

    engine.submit(message_event("m1", "r1", "u1", "flaky"));
    engine.submit(message_event("m1", "r1", "u1", "flaky"));

    tokio::time::timeout(WAIT, handler.wait_for(2)).await.unwrap();
    assert_eq!(handler.handled(), vec!["m1", "m1"]);
    assert_eq!(link.processed_ids("r1"), vec!["m1"]);
}

#[tokio::test]
async fn retry_exhaustion_does_not_shrink_the_dedup_window() {
    let link = Arc::new(MockLink::builder("agent-1").build());
    let handler = Arc::new(RecordingHandler::new());
    let engine = engine_for(link, handler.clone(), config());

    engine.start();
    wait_for_idle(&engine).await;

    // Fill four of the five dedup slots with successful deliveries.
    for id in ["d1", "d2", "d3", "d4"] {
        engine.submit(message_event(id, "r1", "u1", "fine"));
    }
    tokio::time::timeout(WAIT, handler.wait_for(4)).await.unwrap();

    // Exhaust a poison message: two failing attempts, then terminal.
    handler.fail_next("p", 10);
    for _ in 0..3 {
        engine.submit(message_event("p", "r1", "u1", "poison"));
    }
    tokio::time::timeout(WAIT, handler.wait_for(6)).await.unwrap();

    // The exhausted id must not hold a slot: after one more success the
    // window still covers d1, so its redelivery is suppressed.
    engine.submit(message_event("d5", "r1", "u1", "fine"));
    engine.submit(message_event("d1", "r1", "u1", "fine"));
    engine.submit(message_event("d6", "r1", "u1", "fine"));

    tokio::time::timeout(WAIT, handler.wait_for(8)).await.unwrap();
    assert_eq!(
        handler.handled(),
        vec!["d1", "d2", "d3", "d4", "p", "p", "d5", "d6"]
    );
}

#[tokio::test]
async fn empty_backlog_goes_idle_without_handler_calls() {
    let link = Arc::new(MockLink::builder("agent-1").build());
    let handler = Arc::new(RecordingHandler::new());
    let engine = engine_for(link.clone(), handler.clone(), config());

    assert_eq!(engine.phase(), EnginePhase::Starting);
    engine.start();
    wait_for_idle(&engine).await;

    assert!(handler.handled().is_empty());
    assert!(link.calls().is_empty());
}

#[tokio::test]
async fn stop_is_idempotent_and_safe_before_start() {
    let link = Arc::new(MockLink::builder("agent-1").build());
    let handler = Arc::new(RecordingHandler::new());
    let engine = engine_for(link, handler, config());

    engine.stop();
    engine.stop();
    assert!(!engine.is_running());

    engine.start();
    wait_for_idle(&engine).await;
    assert!(engine.is_running());

    engine.stop();
    engine.stop();
    assert!(!engine.is_running());
}

#[tokio::test]
async fn restart_reconciles_the_backlog_again() {
    let link = Arc::new(MockLink::builder("agent-1").build());
    let handler = Arc::new(RecordingHandler::new());
    let engine = engine_for(link.clone(), handler.clone(), config());

    engine.start();
    wait_for_idle(&engine).await;
    engine.stop();

    // A message lands while the engine is down; only the backlog has it.
    link.backlog_push("r1", message("m1", "r1", "u1", "while down"));

    engine.start();
    tokio::time::timeout(WAIT, handler.wait_for(1)).await.unwrap();
    assert_eq!(handler.handled(), vec!["m1"]);
    assert_eq!(link.processed_ids("r1"), vec!["m1"]);
}

#[tokio::test]
async fn own_messages_are_acked_but_not_handled() {
    let link = Arc::new(
        MockLink::builder("agent-1")
            .backlog_message("r1", message("m1", "r1", "agent-1", "my own words"))
            .backlog_message("r1", message("m2", "r1", "u1", "a reply"))
            .build(),
    );
    let handler = Arc::new(RecordingHandler::new());
    let engine = engine_for(link.clone(), handler.clone(), config());

    engine.start();
    tokio::time::timeout(WAIT, handler.wait_for(1)).await.unwrap();

    assert_eq!(handler.handled(), vec!["m2"]);
    assert_eq!(link.processed_ids("r1"), vec!["m1", "m2"]);
}

/// Handler that snapshots the participant names visible at handle time.
struct ParticipantProbe {
    seen: Mutex<Vec<Vec<String>>>,
    notify: tokio::sync::Notify,
}

#[async_trait]
impl EventHandler for ParticipantProbe {
    async fn handle(&self, room: &mut RoomContext, _event: PlatformEvent) -> Result<()> {
        let names = room.participants().into_iter().map(|p| p.name).collect();
        self.seen.lock().unwrap().push(names);
        self.notify.notify_waiters();
        Ok(())
    }
}

#[tokio::test]
async fn participant_events_mutate_engine_state_without_handler_calls() {
    let link = Arc::new(MockLink::builder("agent-1").build());
    let probe = Arc::new(ParticipantProbe {
        seen: Mutex::new(Vec::new()),
        notify: tokio::sync::Notify::new(),
    });
    let engine = Arc::new(RoomExecutionEngine::new(
        "r1",
        link,
        probe.clone(),
        config(),
    ));

    engine.start();
    wait_for_idle(&engine).await;

    engine.submit(participant_added_event("r1", "p1", "Weather Agent"));
    engine.submit(participant_added_event("r1", "p2", "Alice"));
    engine.submit(participant_removed_event("r1", "p2"));
    engine.submit(message_event("m1", "r1", "u1", "who is here?"));

    tokio::time::timeout(WAIT, async {
        loop {
            let notified = probe.notify.notified();
            if !probe.seen.lock().unwrap().is_empty() {
                break;
            }
            notified.await;
        }
    })
    .await
    .unwrap();

    let seen = probe.seen.lock().unwrap().clone();
    assert_eq!(seen, vec![vec!["Weather Agent".to_string()]]);
}
