// ABOUTME: Integration tests for cross-room presence tracking.
// ABOUTME: Exercises attach/detach, routing, and the room filter.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use parley_core::testing::{
    message_event, room_added_event, room_removed_event, room_summary, LinkCall, MockLink,
    RecordingHandler,
};
use parley_core::{PlatformLink, RoomFilter, RoomHooks, RoomPresence};

const WAIT: Duration = Duration::from_secs(5);

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition never became true");
}

#[tokio::test]
async fn start_joins_every_listed_room() {
    let link = Arc::new(
        MockLink::builder("agent-1")
            .room(room_summary("r1", "Planning"))
            .room(room_summary("r2", "Support"))
            .build(),
    );
    let handler = Arc::new(RecordingHandler::new());
    let presence = RoomPresence::new(link.clone(), handler);

    presence.start().await.unwrap();

    assert!(presence.is_tracking("r1"));
    assert!(presence.is_tracking("r2"));
    let calls = link.calls();
    assert!(calls.contains(&LinkCall::Connect));
    assert!(calls.contains(&LinkCall::SubscribeAgentRooms));
    assert!(calls.contains(&LinkCall::SubscribeRoom("r1".to_string())));
    assert!(calls.contains(&LinkCall::SubscribeRoom("r2".to_string())));

    presence.stop().await;
}

#[tokio::test]
async fn room_added_attaches_an_engine() {
    let link = Arc::new(MockLink::builder("agent-1").build());
    let handler = Arc::new(RecordingHandler::new());
    let presence = RoomPresence::new(link.clone(), handler);

    presence.start().await.unwrap();
    assert!(!presence.is_tracking("r1"));

    link.push_event(room_added_event("r1", "Planning"));
    wait_until(|| presence.is_tracking("r1")).await;
    assert!(link.calls().contains(&LinkCall::SubscribeRoom("r1".to_string())));

    presence.stop().await;
}

#[tokio::test]
async fn room_removed_detaches_and_unsubscribes() {
    let link = Arc::new(
        MockLink::builder("agent-1")
            .room(room_summary("r1", "Planning"))
            .build(),
    );
    let handler = Arc::new(RecordingHandler::new());
    let presence = RoomPresence::new(link.clone(), handler);

    presence.start().await.unwrap();
    assert!(presence.is_tracking("r1"));

    link.push_event(room_removed_event("r1"));
    wait_until(|| !presence.is_tracking("r1")).await;
    assert!(link
        .calls()
        .contains(&LinkCall::UnsubscribeRoom("r1".to_string())));

    presence.stop().await;
}

#[tokio::test]
async fn live_messages_are_routed_to_the_owning_engine() {
    let link = Arc::new(
        MockLink::builder("agent-1")
            .room(room_summary("r1", "Planning"))
            .build(),
    );
    let handler = Arc::new(RecordingHandler::new());
    let presence = RoomPresence::new(link.clone(), handler.clone());

    presence.start().await.unwrap();
    link.push_event(message_event("m1", "r1", "u1", "hello"));

    tokio::time::timeout(WAIT, handler.wait_for(1)).await.unwrap();
    assert_eq!(handler.handled(), vec!["m1"]);

    presence.stop().await;
}

#[tokio::test]
async fn events_for_untracked_rooms_are_dropped() {
    let link = Arc::new(
        MockLink::builder("agent-1")
            .room(room_summary("r1", "Planning"))
            .build(),
    );
    let handler = Arc::new(RecordingHandler::new());
    let presence = RoomPresence::new(link.clone(), handler.clone());

    presence.start().await.unwrap();
    link.push_event(message_event("mx", "r-unknown", "u1", "lost"));
    link.push_event(message_event("m1", "r1", "u1", "delivered"));

    tokio::time::timeout(WAIT, handler.wait_for(1)).await.unwrap();
    // The untracked event was pumped first; only the tracked one arrived.
    assert_eq!(handler.handled(), vec!["m1"]);

    presence.stop().await;
}

#[tokio::test]
async fn room_filter_applies_to_listing_and_live_events() {
    let link = Arc::new(
        MockLink::builder("agent-1")
            .room(room_summary("r1", "Planning"))
            .room(room_summary("r2", "ignore me"))
            .build(),
    );
    let handler = Arc::new(RecordingHandler::new());
    let filter: RoomFilter = Arc::new(|info| {
        info.get("title")
            .and_then(|t| t.as_str())
            .map(|t| !t.contains("ignore"))
            .unwrap_or(true)
    });
    let presence = RoomPresence::new(link.clone(), handler).with_filter(filter);

    presence.start().await.unwrap();
    assert!(presence.is_tracking("r1"));
    assert!(!presence.is_tracking("r2"));

    link.push_event(room_added_event("r3", "also ignore this"));
    link.push_event(room_added_event("r4", "Standup"));
    wait_until(|| presence.is_tracking("r4")).await;
    assert!(!presence.is_tracking("r3"));

    presence.stop().await;
}

/// Hooks implementation that records which rooms it saw come and go.
#[derive(Default)]
struct HookRecorder {
    joined: Mutex<Vec<String>>,
    left: Mutex<Vec<String>>,
}

#[async_trait]
impl RoomHooks for HookRecorder {
    async fn on_room_joined(&self, room_id: &str, _info: &Value) -> Result<()> {
        self.joined.lock().unwrap().push(room_id.to_string());
        Ok(())
    }

    async fn on_room_left(&self, room_id: &str) -> Result<()> {
        self.left.lock().unwrap().push(room_id.to_string());
        Ok(())
    }
}

#[tokio::test]
async fn stop_tears_down_engines_fires_hooks_and_keeps_the_link() {
    let link = Arc::new(
        MockLink::builder("agent-1")
            .room(room_summary("r1", "Planning"))
            .room(room_summary("r2", "Support"))
            .build(),
    );
    let handler = Arc::new(RecordingHandler::new());
    let hooks = Arc::new(HookRecorder::default());
    let presence = RoomPresence::new(link.clone(), handler).with_hooks(hooks.clone());

    presence.start().await.unwrap();
    let engine = presence.engine("r1").expect("engine for r1");
    wait_until(|| engine.is_running()).await;

    presence.stop().await;
    assert!(presence.tracked_rooms().is_empty());
    assert!(!engine.is_running());

    // Every tracked room gets its on_room_left callback.
    let mut left = hooks.left.lock().unwrap().clone();
    left.sort();
    assert_eq!(left, vec!["r1".to_string(), "r2".to_string()]);

    // The transport is the caller's; stop must not disconnect it.
    assert!(!link.calls().contains(&LinkCall::Disconnect));
    assert!(link.is_connected());

    // A second stop is a no-op.
    presence.stop().await;
    assert_eq!(hooks.left.lock().unwrap().len(), 2);
}
