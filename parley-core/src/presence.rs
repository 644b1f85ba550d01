// ABOUTME: Cross-room lifecycle: one engine per joined room, attached and
// ABOUTME: detached as the platform adds or removes this agent.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;

use crate::execution::{lock, RoomExecutionEngine};
use crate::metrics::set_active_rooms;
use crate::traits::{EventHandler, EventStream, NoHooks, PlatformLink, RoomFilter, RoomHooks};
use crate::types::EngineConfig;
use crate::PlatformEvent;

/// Tracks which rooms this agent inhabits and owns their engines.
///
/// On [`start`](Self::start) it connects the link, joins every room the
/// platform lists, then pumps the live stream: `room_added` spawns an
/// engine, `room_removed` tears one down, and everything else is routed
/// to the owning room's engine. Events for rooms without an engine are
/// dropped with a log line; the backlog recovers them if the room is
/// joined later.
pub struct RoomPresence {
    shared: Arc<Shared>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

struct Shared {
    link: Arc<dyn PlatformLink>,
    handler: Arc<dyn EventHandler>,
    config: EngineConfig,
    hooks: Arc<dyn RoomHooks>,
    filter: Option<RoomFilter>,
    engines: Mutex<HashMap<String, Arc<RoomExecutionEngine>>>,
}

impl RoomPresence {
    pub fn new(link: Arc<dyn PlatformLink>, handler: Arc<dyn EventHandler>) -> Self {
        Self {
            shared: Arc::new(Shared {
                link,
                handler,
                config: EngineConfig::default(),
                hooks: Arc::new(NoHooks),
                filter: None,
                engines: Mutex::new(HashMap::new()),
            }),
            pump: Mutex::new(None),
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.update_shared(|shared| shared.config = config);
        self
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn RoomHooks>) -> Self {
        self.update_shared(|shared| shared.hooks = hooks);
        self
    }

    /// Only join rooms whose payload passes `filter`. Applied to both the
    /// startup room listing and live `room_added` events.
    pub fn with_filter(mut self, filter: RoomFilter) -> Self {
        self.update_shared(|shared| shared.filter = Some(filter));
        self
    }

    // Builder methods run before start, while the Arc is still unique.
    fn update_shared(&mut self, apply: impl FnOnce(&mut Shared)) {
        if let Some(shared) = Arc::get_mut(&mut self.shared) {
            apply(shared);
        }
    }

    /// Connect, join the platform's current room list, and begin pumping
    /// live events.
    pub async fn start(&self) -> Result<()> {
        self.shared.link.connect().await?;
        self.shared.link.subscribe_agent_rooms().await?;
        let stream = self.shared.link.event_stream().await?;

        let rooms = self.shared.link.list_rooms().await?;
        tracing::info!(rooms = rooms.len(), "Joining current rooms");
        for room in rooms {
            let info = serde_json::to_value(&room).unwrap_or(Value::Null);
            self.shared.join_room(&room.id, &info).await;
        }

        let shared = self.shared.clone();
        *lock(&self.pump) = Some(tokio::spawn(pump(shared, stream)));
        Ok(())
    }

    /// Abort the pump and stop every engine, firing `on_room_left` for
    /// each. Idempotent. The link stays connected; its lifecycle belongs
    /// to the caller.
    pub async fn stop(&self) {
        if let Some(pump) = lock(&self.pump).take() {
            pump.abort();
        }
        let engines: Vec<_> = lock(&self.shared.engines).drain().collect();
        for (room_id, engine) in engines {
            tracing::debug!(room_id = %room_id, "Stopping room engine");
            engine.stop();
            if let Err(e) = self.shared.hooks.on_room_left(&room_id).await {
                tracing::warn!(room_id = %room_id, error = %e, "on_room_left hook failed");
            }
        }
        set_active_rooms(0);
    }

    pub fn is_tracking(&self, room_id: &str) -> bool {
        lock(&self.shared.engines).contains_key(room_id)
    }

    pub fn tracked_rooms(&self) -> Vec<String> {
        lock(&self.shared.engines).keys().cloned().collect()
    }

    /// Engine for a tracked room, for tests and direct submission.
    pub fn engine(&self, room_id: &str) -> Option<Arc<RoomExecutionEngine>> {
        lock(&self.shared.engines).get(room_id).cloned()
    }

    /// Join a room out of band, bypassing the room filter.
    pub async fn join_room(&self, room_id: &str, info: &Value) {
        self.shared.join_room(room_id, info).await;
    }

    pub async fn leave_room(&self, room_id: &str) {
        self.shared.leave_room(room_id).await;
    }
}

impl Shared {
    async fn join_room(&self, room_id: &str, info: &Value) {
        if lock(&self.engines).contains_key(room_id) {
            tracing::debug!(room_id = %room_id, "Already tracking room");
            return;
        }
        if let Some(filter) = &self.filter {
            if !filter(info) {
                tracing::debug!(room_id = %room_id, "Room rejected by filter");
                return;
            }
        }
        if let Err(e) = self.link.subscribe_room(room_id).await {
            tracing::warn!(room_id = %room_id, error = %e, "Room subscription failed");
            return;
        }

        let engine = Arc::new(RoomExecutionEngine::new(
            room_id,
            self.link.clone(),
            self.handler.clone(),
            self.config.clone(),
        ));
        engine.start();

        let count = {
            let mut engines = lock(&self.engines);
            engines.insert(room_id.to_string(), engine);
            engines.len()
        };
        set_active_rooms(count);
        tracing::info!(room_id = %room_id, rooms = count, "Joined room");

        if let Err(e) = self.hooks.on_room_joined(room_id, info).await {
            tracing::warn!(room_id = %room_id, error = %e, "on_room_joined hook failed");
        }
    }

    async fn leave_room(&self, room_id: &str) {
        let removed = lock(&self.engines).remove(room_id);
        let Some(engine) = removed else {
            tracing::debug!(room_id = %room_id, "Leave for untracked room ignored");
            return;
        };
        engine.stop();

        let count = lock(&self.engines).len();
        set_active_rooms(count);
        tracing::info!(room_id = %room_id, rooms = count, "Left room");

        if let Err(e) = self.link.unsubscribe_room(room_id).await {
            tracing::debug!(room_id = %room_id, error = %e, "Unsubscribe failed");
        }
        if let Err(e) = self.hooks.on_room_left(room_id).await {
            tracing::warn!(room_id = %room_id, error = %e, "on_room_left hook failed");
        }
    }

    fn route(&self, event: PlatformEvent) {
        let engine = lock(&self.engines).get(event.room_id()).cloned();
        match engine {
            Some(engine) => engine.submit(event),
            None => {
                tracing::debug!(
                    room_id = %event.room_id(),
                    kind = %event.kind(),
                    "Dropping event for untracked room"
                );
            }
        }
    }
}

async fn pump(shared: Arc<Shared>, mut stream: EventStream) {
    while let Some(event) = stream.next().await {
        match event {
            PlatformEvent::RoomAdded { room_id, payload } => {
                let info = serde_json::to_value(&payload).unwrap_or(Value::Null);
                shared.join_room(&room_id, &info).await;
            }
            PlatformEvent::RoomRemoved { room_id, .. } => {
                shared.leave_room(&room_id).await;
            }
            other => shared.route(other),
        }
    }
    tracing::info!("Event stream ended");
}
