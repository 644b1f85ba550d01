// ABOUTME: Per-room execution engine: serialized processing, dedup, retry, and
// ABOUTME: startup reconciliation of the REST backlog against the live stream.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;

use crate::context::ContextCache;
use crate::event::{Mention, PlatformEvent};
use crate::formatters::{build_participants_message, format_history_for_llm, LlmMessage};
use crate::metrics::{
    record_duplicate_skipped, record_handler_duration, record_message_failed,
    record_message_processed, record_retry_exhausted, record_sync_complete,
};
use crate::participants::ParticipantSet;
use crate::retry::RetryTracker;
use crate::traits::{EventHandler, PlatformLink};
use crate::types::{ConversationContext, EngineConfig, EnginePhase, Participant};

/// How many recently-processed message ids each room remembers for
/// duplicate suppression.
const DEDUP_CAPACITY: usize = 5;

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Small LRU of message ids. A hit refreshes recency so a burst of
/// duplicates cannot evict the ids it should be suppressing.
#[derive(Debug)]
struct DedupCache {
    capacity: usize,
    ids: VecDeque<String>,
}

impl DedupCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            ids: VecDeque::with_capacity(capacity),
        }
    }

    fn contains(&self, id: &str) -> bool {
        self.ids.iter().any(|known| known == id)
    }

    /// Move `id` to most-recent position.
    fn touch(&mut self, id: &str) {
        if let Some(pos) = self.ids.iter().position(|known| known == id) {
            if let Some(found) = self.ids.remove(pos) {
                self.ids.push_back(found);
            }
        }
    }

    fn insert(&mut self, id: String) {
        if self.contains(&id) {
            self.touch(&id);
            return;
        }
        if self.ids.len() == self.capacity {
            self.ids.pop_front();
        }
        self.ids.push_back(id);
    }

    fn clear(&mut self) {
        self.ids.clear();
    }
}

/// Sync bookkeeping shared between `submit` (called from the presence
/// task) and the engine's own worker.
#[derive(Debug, Default)]
struct SyncState {
    synced: bool,
    marker: Option<String>,
}

/// Per-room state handed to the [`EventHandler`] by `&mut` reference.
///
/// Exclusive ownership by the room's worker task means handlers never
/// need locks for per-room state.
pub struct RoomContext {
    room_id: String,
    link: Arc<dyn PlatformLink>,
    pub(crate) participants: ParticipantSet,
    context: ContextCache,
    llm_initialized: bool,
}

impl RoomContext {
    pub(crate) fn new(room_id: &str, link: Arc<dyn PlatformLink>, config: &EngineConfig) -> Self {
        Self {
            room_id: room_id.to_string(),
            link,
            participants: ParticipantSet::new(),
            context: ContextCache::new(
                room_id,
                config.hydration_enabled,
                config.context_ttl,
                config.max_context_messages,
            ),
            llm_initialized: false,
        }
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    /// The shared transport, for sends and lookups from inside a handler.
    pub fn link(&self) -> &Arc<dyn PlatformLink> {
        &self.link
    }

    pub fn participants(&self) -> Vec<Participant> {
        self.participants.participants()
    }

    /// Whether the participant set differs from the last baseline recorded
    /// by [`mark_participants_sent`](Self::mark_participants_sent).
    pub fn participants_changed(&self) -> bool {
        self.participants.changed()
    }

    pub fn mark_participants_sent(&mut self) {
        self.participants.mark_sent();
    }

    pub fn find_participant(&self, name: &str) -> Option<Participant> {
        self.participants.get_by_name(name).cloned()
    }

    /// Hydrated room context, refreshed when forced or past its TTL.
    /// With hydration disabled this is always empty and never touches the
    /// network.
    pub async fn get_context(&mut self, force_refresh: bool) -> ConversationContext {
        self.context
            .get(self.link.as_ref(), &mut self.participants, force_refresh)
            .await
    }

    /// Cached history shaped for LLM injection, optionally excluding one
    /// id (usually the message being handled). No network activity; call
    /// [`get_context`](Self::get_context) first to hydrate or refresh.
    pub fn history_for_llm(&self, exclude_id: Option<&str>) -> Vec<LlmMessage> {
        let snapshot = self.context.current(&self.participants);
        format_history_for_llm(&snapshot.messages, exclude_id)
    }

    /// The "current participants" system message for this room's roster.
    pub fn participants_message(&self) -> String {
        build_participants_message(&self.participants.participants())
    }

    /// One-shot flag for handlers that lazily set up an LLM session on the
    /// first message of a room.
    pub fn is_llm_initialized(&self) -> bool {
        self.llm_initialized
    }

    pub fn mark_llm_initialized(&mut self) {
        self.llm_initialized = true;
    }

    pub async fn send_message(
        &self,
        content: &str,
        mentions: &[Mention],
    ) -> anyhow::Result<crate::types::InboundMessage> {
        self.link.send_message(&self.room_id, content, mentions).await
    }

    pub(crate) async fn ensure_hydrated(&mut self) {
        if !self.context.is_hydrated() {
            self.context
                .hydrate(self.link.as_ref(), &mut self.participants)
                .await;
        }
    }
}

impl std::fmt::Debug for RoomContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomContext")
            .field("room_id", &self.room_id)
            .field("participants", &self.participants.len())
            .field("llm_initialized", &self.llm_initialized)
            .finish()
    }
}

/// Serialized executor for one room.
///
/// Live events arrive via [`submit`](Self::submit) and are processed by a
/// dedicated worker task in arrival order. On [`start`](Self::start) the
/// worker first reconciles the unacknowledged REST backlog, using the
/// first live message observed during reconciliation as the convergence
/// point between the two sources. [`stop`](Self::stop) aborts the worker;
/// in-flight work is recovered through the backlog on the next start.
pub struct RoomExecutionEngine {
    room_id: String,
    link: Arc<dyn PlatformLink>,
    handler: Arc<dyn EventHandler>,
    config: EngineConfig,
    queue: Arc<Mutex<VecDeque<PlatformEvent>>>,
    notify: Arc<Notify>,
    sync: Arc<Mutex<SyncState>>,
    phase: Arc<watch::Sender<EnginePhase>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl RoomExecutionEngine {
    pub fn new(
        room_id: impl Into<String>,
        link: Arc<dyn PlatformLink>,
        handler: Arc<dyn EventHandler>,
        config: EngineConfig,
    ) -> Self {
        let (phase_tx, _) = watch::channel(EnginePhase::Starting);
        Self {
            room_id: room_id.into(),
            link,
            handler,
            config,
            queue: Arc::new(Mutex::new(VecDeque::new())),
            notify: Arc::new(Notify::new()),
            sync: Arc::new(Mutex::new(SyncState::default())),
            phase: Arc::new(phase_tx),
            task: Mutex::new(None),
        }
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn phase(&self) -> EnginePhase {
        *self.phase.borrow()
    }

    /// Watch handle for phase transitions, mainly for tests and shutdown
    /// coordination.
    pub fn phase_watch(&self) -> watch::Receiver<EnginePhase> {
        self.phase.subscribe()
    }

    pub fn is_running(&self) -> bool {
        lock(&self.task)
            .as_ref()
            .map(|task| !task.is_finished())
            .unwrap_or(false)
    }

    /// Enqueue a live event for this room. `start` resets the queue, so
    /// only events submitted to a started engine are delivered; anything
    /// unacknowledged resurfaces through the backlog anyway.
    pub fn submit(&self, event: PlatformEvent) {
        if let Some(id) = event.message_id() {
            let mut sync = lock(&self.sync);
            if !sync.synced && sync.marker.is_none() {
                tracing::debug!(room_id = %self.room_id, message_id = %id, "Sync marker set");
                sync.marker = Some(id.to_string());
            }
        }
        lock(&self.queue).push_back(event);
        self.notify.notify_one();
    }

    /// Spawn the worker task. Idempotent while a worker is running; after
    /// `stop`, a new start rebuilds room state and reconciles again.
    pub fn start(&self) {
        let mut task = lock(&self.task);
        if task.as_ref().map(|t| !t.is_finished()).unwrap_or(false) {
            tracing::debug!(room_id = %self.room_id, "Engine already running");
            return;
        }

        *lock(&self.sync) = SyncState::default();
        lock(&self.queue).clear();
        self.phase.send_replace(EnginePhase::Starting);

        let worker = Worker {
            room_id: self.room_id.clone(),
            link: self.link.clone(),
            handler: self.handler.clone(),
            config: self.config.clone(),
            queue: self.queue.clone(),
            notify: self.notify.clone(),
            sync: self.sync.clone(),
            phase: self.phase.clone(),
            ctx: RoomContext::new(&self.room_id, self.link.clone(), &self.config),
            retry: RetryTracker::new(self.config.max_retries + 1),
            dedup: DedupCache::new(DEDUP_CAPACITY),
        };

        tracing::info!(room_id = %self.room_id, "Starting room engine");
        *task = Some(tokio::spawn(worker.run()));
    }

    /// Abort the worker immediately. Idempotent, and a no-op before the
    /// first start. Unacknowledged messages resurface through the backlog
    /// on the next start.
    pub fn stop(&self) {
        if let Some(task) = lock(&self.task).take() {
            task.abort();
            tracing::info!(room_id = %self.room_id, "Room engine stopped");
        }
    }
}

impl Drop for RoomExecutionEngine {
    fn drop(&mut self) {
        if let Some(task) = lock(&self.task).take() {
            task.abort();
        }
    }
}

impl std::fmt::Debug for RoomExecutionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomExecutionEngine")
            .field("room_id", &self.room_id)
            .field("phase", &self.phase())
            .finish()
    }
}

struct Worker {
    room_id: String,
    link: Arc<dyn PlatformLink>,
    handler: Arc<dyn EventHandler>,
    config: EngineConfig,
    queue: Arc<Mutex<VecDeque<PlatformEvent>>>,
    notify: Arc<Notify>,
    sync: Arc<Mutex<SyncState>>,
    phase: Arc<watch::Sender<EnginePhase>>,
    ctx: RoomContext,
    retry: RetryTracker,
    dedup: DedupCache,
}

impl Worker {
    async fn run(mut self) {
        self.reconcile().await;
        self.phase.send_replace(EnginePhase::Idle);

        loop {
            let next = lock(&self.queue).pop_front();
            let Some(event) = next else {
                self.notify.notified().await;
                continue;
            };

            if event.is_message() {
                self.phase.send_replace(EnginePhase::Processing);
                self.process_message_event(event).await;
                self.phase.send_replace(EnginePhase::Idle);
                continue;
            }

            match event {
                PlatformEvent::ParticipantAdded { payload, .. } => {
                    self.ctx.participants.add(Participant::new(
                        &payload.id,
                        &payload.name,
                        payload.kind,
                    ));
                }
                PlatformEvent::ParticipantRemoved { payload, .. } => {
                    self.ctx.participants.remove(&payload.id);
                }
                other => {
                    tracing::debug!(
                        room_id = %self.room_id,
                        kind = %other.kind(),
                        "Room lifecycle event ignored by engine"
                    );
                }
            }
        }
    }

    /// Drain the unacknowledged backlog before touching the live queue.
    ///
    /// Pulls stop when the backlog is empty, when its head is a message
    /// this client has permanently given up on, or when the pulled message
    /// matches the sync marker (the first live message seen while
    /// starting). The marker message is processed exactly once: its live
    /// duplicate is spliced off the queue head afterwards.
    async fn reconcile(&mut self) {
        let mut pulled = 0u64;
        loop {
            let msg = match self.link.get_next_message(&self.room_id).await {
                Ok(Some(msg)) => msg,
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(
                        room_id = %self.room_id,
                        error = %e,
                        "Backlog pull failed; proceeding with live events only"
                    );
                    break;
                }
            };

            if self.retry.is_permanently_failed(&msg.id) {
                tracing::debug!(
                    room_id = %self.room_id,
                    message_id = %msg.id,
                    "Backlog head is permanently failed; stopping reconciliation"
                );
                break;
            }

            let is_sync_point = lock(&self.sync).marker.as_deref() == Some(msg.id.as_str());
            let message_id = msg.id.clone();

            self.process_message_event(PlatformEvent::from_backlog(msg)).await;
            pulled += 1;

            if is_sync_point {
                self.splice_live_duplicate(&message_id);
                self.dedup.clear();
                break;
            }
        }

        {
            let mut sync = lock(&self.sync);
            sync.synced = true;
            sync.marker = None;
        }
        record_sync_complete(&self.room_id, pulled);
        tracing::info!(room_id = %self.room_id, backlog = pulled, "Room reconciled");
    }

    /// Drop the live copy of the message just processed from the backlog.
    /// Only the queue head is considered; ordering guarantees the
    /// duplicate cannot sit deeper.
    fn splice_live_duplicate(&self, message_id: &str) {
        let mut queue = lock(&self.queue);
        if queue
            .front()
            .and_then(|event| event.message_id())
            .map(|id| id == message_id)
            .unwrap_or(false)
        {
            queue.pop_front();
            tracing::debug!(
                room_id = %self.room_id,
                message_id = %message_id,
                "Spliced live duplicate of sync point"
            );
        }
    }

    /// One delivery of a message, from either source.
    async fn process_message_event(&mut self, event: PlatformEvent) {
        let (id, sender_id) = match &event {
            PlatformEvent::MessageCreated { payload, .. } => {
                (payload.id.clone(), payload.sender_id.clone())
            }
            _ => return,
        };

        if self.link.is_self(&sender_id) {
            // Ack our own messages so the backlog cursor moves past them.
            if let Err(e) = self.link.mark_processed(&self.room_id, &id).await {
                tracing::debug!(message_id = %id, error = %e, "Failed to ack own message");
            }
            return;
        }

        if self.retry.is_permanently_failed(&id) {
            tracing::debug!(message_id = %id, "Skipping permanently failed message");
            return;
        }

        if self.dedup.contains(&id) {
            self.dedup.touch(&id);
            record_duplicate_skipped(&self.room_id);
            tracing::debug!(message_id = %id, "Skipping duplicate delivery");
            return;
        }

        let (attempt, exceeded) = self.retry.record_attempt(&id);
        if exceeded {
            self.retry.mark_permanently_failed(&id);
            record_retry_exhausted(&self.room_id);
            let reason = format!("retry budget exhausted after {} attempts", attempt - 1);
            if let Err(e) = self.link.mark_failed(&self.room_id, &id, &reason).await {
                tracing::warn!(message_id = %id, error = %e, "Failed to report exhausted retries");
            }
            return;
        }

        if let Err(e) = self.link.mark_processing(&self.room_id, &id).await {
            tracing::debug!(message_id = %id, error = %e, "mark_processing failed");
        }

        if self.config.hydration_enabled {
            self.ctx.ensure_hydrated().await;
        }

        tracing::debug!(
            room_id = %self.room_id,
            message_id = %id,
            attempt,
            "Dispatching message to handler"
        );
        let started = Instant::now();
        let result = self.handler.handle(&mut self.ctx, event).await;
        record_handler_duration(started.elapsed().as_secs_f64());

        match result {
            Ok(()) => {
                // Only successful deliveries occupy a dedup slot; a failed
                // id must stay eligible for its retries.
                self.dedup.insert(id.clone());
                self.retry.mark_success(&id);
                if let Err(e) = self.link.mark_processed(&self.room_id, &id).await {
                    tracing::warn!(message_id = %id, error = %e, "mark_processed failed");
                }
                record_message_processed(&self.room_id);
            }
            Err(e) => {
                let reason = format!("{e:#}");
                tracing::warn!(
                    room_id = %self.room_id,
                    message_id = %id,
                    attempt,
                    error = %reason,
                    "Handler failed"
                );
                if let Err(me) = self.link.mark_failed(&self.room_id, &id, &reason).await {
                    tracing::warn!(message_id = %id, error = %me, "mark_failed failed");
                }
                record_message_failed(&self.room_id);
            }
        }
    }
}
