// ABOUTME: Mock collaborators and fixture builders for engine and adapter tests.
// ABOUTME: Public so downstream crates can test handlers without a live platform.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::event::{
    Mention, MessageCreatedPayload, ParticipantAddedPayload, ParticipantRemovedPayload,
    PlatformEvent, RoomAddedPayload, RoomRemovedPayload,
};
use crate::execution::{lock, RoomContext};
use crate::traits::{EventHandler, EventStream, PlatformLink};
use crate::types::{
    ContextMessage, InboundMessage, MessageKind, Participant, ParticipantRole, Peer, PeerPage,
    RoomSummary, SenderKind,
};

/// One recorded call against a [`MockLink`].
#[derive(Debug, Clone, PartialEq)]
pub enum LinkCall {
    Connect,
    Disconnect,
    SubscribeAgentRooms,
    SubscribeRoom(String),
    UnsubscribeRoom(String),
    MarkProcessing { room: String, id: String },
    MarkProcessed { room: String, id: String },
    MarkFailed { room: String, id: String, error: String },
    SendMessage { room: String, content: String },
    SendEvent { room: String, kind: MessageKind },
    AddParticipant { room: String, id: String, role: ParticipantRole },
    RemoveParticipant { room: String, id: String },
}

/// In-memory [`PlatformLink`] with scripted responses and recorded calls.
///
/// The backlog behaves like the real endpoint: `get_next_message` keeps
/// returning the oldest unacknowledged message until it is acknowledged
/// via `mark_processed`.
pub struct MockLink {
    agent_id: String,
    connected: AtomicBool,
    calls: Mutex<Vec<LinkCall>>,
    rooms: Mutex<Vec<RoomSummary>>,
    backlog: Mutex<HashMap<String, VecDeque<InboundMessage>>>,
    participants: Mutex<HashMap<String, Vec<Participant>>>,
    history: Mutex<HashMap<String, Vec<ContextMessage>>>,
    peers: Mutex<Vec<Peer>>,
    fail_context_fetch: bool,
    context_fetches: AtomicUsize,
    send_counter: AtomicUsize,
    event_tx: mpsc::UnboundedSender<PlatformEvent>,
    event_rx: Mutex<Option<mpsc::UnboundedReceiver<PlatformEvent>>>,
}

impl MockLink {
    pub fn builder(agent_id: impl Into<String>) -> MockLinkBuilder {
        MockLinkBuilder {
            agent_id: agent_id.into(),
            rooms: Vec::new(),
            backlog: HashMap::new(),
            participants: HashMap::new(),
            history: HashMap::new(),
            peers: Vec::new(),
            fail_context_fetch: false,
        }
    }

    /// Push an event into the live stream, as the platform would.
    pub fn push_event(&self, event: PlatformEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Append an unacknowledged message to a room's backlog after
    /// construction, simulating traffic while the client is down.
    pub fn backlog_push(&self, room: &str, msg: InboundMessage) {
        lock(&self.backlog)
            .entry(room.to_string())
            .or_default()
            .push_back(msg);
    }

    pub fn calls(&self) -> Vec<LinkCall> {
        lock(&self.calls).clone()
    }

    pub fn context_fetch_count(&self) -> usize {
        self.context_fetches.load(Ordering::SeqCst)
    }

    /// Message ids acknowledged as processed for `room`, in order.
    pub fn processed_ids(&self, room: &str) -> Vec<String> {
        lock(&self.calls)
            .iter()
            .filter_map(|call| match call {
                LinkCall::MarkProcessed { room: r, id } if r == room => Some(id.clone()),
                _ => None,
            })
            .collect()
    }

    /// Message ids reported as failed for `room`, in order.
    pub fn failed_ids(&self, room: &str) -> Vec<String> {
        lock(&self.calls)
            .iter()
            .filter_map(|call| match call {
                LinkCall::MarkFailed { room: r, id, .. } if r == room => Some(id.clone()),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: LinkCall) {
        lock(&self.calls).push(call);
    }
}

pub struct MockLinkBuilder {
    agent_id: String,
    rooms: Vec<RoomSummary>,
    backlog: HashMap<String, VecDeque<InboundMessage>>,
    participants: HashMap<String, Vec<Participant>>,
    history: HashMap<String, Vec<ContextMessage>>,
    peers: Vec<Peer>,
    fail_context_fetch: bool,
}

impl MockLinkBuilder {
    pub fn room(mut self, room: RoomSummary) -> Self {
        self.rooms.push(room);
        self
    }

    pub fn backlog_message(mut self, room: &str, msg: InboundMessage) -> Self {
        self.backlog.entry(room.to_string()).or_default().push_back(msg);
        self
    }

    pub fn participants(mut self, room: &str, participants: Vec<Participant>) -> Self {
        self.participants.insert(room.to_string(), participants);
        self
    }

    pub fn context_message(mut self, room: &str, msg: ContextMessage) -> Self {
        self.history.entry(room.to_string()).or_default().push(msg);
        self
    }

    pub fn peer(mut self, peer: Peer) -> Self {
        self.peers.push(peer);
        self
    }

    pub fn fail_context_fetch(mut self) -> Self {
        self.fail_context_fetch = true;
        self
    }

    pub fn build(self) -> MockLink {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        MockLink {
            agent_id: self.agent_id,
            connected: AtomicBool::new(false),
            calls: Mutex::new(Vec::new()),
            rooms: Mutex::new(self.rooms),
            backlog: Mutex::new(self.backlog),
            participants: Mutex::new(self.participants),
            history: Mutex::new(self.history),
            peers: Mutex::new(self.peers),
            fail_context_fetch: self.fail_context_fetch,
            context_fetches: AtomicUsize::new(0),
            send_counter: AtomicUsize::new(0),
            event_tx,
            event_rx: Mutex::new(Some(event_rx)),
        }
    }
}

#[async_trait]
impl PlatformLink for MockLink {
    fn agent_id(&self) -> &str {
        &self.agent_id
    }

    async fn connect(&self) -> Result<()> {
        self.connected.store(true, Ordering::SeqCst);
        self.record(LinkCall::Connect);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        self.record(LinkCall::Disconnect);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn event_stream(&self) -> Result<EventStream> {
        let rx = lock(&self.event_rx)
            .take()
            .ok_or_else(|| anyhow::anyhow!("event stream already taken"))?;
        Ok(Box::pin(UnboundedReceiverStream::new(rx)))
    }

    async fn subscribe_agent_rooms(&self) -> Result<()> {
        self.record(LinkCall::SubscribeAgentRooms);
        Ok(())
    }

    async fn subscribe_room(&self, room_id: &str) -> Result<()> {
        self.record(LinkCall::SubscribeRoom(room_id.to_string()));
        Ok(())
    }

    async fn unsubscribe_room(&self, room_id: &str) -> Result<()> {
        self.record(LinkCall::UnsubscribeRoom(room_id.to_string()));
        Ok(())
    }

    async fn list_rooms(&self) -> Result<Vec<RoomSummary>> {
        Ok(lock(&self.rooms).clone())
    }

    async fn get_next_message(&self, room_id: &str) -> Result<Option<InboundMessage>> {
        Ok(lock(&self.backlog)
            .get(room_id)
            .and_then(|queue| queue.front())
            .cloned())
    }

    async fn mark_processing(&self, room_id: &str, message_id: &str) -> Result<()> {
        self.record(LinkCall::MarkProcessing {
            room: room_id.to_string(),
            id: message_id.to_string(),
        });
        Ok(())
    }

    async fn mark_processed(&self, room_id: &str, message_id: &str) -> Result<()> {
        self.record(LinkCall::MarkProcessed {
            room: room_id.to_string(),
            id: message_id.to_string(),
        });
        if let Some(queue) = lock(&self.backlog).get_mut(room_id) {
            queue.retain(|msg| msg.id != message_id);
        }
        Ok(())
    }

    async fn mark_failed(&self, room_id: &str, message_id: &str, error: &str) -> Result<()> {
        self.record(LinkCall::MarkFailed {
            room: room_id.to_string(),
            id: message_id.to_string(),
            error: error.to_string(),
        });
        Ok(())
    }

    async fn list_participants(&self, room_id: &str) -> Result<Vec<Participant>> {
        Ok(lock(&self.participants)
            .get(room_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_room_context(&self, room_id: &str) -> Result<Vec<ContextMessage>> {
        self.context_fetches.fetch_add(1, Ordering::SeqCst);
        if self.fail_context_fetch {
            anyhow::bail!("context fetch failed");
        }
        Ok(lock(&self.history).get(room_id).cloned().unwrap_or_default())
    }

    async fn send_message(
        &self,
        room_id: &str,
        content: &str,
        mentions: &[Mention],
    ) -> Result<InboundMessage> {
        self.record(LinkCall::SendMessage {
            room: room_id.to_string(),
            content: content.to_string(),
        });
        let n = self.send_counter.fetch_add(1, Ordering::SeqCst);
        let metadata = crate::event::MessageMetadata {
            mentions: mentions.to_vec(),
            ..Default::default()
        };
        Ok(InboundMessage {
            id: format!("sent-{n}"),
            room_id: room_id.to_string(),
            content: content.to_string(),
            sender_id: self.agent_id.clone(),
            sender_kind: SenderKind::Agent,
            sender_name: None,
            kind: MessageKind::Text,
            metadata,
            created_at: Utc::now(),
        })
    }

    async fn send_event(
        &self,
        room_id: &str,
        _content: &str,
        kind: MessageKind,
        _metadata: Option<Value>,
    ) -> Result<()> {
        self.record(LinkCall::SendEvent {
            room: room_id.to_string(),
            kind,
        });
        Ok(())
    }

    async fn list_peers(
        &self,
        page: u32,
        page_size: u32,
        not_in_room: Option<&str>,
    ) -> Result<PeerPage> {
        let excluded: Vec<String> = match not_in_room {
            Some(room) => lock(&self.participants)
                .get(room)
                .map(|ps| ps.iter().map(|p| p.id.clone()).collect())
                .unwrap_or_default(),
            None => Vec::new(),
        };
        let peers: Vec<Peer> = lock(&self.peers)
            .iter()
            .filter(|peer| !excluded.contains(&peer.id))
            .cloned()
            .collect();

        let total_count = peers.len() as u64;
        let page_size = page_size.max(1);
        let total_pages = ((total_count + page_size as u64 - 1) / page_size as u64) as u32;
        let start = (page.saturating_sub(1) as usize) * page_size as usize;
        let slice: Vec<Peer> = peers
            .into_iter()
            .skip(start)
            .take(page_size as usize)
            .collect();

        Ok(PeerPage {
            peers: slice,
            page,
            page_size,
            total_count,
            total_pages,
        })
    }

    async fn add_participant(
        &self,
        room_id: &str,
        participant_id: &str,
        role: ParticipantRole,
    ) -> Result<()> {
        self.record(LinkCall::AddParticipant {
            room: room_id.to_string(),
            id: participant_id.to_string(),
            role,
        });
        let added = lock(&self.peers)
            .iter()
            .find(|peer| peer.id == participant_id)
            .map(|peer| Participant::new(&peer.id, &peer.name, peer.kind))
            .unwrap_or_else(|| Participant::new(participant_id, participant_id, SenderKind::Agent));
        lock(&self.participants)
            .entry(room_id.to_string())
            .or_default()
            .push(added);
        Ok(())
    }

    async fn remove_participant(&self, room_id: &str, participant_id: &str) -> Result<()> {
        self.record(LinkCall::RemoveParticipant {
            room: room_id.to_string(),
            id: participant_id.to_string(),
        });
        if let Some(ps) = lock(&self.participants).get_mut(room_id) {
            ps.retain(|p| p.id != participant_id);
        }
        Ok(())
    }
}

/// Handler that records delivered message ids and can be scripted to fail
/// the first N deliveries of a given id.
#[derive(Default)]
pub struct RecordingHandler {
    handled: Mutex<Vec<String>>,
    failures: Mutex<HashMap<String, u32>>,
    notify: tokio::sync::Notify,
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `times` deliveries of message `id`.
    pub fn fail_next(&self, id: &str, times: u32) {
        lock(&self.failures).insert(id.to_string(), times);
    }

    /// Delivered message ids, in delivery order.
    pub fn handled(&self) -> Vec<String> {
        lock(&self.handled).clone()
    }

    /// Wait until at least `count` deliveries have happened. Pair with
    /// `tokio::time::timeout` in tests.
    pub async fn wait_for(&self, count: usize) {
        loop {
            let notified = self.notify.notified();
            if lock(&self.handled).len() >= count {
                return;
            }
            notified.await;
        }
    }
}

#[async_trait]
impl EventHandler for RecordingHandler {
    async fn handle(&self, _room: &mut RoomContext, event: PlatformEvent) -> Result<()> {
        let id = event.message_id().unwrap_or_default().to_string();
        lock(&self.handled).push(id.clone());
        self.notify.notify_waiters();

        let should_fail = {
            let mut failures = lock(&self.failures);
            match failures.get_mut(&id) {
                Some(remaining) if *remaining > 0 => {
                    *remaining -= 1;
                    true
                }
                _ => false,
            }
        };
        if should_fail {
            anyhow::bail!("scripted handler failure for {id}");
        }
        Ok(())
    }
}

/// A plain text message fixture.
pub fn message(id: &str, room_id: &str, sender_id: &str, content: &str) -> InboundMessage {
    InboundMessage {
        id: id.to_string(),
        room_id: room_id.to_string(),
        content: content.to_string(),
        sender_id: sender_id.to_string(),
        sender_kind: SenderKind::User,
        sender_name: Some(format!("user-{sender_id}")),
        kind: MessageKind::Text,
        metadata: Default::default(),
        created_at: Utc::now(),
    }
}

/// A `message_created` event fixture.
pub fn message_event(id: &str, room_id: &str, sender_id: &str, content: &str) -> PlatformEvent {
    PlatformEvent::MessageCreated {
        room_id: room_id.to_string(),
        payload: MessageCreatedPayload::from(message(id, room_id, sender_id, content)),
    }
}

/// A history entry fixture.
pub fn context_message(id: &str, content: &str) -> ContextMessage {
    ContextMessage {
        id: id.to_string(),
        content: content.to_string(),
        sender_id: "u1".to_string(),
        sender_kind: SenderKind::User,
        sender_name: Some("Alice".to_string()),
        kind: MessageKind::Text,
        created_at: Some(Utc::now()),
    }
}

pub fn room_summary(id: &str, title: &str) -> RoomSummary {
    RoomSummary {
        id: id.to_string(),
        title: title.to_string(),
        room_type: "group".to_string(),
        status: "active".to_string(),
    }
}

pub fn room_added_event(room_id: &str, title: &str) -> PlatformEvent {
    PlatformEvent::RoomAdded {
        room_id: room_id.to_string(),
        payload: RoomAddedPayload {
            id: room_id.to_string(),
            owner: None,
            status: "active".to_string(),
            room_type: "group".to_string(),
            title: title.to_string(),
            created_at: Some(Utc::now()),
            participant_role: "member".to_string(),
        },
    }
}

pub fn room_removed_event(room_id: &str) -> PlatformEvent {
    PlatformEvent::RoomRemoved {
        room_id: room_id.to_string(),
        payload: RoomRemovedPayload {
            id: room_id.to_string(),
            status: "closed".to_string(),
            room_type: "group".to_string(),
            title: String::new(),
            removed_at: Some(Utc::now()),
        },
    }
}

pub fn participant_added_event(room_id: &str, id: &str, name: &str) -> PlatformEvent {
    PlatformEvent::ParticipantAdded {
        room_id: room_id.to_string(),
        payload: ParticipantAddedPayload {
            id: id.to_string(),
            name: name.to_string(),
            kind: SenderKind::Agent,
        },
    }
}

pub fn participant_removed_event(room_id: &str, id: &str) -> PlatformEvent {
    PlatformEvent::ParticipantRemoved {
        room_id: room_id.to_string(),
        payload: ParticipantRemovedPayload { id: id.to_string() },
    }
}
