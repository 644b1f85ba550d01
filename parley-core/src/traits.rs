// ABOUTME: Seam traits between the engine and its collaborators.
// ABOUTME: PlatformLink (transport), EventHandler (user code), RoomHooks (presence callbacks).

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::pin::Pin;
use tokio_stream::Stream;

use crate::event::{Mention, PlatformEvent};
use crate::execution::RoomContext;
use crate::types::{
    ContextMessage, InboundMessage, MessageKind, Participant, ParticipantRole, PeerPage,
    RoomSummary,
};

/// Boxed stream of platform events, yielded once per link connection.
pub type EventStream = Pin<Box<dyn Stream<Item = PlatformEvent> + Send>>;

/// Transport collaborator: WebSocket push plus REST pull/commands.
///
/// Shared read-mostly across all room tasks; implementations must be safe
/// for concurrent use. The lifecycle calls (`mark_*`) are best-effort from
/// the engine's point of view: errors are logged by the caller and never
/// abort message processing.
#[async_trait]
pub trait PlatformLink: Send + Sync {
    /// Identity of this agent on the platform, used to drop self-authored
    /// messages before they reach the handler.
    fn agent_id(&self) -> &str;

    async fn connect(&self) -> Result<()>;
    async fn disconnect(&self) -> Result<()>;
    fn is_connected(&self) -> bool;

    /// Take the live event stream. Yields events for every subscribed
    /// channel; consumable once per connection.
    async fn event_stream(&self) -> Result<EventStream>;

    /// Subscribe to agent-level room membership events (room_added/removed).
    async fn subscribe_agent_rooms(&self) -> Result<()>;
    /// Subscribe to a room's message and participant channels.
    async fn subscribe_room(&self, room_id: &str) -> Result<()>;
    async fn unsubscribe_room(&self, room_id: &str) -> Result<()>;

    /// Rooms this agent is currently a participant of.
    async fn list_rooms(&self) -> Result<Vec<RoomSummary>>;

    /// Oldest message this client has not yet acknowledged for the room.
    /// `Ok(None)` means the backlog is empty (this is not an error).
    async fn get_next_message(&self, room_id: &str) -> Result<Option<InboundMessage>>;

    async fn mark_processing(&self, room_id: &str, message_id: &str) -> Result<()>;
    async fn mark_processed(&self, room_id: &str, message_id: &str) -> Result<()>;
    async fn mark_failed(&self, room_id: &str, message_id: &str, error: &str) -> Result<()>;

    async fn list_participants(&self, room_id: &str) -> Result<Vec<Participant>>;
    /// Full message history for hydration, oldest first.
    async fn get_room_context(&self, room_id: &str) -> Result<Vec<ContextMessage>>;

    async fn send_message(
        &self,
        room_id: &str,
        content: &str,
        mentions: &[Mention],
    ) -> Result<InboundMessage>;
    async fn send_event(
        &self,
        room_id: &str,
        content: &str,
        kind: MessageKind,
        metadata: Option<Value>,
    ) -> Result<()>;

    async fn list_peers(
        &self,
        page: u32,
        page_size: u32,
        not_in_room: Option<&str>,
    ) -> Result<PeerPage>;
    async fn add_participant(
        &self,
        room_id: &str,
        participant_id: &str,
        role: ParticipantRole,
    ) -> Result<()>;
    async fn remove_participant(&self, room_id: &str, participant_id: &str) -> Result<()>;

    /// Check if a sender id is this agent itself.
    fn is_self(&self, sender_id: &str) -> bool {
        sender_id == self.agent_id()
    }
}

/// User-supplied handler invoked once per delivered unit of work.
///
/// Called only for message events; participant bookkeeping happens inside
/// the engine. Errors are reported to the platform via `mark_failed` and
/// retried within the engine's retry budget, never re-raised past the
/// engine boundary.
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    async fn handle(&self, room: &mut RoomContext, event: PlatformEvent) -> Result<()>;
}

/// Callbacks for cross-room lifecycle changes observed by `RoomPresence`.
///
/// All methods default to no-ops; implement only what you need. Errors are
/// logged and never disturb presence bookkeeping.
#[async_trait]
pub trait RoomHooks: Send + Sync + 'static {
    async fn on_room_joined(&self, room_id: &str, info: &Value) -> Result<()> {
        let _ = (room_id, info);
        Ok(())
    }

    async fn on_room_left(&self, room_id: &str) -> Result<()> {
        let _ = room_id;
        Ok(())
    }
}

/// Hook implementation that does nothing.
pub struct NoHooks;

#[async_trait]
impl RoomHooks for NoHooks {}

/// Predicate deciding whether a room should be joined, applied to the
/// room payload before an engine is created.
pub type RoomFilter = std::sync::Arc<dyn Fn(&Value) -> bool + Send + Sync>;
