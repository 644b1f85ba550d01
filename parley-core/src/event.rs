// ABOUTME: Platform events as a closed tagged union with typed wire payloads.
// ABOUTME: Produced by the transport layer, consumed by RoomPresence and engines.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{InboundMessage, MessageKind, SenderKind};

/// A mention inside message metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mention {
    pub id: String,
    pub username: String,
}

/// Metadata attached to a message payload.
///
/// Unknown fields the platform adds later are preserved in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageMetadata {
    #[serde(default)]
    pub mentions: Vec<Mention>,
    #[serde(default = "default_status")]
    pub status: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

fn default_status() -> String {
    "sent".to_string()
}

impl Default for MessageMetadata {
    fn default() -> Self {
        Self {
            mentions: Vec::new(),
            status: default_status(),
            extra: serde_json::Map::new(),
        }
    }
}

/// Wire payload for `message_created` events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageCreatedPayload {
    pub id: String,
    pub content: String,
    #[serde(rename = "message_type", default)]
    pub kind: MessageKind,
    #[serde(default)]
    pub metadata: MessageMetadata,
    pub sender_id: String,
    #[serde(rename = "sender_type")]
    pub sender_kind: SenderKind,
    #[serde(default)]
    pub sender_name: Option<String>,
    pub chat_room_id: String,
    #[serde(default)]
    pub thread_id: Option<String>,
    pub inserted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MessageCreatedPayload {
    /// Normalize into the message shape handed to handlers and adapters.
    pub fn to_message(&self) -> InboundMessage {
        InboundMessage {
            id: self.id.clone(),
            room_id: self.chat_room_id.clone(),
            content: self.content.clone(),
            sender_id: self.sender_id.clone(),
            sender_kind: self.sender_kind,
            sender_name: self.sender_name.clone(),
            kind: self.kind,
            metadata: self.metadata.clone(),
            created_at: self.inserted_at,
        }
    }
}

impl From<InboundMessage> for MessageCreatedPayload {
    fn from(msg: InboundMessage) -> Self {
        Self {
            id: msg.id,
            content: msg.content,
            kind: msg.kind,
            metadata: msg.metadata,
            sender_id: msg.sender_id,
            sender_kind: msg.sender_kind,
            sender_name: msg.sender_name,
            chat_room_id: msg.room_id,
            thread_id: None,
            inserted_at: msg.created_at,
            updated_at: msg.created_at,
        }
    }
}

/// Owner object inside a `room_added` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomOwner {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: SenderKind,
}

/// Wire payload for `room_added` events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomAddedPayload {
    pub id: String,
    #[serde(default)]
    pub owner: Option<RoomOwner>,
    #[serde(default)]
    pub status: String,
    #[serde(rename = "type", default)]
    pub room_type: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub participant_role: String,
}

/// Wire payload for `room_removed` events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomRemovedPayload {
    pub id: String,
    #[serde(default)]
    pub status: String,
    #[serde(rename = "type", default)]
    pub room_type: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub removed_at: Option<DateTime<Utc>>,
}

/// Wire payload for `participant_added` events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantAddedPayload {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: SenderKind,
}

/// Wire payload for `participant_removed` events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantRemovedPayload {
    pub id: String,
}

/// Discriminant for [`PlatformEvent`] variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    MessageCreated,
    RoomAdded,
    RoomRemoved,
    ParticipantAdded,
    ParticipantRemoved,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::MessageCreated => "message_created",
            Self::RoomAdded => "room_added",
            Self::RoomRemoved => "room_removed",
            Self::ParticipantAdded => "participant_added",
            Self::ParticipantRemoved => "participant_removed",
        };
        write!(f, "{}", s)
    }
}

/// Event pushed by the platform over the live stream.
///
/// Immutable once constructed. `RoomAdded`/`RoomRemoved` are handled by
/// `RoomPresence`; the remaining variants are forwarded to the owning
/// room's `RoomExecutionEngine`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlatformEvent {
    MessageCreated {
        room_id: String,
        payload: MessageCreatedPayload,
    },
    RoomAdded {
        room_id: String,
        payload: RoomAddedPayload,
    },
    RoomRemoved {
        room_id: String,
        payload: RoomRemovedPayload,
    },
    ParticipantAdded {
        room_id: String,
        payload: ParticipantAddedPayload,
    },
    ParticipantRemoved {
        room_id: String,
        payload: ParticipantRemovedPayload,
    },
}

impl PlatformEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::MessageCreated { .. } => EventKind::MessageCreated,
            Self::RoomAdded { .. } => EventKind::RoomAdded,
            Self::RoomRemoved { .. } => EventKind::RoomRemoved,
            Self::ParticipantAdded { .. } => EventKind::ParticipantAdded,
            Self::ParticipantRemoved { .. } => EventKind::ParticipantRemoved,
        }
    }

    pub fn room_id(&self) -> &str {
        match self {
            Self::MessageCreated { room_id, .. }
            | Self::RoomAdded { room_id, .. }
            | Self::RoomRemoved { room_id, .. }
            | Self::ParticipantAdded { room_id, .. }
            | Self::ParticipantRemoved { room_id, .. } => room_id,
        }
    }

    pub fn is_message(&self) -> bool {
        matches!(self, Self::MessageCreated { .. })
    }

    /// Platform-assigned message id, for message events only.
    pub fn message_id(&self) -> Option<&str> {
        match self {
            Self::MessageCreated { payload, .. } => Some(&payload.id),
            _ => None,
        }
    }

    /// Wrap a backlog message pulled over REST into the event shape the
    /// handler sees, so both sources feed one processing path.
    pub fn from_backlog(msg: InboundMessage) -> Self {
        let room_id = msg.room_id.clone();
        Self::MessageCreated {
            room_id,
            payload: msg.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_message_json() -> serde_json::Value {
        serde_json::json!({
            "id": "msg-1",
            "content": "hello",
            "message_type": "text",
            "metadata": {"mentions": [{"id": "u1", "username": "alice"}], "status": "sent"},
            "sender_id": "u1",
            "sender_type": "User",
            "sender_name": "Alice",
            "chat_room_id": "room-1",
            "inserted_at": "2024-05-01T12:00:00Z",
            "updated_at": "2024-05-01T12:00:00Z"
        })
    }

    #[test]
    fn message_payload_deserializes_observed_wire_shape() {
        let payload: MessageCreatedPayload =
            serde_json::from_value(sample_message_json()).unwrap();
        assert_eq!(payload.id, "msg-1");
        assert_eq!(payload.kind, MessageKind::Text);
        assert_eq!(payload.sender_kind, SenderKind::User);
        assert_eq!(payload.metadata.mentions[0].username, "alice");
    }

    #[test]
    fn message_payload_defaults_missing_metadata() {
        let mut json = sample_message_json();
        json.as_object_mut().unwrap().remove("metadata");
        let payload: MessageCreatedPayload = serde_json::from_value(json).unwrap();
        assert!(payload.metadata.mentions.is_empty());
        assert_eq!(payload.metadata.status, "sent");
    }

    #[test]
    fn unknown_message_kind_degrades_to_other() {
        let mut json = sample_message_json();
        json["message_type"] = serde_json::json!("hologram");
        let payload: MessageCreatedPayload = serde_json::from_value(json).unwrap();
        assert_eq!(payload.kind, MessageKind::Other);
    }

    #[test]
    fn backlog_round_trip_preserves_identity() {
        let payload: MessageCreatedPayload =
            serde_json::from_value(sample_message_json()).unwrap();
        let msg = payload.to_message();
        let event = PlatformEvent::from_backlog(msg);
        assert_eq!(event.message_id(), Some("msg-1"));
        assert_eq!(event.room_id(), "room-1");
        assert!(event.is_message());
    }

    #[test]
    fn event_kind_display_matches_wire_names() {
        assert_eq!(EventKind::MessageCreated.to_string(), "message_created");
        assert_eq!(EventKind::ParticipantRemoved.to_string(), "participant_removed");
    }
}
