// ABOUTME: Shared data types for the Parley runtime layer.
// ABOUTME: Messages, participants, conversation context, and engine configuration.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::event::MessageMetadata;

/// Who authored a message or owns a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SenderKind {
    #[default]
    User,
    Agent,
    System,
}

impl std::fmt::Display for SenderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "User"),
            Self::Agent => write!(f, "Agent"),
            Self::System => write!(f, "System"),
        }
    }
}

/// Message kind, matched exhaustively instead of dispatching on strings.
///
/// Unknown kinds the platform introduces later land on `Other` so
/// deserialization keeps working.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    #[default]
    Text,
    Thought,
    Error,
    Task,
    ToolCall,
    ToolResult,
    #[serde(other)]
    Other,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Thought => "thought",
            Self::Error => "error",
            Self::Task => "task",
            Self::ToolCall => "tool_call",
            Self::ToolResult => "tool_result",
            Self::Other => "other",
        }
    }
}

/// A message delivered for processing, normalized across the live push
/// stream and the backlog pull endpoint. Identity is by `id` only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub id: String,
    pub room_id: String,
    pub content: String,
    pub sender_id: String,
    pub sender_kind: SenderKind,
    pub sender_name: Option<String>,
    pub kind: MessageKind,
    pub metadata: MessageMetadata,
    pub created_at: DateTime<Utc>,
}

impl InboundMessage {
    /// Format with a sender prefix for LLM consumption: `[SENDER]: content`.
    pub fn format_for_llm(&self) -> String {
        let sender = self
            .sender_name
            .as_deref()
            .map(str::to_string)
            .unwrap_or_else(|| self.sender_kind.to_string());
        format!("[{}]: {}", sender, self.content)
    }
}

/// A room member tracked by [`crate::participants::ParticipantSet`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: SenderKind,
}

impl Participant {
    pub fn new(id: impl Into<String>, name: impl Into<String>, kind: SenderKind) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind,
        }
    }
}

/// Role a participant holds within a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantRole {
    Owner,
    Admin,
    #[default]
    Member,
}

impl ParticipantRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Owner => "owner",
            Self::Admin => "admin",
            Self::Member => "member",
        }
    }
}

/// One history entry inside a hydrated [`ConversationContext`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextMessage {
    pub id: String,
    pub content: String,
    pub sender_id: String,
    pub sender_kind: SenderKind,
    pub sender_name: Option<String>,
    pub kind: MessageKind,
    pub created_at: Option<DateTime<Utc>>,
}

/// Hydrated snapshot of a room: history plus participants.
///
/// Rebuilt wholesale on hydration; the message list is never patched in
/// place (participant changes mutate the live set instead).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationContext {
    pub room_id: String,
    pub messages: Vec<ContextMessage>,
    pub participants: Vec<Participant>,
    pub hydrated_at: DateTime<Utc>,
}

impl ConversationContext {
    pub fn empty(room_id: impl Into<String>, participants: Vec<Participant>) -> Self {
        Self {
            room_id: room_id.into(),
            messages: Vec::new(),
            participants,
            hydrated_at: Utc::now(),
        }
    }
}

/// Summary of a room returned by the room listing endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomSummary {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(rename = "type", default)]
    pub room_type: String,
    #[serde(default)]
    pub status: String,
}

/// A peer (agent or user) available on the platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Peer {
    pub id: String,
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: SenderKind,
    #[serde(default)]
    pub description: Option<String>,
}

/// One page of a peer listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerPage {
    pub peers: Vec<Peer>,
    pub page: u32,
    pub page_size: u32,
    pub total_count: u64,
    pub total_pages: u32,
}

/// Per-room engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Retries allowed after the first failed attempt. A message gets
    /// `max_retries + 1` handler invocations before it is classified
    /// permanently failed.
    pub max_retries: u32,
    /// When false, `get_context` returns an empty context with no network
    /// call. For handlers that manage their own state.
    pub hydration_enabled: bool,
    /// Age past which a cached context is re-hydrated on access.
    pub context_ttl: Duration,
    /// Cap on history entries kept per hydration.
    pub max_context_messages: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_retries: 1,
            hydration_enabled: true,
            context_ttl: Duration::from_secs(300),
            max_context_messages: 100,
        }
    }
}

/// Observable engine lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnginePhase {
    /// Reconciling the backlog against the live queue.
    Starting,
    /// Waiting for the next queued event.
    Idle,
    /// A unit of work is being handled.
    Processing,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_for_llm_prefers_sender_name() {
        let msg = InboundMessage {
            id: "m1".into(),
            room_id: "r1".into(),
            content: "hi".into(),
            sender_id: "u1".into(),
            sender_kind: SenderKind::User,
            sender_name: Some("Alice".into()),
            kind: MessageKind::Text,
            metadata: Default::default(),
            created_at: Utc::now(),
        };
        assert_eq!(msg.format_for_llm(), "[Alice]: hi");
    }

    #[test]
    fn format_for_llm_falls_back_to_sender_kind() {
        let msg = InboundMessage {
            id: "m1".into(),
            room_id: "r1".into(),
            content: "boot".into(),
            sender_id: "sys".into(),
            sender_kind: SenderKind::System,
            sender_name: None,
            kind: MessageKind::Text,
            metadata: Default::default(),
            created_at: Utc::now(),
        };
        assert_eq!(msg.format_for_llm(), "[System]: boot");
    }

    #[test]
    fn message_kind_serde_round_trip() {
        let json = serde_json::to_string(&MessageKind::ToolCall).unwrap();
        assert_eq!(json, "\"tool_call\"");
        let back: MessageKind = serde_json::from_str(&json).unwrap();
        assert_eq!(back, MessageKind::ToolCall);
    }

    #[test]
    fn participant_role_default_is_member() {
        assert_eq!(ParticipantRole::default(), ParticipantRole::Member);
        assert_eq!(ParticipantRole::Owner.as_str(), "owner");
    }

    #[test]
    fn engine_config_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.max_retries, 1);
        assert!(config.hydration_enabled);
        assert_eq!(config.context_ttl, Duration::from_secs(300));
        assert_eq!(config.max_context_messages, 100);
    }
}
