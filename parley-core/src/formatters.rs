// ABOUTME: Pure formatting helpers for feeding room state to an LLM.
// ABOUTME: No I/O; fully unit-testable.

use serde::{Deserialize, Serialize};

use crate::types::{ContextMessage, MessageKind, Participant, SenderKind};

/// Chat role a history entry maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmRole {
    User,
    Assistant,
}

/// A history entry shaped for LLM injection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmMessage {
    pub role: LlmRole,
    pub content: String,
    pub sender_name: String,
    pub sender_kind: SenderKind,
    pub kind: MessageKind,
}

/// Map one platform history entry to LLM shape. Agent-authored messages
/// become `assistant`, everything else `user`.
pub fn format_message_for_llm(msg: &ContextMessage) -> LlmMessage {
    let sender_name = msg
        .sender_name
        .clone()
        .unwrap_or_else(|| msg.sender_kind.to_string());
    LlmMessage {
        role: if msg.sender_kind == SenderKind::Agent {
            LlmRole::Assistant
        } else {
            LlmRole::User
        },
        content: msg.content.clone(),
        sender_name,
        sender_kind: msg.sender_kind,
        kind: msg.kind,
    }
}

/// Format a room's history for LLM injection, optionally excluding one id
/// (usually the message currently being handled).
pub fn format_history_for_llm(messages: &[ContextMessage], exclude_id: Option<&str>) -> Vec<LlmMessage> {
    messages
        .iter()
        .filter(|m| exclude_id != Some(m.id.as_str()))
        .map(format_message_for_llm)
        .collect()
}

/// Build the "current participants" system message adapters inject when
/// the participant set changes.
pub fn build_participants_message(participants: &[Participant]) -> String {
    if participants.is_empty() {
        return "## Current Participants\nNo other participants in this room.".to_string();
    }

    let mut lines = vec!["## Current Participants".to_string()];
    for p in participants {
        lines.push(format!("- {} ({})", p.name, p.kind));
    }
    lines.push(String::new());
    lines.push(
        "To mention a participant in send_message, use their EXACT name (e.g., 'Weather Agent', not an ID)."
            .to_string(),
    );
    lines.join("\n")
}
