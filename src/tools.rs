// ABOUTME: Platform actions exposed as LLM-callable tools.
// ABOUTME: Mention resolution by name, peer lookup, and schema generation.

use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::{json, Value};

use parley_core::event::Mention;
use parley_core::execution::RoomContext;
use parley_core::traits::PlatformLink;
use parley_core::types::{MessageKind, Participant, ParticipantRole, Peer, PeerPage};

const MAX_PEER_PAGE_SIZE: u32 = 100;

/// Room-scoped actions an LLM can invoke.
///
/// Mentions and participant management work by display name: the LLM sees
/// names, the platform wants ids, and this layer translates using the
/// cached participant list.
pub struct AgentTools {
    link: Arc<dyn PlatformLink>,
    room_id: String,
    participants: Vec<Participant>,
}

impl AgentTools {
    pub fn new(link: Arc<dyn PlatformLink>, room_id: impl Into<String>) -> Self {
        Self {
            link,
            room_id: room_id.into(),
            participants: Vec::new(),
        }
    }

    /// Build from the room state a handler receives, seeding the
    /// participant cache.
    pub fn from_room(room: &RoomContext) -> Self {
        Self {
            link: room.link().clone(),
            room_id: room.room_id().to_string(),
            participants: room.participants(),
        }
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    /// Refresh the participant cache used for mention resolution.
    pub fn update_participants(&mut self, participants: Vec<Participant>) {
        self.participants = participants;
    }

    /// Send a chat message. Every mention must name a current participant;
    /// unknown names fail with the list of valid ones so the LLM can
    /// correct itself.
    pub async fn send_message(&self, content: &str, mentions: &[String]) -> Result<String> {
        let resolved = self.resolve_mentions(mentions)?;
        let sent = self
            .link
            .send_message(&self.room_id, content, &resolved)
            .await?;
        tracing::debug!(room_id = %self.room_id, message_id = %sent.id, "Message sent");
        Ok(sent.id)
    }

    /// Post a non-text event (thought, task update, tool traffic).
    pub async fn send_event(
        &self,
        content: &str,
        kind: MessageKind,
        metadata: Option<Value>,
    ) -> Result<()> {
        self.link
            .send_event(&self.room_id, content, kind, metadata)
            .await
    }

    /// Add a platform peer to this room by display name. Pages through the
    /// peer directory to find the id.
    pub async fn add_participant(&mut self, name: &str, role: ParticipantRole) -> Result<Peer> {
        let peer = self
            .lookup_peer_by_name(name)
            .await?
            .with_context(|| format!("no peer named '{name}' on the platform"))?;

        self.link
            .add_participant(&self.room_id, &peer.id, role)
            .await?;
        tracing::info!(room_id = %self.room_id, peer = %peer.name, "Participant added");
        self.participants
            .push(Participant::new(&peer.id, &peer.name, peer.kind));
        Ok(peer)
    }

    /// Remove a current participant by display name.
    pub async fn remove_participant(&mut self, name: &str) -> Result<()> {
        let participant = self
            .participants
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
            .cloned()
            .with_context(|| {
                format!(
                    "'{name}' is not in this room. Current participants: {:?}",
                    self.participant_names()
                )
            })?;

        self.link
            .remove_participant(&self.room_id, &participant.id)
            .await?;
        tracing::info!(room_id = %self.room_id, peer = %participant.name, "Participant removed");
        self.participants.retain(|p| p.id != participant.id);
        Ok(())
    }

    /// Page through peers not yet in this room.
    pub async fn lookup_peers(&self, page: u32, page_size: u32) -> Result<PeerPage> {
        let page_size = page_size.min(MAX_PEER_PAGE_SIZE);
        self.link
            .list_peers(page.max(1), page_size, Some(&self.room_id))
            .await
    }

    /// Fresh participant list from the platform; also refreshes the cache.
    pub async fn get_participants(&mut self) -> Result<Vec<Participant>> {
        let participants = self.link.list_participants(&self.room_id).await?;
        self.participants = participants.clone();
        Ok(participants)
    }

    /// Render the cached participant list as a system-role message for the
    /// LLM conversation.
    pub fn participants_message(&self) -> String {
        parley_core::formatters::build_participants_message(&self.participants)
    }

    fn participant_names(&self) -> Vec<String> {
        self.participants.iter().map(|p| p.name.clone()).collect()
    }

    fn resolve_mentions(&self, names: &[String]) -> Result<Vec<Mention>> {
        names
            .iter()
            .map(|name| {
                self.participants
                    .iter()
                    .find(|p| p.name.eq_ignore_ascii_case(name))
                    .map(|p| Mention {
                        id: p.id.clone(),
                        username: p.name.clone(),
                    })
                    .with_context(|| {
                        format!(
                            "unknown participant '{name}'. Available: {:?}",
                            self.participant_names()
                        )
                    })
            })
            .collect()
    }

    async fn lookup_peer_by_name(&self, name: &str) -> Result<Option<Peer>> {
        let mut page = 1;
        loop {
            let result = self.lookup_peers(page, MAX_PEER_PAGE_SIZE).await?;
            if let Some(peer) = result
                .peers
                .into_iter()
                .find(|peer| peer.name.eq_ignore_ascii_case(name))
            {
                return Ok(Some(peer));
            }
            if page >= result.total_pages {
                return Ok(None);
            }
            page += 1;
        }
    }

    /// Dispatch a tool call by name with JSON arguments, as produced by an
    /// LLM. Returns a JSON result to feed back into the conversation.
    pub async fn execute_tool_call(&mut self, tool_name: &str, arguments: Value) -> Result<Value> {
        match tool_name {
            "send_message" => {
                let content = required_str(&arguments, "content")?;
                let mentions: Vec<String> = arguments
                    .get("mentions")
                    .map(|v| serde_json::from_value(v.clone()))
                    .transpose()
                    .context("mentions must be an array of names")?
                    .unwrap_or_default();
                let id = self.send_message(content, &mentions).await?;
                Ok(json!({"status": "sent", "message_id": id}))
            }
            "send_event" => {
                let content = required_str(&arguments, "content")?;
                let kind: MessageKind = arguments
                    .get("message_type")
                    .map(|v| serde_json::from_value(v.clone()))
                    .transpose()
                    .context("invalid message_type")?
                    .unwrap_or(MessageKind::Thought);
                let metadata = arguments.get("metadata").cloned();
                self.send_event(content, kind, metadata).await?;
                Ok(json!({"status": "sent"}))
            }
            "add_participant" => {
                let name = required_str(&arguments, "name")?;
                let role: ParticipantRole = arguments
                    .get("role")
                    .map(|v| serde_json::from_value(v.clone()))
                    .transpose()
                    .context("invalid role")?
                    .unwrap_or_default();
                let peer = self.add_participant(name, role).await?;
                Ok(json!({"status": "added", "id": peer.id, "name": peer.name}))
            }
            "remove_participant" => {
                let name = required_str(&arguments, "name")?;
                self.remove_participant(name).await?;
                Ok(json!({"status": "removed", "name": name}))
            }
            "lookup_peers" => {
                let page = arguments.get("page").and_then(Value::as_u64).unwrap_or(1) as u32;
                let page_size = arguments
                    .get("page_size")
                    .and_then(Value::as_u64)
                    .unwrap_or(50) as u32;
                let result = self.lookup_peers(page, page_size).await?;
                Ok(serde_json::to_value(result)?)
            }
            "get_participants" => {
                let participants = self.get_participants().await?;
                Ok(serde_json::to_value(participants)?)
            }
            other => anyhow::bail!("unknown tool '{other}'"),
        }
    }

    /// Tool schemas in OpenAI function-calling format.
    pub fn openai_tool_schemas() -> Vec<Value> {
        tool_specs()
            .into_iter()
            .map(|spec| {
                json!({
                    "type": "function",
                    "function": {
                        "name": spec.name,
                        "description": spec.description,
                        "parameters": spec.parameters,
                    }
                })
            })
            .collect()
    }

    /// Tool schemas in Anthropic tool-use format.
    pub fn anthropic_tool_schemas() -> Vec<Value> {
        tool_specs()
            .into_iter()
            .map(|spec| {
                json!({
                    "name": spec.name,
                    "description": spec.description,
                    "input_schema": spec.parameters,
                })
            })
            .collect()
    }
}

fn required_str<'a>(arguments: &'a Value, field: &str) -> Result<&'a str> {
    arguments
        .get(field)
        .and_then(Value::as_str)
        .with_context(|| format!("missing required argument '{field}'"))
}

struct ToolSpec {
    name: &'static str,
    description: &'static str,
    parameters: Value,
}

fn tool_specs() -> Vec<ToolSpec> {
    vec![
        ToolSpec {
            name: "send_message",
            description: "Send a message to the room. Mentions must use exact participant names.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "content": {"type": "string", "description": "The message content to send"},
                    "mentions": {
                        "type": "array",
                        "items": {"type": "string"},
                        "description": "Participant names to @mention. At least one required."
                    }
                },
                "required": ["content", "mentions"]
            }),
        },
        ToolSpec {
            name: "send_event",
            description: "Post a non-text event such as a thought, so users can follow your reasoning.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "content": {"type": "string", "description": "Human-readable event content"},
                    "message_type": {
                        "type": "string",
                        "enum": ["thought", "task", "error"],
                        "description": "Type of event"
                    },
                    "metadata": {"type": "object", "description": "Optional structured data"}
                },
                "required": ["content", "message_type"]
            }),
        },
        ToolSpec {
            name: "add_participant",
            description: "Add a platform peer to this room by name. Use lookup_peers to discover names.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "name": {"type": "string", "description": "Name of the peer to add"},
                    "role": {
                        "type": "string",
                        "enum": ["member", "admin"],
                        "description": "Role for the participant in this room"
                    }
                },
                "required": ["name"]
            }),
        },
        ToolSpec {
            name: "remove_participant",
            description: "Remove a participant from this room by name.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "name": {"type": "string", "description": "Name of the participant to remove"}
                },
                "required": ["name"]
            }),
        },
        ToolSpec {
            name: "lookup_peers",
            description: "List platform peers not yet in this room, paginated.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "page": {"type": "integer", "description": "Page number, starting at 1"},
                    "page_size": {"type": "integer", "description": "Items per page (max 100)"}
                }
            }),
        },
        ToolSpec {
            name: "get_participants",
            description: "List the current participants of this room.",
            parameters: json!({"type": "object", "properties": {}}),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schemas_cover_every_tool_in_both_formats() {
        let openai = AgentTools::openai_tool_schemas();
        let anthropic = AgentTools::anthropic_tool_schemas();
        assert_eq!(openai.len(), 6);
        assert_eq!(anthropic.len(), 6);

        let names: Vec<&str> = anthropic
            .iter()
            .filter_map(|t| t["name"].as_str())
            .collect();
        assert!(names.contains(&"send_message"));
        assert!(names.contains(&"lookup_peers"));

        for tool in &openai {
            assert_eq!(tool["type"], "function");
            assert!(tool["function"]["parameters"]["type"] == "object");
        }
        for tool in &anthropic {
            assert!(tool["input_schema"]["type"] == "object");
        }
    }
}
