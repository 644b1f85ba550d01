// ABOUTME: REST client for the platform's agent API.
// ABOUTME: Backlog pulls, message lifecycle acks, history, and participant management.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};

use parley_core::event::{Mention, MessageMetadata};
use parley_core::types::{
    ContextMessage, InboundMessage, MessageKind, Participant, ParticipantRole, Peer, PeerPage,
    RoomSummary, SenderKind,
};

/// Standard response wrapper: the interesting part lives under `data`.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct PagedEnvelope<T> {
    data: Vec<T>,
    metadata: PageMetadata,
}

#[derive(Debug, Deserialize)]
struct PageMetadata {
    #[serde(default = "one")]
    page: u32,
    #[serde(default = "one")]
    page_size: u32,
    #[serde(default)]
    total_count: u64,
    #[serde(default = "one")]
    total_pages: u32,
}

fn one() -> u32 {
    1
}

/// Message as the REST API returns it. `chat_room_id` is sometimes elided
/// on room-scoped endpoints, so conversion takes a fallback room.
#[derive(Debug, Deserialize)]
struct WireMessage {
    id: String,
    #[serde(default)]
    content: String,
    #[serde(rename = "message_type", default)]
    kind: MessageKind,
    #[serde(default)]
    metadata: MessageMetadata,
    sender_id: String,
    #[serde(rename = "sender_type", default)]
    sender_kind: SenderKind,
    #[serde(default)]
    sender_name: Option<String>,
    #[serde(default)]
    chat_room_id: Option<String>,
    #[serde(default)]
    inserted_at: Option<DateTime<Utc>>,
}

impl WireMessage {
    fn into_message(self, fallback_room: &str) -> InboundMessage {
        InboundMessage {
            id: self.id,
            room_id: self
                .chat_room_id
                .unwrap_or_else(|| fallback_room.to_string()),
            content: self.content,
            sender_id: self.sender_id,
            sender_kind: self.sender_kind,
            sender_name: self.sender_name,
            kind: self.kind,
            metadata: self.metadata,
            created_at: self.inserted_at.unwrap_or_else(Utc::now),
        }
    }

    fn into_context_message(self) -> ContextMessage {
        ContextMessage {
            id: self.id,
            content: self.content,
            sender_id: self.sender_id,
            sender_kind: self.sender_kind,
            sender_name: self.sender_name,
            kind: self.kind,
            created_at: self.inserted_at,
        }
    }
}

/// Blocking-free HTTP client for the agent API, authenticated with a
/// bearer key.
#[derive(Clone)]
pub struct RestClient {
    base_url: String,
    client: reqwest::Client,
}

impl RestClient {
    pub fn new(base_url: &str, api_key: &str) -> Result<Self> {
        let mut headers = HeaderMap::new();
        let mut auth = HeaderValue::from_str(&format!("Bearer {api_key}"))
            .context("api key contains invalid header characters")?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .context("failed to build http client")?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1/agent{path}", self.base_url)
    }

    async fn check(response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        anyhow::bail!("request failed: {status} {body}")
    }

    pub async fn list_rooms(&self) -> Result<Vec<RoomSummary>> {
        let response = self.client.get(self.url("/chat_rooms")).send().await?;
        let envelope: Envelope<Vec<RoomSummary>> = Self::check(response).await?.json().await?;
        Ok(envelope.data)
    }

    /// Oldest unacknowledged message for the room; `None` on 204.
    pub async fn get_next_message(&self, room_id: &str) -> Result<Option<InboundMessage>> {
        let response = self
            .client
            .get(self.url(&format!("/chat_rooms/{room_id}/messages/next")))
            .send()
            .await?;
        if response.status() == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        let envelope: Envelope<Option<WireMessage>> = Self::check(response).await?.json().await?;
        Ok(envelope.data.map(|msg| msg.into_message(room_id)))
    }

    pub async fn mark_processing(&self, room_id: &str, message_id: &str) -> Result<()> {
        self.lifecycle(room_id, message_id, "mark_processing", None)
            .await
    }

    pub async fn mark_processed(&self, room_id: &str, message_id: &str) -> Result<()> {
        self.lifecycle(room_id, message_id, "mark_processed", None)
            .await
    }

    pub async fn mark_failed(&self, room_id: &str, message_id: &str, error: &str) -> Result<()> {
        self.lifecycle(
            room_id,
            message_id,
            "mark_failed",
            Some(json!({"error": error})),
        )
        .await
    }

    async fn lifecycle(
        &self,
        room_id: &str,
        message_id: &str,
        action: &str,
        body: Option<Value>,
    ) -> Result<()> {
        let url = self.url(&format!("/chat_rooms/{room_id}/messages/{message_id}/{action}"));
        let mut request = self.client.post(url);
        if let Some(body) = body {
            request = request.json(&body);
        }
        Self::check(request.send().await?).await?;
        Ok(())
    }

    pub async fn list_participants(&self, room_id: &str) -> Result<Vec<Participant>> {
        let response = self
            .client
            .get(self.url(&format!("/chat_rooms/{room_id}/participants")))
            .send()
            .await?;
        let envelope: Envelope<Vec<Participant>> = Self::check(response).await?.json().await?;
        Ok(envelope.data)
    }

    /// Full message history for a room, oldest first.
    pub async fn get_room_context(&self, room_id: &str) -> Result<Vec<ContextMessage>> {
        let response = self
            .client
            .get(self.url(&format!("/chat_rooms/{room_id}/messages")))
            .send()
            .await?;
        let envelope: Envelope<Vec<WireMessage>> = Self::check(response).await?.json().await?;
        Ok(envelope
            .data
            .into_iter()
            .map(WireMessage::into_context_message)
            .collect())
    }

    pub async fn send_message(
        &self,
        room_id: &str,
        content: &str,
        mentions: &[Mention],
    ) -> Result<InboundMessage> {
        let body = json!({
            "message": {
                "content": content,
                "message_type": "text",
                "metadata": {"mentions": mentions},
            }
        });
        let response = self
            .client
            .post(self.url(&format!("/chat_rooms/{room_id}/messages")))
            .json(&body)
            .send()
            .await?;
        let envelope: Envelope<WireMessage> = Self::check(response).await?.json().await?;
        Ok(envelope.data.into_message(room_id))
    }

    /// Post a non-text message (thought, task, tool traffic) with optional
    /// structured metadata.
    pub async fn send_event(
        &self,
        room_id: &str,
        content: &str,
        kind: MessageKind,
        metadata: Option<Value>,
    ) -> Result<()> {
        let body = json!({
            "message": {
                "content": content,
                "message_type": kind.as_str(),
                "metadata": metadata.unwrap_or_else(|| json!({})),
            }
        });
        let response = self
            .client
            .post(self.url(&format!("/chat_rooms/{room_id}/messages")))
            .json(&body)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    pub async fn list_peers(
        &self,
        page: u32,
        page_size: u32,
        not_in_room: Option<&str>,
    ) -> Result<PeerPage> {
        let mut request = self
            .client
            .get(self.url("/peers"))
            .query(&[("page", page), ("page_size", page_size)]);
        if let Some(room_id) = not_in_room {
            request = request.query(&[("not_in_chat_room_id", room_id)]);
        }
        let envelope: PagedEnvelope<Peer> = Self::check(request.send().await?).await?.json().await?;
        Ok(PeerPage {
            peers: envelope.data,
            page: envelope.metadata.page,
            page_size: envelope.metadata.page_size,
            total_count: envelope.metadata.total_count,
            total_pages: envelope.metadata.total_pages,
        })
    }

    pub async fn add_participant(
        &self,
        room_id: &str,
        participant_id: &str,
        role: ParticipantRole,
    ) -> Result<()> {
        let body = json!({
            "participant": {"id": participant_id, "role": role.as_str()}
        });
        let response = self
            .client
            .post(self.url(&format!("/chat_rooms/{room_id}/participants")))
            .json(&body)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    pub async fn remove_participant(&self, room_id: &str, participant_id: &str) -> Result<()> {
        let response = self
            .client
            .delete(self.url(&format!("/chat_rooms/{room_id}/participants/{participant_id}")))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_building_strips_trailing_slash() {
        let client = RestClient::new("https://api.example.com/", "key").unwrap();
        assert_eq!(
            client.url("/chat_rooms/r1/messages/next"),
            "https://api.example.com/api/v1/agent/chat_rooms/r1/messages/next"
        );
    }

    #[test]
    fn envelope_unwraps_data() {
        let json = r#"{"data": [{"id": "r1", "title": "Planning"}]}"#;
        let envelope: Envelope<Vec<RoomSummary>> = serde_json::from_str(json).unwrap();
        assert_eq!(envelope.data.len(), 1);
        assert_eq!(envelope.data[0].id, "r1");
    }

    #[test]
    fn wire_message_falls_back_to_room_and_now() {
        let json = r#"{"id": "m1", "content": "hi", "sender_id": "u1", "sender_type": "User"}"#;
        let wire: WireMessage = serde_json::from_str(json).unwrap();
        let msg = wire.into_message("r9");
        assert_eq!(msg.room_id, "r9");
        assert_eq!(msg.kind, MessageKind::Text);
    }

    #[test]
    fn wire_message_prefers_its_own_room_id() {
        let json = r#"{
            "id": "m1",
            "content": "hi",
            "sender_id": "u1",
            "sender_type": "Agent",
            "chat_room_id": "r1",
            "message_type": "thought",
            "inserted_at": "2024-05-01T12:00:00Z"
        }"#;
        let wire: WireMessage = serde_json::from_str(json).unwrap();
        let msg = wire.into_message("other");
        assert_eq!(msg.room_id, "r1");
        assert_eq!(msg.kind, MessageKind::Thought);
        assert_eq!(msg.sender_kind, SenderKind::Agent);
    }

    #[test]
    fn paged_envelope_reads_pagination_metadata() {
        let json = r#"{
            "data": [{"id": "p1", "name": "Weather Agent", "type": "Agent"}],
            "metadata": {"page": 2, "page_size": 10, "total_count": 13, "total_pages": 2}
        }"#;
        let envelope: PagedEnvelope<Peer> = serde_json::from_str(json).unwrap();
        assert_eq!(envelope.data.len(), 1);
        assert_eq!(envelope.metadata.page, 2);
        assert_eq!(envelope.metadata.total_count, 13);
    }

    #[test]
    fn rejects_api_keys_with_control_characters() {
        assert!(RestClient::new("https://api.example.com", "bad\nkey").is_err());
    }
}
