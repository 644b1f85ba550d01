// ABOUTME: PlatformLink implementation combining the REST client and the
// ABOUTME: channel socket into one transport.

use std::sync::{Mutex, MutexGuard};

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use parley_core::event::{Mention, PlatformEvent};
use parley_core::traits::{EventStream, PlatformLink};
use parley_core::types::{
    ContextMessage, InboundMessage, MessageKind, Participant, ParticipantRole, PeerPage,
    RoomSummary,
};

use crate::rest::RestClient;
use crate::socket::{
    self, agent_rooms_topic, chat_room_topic, room_participants_topic, SocketHandle,
};

pub const DEFAULT_REST_URL: &str = "https://api.parley.chat";
pub const DEFAULT_WS_URL: &str = "wss://api.parley.chat/ws";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Connection settings for one agent.
#[derive(Clone)]
pub struct LinkConfig {
    pub agent_id: String,
    pub api_key: String,
    pub rest_url: String,
    pub ws_url: String,
}

impl LinkConfig {
    pub fn new(agent_id: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            api_key: api_key.into(),
            rest_url: DEFAULT_REST_URL.to_string(),
            ws_url: DEFAULT_WS_URL.to_string(),
        }
    }

    pub fn with_rest_url(mut self, url: impl Into<String>) -> Self {
        self.rest_url = url.into();
        self
    }

    pub fn with_ws_url(mut self, url: impl Into<String>) -> Self {
        self.ws_url = url.into();
        self
    }
}

impl std::fmt::Debug for LinkConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkConfig")
            .field("agent_id", &self.agent_id)
            .field("api_key", &"<redacted>")
            .field("rest_url", &self.rest_url)
            .field("ws_url", &self.ws_url)
            .finish()
    }
}

/// The production [`PlatformLink`]: REST for pulls and commands, the
/// channel socket for live pushes.
pub struct PlatformClient {
    config: LinkConfig,
    rest: RestClient,
    socket: Mutex<Option<SocketHandle>>,
    event_rx: Mutex<Option<mpsc::UnboundedReceiver<PlatformEvent>>>,
}

impl PlatformClient {
    pub fn new(config: LinkConfig) -> Result<Self> {
        let rest = RestClient::new(&config.rest_url, &config.api_key)?;
        Ok(Self {
            config,
            rest,
            socket: Mutex::new(None),
            event_rx: Mutex::new(None),
        })
    }

    fn with_socket<R>(&self, apply: impl FnOnce(&SocketHandle) -> Result<R>) -> Result<R> {
        match lock(&self.socket).as_ref() {
            Some(handle) => apply(handle),
            None => anyhow::bail!("not connected"),
        }
    }
}

#[async_trait]
impl PlatformLink for PlatformClient {
    fn agent_id(&self) -> &str {
        &self.config.agent_id
    }

    async fn connect(&self) -> Result<()> {
        if self.is_connected() {
            tracing::debug!("Already connected");
            return Ok(());
        }
        let (handle, event_rx) = socket::connect(
            &self.config.ws_url,
            &self.config.api_key,
            &self.config.agent_id,
        )
        .await?;
        *lock(&self.socket) = Some(handle);
        *lock(&self.event_rx) = Some(event_rx);
        tracing::info!(agent_id = %self.config.agent_id, "Platform link connected");
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        if let Some(handle) = lock(&self.socket).take() {
            handle.close();
        }
        lock(&self.event_rx).take();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        lock(&self.socket)
            .as_ref()
            .map(|handle| handle.is_alive())
            .unwrap_or(false)
    }

    async fn event_stream(&self) -> Result<EventStream> {
        let rx = lock(&self.event_rx)
            .take()
            .ok_or_else(|| anyhow::anyhow!("event stream unavailable; connect first"))?;
        Ok(Box::pin(UnboundedReceiverStream::new(rx)))
    }

    async fn subscribe_agent_rooms(&self) -> Result<()> {
        self.with_socket(|socket| socket.join(&agent_rooms_topic(&self.config.agent_id)))
    }

    async fn subscribe_room(&self, room_id: &str) -> Result<()> {
        self.with_socket(|socket| {
            socket.join(&chat_room_topic(room_id))?;
            socket.join(&room_participants_topic(room_id))
        })
    }

    async fn unsubscribe_room(&self, room_id: &str) -> Result<()> {
        self.with_socket(|socket| {
            socket.leave(&chat_room_topic(room_id))?;
            socket.leave(&room_participants_topic(room_id))
        })
    }

    async fn list_rooms(&self) -> Result<Vec<RoomSummary>> {
        self.rest.list_rooms().await
    }

    async fn get_next_message(&self, room_id: &str) -> Result<Option<InboundMessage>> {
        self.rest.get_next_message(room_id).await
    }

    async fn mark_processing(&self, room_id: &str, message_id: &str) -> Result<()> {
        self.rest.mark_processing(room_id, message_id).await
    }

    async fn mark_processed(&self, room_id: &str, message_id: &str) -> Result<()> {
        self.rest.mark_processed(room_id, message_id).await
    }

    async fn mark_failed(&self, room_id: &str, message_id: &str, error: &str) -> Result<()> {
        self.rest.mark_failed(room_id, message_id, error).await
    }

    async fn list_participants(&self, room_id: &str) -> Result<Vec<Participant>> {
        self.rest.list_participants(room_id).await
    }

    async fn get_room_context(&self, room_id: &str) -> Result<Vec<ContextMessage>> {
        self.rest.get_room_context(room_id).await
    }

    async fn send_message(
        &self,
        room_id: &str,
        content: &str,
        mentions: &[Mention],
    ) -> Result<InboundMessage> {
        self.rest.send_message(room_id, content, mentions).await
    }

    async fn send_event(
        &self,
        room_id: &str,
        content: &str,
        kind: MessageKind,
        metadata: Option<Value>,
    ) -> Result<()> {
        self.rest.send_event(room_id, content, kind, metadata).await
    }

    async fn list_peers(
        &self,
        page: u32,
        page_size: u32,
        not_in_room: Option<&str>,
    ) -> Result<PeerPage> {
        self.rest.list_peers(page, page_size, not_in_room).await
    }

    async fn add_participant(
        &self,
        room_id: &str,
        participant_id: &str,
        role: ParticipantRole,
    ) -> Result<()> {
        self.rest.add_participant(room_id, participant_id, role).await
    }

    async fn remove_participant(&self, room_id: &str, participant_id: &str) -> Result<()> {
        self.rest.remove_participant(room_id, participant_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_output_redacts_the_api_key() {
        let config = LinkConfig::new("agent-1", "super-secret");
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn config_defaults_point_at_production() {
        let config = LinkConfig::new("agent-1", "key");
        assert_eq!(config.rest_url, DEFAULT_REST_URL);
        assert_eq!(config.ws_url, DEFAULT_WS_URL);
    }

    #[tokio::test]
    async fn operations_before_connect_fail_cleanly() {
        let client = PlatformClient::new(LinkConfig::new("agent-1", "key")).unwrap();
        assert!(!client.is_connected());
        assert!(client.subscribe_room("r1").await.is_err());
        assert!(client.event_stream().await.is_err());
    }
}
