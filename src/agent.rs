// ABOUTME: Top-level agent wiring: credentials -> transport -> presence.
// ABOUTME: The five-line entry point for most SDK users.

use std::sync::Arc;

use anyhow::Result;

use parley_core::traits::{EventHandler, PlatformLink, RoomFilter, RoomHooks};
use parley_core::types::EngineConfig;
use parley_core::RoomPresence;
use parley_link::PlatformClient;

use crate::config::AgentCredentials;

/// A connected agent: owns the platform client and the room presence
/// tracker built around the caller's handler.
///
/// ```no_run
/// # use std::sync::Arc;
/// # async fn example(handler: Arc<dyn parley::EventHandler>) -> anyhow::Result<()> {
/// let credentials = parley::AgentCredentials::load()?;
/// let agent = parley::Agent::new(&credentials, handler)?;
/// agent.start().await?;
/// # Ok(())
/// # }
/// ```
pub struct Agent {
    link: Arc<PlatformClient>,
    presence: RoomPresence,
}

impl Agent {
    pub fn new(credentials: &AgentCredentials, handler: Arc<dyn EventHandler>) -> Result<Self> {
        let link = Arc::new(PlatformClient::new(credentials.link_config())?);
        let presence = RoomPresence::new(link.clone(), handler);
        Ok(Self { link, presence })
    }

    pub fn with_engine_config(mut self, config: EngineConfig) -> Self {
        self.presence = self.presence.with_config(config);
        self
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn RoomHooks>) -> Self {
        self.presence = self.presence.with_hooks(hooks);
        self
    }

    pub fn with_room_filter(mut self, filter: RoomFilter) -> Self {
        self.presence = self.presence.with_filter(filter);
        self
    }

    /// Connect and begin processing rooms. Returns once the live pump is
    /// running; processing continues in background tasks.
    pub async fn start(&self) -> Result<()> {
        self.presence.start().await
    }

    /// Stop all room engines, then disconnect the transport this agent
    /// owns.
    pub async fn shutdown(&self) {
        self.presence.stop().await;
        if let Err(e) = self.link.disconnect().await {
            tracing::warn!(error = %e, "Disconnect failed");
        }
    }

    pub fn presence(&self) -> &RoomPresence {
        &self.presence
    }

    pub fn link(&self) -> Arc<PlatformClient> {
        self.link.clone()
    }
}
