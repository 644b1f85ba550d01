// ABOUTME: Lazily-hydrated, TTL-bounded snapshot of room history and participants.
// ABOUTME: Degrades to an empty context on fetch errors; availability over completeness.

use chrono::Utc;
use std::time::Duration;

use crate::participants::ParticipantSet;
use crate::traits::PlatformLink;
use crate::types::ConversationContext;

/// Cache of one room's [`ConversationContext`].
///
/// Hydration loads participants (if not already loaded) and the room's
/// message history; any fetch error caches an empty context instead of
/// failing the caller. When hydration is disabled for the session, no
/// network call is ever made.
#[derive(Debug)]
pub struct ContextCache {
    room_id: String,
    enabled: bool,
    ttl: Duration,
    max_messages: usize,
    snapshot: Option<ConversationContext>,
}

impl ContextCache {
    pub fn new(room_id: impl Into<String>, enabled: bool, ttl: Duration, max_messages: usize) -> Self {
        Self {
            room_id: room_id.into(),
            enabled,
            ttl,
            max_messages,
            snapshot: None,
        }
    }

    pub fn is_hydrated(&self) -> bool {
        self.snapshot.is_some()
    }

    fn is_stale(&self) -> bool {
        match &self.snapshot {
            None => true,
            Some(ctx) => {
                let age = Utc::now().signed_duration_since(ctx.hydrated_at);
                age.to_std().map(|age| age > self.ttl).unwrap_or(false)
            }
        }
    }

    /// Load participants and history from the platform and rebuild the
    /// snapshot wholesale.
    pub async fn hydrate(&mut self, link: &dyn PlatformLink, participants: &mut ParticipantSet) {
        if !self.enabled {
            tracing::debug!(room_id = %self.room_id, "Context hydration disabled");
            self.snapshot = Some(ConversationContext::empty(
                &self.room_id,
                participants.participants(),
            ));
            return;
        }

        tracing::debug!(room_id = %self.room_id, "Hydrating context");

        if !participants.is_loaded() {
            match link.list_participants(&self.room_id).await {
                Ok(loaded) => participants.set_loaded(loaded),
                Err(e) => {
                    tracing::warn!(room_id = %self.room_id, error = %e, "Failed to load participants");
                    participants.mark_loaded();
                }
            }
        }

        match link.get_room_context(&self.room_id).await {
            Ok(mut messages) => {
                if messages.len() > self.max_messages {
                    let drop = messages.len() - self.max_messages;
                    messages.drain(..drop);
                }
                tracing::debug!(
                    room_id = %self.room_id,
                    messages = messages.len(),
                    participants = participants.len(),
                    "Context hydrated"
                );
                self.snapshot = Some(ConversationContext {
                    room_id: self.room_id.clone(),
                    messages,
                    participants: participants.participants(),
                    hydrated_at: Utc::now(),
                });
            }
            Err(e) => {
                tracing::warn!(room_id = %self.room_id, error = %e, "Context hydration failed");
                self.snapshot = Some(ConversationContext::empty(
                    &self.room_id,
                    participants.participants(),
                ));
            }
        }
    }

    /// Cached context, re-hydrating first when absent, forced, or older
    /// than the TTL.
    pub async fn get(
        &mut self,
        link: &dyn PlatformLink,
        participants: &mut ParticipantSet,
        force_refresh: bool,
    ) -> ConversationContext {
        if self.enabled && (force_refresh || self.is_stale()) {
            self.hydrate(link, participants).await;
        }
        self.current(participants)
    }

    /// Cached snapshot without any network activity; empty if never hydrated.
    pub fn current(&self, participants: &ParticipantSet) -> ConversationContext {
        match &self.snapshot {
            Some(ctx) => ctx.clone(),
            None => ConversationContext::empty(&self.room_id, participants.participants()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{context_message, MockLink};
    use crate::types::{Participant, SenderKind};
    use std::sync::Arc;

    fn participants_fixture() -> Vec<Participant> {
        vec![Participant::new("u1", "Alice", SenderKind::User)]
    }

    #[tokio::test]
    async fn hydrate_loads_history_and_participants() {
        let link = Arc::new(
            MockLink::builder("agent-1")
                .participants("r1", participants_fixture())
                .context_message("r1", context_message("m1", "hello"))
                .build(),
        );
        let mut set = ParticipantSet::new();
        let mut cache = ContextCache::new("r1", true, Duration::from_secs(300), 100);

        cache.hydrate(link.as_ref(), &mut set).await;
        let ctx = cache.current(&set);
        assert_eq!(ctx.messages.len(), 1);
        assert_eq!(ctx.participants.len(), 1);
        assert!(set.is_loaded());
    }

    #[tokio::test]
    async fn fetch_error_degrades_to_empty_context() {
        let link = Arc::new(MockLink::builder("agent-1").fail_context_fetch().build());
        let mut set = ParticipantSet::new();
        let mut cache = ContextCache::new("r1", true, Duration::from_secs(300), 100);

        cache.hydrate(link.as_ref(), &mut set).await;
        assert!(cache.is_hydrated());
        let ctx = cache.current(&set);
        assert!(ctx.messages.is_empty());
    }

    #[tokio::test]
    async fn disabled_hydration_makes_no_network_calls() {
        let link = Arc::new(
            MockLink::builder("agent-1")
                .context_message("r1", context_message("m1", "hello"))
                .build(),
        );
        let mut set = ParticipantSet::new();
        let mut cache = ContextCache::new("r1", false, Duration::from_secs(300), 100);

        let ctx = cache.get(link.as_ref(), &mut set, true).await;
        assert!(ctx.messages.is_empty());
        assert_eq!(link.context_fetch_count(), 0);
    }

    #[tokio::test]
    async fn get_uses_cache_until_forced() {
        let link = Arc::new(
            MockLink::builder("agent-1")
                .context_message("r1", context_message("m1", "hello"))
                .build(),
        );
        let mut set = ParticipantSet::new();
        let mut cache = ContextCache::new("r1", true, Duration::from_secs(300), 100);

        cache.get(link.as_ref(), &mut set, false).await;
        cache.get(link.as_ref(), &mut set, false).await;
        assert_eq!(link.context_fetch_count(), 1);

        cache.get(link.as_ref(), &mut set, true).await;
        assert_eq!(link.context_fetch_count(), 2);
    }

    #[tokio::test]
    async fn history_is_truncated_to_the_newest_entries() {
        let mut builder = MockLink::builder("agent-1");
        for i in 0..6 {
            builder = builder.context_message("r1", context_message(&format!("m{i}"), "x"));
        }
        let link = Arc::new(builder.build());
        let mut set = ParticipantSet::new();
        let mut cache = ContextCache::new("r1", true, Duration::from_secs(300), 4);

        cache.hydrate(link.as_ref(), &mut set).await;
        let ctx = cache.current(&set);
        assert_eq!(ctx.messages.len(), 4);
        assert_eq!(ctx.messages.first().unwrap().id, "m2");
        assert_eq!(ctx.messages.last().unwrap().id, "m5");
    }
}
