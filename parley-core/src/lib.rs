// ABOUTME: Runtime layer for agents living in multi-party chat rooms
// ABOUTME: Events, per-room execution engines, and cross-room presence

pub mod context;
pub mod event;
pub mod execution;
pub mod formatters;
pub mod metrics;
pub mod participants;
pub mod presence;
pub mod retry;
pub mod testing;
pub mod traits;
pub mod types;

// Re-export the surface most users touch
pub use event::{
    EventKind, Mention, MessageCreatedPayload, MessageMetadata, ParticipantAddedPayload,
    ParticipantRemovedPayload, PlatformEvent, RoomAddedPayload, RoomOwner, RoomRemovedPayload,
};
pub use execution::{RoomContext, RoomExecutionEngine};
pub use formatters::{LlmMessage, LlmRole};
pub use participants::ParticipantSet;
pub use presence::RoomPresence;
pub use retry::RetryTracker;
pub use traits::{EventHandler, EventStream, NoHooks, PlatformLink, RoomFilter, RoomHooks};
pub use types::{
    ContextMessage, ConversationContext, EngineConfig, EnginePhase, InboundMessage, MessageKind,
    Participant, ParticipantRole, Peer, PeerPage, RoomSummary, SenderKind,
};
