// ABOUTME: SDK facade for agents living in multi-party chat rooms
// ABOUTME: Re-exports the runtime and transport plus config, tools, and prompts

pub mod agent;
pub mod config;
pub mod prompts;
pub mod tools;

pub use agent::Agent;
pub use config::AgentCredentials;
pub use prompts::{render_system_prompt, BASE_INSTRUCTIONS};
pub use tools::AgentTools;

// Runtime layer
pub use parley_core::{
    ContextMessage, ConversationContext, EngineConfig, EnginePhase, EventHandler, EventKind,
    EventStream, InboundMessage, LlmMessage, LlmRole, Mention, MessageKind, NoHooks, Participant,
    ParticipantRole, Peer, PeerPage, PlatformEvent, PlatformLink, RoomContext,
    RoomExecutionEngine, RoomFilter, RoomHooks, RoomPresence, RoomSummary, SenderKind,
};

// Transport layer
pub use parley_link::{LinkConfig, PlatformClient};

/// Initialize tracing from `RUST_LOG`, defaulting to `info`. Safe to call
/// more than once; later calls are no-ops.
pub fn init_logging() {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
