//! Voice session management
//!
//! This module provides the `SessionOrchestrator`, which owns:
//! - The connection lifecycle (token, transport, state machine)
//! - Microphone capture wired to the transport
//! - Playback of model audio, including barge-in interruption
//! - Transcript collection and session statistics

mod config;
mod context;
mod events;
mod orchestrator;
mod state;
mod stats;

pub use config::SessionConfig;
pub use context::ConversationContext;
pub use events::SessionEvent;
pub use orchestrator::SessionOrchestrator;
pub use state::{Session, SessionState};
pub use stats::{SessionStats, Speaker, TranscriptEntry};
