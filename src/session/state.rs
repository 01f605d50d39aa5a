use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::context::ConversationContext;

/// Lifecycle of the orchestrator's single session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Connecting,
    Connected,
    Error,
    Disconnected,
}

impl SessionState {
    /// A session is being set up or is live
    pub fn is_active(self) -> bool {
        matches!(self, SessionState::Connecting | SessionState::Connected)
    }

    /// `connect()` is accepted from this state
    pub fn can_connect(self) -> bool {
        !self.is_active()
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
            SessionState::Error => "error",
            SessionState::Disconnected => "disconnected",
        };
        f.write_str(name)
    }
}

/// The single live connection owned by the orchestrator
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub id: Uuid,
    pub state: SessionState,
    pub context: ConversationContext,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub(crate) fn new(context: ConversationContext) -> Self {
        Self {
            id: Uuid::new_v4(),
            state: SessionState::Connecting,
            context,
            created_at: Utc::now(),
        }
    }
}
