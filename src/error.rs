//! Error taxonomy for Guardian Live sessions.

use thiserror::Error;

/// Result type alias for session operations
pub type GuardianResult<T> = Result<T, GuardianError>;

/// Errors surfaced by the voice-session layer
///
/// `Decode` never reaches the UI: it is logged and the offending frame skipped.
/// Every other kind except `NotConnected` is a terminal notification for the
/// session it occurred in.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GuardianError {
    #[error("Credential error: {0}")]
    Credential(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Microphone permission denied: {0}")]
    PermissionDenied(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Not connected")]
    NotConnected,

    #[error("Audio device error: {0}")]
    Device(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl GuardianError {
    /// Whether a fresh `connect()` may succeed without user intervention
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GuardianError::Credential(_) | GuardianError::Connection(_)
        )
    }

    /// Get a user-facing description
    pub fn user_message(&self) -> String {
        match self {
            GuardianError::Credential(_) => {
                "Could not start a secure session. Tap to try again.".to_string()
            }
            GuardianError::Connection(_) => {
                "Connection to Guardian was lost. Tap to reconnect.".to_string()
            }
            GuardianError::PermissionDenied(_) => {
                "Microphone access is blocked. Enable it in your device settings.".to_string()
            }
            GuardianError::Decode(_) => "Some audio could not be played.".to_string(),
            GuardianError::NotConnected => "Guardian is not connected yet.".to_string(),
            GuardianError::Device(_) => {
                "Audio device error. Please check your microphone/speakers.".to_string()
            }
            GuardianError::Config(_) => "Guardian is misconfigured.".to_string(),
        }
    }
}

impl From<reqwest::Error> for GuardianError {
    fn from(err: reqwest::Error) -> Self {
        GuardianError::Credential(err.to_string())
    }
}

impl From<hound::Error> for GuardianError {
    fn from(err: hound::Error) -> Self {
        GuardianError::Device(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_kinds() {
        assert!(GuardianError::Credential("503".into()).is_retryable());
        assert!(GuardianError::Connection("reset".into()).is_retryable());
        assert!(!GuardianError::PermissionDenied("denied".into()).is_retryable());
        assert!(!GuardianError::NotConnected.is_retryable());
    }

    #[test]
    fn test_permission_message_points_to_settings() {
        let msg = GuardianError::PermissionDenied("denied".into()).user_message();
        assert!(msg.contains("settings"));
    }
}
