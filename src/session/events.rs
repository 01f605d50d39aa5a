use crate::audio::AudioFrame;
use crate::error::GuardianError;

/// Notifications delivered to the UI for the lifetime of a session
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Connected,
    Disconnected,
    /// Model audio, also queued for playback
    AudioReceived(AudioFrame),
    /// Model text (direct or transcribed speech)
    TextReceived(String),
    TurnComplete,
    /// The user barged in and queued model audio was discarded
    Interrupted,
    /// Terminal failure; resources are already released
    Error(GuardianError),
}
