use std::time::Duration;

use crate::audio::{CaptureConfig, PLAYBACK_SAMPLE_RATE};

/// Configuration for a voice session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Text turn sent automatically after connecting so the model speaks first
    pub greeting: String,

    /// Delay before the greeting, letting the remote turn-taking settle
    /// Default: 500ms
    pub greeting_delay: Duration,

    /// Rate inbound audio is played at
    pub playback_sample_rate: u32,

    /// Microphone capture settings
    pub capture: CaptureConfig,

    /// Capacity of the channel between capture and transport
    /// Frames beyond this are dropped
    pub uplink_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            greeting: "Hello Guardian, I need your help.".to_string(),
            greeting_delay: Duration::from_millis(500),
            playback_sample_rate: PLAYBACK_SAMPLE_RATE, // Model speaks at 24kHz
            capture: CaptureConfig::default(),          // 16kHz mono, 100ms frames
            uplink_capacity: 32,
        }
    }
}
