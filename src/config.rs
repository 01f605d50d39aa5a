use anyhow::{Context, Result};
use serde::Deserialize;
use std::time::Duration;

use crate::audio::{CaptureConfig, CaptureConstraints, CAPTURE_SAMPLE_RATE, PLAYBACK_SAMPLE_RATE};
use crate::credential::MintingConfig;
use crate::session::SessionConfig;
use crate::transport::TransportConfig;

/// Environment overrides look like `GUARDIAN__MINTING__API_KEY`
pub const ENV_PREFIX: &str = "GUARDIAN";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub service: ServiceConfig,
    pub credential: CredentialConfig,
    pub minting: MintingSection,
    pub transport: TransportSection,
    pub audio: AudioConfig,
    pub session: SessionSection,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
    pub http: HttpConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "guardian-live".to_string(),
            http: HttpConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 8787,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct CredentialConfig {
    /// Where clients fetch session tokens
    pub endpoint: String,
}

impl Default for CredentialConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8787/api/live-token".to_string(),
        }
    }
}

#[derive(Deserialize)]
#[serde(default)]
pub struct MintingSection {
    pub upstream_url: String,
    /// Only ever supplied through the environment
    pub api_key: String,
    pub model: String,
    pub token_ttl_secs: u64,
    pub new_session_ttl_secs: u64,
}

impl std::fmt::Debug for MintingSection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MintingSection")
            .field("upstream_url", &self.upstream_url)
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .field("token_ttl_secs", &self.token_ttl_secs)
            .field("new_session_ttl_secs", &self.new_session_ttl_secs)
            .finish()
    }
}

impl Default for MintingSection {
    fn default() -> Self {
        let defaults = MintingConfig::default();
        Self {
            upstream_url: defaults.upstream_url,
            api_key: defaults.api_key,
            model: defaults.model,
            token_ttl_secs: defaults.token_ttl.as_secs(),
            new_session_ttl_secs: defaults.new_session_ttl.as_secs(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct TransportSection {
    pub endpoint: String,
    pub model: String,
    /// Empty for the provider's default voice
    pub voice: String,
    pub connect_timeout_secs: u64,
    /// 0 disables the periodic keepalive
    pub keepalive_interval_secs: u64,
}

impl Default for TransportSection {
    fn default() -> Self {
        let defaults = TransportConfig::default();
        Self {
            endpoint: defaults.endpoint,
            model: defaults.model,
            voice: defaults.voice.unwrap_or_default(),
            connect_timeout_secs: defaults.connect_timeout.as_secs(),
            keepalive_interval_secs: 0,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub capture_sample_rate: u32,
    pub playback_sample_rate: u32,
    pub frame_duration_ms: u32,
    /// Frames buffered between capture and transport before dropping
    pub uplink_capacity: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            capture_sample_rate: CAPTURE_SAMPLE_RATE,
            playback_sample_rate: PLAYBACK_SAMPLE_RATE,
            frame_duration_ms: 100,
            uplink_capacity: 32,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SessionSection {
    pub greeting: String,
    pub greeting_delay_ms: u64,
}

impl Default for SessionSection {
    fn default() -> Self {
        let defaults = SessionConfig::default();
        Self {
            greeting: defaults.greeting,
            greeting_delay_ms: defaults.greeting_delay.as_millis() as u64,
        }
    }
}

impl Config {
    /// Load from a TOML file (extension optional) plus `GUARDIAN__*` overrides
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()
            .with_context(|| format!("Failed to read configuration from {path}"))?;

        settings
            .try_deserialize()
            .context("Invalid configuration")
    }

    pub fn capture_config(&self) -> CaptureConfig {
        CaptureConfig {
            constraints: CaptureConstraints {
                sample_rate: self.audio.capture_sample_rate,
                ..CaptureConstraints::default()
            },
            frame_duration_ms: self.audio.frame_duration_ms,
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            greeting: self.session.greeting.clone(),
            greeting_delay: Duration::from_millis(self.session.greeting_delay_ms),
            playback_sample_rate: self.audio.playback_sample_rate,
            capture: self.capture_config(),
            uplink_capacity: self.audio.uplink_capacity.max(1),
        }
    }

    pub fn transport_config(&self) -> TransportConfig {
        let capture = self.capture_config();
        TransportConfig {
            endpoint: self.transport.endpoint.clone(),
            model: self.transport.model.clone(),
            voice: Some(self.transport.voice.clone()).filter(|v| !v.is_empty()),
            connect_timeout: Duration::from_secs(self.transport.connect_timeout_secs),
            keepalive_interval: Some(self.transport.keepalive_interval_secs)
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
            capture_sample_rate: self.audio.capture_sample_rate,
            playback_sample_rate: self.audio.playback_sample_rate,
            keepalive_samples: capture.samples_per_frame(),
        }
    }

    pub fn minting_config(&self) -> MintingConfig {
        MintingConfig {
            upstream_url: self.minting.upstream_url.clone(),
            api_key: self.minting.api_key.clone(),
            model: self.minting.model.clone(),
            token_ttl: Duration::from_secs(self.minting.token_ttl_secs),
            new_session_ttl: Duration::from_secs(self.minting.new_session_ttl_secs),
        }
    }
}
