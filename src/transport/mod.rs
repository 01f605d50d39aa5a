//! Duplex transport to the remote conversational model
//!
//! This module owns the connection and the wire protocol:
//! - Opening the WebSocket with a single-use token
//! - Sending the setup message and the silent keepalive frame
//! - Encoding outbound audio/text, decoding inbound audio/text/interrupts
//! - Reporting everything that happens on the connection as [`TransportEvent`]s

pub mod codec;
pub mod messages;
mod websocket;

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::audio::{AudioFrame, CAPTURE_SAMPLE_RATE, PLAYBACK_SAMPLE_RATE};
use crate::credential::Token;
use crate::error::GuardianResult;
use crate::session::ConversationContext;

pub use messages::{ClientMessage, ServerMessage};
pub use websocket::{WebSocketTransport, WebSocketTransportFactory};

/// Everything the transport reports back to its owner
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Connection established and keepalive sent
    Opened,
    /// Text from the model (direct text parts or speech transcription)
    Text(String),
    /// Transcription of the user's own speech
    InputTranscript(String),
    /// One decoded inbound audio frame
    Audio(AudioFrame),
    /// The user barged in; drop any queued model audio
    Interrupted,
    /// The model finished its turn
    TurnComplete,
    /// The connection failed; no further events follow
    Error(String),
    /// The remote side closed the connection
    Closed,
}

/// Configuration for the transport
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// WebSocket endpoint; the token is appended as `access_token`
    pub endpoint: String,
    /// Model the session is pinned to
    pub model: String,
    /// Prebuilt voice name, if any
    pub voice: Option<String>,
    /// Handshake timeout
    pub connect_timeout: Duration,
    /// Send a silent frame after this long without outbound audio
    /// (None = only the one keepalive sent on open)
    pub keepalive_interval: Option<Duration>,
    /// Rate declared for outbound audio
    pub capture_sample_rate: u32,
    /// Rate assumed for inbound PCM without a rate parameter
    pub playback_sample_rate: u32,
    /// Samples in the silent keepalive frame
    pub keepalive_samples: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            endpoint: "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1alpha.GenerativeService.BidiGenerateContentConstrained".to_string(),
            model: "models/gemini-2.0-flash-live-001".to_string(),
            voice: Some("Puck".to_string()),
            connect_timeout: Duration::from_secs(10),
            keepalive_interval: None,
            capture_sample_rate: CAPTURE_SAMPLE_RATE,
            playback_sample_rate: PLAYBACK_SAMPLE_RATE,
            keepalive_samples: crate::audio::capture::default_frame_len(),
        }
    }
}

/// Duplex session with the remote model
///
/// Errors after `open` returns are never returned to callers; they arrive
/// as `TransportEvent::Error` / `TransportEvent::Closed`.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Connect, send setup derived from `context`, send one silent frame,
    /// then emit `Opened`. A no-op while already opening or open.
    async fn open(
        &self,
        token: &Token,
        context: &ConversationContext,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> GuardianResult<()>;

    /// Queue one outbound frame; silently dropped unless open
    fn send_audio_frame(&self, frame: AudioFrame);

    /// Queue a text turn
    fn send_text(&self, text: &str, turn_complete: bool) -> GuardianResult<()>;

    /// Close the connection; safe to call repeatedly
    async fn close(&self);

    fn is_open(&self) -> bool;
}

/// Creates one fresh transport per session
pub trait TransportFactory: Send + Sync {
    fn create(&self) -> Arc<dyn Transport>;
}
