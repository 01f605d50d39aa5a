//! Wire encoding for the duplex session.
//!
//! This is the only place raw PCM bytes and base64 strings exist; everything
//! above the transport sees typed [`AudioFrame`]s.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use tracing::{debug, warn};

use super::messages::{
    Blob, ClientContent, ClientMessage, Content, GenerationConfig, Part, PrebuiltVoiceConfig,
    RealtimeInput, ServerMessage, Setup, SpeechConfig, TranscriptionConfig, VoiceConfig,
};
use super::{TransportConfig, TransportEvent};
use crate::audio::{AudioFrame, Direction};
use crate::error::{GuardianError, GuardianResult};
use crate::session::ConversationContext;

const PCM_MIME: &str = "audio/pcm";

/// Mimetype declared for PCM at `rate`, e.g. `audio/pcm;rate=16000`
pub fn pcm_mime_type(rate: u32) -> String {
    format!("{PCM_MIME};rate={rate}")
}

/// Parse the sample rate out of a PCM mimetype
///
/// Returns `None` for non-PCM types, `Some(default_rate)` when PCM carries no
/// rate parameter.
pub fn parse_pcm_rate(mime_type: &str, default_rate: u32) -> Option<u32> {
    let mut parts = mime_type.split(';').map(str::trim);
    let essence = parts.next()?;
    if !essence.eq_ignore_ascii_case(PCM_MIME) {
        return None;
    }

    for param in parts {
        if let Some((key, value)) = param.split_once('=') {
            if key.trim().eq_ignore_ascii_case("rate") {
                return value.trim().parse().ok();
            }
        }
    }
    Some(default_rate)
}

/// Setup message opening a session, carrying the system directive
pub fn encode_setup(config: &TransportConfig, context: &ConversationContext) -> ClientMessage {
    let speech_config = config.voice.as_ref().map(|voice| SpeechConfig {
        voice_config: VoiceConfig {
            prebuilt_voice_config: PrebuiltVoiceConfig {
                voice_name: voice.clone(),
            },
        },
    });

    ClientMessage::Setup(Setup {
        model: config.model.clone(),
        generation_config: GenerationConfig {
            response_modalities: vec!["AUDIO".to_string()],
            speech_config,
        },
        system_instruction: Content {
            role: None,
            parts: vec![Part {
                text: Some(context.system_directive()),
                inline_data: None,
            }],
        },
        output_audio_transcription: Some(TranscriptionConfig::default()),
        input_audio_transcription: Some(TranscriptionConfig::default()),
    })
}

/// Encode one outbound frame; the frame must already be at the wire rate
pub fn encode_audio(frame: &AudioFrame, wire_rate: u32) -> GuardianResult<ClientMessage> {
    frame.validate(wire_rate)?;

    Ok(ClientMessage::RealtimeInput(RealtimeInput {
        media_chunks: vec![Blob {
            mime_type: pcm_mime_type(wire_rate),
            data: BASE64.encode(frame.to_le_bytes()),
        }],
    }))
}

pub fn encode_text(text: &str, turn_complete: bool) -> ClientMessage {
    ClientMessage::ClientContent(ClientContent {
        turns: vec![Content {
            role: Some("user".to_string()),
            parts: vec![Part {
                text: Some(text.to_string()),
                inline_data: None,
            }],
        }],
        turn_complete,
    })
}

/// Decode an inline audio part into an inbound frame
pub fn decode_audio(blob: &Blob, default_rate: u32) -> GuardianResult<AudioFrame> {
    let rate = parse_pcm_rate(&blob.mime_type, default_rate).ok_or_else(|| {
        GuardianError::Decode(format!("unsupported audio mimetype {}", blob.mime_type))
    })?;

    let bytes = BASE64
        .decode(blob.data.as_bytes())
        .map_err(|e| GuardianError::Decode(format!("invalid base64 audio: {e}")))?;

    AudioFrame::from_le_bytes(&bytes, rate, Direction::Inbound)
}

/// Translate one server message into transport events
///
/// A message that is not valid JSON is a transport error. A single audio part
/// that fails to decode is dropped with a warning; the rest of the message
/// still goes through.
pub fn decode_server_message(
    raw: &str,
    default_rate: u32,
) -> GuardianResult<Vec<TransportEvent>> {
    let message: ServerMessage = serde_json::from_str(raw)
        .map_err(|e| GuardianError::Connection(format!("malformed server message: {e}")))?;

    let mut events = Vec::new();

    if message.setup_complete.is_some() {
        debug!("Server acknowledged setup");
    }
    if let Some(go_away) = &message.go_away {
        warn!("Server announced disconnect: {}", go_away);
    }

    let Some(content) = message.server_content else {
        return Ok(events);
    };

    if content.interrupted {
        events.push(TransportEvent::Interrupted);
    }

    if let Some(turn) = content.model_turn {
        for part in turn.parts {
            if let Some(text) = part.text {
                if !text.is_empty() {
                    events.push(TransportEvent::Text(text));
                }
            }
            if let Some(blob) = part.inline_data {
                match decode_audio(&blob, default_rate) {
                    Ok(frame) => events.push(TransportEvent::Audio(frame)),
                    Err(e) => warn!("Dropping inbound audio part: {}", e),
                }
            }
        }
    }

    if let Some(transcription) = content.output_transcription {
        if !transcription.text.is_empty() {
            events.push(TransportEvent::Text(transcription.text));
        }
    }
    if let Some(transcription) = content.input_transcription {
        if !transcription.text.is_empty() {
            events.push(TransportEvent::InputTranscript(transcription.text));
        }
    }

    if content.turn_complete {
        events.push(TransportEvent::TurnComplete);
    }

    Ok(events)
}
