use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

use super::state::SessionState;

/// Statistics about a voice session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStats {
    /// Current session, if any
    pub session_id: Option<String>,

    /// Orchestrator state
    pub state: SessionState,

    /// When the session was created
    pub started_at: Option<DateTime<Utc>>,

    /// Session age in seconds
    pub duration_secs: f64,

    /// Microphone frames handed to the transport
    pub frames_sent: u64,

    /// Audio frames received from the model
    pub frames_received: u64,

    /// Microphone frames lost because the uplink was full
    pub frames_dropped: u64,

    /// Barge-in interruptions
    pub interruptions: u64,

    /// Number of transcript entries
    pub transcript_entries_count: usize,
}

/// Who produced a transcript entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    User,
    Assistant,
}

/// One exchange unit surfaced to the UI
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub speaker: Speaker,

    /// Text of the entry (streamed chunks of one turn are merged)
    pub text: String,

    /// When the entry was started
    pub timestamp: DateTime<Utc>,
}

/// Append-only transcript with per-speaker turn merging
#[derive(Debug, Default)]
pub(crate) struct Transcript {
    entries: Vec<TranscriptEntry>,
    /// Speaker whose turn is still receiving chunks
    open_turn: Option<Speaker>,
}

impl Transcript {
    /// Append streamed text, extending the open turn of the same speaker
    pub fn append(&mut self, speaker: Speaker, text: &str) {
        if self.open_turn == Some(speaker) {
            if let Some(last) = self.entries.last_mut() {
                last.text.push_str(text);
                return;
            }
        }

        self.entries.push(TranscriptEntry {
            speaker,
            text: text.to_string(),
            timestamp: Utc::now(),
        });
        self.open_turn = Some(speaker);
    }

    /// Append a complete turn that is never merged with later chunks
    pub fn push_turn(&mut self, speaker: Speaker, text: &str) {
        self.entries.push(TranscriptEntry {
            speaker,
            text: text.to_string(),
            timestamp: Utc::now(),
        });
        self.open_turn = None;
    }

    pub fn close_turn(&mut self) {
        self.open_turn = None;
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.open_turn = None;
    }

    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }
}

/// Counters shared with the session's background tasks
#[derive(Debug, Default)]
pub(crate) struct SessionCounters {
    pub frames_sent: AtomicU64,
    pub frames_received: AtomicU64,
    pub interruptions: AtomicU64,
}

impl SessionCounters {
    pub fn reset(&self) {
        self.frames_sent.store(0, Ordering::SeqCst);
        self.frames_received.store(0, Ordering::SeqCst);
        self.interruptions.store(0, Ordering::SeqCst);
    }
}
