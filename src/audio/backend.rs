use crate::error::{GuardianError, GuardianResult};
use std::time::Duration;
use tokio::sync::mpsc;

/// Capture-side wire rate (outbound microphone audio)
pub const CAPTURE_SAMPLE_RATE: u32 = 16000;

/// Playback-side wire rate (inbound synthesized audio)
pub const PLAYBACK_SAMPLE_RATE: u32 = 24000;

/// Which way a frame travels relative to this client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Microphone audio headed for the remote model
    Outbound,
    /// Synthesized audio received from the remote model
    Inbound,
}

/// Fixed-duration chunk of mono 16-bit PCM
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Mono i16 samples
    pub samples: Vec<i16>,
    /// Outbound (capture) or inbound (playback)
    pub direction: Direction,
}

impl AudioFrame {
    pub fn new(sample_rate: u32, samples: Vec<i16>, direction: Direction) -> Self {
        Self {
            sample_rate,
            samples,
            direction,
        }
    }

    /// All-zero frame, used as the transport keepalive
    pub fn silence(sample_rate: u32, sample_count: usize, direction: Direction) -> Self {
        Self::new(sample_rate, vec![0; sample_count], direction)
    }

    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / self.sample_rate as f64)
    }

    pub fn is_silent(&self) -> bool {
        self.samples.iter().all(|&s| s == 0)
    }

    /// Little-endian PCM bytes as sent on the wire
    pub fn to_le_bytes(&self) -> Vec<u8> {
        self.samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    /// Rebuild a frame from little-endian PCM bytes
    pub fn from_le_bytes(
        bytes: &[u8],
        sample_rate: u32,
        direction: Direction,
    ) -> GuardianResult<Self> {
        if bytes.is_empty() {
            return Err(GuardianError::Decode("empty PCM payload".to_string()));
        }
        if bytes.len() % 2 != 0 {
            return Err(GuardianError::Decode(format!(
                "PCM payload has odd length {}",
                bytes.len()
            )));
        }

        let samples = bytes
            .chunks_exact(2)
            .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]))
            .collect();

        Ok(Self::new(sample_rate, samples, direction))
    }

    /// Check the frame against the rate declared for its stream
    pub fn validate(&self, expected_rate: u32) -> GuardianResult<()> {
        if self.sample_rate != expected_rate {
            return Err(GuardianError::Decode(format!(
                "sample rate mismatch: expected {}Hz, got {}Hz",
                expected_rate, self.sample_rate
            )));
        }
        if self.samples.is_empty() {
            return Err(GuardianError::Decode("frame has no samples".to_string()));
        }
        Ok(())
    }
}

/// Capture settings requested from a microphone
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureConstraints {
    pub sample_rate: u32,
    pub channels: u16,
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
}

impl Default for CaptureConstraints {
    fn default() -> Self {
        Self {
            sample_rate: CAPTURE_SAMPLE_RATE,
            channels: 1,
            echo_cancellation: true,
            noise_suppression: true,
        }
    }
}

/// Releases an acquired microphone when dropped
pub struct MicrophoneGuard {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl MicrophoneGuard {
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }

    /// Guard for sources with nothing to release
    pub fn noop() -> Self {
        Self { release: None }
    }
}

impl Drop for MicrophoneGuard {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

/// Live microphone stream handed out by [`Microphone::acquire`]
///
/// Buffers are interleaved f32 samples at the device's native format. The
/// device stays held until `guard` is dropped.
pub struct CaptureStream {
    pub sample_rate: u32,
    pub channels: u16,
    pub buffers: mpsc::Receiver<Vec<f32>>,
    pub guard: MicrophoneGuard,
}

/// Microphone access
///
/// Implementations:
/// - cpal: default input device (feature `audio-io`)
/// - WAV file: replays a recording in real time (headless runs and tests)
#[async_trait::async_trait]
pub trait Microphone: Send + Sync {
    /// Acquire exclusive access to the microphone
    ///
    /// Fails with `PermissionDenied` when the platform refuses access.
    async fn acquire(&self, constraints: &CaptureConstraints) -> GuardianResult<CaptureStream>;

    /// Get device name for logging
    fn name(&self) -> &str;
}

/// Audio output device
#[async_trait::async_trait]
pub trait AudioOutput: Send + Sync {
    /// Play one frame; resolves once the frame has finished playing
    async fn play(&self, frame: AudioFrame) -> GuardianResult<()>;

    /// Cut the currently playing frame immediately
    fn stop(&self);

    /// Get device name for logging
    fn name(&self) -> &str;
}

/// Output that discards audio, paced in real time
#[derive(Debug, Default)]
pub struct NullOutput;

#[async_trait::async_trait]
impl AudioOutput for NullOutput {
    async fn play(&self, frame: AudioFrame) -> GuardianResult<()> {
        tokio::time::sleep(frame.duration()).await;
        Ok(())
    }

    fn stop(&self) {}

    fn name(&self) -> &str {
        "null"
    }
}

/// Stand-in when no input device is configured; every acquire is refused
#[derive(Debug, Default)]
pub struct NoMicrophone;

#[async_trait::async_trait]
impl Microphone for NoMicrophone {
    async fn acquire(&self, _constraints: &CaptureConstraints) -> GuardianResult<CaptureStream> {
        Err(GuardianError::PermissionDenied(
            "no microphone configured".to_string(),
        ))
    }

    fn name(&self) -> &str {
        "none"
    }
}
