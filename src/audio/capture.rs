// Microphone capture pipeline
//
// Acquires the microphone, converts whatever the device delivers to mono
// 16kHz i16 and slices it into fixed 100ms frames for the transport.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::backend::{
    AudioFrame, CaptureConstraints, Direction, Microphone, MicrophoneGuard, CAPTURE_SAMPLE_RATE,
};
use super::resample::{downmix, f32_to_i16, StreamResampler};
use crate::error::GuardianResult;

/// Configuration for the capture pipeline
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Constraints requested from the microphone
    pub constraints: CaptureConstraints,
    /// Duration of each outbound frame in milliseconds
    pub frame_duration_ms: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            constraints: CaptureConstraints::default(),
            frame_duration_ms: 100,
        }
    }
}

impl CaptureConfig {
    /// Samples per outbound frame at the wire rate
    pub fn samples_per_frame(&self) -> usize {
        (self.constraints.sample_rate as usize * self.frame_duration_ms as usize) / 1000
    }
}

/// Collects resampled audio and emits fixed-size frames
#[derive(Debug)]
pub struct FrameAssembler {
    sample_rate: u32,
    frame_len: usize,
    pending: Vec<i16>,
}

impl FrameAssembler {
    pub fn new(sample_rate: u32, frame_len: usize) -> Self {
        Self {
            sample_rate,
            frame_len: frame_len.max(1),
            pending: Vec::with_capacity(frame_len),
        }
    }

    /// Append mono samples, returning every frame completed by them
    pub fn push(&mut self, samples: &[f32]) -> Vec<AudioFrame> {
        let mut frames = Vec::new();
        for &sample in samples {
            self.pending.push(f32_to_i16(sample));
            if self.pending.len() == self.frame_len {
                let full = std::mem::replace(&mut self.pending, Vec::with_capacity(self.frame_len));
                frames.push(AudioFrame::new(self.sample_rate, full, Direction::Outbound));
            }
        }
        frames
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

struct ActiveCapture {
    /// Holds the device; dropping it releases the microphone
    guard: MicrophoneGuard,
    task: JoinHandle<()>,
}

/// Microphone → frame sink pipeline
///
/// At most one capture is active at a time. `stop()` is synchronous and
/// releases the device handle before returning.
pub struct AudioCapture {
    microphone: Arc<dyn Microphone>,
    config: CaptureConfig,
    active: Option<ActiveCapture>,
    frames_captured: Arc<AtomicU64>,
    frames_dropped: Arc<AtomicU64>,
}

impl AudioCapture {
    pub fn new(microphone: Arc<dyn Microphone>, config: CaptureConfig) -> Self {
        Self {
            microphone,
            config,
            active: None,
            frames_captured: Arc::new(AtomicU64::new(0)),
            frames_dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Frames delivered to the sink since creation
    pub fn frames_captured(&self) -> u64 {
        self.frames_captured.load(Ordering::SeqCst)
    }

    /// Frames dropped because the sink was full
    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped.load(Ordering::SeqCst)
    }

    /// Acquire the microphone and stream frames into `sink`
    pub async fn start(&mut self, sink: mpsc::Sender<AudioFrame>) -> GuardianResult<()> {
        if self.active.is_some() {
            warn!("Capture already active");
            return Ok(());
        }

        info!("Starting capture from {}", self.microphone.name());

        let stream = self.microphone.acquire(&self.config.constraints).await?;
        let mut resampler =
            StreamResampler::new(stream.sample_rate, self.config.constraints.sample_rate)?;

        info!(
            "Microphone acquired: {}Hz, {} channels (wire: {}Hz mono, {}ms frames)",
            stream.sample_rate,
            stream.channels,
            self.config.constraints.sample_rate,
            self.config.frame_duration_ms
        );

        let mut buffers = stream.buffers;
        let channels = stream.channels;
        let mut assembler = FrameAssembler::new(
            self.config.constraints.sample_rate,
            self.config.samples_per_frame(),
        );
        let frames_captured = Arc::clone(&self.frames_captured);
        let frames_dropped = Arc::clone(&self.frames_dropped);

        let task = tokio::spawn(async move {
            debug!("Capture task started");

            while let Some(buffer) = buffers.recv().await {
                let mono = downmix(&buffer, channels);
                let resampled = match resampler.process(&mono) {
                    Ok(resampled) => resampled,
                    Err(e) => {
                        warn!("Dropping capture buffer: {}", e);
                        continue;
                    }
                };

                for frame in assembler.push(&resampled) {
                    match sink.try_send(frame) {
                        Ok(()) => {
                            frames_captured.fetch_add(1, Ordering::SeqCst);
                        }
                        Err(TrySendError::Full(_)) => {
                            // One lost 100ms frame is inaudible; retrying would skew timing
                            frames_dropped.fetch_add(1, Ordering::SeqCst);
                            debug!("Capture sink full, dropping frame");
                        }
                        Err(TrySendError::Closed(_)) => {
                            debug!("Capture sink closed");
                            return;
                        }
                    }
                }
            }

            debug!("Capture task stopped: microphone stream ended");
        });

        self.active = Some(ActiveCapture {
            guard: stream.guard,
            task,
        });

        Ok(())
    }

    /// Release the microphone and halt frame production
    pub fn stop(&mut self) {
        if let Some(active) = self.active.take() {
            active.task.abort();
            drop(active.guard);
            info!("Capture stopped, microphone released");
        }
    }
}

impl Drop for AudioCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Samples per frame for the default capture configuration
pub fn default_frame_len() -> usize {
    (CAPTURE_SAMPLE_RATE as usize * 100) / 1000
}
