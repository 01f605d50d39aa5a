use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use parking_lot::Mutex;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::backend::{
    AudioFrame, AudioOutput, CaptureConstraints, CaptureStream, Microphone, MicrophoneGuard,
};
use super::resample::i16_to_f32;
use crate::error::{GuardianError, GuardianResult};

/// Decoded WAV file
pub struct AudioFile {
    pub path: String,
    pub duration_seconds: f64,
    pub sample_rate: u32,
    pub channels: u16,
    /// Interleaved samples
    pub samples: Vec<i16>,
}

impl AudioFile {
    pub fn open(path: impl AsRef<Path>) -> GuardianResult<Self> {
        let path = path.as_ref();
        info!("Opening audio file: {}", path.display());

        let reader = WavReader::open(path)?;
        let spec = reader.spec();
        if spec.sample_format != SampleFormat::Int || spec.bits_per_sample != 16 {
            return Err(GuardianError::Device(format!(
                "{} is not 16-bit PCM",
                path.display()
            )));
        }

        let samples: Vec<i16> = reader
            .into_samples::<i16>()
            .collect::<Result<Vec<_>, _>>()?;

        let duration_seconds =
            samples.len() as f64 / (spec.sample_rate as f64 * spec.channels as f64);

        info!(
            "Audio file loaded: {:.1}s, {}Hz, {} channels, {} samples",
            duration_seconds,
            spec.sample_rate,
            spec.channels,
            samples.len()
        );

        Ok(Self {
            path: path.display().to_string(),
            duration_seconds,
            sample_rate: spec.sample_rate,
            channels: spec.channels,
            samples,
        })
    }
}

/// Microphone that replays a WAV recording in real time
///
/// Lets a session run headless: the recording is delivered in 100ms buffers
/// paced like a live device, then the stream ends.
pub struct WavFileMicrophone {
    path: PathBuf,
    name: String,
    buffer_duration: Duration,
}

impl WavFileMicrophone {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = format!("wav:{}", path.display());
        Self {
            path,
            name,
            buffer_duration: Duration::from_millis(100),
        }
    }

    /// Override the pacing of delivered buffers
    pub fn with_buffer_duration(mut self, buffer_duration: Duration) -> Self {
        self.buffer_duration = buffer_duration;
        self
    }
}

#[async_trait::async_trait]
impl Microphone for WavFileMicrophone {
    async fn acquire(&self, _constraints: &CaptureConstraints) -> GuardianResult<CaptureStream> {
        let path = self.path.clone();
        let audio = tokio::task::spawn_blocking(move || AudioFile::open(path))
            .await
            .map_err(|e| GuardianError::Device(format!("WAV loader panicked: {e}")))??;

        let channels = audio.channels.max(1);
        let samples_per_buffer = ((audio.sample_rate as f64
            * self.buffer_duration.as_secs_f64()) as usize
            * channels as usize)
            .max(channels as usize);

        let (tx, rx) = mpsc::channel(32);
        let pace = self.buffer_duration;
        let samples = audio.samples;

        let feeder = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(pace);
            for chunk in samples.chunks(samples_per_buffer) {
                ticker.tick().await;
                let buffer: Vec<f32> = chunk.iter().map(|&s| i16_to_f32(s)).collect();
                if tx.send(buffer).await.is_err() {
                    return;
                }
            }
            debug!("WAV microphone reached end of file");
        });

        Ok(CaptureStream {
            sample_rate: audio.sample_rate,
            channels,
            buffers: rx,
            guard: MicrophoneGuard::new(move || feeder.abort()),
        })
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Output that records inbound audio to a WAV file instead of a speaker
///
/// Frames are written as they are "played"; the file is finalized on drop.
pub struct WavFileOutput {
    name: String,
    writer: Mutex<Option<WavWriter<BufWriter<File>>>>,
    sample_rate: u32,
}

impl WavFileOutput {
    pub fn create(path: impl AsRef<Path>, sample_rate: u32) -> GuardianResult<Self> {
        let path = path.as_ref();
        let spec = WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let writer = WavWriter::create(path, spec)?;
        info!("Recording inbound audio to {}", path.display());

        Ok(Self {
            name: format!("wav:{}", path.display()),
            writer: Mutex::new(Some(writer)),
            sample_rate,
        })
    }

    /// Flush and close the file
    pub fn finalize(&self) -> GuardianResult<()> {
        if let Some(writer) = self.writer.lock().take() {
            writer.finalize()?;
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl AudioOutput for WavFileOutput {
    async fn play(&self, frame: AudioFrame) -> GuardianResult<()> {
        if frame.sample_rate != self.sample_rate {
            return Err(GuardianError::Decode(format!(
                "WAV output expects {}Hz, got {}Hz",
                self.sample_rate, frame.sample_rate
            )));
        }

        let mut guard = self.writer.lock();
        let writer = guard
            .as_mut()
            .ok_or_else(|| GuardianError::Device("WAV output already finalized".to_string()))?;
        for sample in &frame.samples {
            writer.write_sample(*sample)?;
        }
        Ok(())
    }

    fn stop(&self) {
        // Nothing buffered beyond what was already written
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for WavFileOutput {
    fn drop(&mut self) {
        if let Err(e) = self.finalize() {
            warn!("Failed to finalize WAV output: {}", e);
        }
    }
}
