// cpal-backed microphone and speaker
//
// cpal streams are not Send, so each stream lives on a dedicated thread that
// builds it, reports the outcome, and keeps it alive until told to release.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BuildStreamError, SampleFormat, StreamConfig};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info};

use super::backend::{
    AudioFrame, AudioOutput, CaptureConstraints, CaptureStream, Microphone, MicrophoneGuard,
};
use super::resample::{i16_to_f32, StreamResampler};
use crate::error::{GuardianError, GuardianResult};

/// Playback returns this far ahead of the end of its frame so the next frame
/// is queued before the device runs dry
const PLAYBACK_LEAD: Duration = Duration::from_millis(20);

const PLAYBACK_POLL: Duration = Duration::from_millis(5);

fn map_build_error(err: BuildStreamError) -> GuardianError {
    match err {
        BuildStreamError::DeviceNotAvailable => {
            GuardianError::PermissionDenied("input device not available".to_string())
        }
        other => GuardianError::Device(format!("Failed to build stream: {other}")),
    }
}

/// Default system input device
pub struct CpalMicrophone {
    name: String,
}

impl CpalMicrophone {
    pub fn new() -> Self {
        Self {
            name: "cpal:default-input".to_string(),
        }
    }
}

impl Default for CpalMicrophone {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Microphone for CpalMicrophone {
    async fn acquire(&self, constraints: &CaptureConstraints) -> GuardianResult<CaptureStream> {
        // Echo cancellation/noise suppression are OS-level on desktop; cpal
        // exposes no switch for them.
        debug!("Requesting microphone with {:?}", constraints);

        let (ready_tx, ready_rx) = oneshot::channel::<GuardianResult<(u32, u16)>>();
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        let (buffer_tx, buffer_rx) = mpsc::channel::<Vec<f32>>(64);

        std::thread::spawn(move || {
            let host = cpal::default_host();
            let device = match host.default_input_device() {
                Some(device) => device,
                None => {
                    let _ = ready_tx.send(Err(GuardianError::PermissionDenied(
                        "no input device available".to_string(),
                    )));
                    return;
                }
            };
            info!(
                "Using input device: {}",
                device.name().unwrap_or_else(|_| "Unknown".to_string())
            );

            let supported = match device.default_input_config() {
                Ok(config) => config,
                Err(e) => {
                    let _ = ready_tx.send(Err(GuardianError::Device(format!(
                        "Failed to get input config: {e}"
                    ))));
                    return;
                }
            };
            if supported.sample_format() != SampleFormat::F32 {
                let _ = ready_tx.send(Err(GuardianError::Device(format!(
                    "Unsupported input sample format {:?}",
                    supported.sample_format()
                ))));
                return;
            }
            let config: StreamConfig = supported.into();
            let rate = config.sample_rate.0;
            let channels = config.channels;

            let stream = device.build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    if let Err(e) = buffer_tx.try_send(data.to_vec()) {
                        debug!("Dropping input buffer: {}", e);
                    }
                },
                |err| error!("Audio input stream error: {}", err),
                None,
            );
            let stream = match stream {
                Ok(stream) => stream,
                Err(e) => {
                    let _ = ready_tx.send(Err(map_build_error(e)));
                    return;
                }
            };
            if let Err(e) = stream.play() {
                let _ = ready_tx.send(Err(GuardianError::Device(format!(
                    "Failed to start input stream: {e}"
                ))));
                return;
            }

            let _ = ready_tx.send(Ok((rate, channels)));

            // Hold the stream until the guard fires (or is dropped)
            let _ = release_rx.recv();
            drop(stream);
            info!("Input stream released");
        });

        let (sample_rate, channels) = ready_rx
            .await
            .map_err(|_| GuardianError::Device("input thread exited".to_string()))??;

        Ok(CaptureStream {
            sample_rate,
            channels,
            buffers: buffer_rx,
            guard: MicrophoneGuard::new(move || {
                let _ = release_tx.send(());
            }),
        })
    }

    fn name(&self) -> &str {
        &self.name
    }
}

struct OutputShared {
    /// Mono samples at the device rate awaiting the callback
    buffer: Mutex<VecDeque<f32>>,
    pushed: AtomicU64,
    consumed: AtomicU64,
}

/// Default system output device
///
/// Inbound frames are resampled to the device rate and appended to a shared
/// buffer drained by the output callback; `play` resolves as the frame's
/// last sample approaches the speaker.
pub struct CpalOutput {
    name: String,
    device_rate: u32,
    shared: Arc<OutputShared>,
    resampler: Mutex<StreamResampler>,
    _release: std::sync::mpsc::Sender<()>,
}

impl CpalOutput {
    /// Open the default output for frames at `source_rate`
    pub fn open(source_rate: u32) -> GuardianResult<Self> {
        let shared = Arc::new(OutputShared {
            buffer: Mutex::new(VecDeque::new()),
            pushed: AtomicU64::new(0),
            consumed: AtomicU64::new(0),
        });
        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<GuardianResult<u32>>();
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        let callback_shared = Arc::clone(&shared);

        std::thread::spawn(move || {
            let host = cpal::default_host();
            let device = match host.default_output_device() {
                Some(device) => device,
                None => {
                    let _ = ready_tx.send(Err(GuardianError::Device(
                        "No output device available".to_string(),
                    )));
                    return;
                }
            };
            info!(
                "Using output device: {}",
                device.name().unwrap_or_else(|_| "Unknown".to_string())
            );

            let config: StreamConfig = match device.default_output_config() {
                Ok(config) => config.into(),
                Err(e) => {
                    let _ = ready_tx.send(Err(GuardianError::Device(format!(
                        "Failed to get output config: {e}"
                    ))));
                    return;
                }
            };
            let channels = config.channels as usize;
            let rate = config.sample_rate.0;

            let stream = device.build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let mut buffer = callback_shared.buffer.lock();
                    let mut taken = 0u64;
                    for frame in data.chunks_mut(channels) {
                        let sample = match buffer.pop_front() {
                            Some(sample) => {
                                taken += 1;
                                sample
                            }
                            None => 0.0,
                        };
                        frame.fill(sample);
                    }
                    callback_shared.consumed.fetch_add(taken, Ordering::SeqCst);
                },
                |err| error!("Audio output stream error: {}", err),
                None,
            );
            let stream = match stream {
                Ok(stream) => stream,
                Err(e) => {
                    let _ = ready_tx.send(Err(GuardianError::Device(format!(
                        "Failed to build output stream: {e}"
                    ))));
                    return;
                }
            };
            if let Err(e) = stream.play() {
                let _ = ready_tx.send(Err(GuardianError::Device(format!(
                    "Failed to start output stream: {e}"
                ))));
                return;
            }

            let _ = ready_tx.send(Ok(rate));
            let _ = release_rx.recv();
            drop(stream);
            info!("Output stream released");
        });

        let device_rate = ready_rx
            .recv()
            .map_err(|_| GuardianError::Device("output thread exited".to_string()))??;
        let resampler = StreamResampler::new(source_rate, device_rate)?;

        Ok(Self {
            name: "cpal:default-output".to_string(),
            device_rate,
            shared,
            resampler: Mutex::new(resampler),
            _release: release_tx,
        })
    }

    pub fn device_rate(&self) -> u32 {
        self.device_rate
    }
}

#[async_trait::async_trait]
impl AudioOutput for CpalOutput {
    async fn play(&self, frame: AudioFrame) -> GuardianResult<()> {
        let input: Vec<f32> = frame.samples.iter().map(|&s| i16_to_f32(s)).collect();
        let resampled = self.resampler.lock().process(&input)?;

        let target = {
            let mut buffer = self.shared.buffer.lock();
            buffer.extend(resampled.iter().copied());
            self.shared
                .pushed
                .fetch_add(resampled.len() as u64, Ordering::SeqCst)
                + resampled.len() as u64
        };

        let lead = (self.device_rate as f64 * PLAYBACK_LEAD.as_secs_f64()) as u64;
        let done_at = target.saturating_sub(lead);
        while self.shared.consumed.load(Ordering::SeqCst) < done_at {
            tokio::time::sleep(PLAYBACK_POLL).await;
        }
        Ok(())
    }

    fn stop(&self) {
        let mut buffer = self.shared.buffer.lock();
        let dropped = buffer.len() as u64;
        buffer.clear();
        // Count the discarded samples as consumed so pending play() calls return
        self.shared.consumed.fetch_add(dropped, Ordering::SeqCst);
        self.resampler.lock().reset();
    }

    fn name(&self) -> &str {
        &self.name
    }
}
