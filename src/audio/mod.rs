pub mod backend;
pub mod capture;
pub mod file;
pub mod playback;
pub mod resample;

#[cfg(feature = "audio-io")]
pub mod device;

pub use backend::{
    AudioFrame, AudioOutput, CaptureConstraints, CaptureStream, Direction, Microphone,
    MicrophoneGuard, NoMicrophone, NullOutput, CAPTURE_SAMPLE_RATE, PLAYBACK_SAMPLE_RATE,
};
pub use capture::{AudioCapture, CaptureConfig, FrameAssembler};
pub use file::{AudioFile, WavFileMicrophone, WavFileOutput};
pub use playback::{PlaybackPipeline, PlaybackState, PlaybackStatus};
pub use resample::StreamResampler;

#[cfg(feature = "audio-io")]
pub use device::{CpalMicrophone, CpalOutput};
