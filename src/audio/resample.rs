// Streaming sample-rate conversion and format helpers
//
// Capture devices rarely run at the 16kHz wire rate and speakers rarely run at
// the 24kHz the model speaks at, so both pipelines resample. The sinc
// resampler works on fixed 10ms input chunks; whatever does not fill a chunk
// waits for the next call so frame boundaries do not click.

use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use tracing::debug;

use crate::error::{GuardianError, GuardianResult};

/// Sinc resampler for a mono stream fed in arbitrary-sized buffers
pub struct StreamResampler {
    from_rate: u32,
    to_rate: u32,
    /// None when the rates already match
    resampler: Option<SincFixedIn<f32>>,
    /// Input samples short of a full chunk
    pending: Vec<f32>,
}

impl StreamResampler {
    pub fn new(from_rate: u32, to_rate: u32) -> GuardianResult<Self> {
        if from_rate == 0 || to_rate == 0 {
            return Err(GuardianError::Config(
                "sample rates must be greater than 0".to_string(),
            ));
        }

        let resampler = if from_rate == to_rate {
            None
        } else {
            let params = SincInterpolationParameters {
                sinc_len: 64,
                f_cutoff: 0.95,
                interpolation: SincInterpolationType::Linear,
                oversampling_factor: 128,
                window: WindowFunction::BlackmanHarris2,
            };
            let chunk_size = (from_rate as usize / 100).max(1);
            let resampler = SincFixedIn::<f32>::new(
                to_rate as f64 / from_rate as f64,
                1.1,
                params,
                chunk_size,
                1,
            )
            .map_err(|e| GuardianError::Device(format!("Failed to create resampler: {e}")))?;
            debug!(
                "Created resampler: {} Hz -> {} Hz, {} sample chunks",
                from_rate, to_rate, chunk_size
            );
            Some(resampler)
        };

        Ok(Self {
            from_rate,
            to_rate,
            resampler,
            pending: Vec::new(),
        })
    }

    pub fn from_rate(&self) -> u32 {
        self.from_rate
    }

    pub fn to_rate(&self) -> u32 {
        self.to_rate
    }

    pub fn is_passthrough(&self) -> bool {
        self.resampler.is_none()
    }

    /// Resample `input`, returning every output sample available so far
    pub fn process(&mut self, input: &[f32]) -> GuardianResult<Vec<f32>> {
        let Some(resampler) = self.resampler.as_mut() else {
            return Ok(input.to_vec());
        };

        self.pending.extend_from_slice(input);
        let mut output = Vec::new();
        loop {
            let needed = resampler.input_frames_next();
            if self.pending.len() < needed {
                break;
            }
            let chunk = vec![self.pending.drain(..needed).collect::<Vec<f32>>()];
            let planar = resampler
                .process(&chunk, None)
                .map_err(|e| GuardianError::Decode(format!("Resampling failed: {e}")))?;
            if let Some(channel) = planar.into_iter().next() {
                output.extend(channel);
            }
        }
        Ok(output)
    }

    /// Forget buffered input and filter history
    pub fn reset(&mut self) {
        self.pending.clear();
        if let Some(resampler) = self.resampler.as_mut() {
            resampler.reset();
        }
    }
}

/// Average interleaved channels into mono
pub fn downmix(data: &[f32], channels: u16) -> Vec<f32> {
    let channels = channels.max(1) as usize;
    if channels == 1 {
        return data.to_vec();
    }
    data.chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

pub fn f32_to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

pub fn i16_to_f32(sample: i16) -> f32 {
    sample as f32 / i16::MAX as f32
}
