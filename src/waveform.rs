use crate::{
    error::{MorphError, Result},
    power,
};

/// Mono PCM samples at a fixed sample rate.
#[derive(Debug, Clone, PartialEq)]
pub struct Waveform {
    samples: Vec<f32>,
    sample_rate: u32,
}

impl Waveform {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Averages interleaved channels into one.
    pub fn from_interleaved(samples: &[f32], channels: usize, sample_rate: u32) -> Self {
        let samples = if channels > 1 {
            samples
                .chunks(channels)
                .map(|chunk| chunk.iter().sum::<f32>() / channels as f32)
                .collect()
        } else {
            samples.to_vec()
        };
        Self::new(samples, sample_rate)
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn into_samples(self) -> Vec<f32> {
        self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Duration in seconds.
    pub fn duration(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }

    /// Root mean square level.
    pub fn rms(&self) -> f32 {
        if self.samples.is_empty() {
            0.0
        } else {
            power(&self.samples)
        }
    }

    pub fn peak(&self) -> f32 {
        self.samples.iter().fold(0.0f32, |a, &x| a.max(x.abs()))
    }

    /// True when every sample is exactly zero.
    pub fn is_silent(&self) -> bool {
        self.samples.iter().all(|&x| x == 0.0)
    }

    /// Checks the waveform can be analyzed at `sample_rate` with `frame_len`-sample frames.
    pub fn validate(&self, sample_rate: u32, frame_len: usize) -> Result<()> {
        if self.samples.is_empty() {
            return Err(MorphError::invalid_audio("waveform is empty"));
        }
        if self.sample_rate != sample_rate {
            return Err(MorphError::invalid_audio(format!(
                "sample rate {} Hz does not match analysis rate {} Hz",
                self.sample_rate, sample_rate
            )));
        }
        if self.samples.len() < frame_len {
            return Err(MorphError::invalid_audio(format!(
                "{} samples is shorter than one {}-sample analysis frame",
                self.samples.len(),
                frame_len
            )));
        }
        if let Some(i) = self.samples.iter().position(|x| !x.is_finite()) {
            return Err(MorphError::invalid_audio(format!(
                "sample {} is not finite",
                i
            )));
        }
        if self.is_silent() {
            return Err(MorphError::invalid_audio("waveform is all silent"));
        }
        Ok(())
    }

    /// Scales the waveform so its peak magnitude equals `target`. Silent input is left alone.
    pub fn normalize_peak(&mut self, target: f32) {
        let peak = self.peak();
        if peak > 0.0 {
            let scale = target / peak;
            for x in &mut self.samples {
                *x *= scale;
            }
        }
    }
}
