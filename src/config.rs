//! Numeric configuration shared by analysis, profiling, morphing and synthesis.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{MorphError, Result};

pub const DEFAULT_SAMPLE_RATE: u32 = 22050;

/// Shortest analysis frame, in seconds; the FFT size is the next power of two above it.
const MIN_FRAME_SECONDS: f64 = 0.04;

/// Analysis and synthesis parameters. A voice profile is only comparable with
/// source frames analyzed under the same [`Fingerprint`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Sample rate of every waveform fed to the engine, in Hz.
    pub sample_rate: u32,
    /// FFT size, also the analysis window length in samples.
    pub fft_size: usize,
    /// Distance between frame centres in samples.
    pub hop_size: usize,
    /// Lowest F0 searched, in Hz.
    pub f0_floor: f64,
    /// Highest F0 searched, in Hz.
    pub f0_ceil: f64,
    /// Minimum NSDF clarity for a frame to count as voiced.
    pub voicing_threshold: f64,
    /// Number of cepstral coefficients kept (K), including the energy term.
    pub cepstral_order: usize,
    /// Frames quieter than this (dB relative to full scale power) are treated as silence.
    pub energy_floor_db: f64,
    /// Number of mel-equal aperiodicity bands.
    pub aperiodicity_bands: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self::for_sample_rate(DEFAULT_SAMPLE_RATE)
    }
}

impl AnalysisConfig {
    pub fn for_sample_rate(sample_rate: u32) -> Self {
        let fft_size = ((sample_rate as f64 * MIN_FRAME_SECONDS).ceil() as usize)
            .max(64)
            .next_power_of_two();
        Self {
            sample_rate,
            fft_size,
            hop_size: fft_size / 4,
            f0_floor: 70.0,
            f0_ceil: 1000.0f64.min(sample_rate as f64 / 4.0),
            voicing_threshold: 0.5,
            cepstral_order: 24,
            energy_floor_db: -60.0,
            aperiodicity_bands: 5,
        }
    }

    /// Number of one-sided spectrum bins, `fft_size / 2 + 1`.
    pub fn num_bins(&self) -> usize {
        self.fft_size / 2 + 1
    }

    /// Frames needed to cover `num_samples` with centred, hop-spaced frames.
    pub fn num_frames(&self, num_samples: usize) -> usize {
        num_samples / self.hop_size + 1
    }

    /// Centre of frame `i`, in samples.
    pub fn frame_center(&self, i: usize) -> usize {
        i * self.hop_size
    }

    /// Time of frame `i`, in seconds.
    pub fn frame_time(&self, i: usize) -> f64 {
        self.frame_center(i) as f64 / self.sample_rate as f64
    }

    /// Width of one FFT bin in Hz.
    pub fn bin_hz(&self) -> f64 {
        self.sample_rate as f64 / self.fft_size as f64
    }

    pub fn nyquist(&self) -> f64 {
        self.sample_rate as f64 / 2.0
    }

    /// Shortest pitch period searched, in samples.
    pub fn min_lag(&self) -> usize {
        (self.sample_rate as f64 / self.f0_ceil).floor() as usize
    }

    /// Longest pitch period searched, in samples.
    pub fn max_lag(&self) -> usize {
        (self.sample_rate as f64 / self.f0_floor).ceil() as usize
    }

    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint {
            sample_rate: self.sample_rate,
            fft_size: self.fft_size,
            hop_size: self.hop_size,
            cepstral_order: self.cepstral_order,
        }
    }

    /// Fails with [`MorphError::ProfileConfigMismatch`] unless `other` frames and
    /// cepstra line up with ours.
    pub fn check_compatible(&self, other: &AnalysisConfig) -> Result<()> {
        let expected = self.fingerprint();
        let found = other.fingerprint();
        if expected == found {
            Ok(())
        } else {
            Err(MorphError::ProfileConfigMismatch {
                expected: expected.to_string(),
                found: found.to_string(),
            })
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(MorphError::invalid_config("sample_rate", "must be positive"));
        }
        if self.fft_size < 64 || self.fft_size % 2 != 0 {
            return Err(MorphError::invalid_config(
                "fft_size",
                format!("must be even and at least 64, got {}", self.fft_size),
            ));
        }
        if self.hop_size == 0 || self.hop_size > self.fft_size / 2 {
            return Err(MorphError::invalid_config(
                "hop_size",
                format!(
                    "must be in 1..={} for fft size {}, got {}",
                    self.fft_size / 2,
                    self.fft_size,
                    self.hop_size
                ),
            ));
        }
        for (name, value) in [
            ("f0_floor", self.f0_floor),
            ("f0_ceil", self.f0_ceil),
            ("voicing_threshold", self.voicing_threshold),
            ("energy_floor_db", self.energy_floor_db),
        ] {
            if !value.is_finite() {
                return Err(MorphError::invalid_config(name, "must be finite"));
            }
        }
        if self.f0_floor <= 0.0 || self.f0_ceil <= self.f0_floor {
            return Err(MorphError::invalid_config(
                "f0_floor",
                format!(
                    "F0 search range {}..{} Hz is empty",
                    self.f0_floor, self.f0_ceil
                ),
            ));
        }
        if self.f0_ceil >= self.nyquist() {
            return Err(MorphError::invalid_config(
                "f0_ceil",
                format!("{} Hz is not below Nyquist", self.f0_ceil),
            ));
        }
        if self.max_lag() + 2 >= self.fft_size / 2 {
            return Err(MorphError::invalid_config(
                "f0_floor",
                format!(
                    "a {} Hz period does not fit in half of a {}-sample frame",
                    self.f0_floor, self.fft_size
                ),
            ));
        }
        if !(0.0..=1.0).contains(&self.voicing_threshold) {
            return Err(MorphError::invalid_config(
                "voicing_threshold",
                "must be in [0, 1]",
            ));
        }
        if self.cepstral_order < 2 || self.cepstral_order > self.num_bins() {
            return Err(MorphError::invalid_config(
                "cepstral_order",
                format!("must be in 2..={}, got {}", self.num_bins(), self.cepstral_order),
            ));
        }
        if self.aperiodicity_bands == 0 || self.aperiodicity_bands > self.num_bins() {
            return Err(MorphError::invalid_config(
                "aperiodicity_bands",
                format!(
                    "must be in 1..={}, got {}",
                    self.num_bins(),
                    self.aperiodicity_bands
                ),
            ));
        }
        Ok(())
    }
}

/// The parts of an [`AnalysisConfig`] that decide whether two cepstral
/// vectors are comparable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    pub sample_rate: u32,
    pub fft_size: usize,
    pub hop_size: usize,
    pub cepstral_order: usize,
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} Hz, fft {}, hop {}, order {}",
            self.sample_rate, self.fft_size, self.hop_size, self.cepstral_order
        )
    }
}

/// The user-facing morph control.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MorphConfig {
    /// Blend toward the matched target timbre: 0 keeps the source, 1 replaces it.
    pub strength: f64,
}

impl Default for MorphConfig {
    fn default() -> Self {
        Self { strength: 0.5 }
    }
}

impl MorphConfig {
    pub fn new(strength: f64) -> Result<Self> {
        let config = Self { strength };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.strength.is_finite() || !(0.0..=1.0).contains(&self.strength) {
            return Err(MorphError::invalid_config(
                "strength",
                format!("must be in [0, 1], got {}", self.strength),
            ));
        }
        Ok(())
    }
}
