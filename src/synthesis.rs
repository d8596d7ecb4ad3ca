//! Frame-synchronous harmonic plus noise resynthesis.

use std::f64::consts::{PI, TAU};

use rand::{Rng, SeedableRng};
use rand_pcg::Pcg32;
use rayon::prelude::*;
use rustfft::num_complex::Complex;

use crate::{
    analysis::{band_map, AnalysisRecord},
    cancel::{CancelToken, FRAME_BATCH},
    cepstrum::interpolate,
    config::AnalysisConfig,
    error::{MorphError, Result},
    fft::{fill_right_part_of_spectrum, Fft},
    waveform::Waveform,
    windows::hann_window,
};

pub const DEFAULT_SEED: u64 = 0x5eed_1e55;

const FRAME_SEED_MIX: u64 = 0x9E37_79B9_7F4A_7C15;

pub struct Synthesizer {
    config: AnalysisConfig,
    fft: Fft<f64>,
    window: Vec<f64>,
    band_map: Vec<usize>,
    seed: u64,
}

impl Synthesizer {
    pub fn new(config: AnalysisConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            fft: Fft::new(config.fft_size),
            window: hann_window(config.fft_size),
            band_map: band_map(&config),
            seed: DEFAULT_SEED,
            config,
        })
    }

    /// Seed of the noise generator; equal seeds give bit-identical output.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    pub fn synthesize(
        &self,
        records: &[AnalysisRecord],
        envelopes: &[Vec<f64>],
        num_samples: usize,
    ) -> Result<Waveform> {
        self.synthesize_with(records, envelopes, num_samples, &CancelToken::new())
    }

    /// Rebuilds `num_samples` samples from the original F0 and aperiodicity of
    /// `records` and one envelope per record.
    pub fn synthesize_with(
        &self,
        records: &[AnalysisRecord],
        envelopes: &[Vec<f64>],
        num_samples: usize,
        cancel: &CancelToken,
    ) -> Result<Waveform> {
        self.check_lengths(records, envelopes, num_samples)?;

        let size = self.config.fft_size;
        let hop = self.config.hop_size;
        let phases = fundamental_phases(records, hop as f64 / self.config.sample_rate as f64);

        // Index 0 of the buffers is sample -size/2.
        let len = (records.len() - 1) * hop + size;
        let mut periodic = vec![0.0; len];
        let mut noise = vec![0.0; len];
        let mut weight = vec![0.0; len];
        let mut weight_sq = vec![0.0; len];

        for start in (0..records.len()).step_by(FRAME_BATCH) {
            cancel.check()?;
            let end = (start + FRAME_BATCH).min(records.len());
            let frames: Vec<_> = (start..end)
                .into_par_iter()
                .map(|i| {
                    let record = &records[i];
                    let harmonics = if record.is_voiced() {
                        Some(self.periodic_frame(record, &envelopes[i], phases[i]))
                    } else {
                        None
                    };
                    (harmonics, self.noise_frame(i, record, &envelopes[i]))
                })
                .collect();

            for (i, (harmonics, noise_frame)) in (start..end).zip(frames) {
                let offset = i * hop;
                for (n, &w) in self.window.iter().enumerate() {
                    weight[offset + n] += w;
                    weight_sq[offset + n] += w * w;
                    noise[offset + n] += w * noise_frame[n];
                }
                if let Some(harmonics) = harmonics {
                    for (n, (&w, x)) in self.window.iter().zip(harmonics).enumerate() {
                        periodic[offset + n] += w * x;
                    }
                }
            }
        }

        let samples: Vec<f32> = (0..num_samples)
            .map(|t| {
                let j = t + size / 2;
                let mut x = 0.0;
                if weight[j] > 1e-12 {
                    x += periodic[j] / weight[j];
                }
                if weight_sq[j] > 1e-12 {
                    x += noise[j] / weight_sq[j].sqrt();
                }
                if x.is_finite() {
                    x as f32
                } else {
                    0.0
                }
            })
            .collect();

        tracing::debug!(
            frames = records.len(),
            samples = samples.len(),
            "synthesized waveform"
        );
        Ok(Waveform::new(samples, self.config.sample_rate))
    }

    fn check_lengths(
        &self,
        records: &[AnalysisRecord],
        envelopes: &[Vec<f64>],
        num_samples: usize,
    ) -> Result<()> {
        if envelopes.len() != records.len() {
            return Err(MorphError::SynthesisLengthMismatch {
                expected: records.len(),
                actual: envelopes.len(),
            });
        }
        let frames = self.config.num_frames(num_samples);
        if records.len() != frames {
            return Err(MorphError::SynthesisLengthMismatch {
                expected: frames,
                actual: records.len(),
            });
        }
        let bins = self.config.num_bins();
        if let Some(envelope) = envelopes.iter().find(|e| e.len() != bins) {
            return Err(MorphError::SynthesisLengthMismatch {
                expected: bins,
                actual: envelope.len(),
            });
        }
        let bands = self.config.aperiodicity_bands;
        if let Some(record) = records.iter().find(|r| r.aperiodicity.len() != bands) {
            return Err(MorphError::SynthesisLengthMismatch {
                expected: bands,
                actual: record.aperiodicity.len(),
            });
        }
        Ok(())
    }

    /// Sum of harmonics of the frame's F0, phase-locked to `phase` at the frame centre.
    fn periodic_frame(&self, record: &AnalysisRecord, envelope: &[f64], phase: f64) -> Vec<f64> {
        let size = self.config.fft_size;
        let sample_rate = self.config.sample_rate as f64;
        let omega = TAU * record.f0 / sample_rate;
        let mut frame = vec![0.0; size];

        let mut harmonic = 1;
        while harmonic as f64 * record.f0 < self.config.nyquist() {
            let h = harmonic as f64;
            let bin = h * record.f0 / self.config.bin_hz();
            let ap = self.band_aperiodicity(record, bin.round() as usize);
            let power = interpolate(envelope, bin).max(0.0) * (1.0 - ap);
            let amplitude = (4.0 * record.f0 * power / sample_rate).sqrt();
            if amplitude > 0.0 {
                let rotor = Complex::from_polar(1.0, h * omega);
                let mut z = Complex::from_polar(amplitude, h * (phase - omega * (size / 2) as f64));
                for x in frame.iter_mut() {
                    *x += z.re;
                    z *= rotor;
                }
            }
            harmonic += 1;
        }
        frame
    }

    /// Unit-variance white noise shaped by `sqrt(envelope * aperiodicity)`.
    fn noise_frame(&self, index: usize, record: &AnalysisRecord, envelope: &[f64]) -> Vec<f64> {
        let size = self.config.fft_size;
        let mut rng = Pcg32::seed_from_u64(self.seed ^ (index as u64).wrapping_mul(FRAME_SEED_MIX));
        let limit = 3.0f64.sqrt();
        let white: Vec<f64> = (0..size).map(|_| rng.gen_range(-limit..limit)).collect();

        let mut spectrum = self.fft.real_spectrum(&white);
        for (k, x) in spectrum[..size / 2 + 1].iter_mut().enumerate() {
            let ap = self.band_aperiodicity(record, k);
            *x *= (envelope[k].max(0.0) * ap).sqrt();
        }
        fill_right_part_of_spectrum(&mut spectrum);
        self.fft.real_signal(spectrum)
    }

    fn band_aperiodicity(&self, record: &AnalysisRecord, bin: usize) -> f64 {
        let band = self.band_map[bin.min(self.band_map.len() - 1)];
        record.aperiodicity[band].clamp(0.0, 1.0)
    }
}

/// Phase of the fundamental at every frame centre, integrating F0 with the
/// trapezoid rule between centres `hop_seconds` apart.
fn fundamental_phases(records: &[AnalysisRecord], hop_seconds: f64) -> Vec<f64> {
    let mut phase = 0.0;
    let mut previous = 0.0f64;
    records
        .iter()
        .map(|record| {
            let (a, b) = match (previous, record.f0) {
                (p, f) if p > 0.0 && f > 0.0 => (p, f),
                (p, f) => (p.max(f), p.max(f)),
            };
            phase = (phase + PI * (a + b) * hop_seconds).rem_euclid(TAU);
            previous = record.f0;
            phase
        })
        .collect()
}
