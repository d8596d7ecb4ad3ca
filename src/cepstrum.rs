//! Mel-cepstral features: a compact, loudness-separable description of a
//! spectral envelope.
//!
//! The log power envelope is resampled onto a grid equally spaced in mel,
//! transformed with an orthonormal DCT-II and truncated to `K` coefficients.
//! Coefficient 0 is proportional to the mean log energy; 1..K describe shape.

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

use crate::config::AnalysisConfig;

/// Power below this is treated as this, so logs stay finite.
pub const POWER_FLOOR: f64 = 1e-12;

pub fn log_power(power: f64) -> f64 {
    power.max(POWER_FLOOR).ln()
}

pub fn hz_to_mel(hz: f64) -> f64 {
    2595.0 * (1.0 + hz / 700.0).log10()
}

pub fn mel_to_hz(mel: f64) -> f64 {
    700.0 * (10.0f64.powf(mel / 2595.0) - 1.0)
}

/// Truncated mel-cepstrum of one frame's envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CepstralVector(Vec<f64>);

impl CepstralVector {
    pub fn new(coefficients: Vec<f64>) -> Self {
        Self(coefficients)
    }

    pub fn order(&self) -> usize {
        self.0.len()
    }

    pub fn coefficients(&self) -> &[f64] {
        &self.0
    }

    /// Coefficient 0, the log energy term.
    pub fn energy(&self) -> f64 {
        self.0.first().copied().unwrap_or(0.0)
    }

    /// Coefficients 1..K.
    pub fn shape(&self) -> &[f64] {
        self.0.get(1..).unwrap_or(&[])
    }

    /// Squared Euclidean distance over the shape coefficients; energy is ignored.
    pub fn squared_distance(&self, other: &CepstralVector) -> f64 {
        self.shape()
            .iter()
            .zip(other.shape())
            .map(|(a, b)| (a - b).powi(2))
            .sum()
    }

    pub fn distance(&self, other: &CepstralVector) -> f64 {
        self.squared_distance(other).sqrt()
    }

    /// Moves the shape coefficients toward `target` by `strength`; energy stays ours.
    pub fn blend(&self, target: &CepstralVector, strength: f64) -> CepstralVector {
        let mut coefficients = self.0.clone();
        for (c, &t) in coefficients.iter_mut().zip(&target.0).skip(1) {
            *c = (1.0 - strength) * *c + strength * t;
        }
        CepstralVector(coefficients)
    }
}

/// Precomputed envelope <-> cepstrum transform for one analysis configuration.
pub struct CepstralTransform {
    order: usize,
    num_bins: usize,
    /// Fractional linear bin of each mel grid point.
    grid_bins: Vec<f64>,
    /// Fractional mel grid position of each linear bin.
    bin_grid: Vec<f64>,
    /// Orthonormal DCT-II basis, `order` rows of grid length.
    basis: Vec<Vec<f64>>,
}

impl CepstralTransform {
    pub fn new(config: &AnalysisConfig) -> Self {
        let num_bins = config.num_bins();
        let grid_len = num_bins;
        let bin_hz = config.bin_hz();
        let mel_max = hz_to_mel(config.nyquist());
        let last = (grid_len - 1) as f64;

        let grid_bins = (0..grid_len)
            .map(|m| mel_to_hz(m as f64 / last * mel_max) / bin_hz)
            .collect();
        let bin_grid = (0..num_bins)
            .map(|b| hz_to_mel(b as f64 * bin_hz) / mel_max * last)
            .collect();

        let basis = (0..config.cepstral_order)
            .map(|k| {
                let scale = if k == 0 {
                    (1.0 / grid_len as f64).sqrt()
                } else {
                    (2.0 / grid_len as f64).sqrt()
                };
                (0..grid_len)
                    .map(|m| scale * (PI * k as f64 * (m as f64 + 0.5) / grid_len as f64).cos())
                    .collect()
            })
            .collect();

        Self {
            order: config.cepstral_order,
            num_bins,
            grid_bins,
            bin_grid,
            basis,
        }
    }

    pub fn order(&self) -> usize {
        self.order
    }

    pub fn num_bins(&self) -> usize {
        self.num_bins
    }

    /// Coefficient 0 of an all-zero envelope.
    pub fn floor_energy(&self) -> f64 {
        (self.grid_bins.len() as f64).sqrt() * POWER_FLOOR.ln()
    }

    pub fn extract(&self, envelope: &[f64]) -> CepstralVector {
        let log_envelope: Vec<f64> = envelope.iter().map(|&p| log_power(p)).collect();
        let grid: Vec<f64> = self
            .grid_bins
            .iter()
            .map(|&pos| interpolate(&log_envelope, pos))
            .collect();
        CepstralVector(
            self.basis
                .iter()
                .map(|row| row.iter().zip(&grid).map(|(b, x)| b * x).sum())
                .collect(),
        )
    }

    /// Log power per linear bin described by (up to `order`) cepstral coefficients.
    pub fn log_envelope(&self, coefficients: &[f64]) -> Vec<f64> {
        let mut grid = vec![0.0; self.grid_bins.len()];
        for (row, &c) in self.basis.iter().zip(coefficients) {
            for (g, b) in grid.iter_mut().zip(row) {
                *g += c * b;
            }
        }
        self.bin_grid
            .iter()
            .map(|&pos| interpolate(&grid, pos))
            .collect()
    }

    /// Smoothed power envelope described by `cepstrum`.
    pub fn invert(&self, cepstrum: &CepstralVector) -> Vec<f64> {
        self.log_envelope(cepstrum.coefficients())
            .into_iter()
            .map(f64::exp)
            .collect()
    }
}

/// Linear interpolation at a fractional index, clamped to the ends.
pub(crate) fn interpolate(values: &[f64], pos: f64) -> f64 {
    match values.len() {
        0 => 0.0,
        1 => values[0],
        len => {
            let pos = pos.clamp(0.0, (len - 1) as f64);
            let i = (pos.floor() as usize).min(len - 2);
            let frac = pos - i as f64;
            values[i] * (1.0 - frac) + values[i + 1] * frac
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transform() -> (AnalysisConfig, CepstralTransform) {
        let config = AnalysisConfig::for_sample_rate(16000);
        let transform = CepstralTransform::new(&config);
        (config, transform)
    }

    fn formant_envelope(config: &AnalysisConfig, centers: &[f64]) -> Vec<f64> {
        (0..config.num_bins())
            .map(|b| {
                let hz = b as f64 * config.bin_hz();
                1e-4 + centers
                    .iter()
                    .map(|c| (-((hz - c) / 200.0).powi(2)).exp())
                    .sum::<f64>()
            })
            .collect()
    }

    #[test]
    fn mel_scale_round_trip() {
        for hz in [0.0, 100.0, 1000.0, 8000.0] {
            assert!((mel_to_hz(hz_to_mel(hz)) - hz).abs() < 1e-6);
        }
        assert!((hz_to_mel(1000.0) - 1000.0).abs() < 1.0);
    }

    #[test]
    fn silent_envelope_has_floor_energy() {
        let (config, transform) = transform();
        let cepstrum = transform.extract(&vec![0.0; config.num_bins()]);
        assert_eq!(cepstrum.order(), config.cepstral_order);
        assert!(cepstrum.energy().is_finite());
        assert!((cepstrum.energy() - transform.floor_energy()).abs() < 1e-6);
        assert!(cepstrum.shape().iter().all(|c| c.abs() < 1e-6));
    }

    #[test]
    fn flat_envelope_inverts_exactly() {
        let (config, transform) = transform();
        let envelope = vec![0.01; config.num_bins()];
        let back = transform.invert(&transform.extract(&envelope));
        for p in back {
            assert!((p / 0.01 - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn inversion_keeps_formant_peaks() {
        let (config, transform) = transform();
        let envelope = formant_envelope(&config, &[700.0, 1200.0, 2600.0]);
        let back = transform.invert(&transform.extract(&envelope));
        let peak_bin = (700.0 / config.bin_hz()).round() as usize;
        let valley_bin = (1900.0 / config.bin_hz()).round() as usize;
        assert!(back[peak_bin] > back[valley_bin] * 3.0);
    }

    #[test]
    fn gain_only_changes_energy() {
        let (config, transform) = transform();
        let envelope = formant_envelope(&config, &[500.0, 1500.0]);
        let louder: Vec<f64> = envelope.iter().map(|p| p * 100.0).collect();
        let a = transform.extract(&envelope);
        let b = transform.extract(&louder);
        assert!(b.energy() > a.energy());
        assert!(a.distance(&b) < 1e-9);
    }

    #[test]
    fn blend_endpoints() {
        let source = CepstralVector::new(vec![-3.0, 1.0, 2.0, -0.5]);
        let target = CepstralVector::new(vec![7.0, -1.0, 0.25, 4.0]);

        let none = source.blend(&target, 0.0);
        assert_eq!(none, source);

        let full = source.blend(&target, 1.0);
        assert_eq!(full.energy(), source.energy());
        assert_eq!(full.shape(), target.shape());

        let half = source.blend(&target, 0.5);
        assert_eq!(half.coefficients(), &[-3.0, 0.0, 1.125, 1.75]);
    }

    #[test]
    fn distance_ignores_energy() {
        let a = CepstralVector::new(vec![0.0, 3.0, 0.0]);
        let b = CepstralVector::new(vec![100.0, 0.0, 4.0]);
        assert_eq!(a.distance(&b), 5.0);
    }
}
