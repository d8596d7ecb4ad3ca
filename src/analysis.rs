//! Frame analysis: F0 contour, spectral envelope and band aperiodicity.

use std::f64::consts::TAU;

use rayon::prelude::*;
use rustfft::num_complex::Complex;

use crate::{
    cancel::{CancelToken, FRAME_BATCH},
    cepstrum::hz_to_mel,
    config::AnalysisConfig,
    error::Result,
    fft::{power_spectrum, Fft},
    pitch_detection::{refine_instantaneous_frequency, PitchTracker},
    waveform::Waveform,
    windows::{apply_window, hann_window, window_energy},
};

/// Nominal F0 used to size envelope smoothing for unvoiced frames.
const UNVOICED_F0: f64 = 500.0;

/// Analysis results for one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisRecord {
    /// Fundamental frequency in Hz, 0 when unvoiced.
    pub f0: f64,
    /// Aperiodic share of energy per band, in [0, 1].
    pub aperiodicity: Vec<f64>,
    /// Smoothed power envelope, one value per one-sided FFT bin.
    pub envelope: Vec<f64>,
}

impl AnalysisRecord {
    pub fn is_voiced(&self) -> bool {
        self.f0 > 0.0
    }

    /// Signal power described by the envelope, `(2/N) * sum(envelope)`.
    pub fn power(&self) -> f64 {
        match self.envelope.len() {
            0 | 1 => 0.0,
            len => self.envelope.iter().sum::<f64>() / (len - 1) as f64,
        }
    }

    pub fn energy_db(&self) -> f64 {
        power_db(self.power())
    }
}

/// Per-frame analysis of one waveform.
#[derive(Debug, Clone)]
pub struct Analysis {
    pub records: Vec<AnalysisRecord>,
    /// Length of the analyzed waveform; synthesis trims back to it.
    pub num_samples: usize,
    pub sample_rate: u32,
}

impl Analysis {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn voiced_frames(&self) -> usize {
        self.records.iter().filter(|r| r.is_voiced()).count()
    }

    pub fn f0_contour(&self) -> Vec<f64> {
        self.records.iter().map(|r| r.f0).collect()
    }
}

pub struct FrameAnalyzer {
    config: AnalysisConfig,
    fft: Fft<f64>,
    window: Vec<f64>,
    window_energy: f64,
    pitch: PitchTracker<f64>,
    band_map: Vec<usize>,
}

impl FrameAnalyzer {
    pub fn new(config: AnalysisConfig) -> Result<Self> {
        config.validate()?;
        let window = hann_window(config.fft_size);
        Ok(Self {
            fft: Fft::new(config.fft_size),
            window_energy: window_energy(&window),
            window,
            pitch: PitchTracker::new(
                config.fft_size,
                config.sample_rate as f64,
                config.min_lag(),
                config.max_lag(),
                config.voicing_threshold,
            ),
            band_map: band_map(&config),
            config,
        })
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    pub fn analyze(&self, waveform: &Waveform) -> Result<Analysis> {
        self.analyze_with(waveform, &CancelToken::new())
    }

    /// Analyzes every frame, in parallel batches, checking `cancel` between batches.
    pub fn analyze_with(&self, waveform: &Waveform, cancel: &CancelToken) -> Result<Analysis> {
        waveform.validate(self.config.sample_rate, self.config.fft_size)?;
        let samples: Vec<f64> = waveform.samples().iter().map(|&x| x as f64).collect();
        let num_frames = self.config.num_frames(samples.len());

        let mut records = Vec::with_capacity(num_frames);
        for start in (0..num_frames).step_by(FRAME_BATCH) {
            cancel.check()?;
            let end = (start + FRAME_BATCH).min(num_frames);
            let batch: Vec<_> = (start..end)
                .into_par_iter()
                .map(|i| self.analyze_frame(&samples, self.config.frame_center(i)))
                .collect();
            records.extend(batch);
        }

        let analysis = Analysis {
            records,
            num_samples: samples.len(),
            sample_rate: self.config.sample_rate,
        };
        tracing::debug!(
            frames = analysis.len(),
            voiced = analysis.voiced_frames(),
            duration = waveform.duration(),
            "analyzed waveform"
        );
        Ok(analysis)
    }

    /// Analyzes the frame centred on sample `center`.
    pub fn analyze_frame(&self, samples: &[f64], center: usize) -> AnalysisRecord {
        let center = center as isize;
        let frame = segment(samples, center, self.config.fft_size);
        let spectrum = self.windowed_spectrum(&frame);
        let power = self.normalize(power_spectrum(&spectrum));

        let audible = power_db(frame_power(&power)) >= self.config.energy_floor_db;
        let f0 = if audible {
            self.estimate_f0(samples, center, &frame, &spectrum)
        } else {
            None
        };

        let envelope = self.estimate_envelope(samples, center, f0, &power);
        let aperiodicity = match f0 {
            Some(f0) => self.estimate_aperiodicity(&frame, f0, &power),
            None => vec![1.0; self.config.aperiodicity_bands],
        };

        AnalysisRecord {
            f0: f0.unwrap_or(0.0),
            aperiodicity,
            envelope,
        }
    }

    fn windowed_spectrum(&self, frame: &[f64]) -> Vec<Complex<f64>> {
        self.fft
            .real_spectrum(&apply_window(&self.window, frame.iter().copied()))
    }

    /// Scales `|X|^2` so white noise of variance s^2 reads s^2 in every bin.
    fn normalize(&self, mut power: Vec<f64>) -> Vec<f64> {
        for p in &mut power {
            *p /= self.window_energy;
        }
        power
    }

    fn windowed_power(&self, frame: &[f64]) -> Vec<f64> {
        self.normalize(power_spectrum(&self.windowed_spectrum(frame)))
    }

    fn estimate_f0(
        &self,
        samples: &[f64],
        center: isize,
        frame: &[f64],
        spectrum: &[Complex<f64>],
    ) -> Option<f64> {
        let estimate = self.pitch.estimate(frame)?;
        let next = segment(samples, center + 1, self.config.fft_size);
        let f0 = refine_instantaneous_frequency(
            spectrum,
            &self.windowed_spectrum(&next),
            estimate.frequency,
            self.config.sample_rate as f64,
        );
        (self.config.f0_floor..=self.config.f0_ceil)
            .contains(&f0)
            .then_some(f0)
    }

    /// Averages power spectra of windows half a period either side of the centre,
    /// then smooths across one F0 of bandwidth so harmonics merge into a density.
    fn estimate_envelope(
        &self,
        samples: &[f64],
        center: isize,
        f0: Option<f64>,
        center_power: &[f64],
    ) -> Vec<f64> {
        let f0 = f0.unwrap_or(UNVOICED_F0);
        let offset = (self.config.sample_rate as f64 / f0 / 2.0).round() as isize;

        let mut average = center_power.to_vec();
        for shift in [-offset, offset] {
            let power = self.windowed_power(&segment(samples, center + shift, self.config.fft_size));
            for (a, p) in average.iter_mut().zip(power) {
                *a += p;
            }
        }
        for a in &mut average {
            *a /= 3.0;
        }

        smooth_power(&average, f0 / self.config.bin_hz())
    }

    /// Fits and removes harmonics of `f0`, then reports residual over total power per band.
    fn estimate_aperiodicity(&self, frame: &[f64], f0: f64, total_power: &[f64]) -> Vec<f64> {
        let sample_rate = self.config.sample_rate as f64;
        let mut residual = frame.to_vec();
        let mut harmonic = 1;
        while harmonic as f64 * f0 < self.config.nyquist() {
            let omega = TAU * harmonic as f64 * f0 / sample_rate;
            remove_sinusoid(&mut residual, &self.window, omega);
            harmonic += 1;
        }
        let residual_power = self.windowed_power(&residual);

        let bands = self.config.aperiodicity_bands;
        let mut totals = vec![0.0; bands];
        let mut residuals = vec![0.0; bands];
        for (k, &band) in self.band_map.iter().enumerate() {
            totals[band] += total_power[k];
            residuals[band] += residual_power[k];
        }
        totals
            .iter()
            .zip(&residuals)
            .map(|(&total, &residual)| {
                if total > f64::MIN_POSITIVE {
                    (residual / total).clamp(0.0, 1.0)
                } else {
                    1.0
                }
            })
            .collect()
    }
}

/// Aperiodicity band of every one-sided bin; bands are equally wide in mel.
pub fn band_map(config: &AnalysisConfig) -> Vec<usize> {
    let bands = config.aperiodicity_bands;
    let mel_max = hz_to_mel(config.nyquist());
    (0..config.num_bins())
        .map(|k| {
            let mel = hz_to_mel(k as f64 * config.bin_hz());
            ((mel / mel_max * bands as f64) as usize).min(bands - 1)
        })
        .collect()
}

pub(crate) fn power_db(power: f64) -> f64 {
    10.0 * power.max(1e-20).log10()
}

fn frame_power(power: &[f64]) -> f64 {
    power.iter().sum::<f64>() / (power.len().max(2) - 1) as f64
}

/// `len` samples centred on `center`, zero outside the signal.
fn segment(samples: &[f64], center: isize, len: usize) -> Vec<f64> {
    let start = center - (len / 2) as isize;
    (0..len as isize)
        .map(|i| {
            let n = start + i;
            if n >= 0 && (n as usize) < samples.len() {
                samples[n as usize]
            } else {
                0.0
            }
        })
        .collect()
}

/// Window-weighted least squares fit of a sinusoid at `omega` rad/sample,
/// phase-referenced to the frame centre, subtracted from `buf`.
fn remove_sinusoid(buf: &mut [f64], window: &[f64], omega: f64) {
    let half = (buf.len() / 2) as f64;
    let rotor = Complex::from_polar(1.0, omega);
    let start = Complex::from_polar(1.0, -omega * half);

    let (mut xc, mut cc, mut xs, mut ss) = (0.0, 0.0, 0.0, 0.0);
    let mut z = start;
    for (&x, &w) in buf.iter().zip(window) {
        xc += w * x * z.re;
        cc += w * z.re * z.re;
        xs += w * x * z.im;
        ss += w * z.im * z.im;
        z *= rotor;
    }
    let a = if cc > f64::EPSILON { xc / cc } else { 0.0 };
    let b = if ss > f64::EPSILON { xs / ss } else { 0.0 };

    let mut z = start;
    for x in buf.iter_mut() {
        *x -= a * z.re + b * z.im;
        z *= rotor;
    }
}

/// Boxcar smoothing of a one-sided power spectrum over a fractional `width` in bins,
/// mirrored at DC and Nyquist.
fn smooth_power(power: &[f64], width: f64) -> Vec<f64> {
    let len = power.len();
    if len < 3 {
        return power.to_vec();
    }
    let width = width.max(1.0);
    let half = width / 2.0;
    let margin = (half.ceil() as usize + 2).min(len - 2);
    let last = (len - 1) as isize;

    let extended: Vec<f64> = (0..len + 2 * margin)
        .map(|j| {
            let mut b = j as isize - margin as isize;
            if b < 0 {
                b = -b;
            }
            if b > last {
                b = 2 * last - b;
            }
            power[b.clamp(0, last) as usize]
        })
        .collect();
    let mut prefix = Vec::with_capacity(extended.len() + 1);
    prefix.push(0.0);
    for &p in &extended {
        prefix.push(prefix[prefix.len() - 1] + p);
    }

    // Integral of the piecewise-constant spectrum up to `x`, bin j spanning [j - 0.5, j + 0.5).
    let cumulative = |x: f64| {
        let u = (x + 0.5).clamp(0.0, extended.len() as f64);
        let j = (u.floor() as usize).min(extended.len() - 1);
        prefix[j] + (u - j as f64) * extended[j]
    };

    (0..len)
        .map(|k| {
            let x = (k + margin) as f64;
            ((cumulative(x + half) - cumulative(x - half)) / width).max(0.0)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use rand::{Rng, SeedableRng};

    use super::*;
    use crate::error::MorphError;

    fn analyzer(sample_rate: u32) -> FrameAnalyzer {
        FrameAnalyzer::new(AnalysisConfig::for_sample_rate(sample_rate)).unwrap()
    }

    fn sine(freq: f64, amplitude: f32, sample_rate: u32, len: usize) -> Waveform {
        let samples = (0..len)
            .map(|i| amplitude * (TAU * freq * i as f64 / sample_rate as f64).sin() as f32)
            .collect();
        Waveform::new(samples, sample_rate)
    }

    fn noise(amplitude: f32, sample_rate: u32, len: usize, seed: u64) -> Waveform {
        let mut rng = rand_pcg::Pcg32::seed_from_u64(seed);
        let samples = (0..len).map(|_| rng.gen_range(-amplitude..amplitude)).collect();
        Waveform::new(samples, sample_rate)
    }

    #[test]
    fn frames_cover_whole_waveform() {
        let analyzer = analyzer(16000);
        let analysis = analyzer.analyze(&sine(220.0, 0.5, 16000, 16000 + 100)).unwrap();
        assert_eq!(analysis.len(), (16000 + 100) / 256 + 1);
        assert_eq!(analysis.num_samples, 16100);
        let bins = analyzer.config().num_bins();
        for record in &analysis.records {
            assert_eq!(record.envelope.len(), bins);
            assert_eq!(record.aperiodicity.len(), 5);
            assert!(record.envelope.iter().all(|&p| p >= 0.0 && p.is_finite()));
        }
    }

    #[test]
    fn sine_is_voiced_at_its_frequency() {
        let analysis = analyzer(16000).analyze(&sine(220.0, 0.5, 16000, 16000)).unwrap();
        let middle = &analysis.records[10..analysis.len() - 10];
        for record in middle {
            assert!((record.f0 - 220.0).abs() < 1.0, "f0 {}", record.f0);
            assert!(record.aperiodicity[0] < 0.1, "{:?}", record.aperiodicity);
        }
    }

    #[test]
    fn envelope_power_tracks_signal_power() {
        let analysis = analyzer(16000).analyze(&sine(220.0, 0.5, 16000, 16000)).unwrap();
        let record = &analysis.records[30];
        // A sine of amplitude 0.5 carries 0.125 of power.
        assert!((record.power() / 0.125 - 1.0).abs() < 0.1, "{}", record.power());

        let analysis = analyzer(16000).analyze(&noise(0.5, 16000, 16000, 3)).unwrap();
        let variance = 0.25 / 3.0;
        let record = &analysis.records[30];
        assert!((record.power() / variance - 1.0).abs() < 0.15);
    }

    #[test]
    fn noise_is_unvoiced_and_aperiodic() {
        let analysis = analyzer(16000).analyze(&noise(0.5, 16000, 16000, 11)).unwrap();
        let voiced = analysis.voiced_frames();
        assert!(voiced * 10 < analysis.len(), "{} voiced", voiced);
        for record in analysis.records.iter().filter(|r| !r.is_voiced()) {
            assert!(record.aperiodicity.iter().all(|&a| a == 1.0));
        }
    }

    #[test]
    fn quiet_frames_are_unvoiced() {
        let analysis = analyzer(16000).analyze(&sine(220.0, 1e-5, 16000, 8000)).unwrap();
        assert_eq!(analysis.voiced_frames(), 0);
        assert!(analysis.records.iter().all(|r| r.energy_db() < -60.0));
    }

    #[test]
    fn rejects_unusable_audio() {
        let analyzer = analyzer(16000);
        for waveform in [
            Waveform::new(vec![], 16000),
            Waveform::new(vec![0.0; 16000], 16000),
            Waveform::new(vec![0.1; 500], 16000),
        ] {
            assert!(matches!(
                analyzer.analyze(&waveform),
                Err(MorphError::InvalidAudio { .. })
            ));
        }
    }

    #[test]
    fn cancelled_before_first_batch() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let result = analyzer(16000).analyze_with(&sine(220.0, 0.5, 16000, 16000), &cancel);
        assert!(matches!(result, Err(MorphError::Cancelled)));
    }

    #[test]
    fn smoothing_preserves_flat_spectra_and_sign() {
        let flat = vec![2.0; 65];
        for p in smooth_power(&flat, 7.3) {
            assert!((p - 2.0).abs() < 1e-12);
        }
        let mut line = vec![0.0; 65];
        line[20] = 10.0;
        let smoothed = smooth_power(&line, 5.0);
        assert!(smoothed.iter().all(|&p| p >= 0.0));
        assert!((smoothed.iter().sum::<f64>() - 10.0).abs() < 1e-9);
        assert!((smoothed[20] - 2.0).abs() < 1e-12);
    }

    #[test]
    fn bands_are_monotonic() {
        let config = AnalysisConfig::for_sample_rate(16000);
        let map = band_map(&config);
        assert_eq!(map[0], 0);
        assert_eq!(*map.last().unwrap(), config.aperiodicity_bands - 1);
        assert!(map.windows(2).all(|w| w[0] <= w[1]));
    }
}
