//! F0 estimation with the normalized square difference function (NSDF).

use rustfft::num_complex::Complex;

use crate::{fft::Fft, float::Float};

/// Fraction of the highest key maximum a peak must reach to be picked.
const PEAK_PICK_RATIO: f64 = 0.9;

/// Maximum relative deviation accepted from instantaneous-frequency refinement.
const REFINE_TOLERANCE: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PitchEstimate {
    /// Fundamental frequency in Hz.
    pub frequency: f64,
    /// NSDF value at the picked peak; 1 is perfectly periodic.
    pub clarity: f64,
}

/// NSDF pitch tracker for frames of one fixed length.
pub struct PitchTracker<T: Float> {
    fft: Fft<T>,
    frame_len: usize,
    sample_rate: f64,
    min_lag: usize,
    max_lag: usize,
    threshold: T,
}

impl<T: Float> PitchTracker<T> {
    /// `frame_len` must exceed `2 * (max_lag + 2)`.
    pub fn new(
        frame_len: usize,
        sample_rate: f64,
        min_lag: usize,
        max_lag: usize,
        threshold: T,
    ) -> Self {
        Self {
            // Zero padding to twice the frame keeps the autocorrelation linear.
            fft: Fft::new(frame_len * 2),
            frame_len,
            sample_rate,
            min_lag: min_lag.max(1),
            max_lag: max_lag.min(frame_len / 2 - 3),
            threshold,
        }
    }

    /// Returns `None` for frames without a clear periodicity in the lag range.
    pub fn estimate(&self, buf: &[T]) -> Option<PitchEstimate> {
        let buf = &buf[..buf.len().min(self.frame_len)];
        let nsdf = compute_nsdf(&self.fft, buf);
        let mut peaks = compute_peaks(&nsdf[..(self.max_lag + 3).min(nsdf.len())]);
        let min_lag = T::index(self.min_lag);
        let max_lag = T::index(self.max_lag);
        peaks.retain(|p| min_lag <= p.0 && p.0 <= max_lag);

        let max_peak = peaks.iter().fold(T::zero(), |a, p| a.max(p.1));
        if max_peak < self.threshold || max_peak <= T::zero() {
            return None;
        }
        let peak = peaks
            .iter()
            .find(|p| max_peak * T::lit(PEAK_PICK_RATIO) <= p.1)?;
        let lag = peak.0.to_f64()?;
        Some(PitchEstimate {
            frequency: self.sample_rate / lag,
            clarity: peak.1.to_f64()?.min(1.0),
        })
    }
}

/// Normalized Square Difference Function for lags `0..buf.len()`.
///
/// `fft` must be at least twice as long as `buf`.
pub fn compute_nsdf<T: Float>(fft: &Fft<T>, buf: &[T]) -> Vec<T> {
    let mut spectrum = fft.real_spectrum(buf);
    for x in &mut spectrum {
        *x = Complex::from(x.norm_sqr());
    }
    let acf = fft.real_signal(spectrum);

    let len = buf.len();
    let mut nsdf = vec![T::zero(); len];
    let mut m = T::epsilon();
    for i in 0..len {
        let inv = len - i - 1;
        m = m + buf[i].powi(2) + buf[inv].powi(2);
        nsdf[inv] = T::lit(2.0) * acf[inv] / m;
    }

    nsdf
}

/// Key maxima of the NSDF after its first negative excursion, as
/// `(lag, value)` pairs refined by parabolic interpolation.
pub fn compute_peaks<T: Float>(nsdf: &[T]) -> Vec<(T, T)> {
    let zero = T::zero();
    let mut peak = (zero, zero);
    let mut peaks = Vec::with_capacity(32);
    let mut is_first = true;

    for i in 0..nsdf.len().saturating_sub(3) {
        if nsdf[i + 1] < zero {
            if zero < peak.1 {
                peaks.push(peak);
                peak = (zero, zero);
            }
            is_first = false;
            continue;
        }

        if !is_first && nsdf[i + 1] - nsdf[i] > zero && nsdf[i + 2] - nsdf[i + 1] <= zero {
            let t = T::lit(2.0) * (nsdf[i] - T::lit(2.0) * nsdf[i + 1] + nsdf[i + 2]);
            let (d, c) = if t == zero {
                (zero, nsdf[i + 1])
            } else {
                let d = (nsdf[i] - nsdf[i + 2]) / t;
                (d, nsdf[i + 1] - t * d * d / T::lit(4.0))
            };
            if peak.1 < c {
                peak = (T::index(i + 1) + d, c);
            }
        }
    }
    if zero < peak.1 {
        peaks.push(peak);
    }
    peaks
}

/// Refines `estimate` (Hz) from the phase advance of the strongest bin near it
/// between two spectra whose windows start one sample apart.
///
/// Falls back to `estimate` when the refined value strays more than 10% from it.
pub fn refine_instantaneous_frequency<T: Float>(
    spectrum: &[Complex<T>],
    shifted: &[Complex<T>],
    estimate: f64,
    sample_rate: f64,
) -> f64 {
    let len = spectrum.len().min(shifted.len());
    if len < 4 || estimate <= 0.0 {
        return estimate;
    }
    let bin = (estimate * len as f64 / sample_rate).round() as usize;
    let lo = bin.saturating_sub(1).max(1);
    let hi = (bin + 1).min(len / 2 - 1);
    let Some(k) = (lo..=hi).max_by(|&a, &b| {
        spectrum[a]
            .norm_sqr()
            .partial_cmp(&spectrum[b].norm_sqr())
            .unwrap_or(std::cmp::Ordering::Equal)
    }) else {
        return estimate;
    };

    let advance = (shifted[k] * spectrum[k].conj()).arg();
    let Some(advance) = advance.to_f64() else {
        return estimate;
    };
    let refined = wrap_phase(advance) * sample_rate / std::f64::consts::TAU;
    if refined > 0.0 && (refined - estimate).abs() <= estimate * REFINE_TOLERANCE {
        refined
    } else {
        estimate
    }
}

/// Wraps a phase into `[-PI, PI)`.
pub fn wrap_phase<T: Float>(phase: T) -> T {
    if phase >= T::zero() {
        (phase + T::PI()) % T::TAU() - T::PI()
    } else {
        (phase - T::PI()) % T::TAU() + T::PI()
    }
}
