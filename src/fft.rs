use std::sync::Arc;

use rustfft::num_complex::Complex;

use crate::float::Float;

/// A planned forward/inverse FFT pair of one fixed size.
///
/// Plans are shared behind `Arc`, so an `Fft` can be used from many
/// worker threads at once.
pub struct Fft<T: Float> {
    size: usize,
    forward: Arc<dyn rustfft::Fft<T>>,
    inverse: Arc<dyn rustfft::Fft<T>>,
}

impl<T: Float> Fft<T> {
    pub fn new(size: usize) -> Self {
        let mut planner = rustfft::FftPlanner::new();
        Self {
            size,
            forward: planner.plan_fft_forward(size),
            inverse: planner.plan_fft_inverse(size),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn forward(&self, buffer: &mut [Complex<T>]) {
        self.forward.process(buffer);
    }

    /// Unnormalized inverse transform; follow with [`fix_scale`].
    pub fn inverse(&self, buffer: &mut [Complex<T>]) {
        self.inverse.process(buffer);
    }

    /// Forward transform of a real buffer, zero-padded (or truncated) to the plan size.
    pub fn real_spectrum(&self, buf: &[T]) -> Vec<Complex<T>> {
        let mut spectrum: Vec<_> = buf
            .iter()
            .take(self.size)
            .map(|&x| Complex::new(x, T::zero()))
            .collect();
        spectrum.resize(self.size, Complex::new(T::zero(), T::zero()));
        self.forward(&mut spectrum);
        spectrum
    }

    /// Inverse transform back to a real buffer, scale included.
    pub fn real_signal(&self, mut spectrum: Vec<Complex<T>>) -> Vec<T> {
        self.inverse(&mut spectrum);
        fix_scale(&mut spectrum);
        spectrum.into_iter().map(|x| x.re).collect()
    }
}

pub fn fix_scale<T: Float>(buf: &mut [Complex<T>]) {
    let scale = T::one() / T::index(buf.len());
    for x in buf.iter_mut() {
        *x = *x * scale;
    }
}

/// Mirrors bins `1..len/2` onto the negative frequencies as complex conjugates.
pub fn fill_right_part_of_spectrum<T: Float>(spectrum: &mut [Complex<T>]) {
    let len = spectrum.len();
    for i in 1..(len + 1) / 2 {
        spectrum[len - i] = spectrum[i].conj();
    }
}

/// One-sided power spectrum `|X_k|^2` for `k = 0..=len/2`.
pub fn power_spectrum<T: Float>(spectrum: &[Complex<T>]) -> Vec<T> {
    spectrum[..spectrum.len() / 2 + 1]
        .iter()
        .map(|x| x.norm_sqr())
        .collect()
}
