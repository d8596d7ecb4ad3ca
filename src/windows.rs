use crate::float::Float;

/// Periodic Hann window; overlapping copies at `size / 4` hops sum to a constant.
pub fn hann_window<T: Float>(size: usize) -> Vec<T> {
    (0..size)
        .map(|i| T::lit(0.5) * (T::one() - (T::index(i) * T::TAU() / T::index(size)).cos()))
        .collect()
}

pub fn apply_window<T: Float>(window: &[T], buf: impl Iterator<Item = T>) -> Vec<T> {
    window.iter().zip(buf).map(|(&w, x)| w * x).collect()
}

/// Sum of squared window values, the power gain of windowing white noise.
pub fn window_energy<T: Float>(window: &[T]) -> T {
    window.iter().fold(T::zero(), |acc, &w| acc + w * w)
}
