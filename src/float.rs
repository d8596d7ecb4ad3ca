use rustfft::{num_traits, FftNum};

pub trait Float: FftNum + num_traits::Float + num_traits::FloatConst {
    /// Converts an `f64` literal into `Self`.
    fn lit(x: f64) -> Self {
        Self::from_f64(x).unwrap_or_else(Self::nan)
    }

    /// Converts an index or count into `Self`.
    fn index(i: usize) -> Self {
        Self::from_usize(i).unwrap_or_else(Self::nan)
    }
}

impl<T: FftNum + num_traits::Float + num_traits::FloatConst> Float for T {}
