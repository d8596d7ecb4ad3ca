//! Spectral timbre morphing of vocal recordings.
//!
//! A vocal is analyzed into F0, band aperiodicity and a smoothed power
//! envelope per frame. Envelopes are matched against a codebook of
//! mel-cepstra enrolled from the target speaker, blended toward the nearest
//! entry, and the waveform is rebuilt from the original pitch and
//! aperiodicity with the new envelopes.

pub mod analysis;
pub mod api;
pub mod cancel;
pub mod cepstrum;
pub mod config;
pub mod error;
pub mod fft;
pub mod float;
pub mod morph;
pub mod pitch_detection;
pub mod profile;
pub mod synthesis;
pub mod wav;
pub mod waveform;
pub mod windows;

pub use analysis::{Analysis, AnalysisRecord, FrameAnalyzer};
pub use api::{build_profile, VoiceMorpher};
pub use cancel::CancelToken;
pub use cepstrum::{CepstralTransform, CepstralVector};
pub use config::{AnalysisConfig, Fingerprint, MorphConfig};
pub use error::{MorphError, Result};
pub use morph::{MorphEngine, MorphedFrame};
pub use profile::{FrameFilter, ProfileBuilder, VoiceCharacteristics, VoiceProfile};
pub use synthesis::Synthesizer;
pub use waveform::Waveform;

/// Root mean square of `buf`.
pub fn power<T: float::Float + std::iter::Sum>(buf: &[T]) -> T {
    if buf.is_empty() {
        return T::zero();
    }
    (buf.iter().map(|&x| x.powi(2)).sum::<T>() / T::index(buf.len())).sqrt()
}
