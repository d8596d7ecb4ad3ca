//! Error types for the morphing pipeline.

use thiserror::Error;

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, MorphError>;

/// Errors that can occur while analyzing, enrolling, morphing or synthesizing.
#[derive(Debug, Error)]
pub enum MorphError {
    /// Input waveform cannot be analyzed.
    #[error("invalid audio: {reason}")]
    InvalidAudio {
        /// What is wrong with the waveform.
        reason: String,
    },

    /// Too few usable frames survived enrollment filtering.
    #[error("insufficient enrollment: {frames} usable frames, at least {required} required")]
    InsufficientEnrollment {
        /// Frames that survived filtering.
        frames: usize,
        /// Minimum codebook size.
        required: usize,
    },

    /// Profile was built under an analysis configuration incompatible with the current one.
    #[error("voice profile built for {found}, analysis configured for {expected}")]
    ProfileConfigMismatch {
        /// Fingerprint of the active analysis configuration.
        expected: String,
        /// Fingerprint recorded in the profile.
        found: String,
    },

    /// Synthesis inputs disagree on frame count or resolution.
    #[error("synthesis length mismatch: expected {expected}, got {actual}")]
    SynthesisLengthMismatch {
        /// Expected length.
        expected: usize,
        /// Actual length.
        actual: usize,
    },

    /// Morphing inputs disagree on frame count or coefficient order.
    #[error("feature length mismatch: expected {expected}, got {actual}")]
    FeatureLengthMismatch {
        /// Expected length.
        expected: usize,
        /// Actual length.
        actual: usize,
    },

    /// Configuration value out of range.
    #[error("invalid config '{name}': {message}")]
    InvalidConfig {
        /// Parameter name.
        name: String,
        /// Error message.
        message: String,
    },

    /// Deserialized profile violates codebook invariants.
    #[error("invalid voice profile: {message}")]
    InvalidProfile {
        /// Error message.
        message: String,
    },

    /// The caller cancelled the run between frame batches.
    #[error("operation cancelled")]
    Cancelled,

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Profile (de)serialization error.
    #[error("profile format error: {0}")]
    Json(#[from] serde_json::Error),

    /// WAV decoding or encoding error.
    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),
}

impl MorphError {
    /// Creates an invalid audio error.
    pub fn invalid_audio(reason: impl Into<String>) -> Self {
        Self::InvalidAudio {
            reason: reason.into(),
        }
    }

    /// Creates an invalid config error.
    pub fn invalid_config(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Creates an invalid profile error.
    pub fn invalid_profile(message: impl Into<String>) -> Self {
        Self::InvalidProfile {
            message: message.into(),
        }
    }

    /// Whether the caller can do something about this error (supply other audio,
    /// rebuild the profile, retry). Length mismatches are implementation bugs.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            Self::SynthesisLengthMismatch { .. } | Self::FeatureLengthMismatch { .. }
        )
    }
}
