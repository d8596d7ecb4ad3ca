//! Morphing engine: per-frame nearest-neighbour timbre transfer.

use rayon::prelude::*;

use crate::{
    analysis::AnalysisRecord,
    cancel::{CancelToken, FRAME_BATCH},
    cepstrum::{CepstralTransform, CepstralVector},
    config::{AnalysisConfig, MorphConfig},
    error::{MorphError, Result},
    profile::VoiceProfile,
};

/// Result of morphing one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct MorphedFrame {
    pub envelope: Vec<f64>,
    /// Blended cepstrum, or the source cepstrum for bypassed frames.
    pub cepstrum: CepstralVector,
    /// Codebook index the frame was matched to; `None` when bypassed.
    pub matched: Option<usize>,
}

/// Matches source frames against a profile and moves their envelopes toward
/// the matched entries.
///
/// Holds only a shared reference to the profile, so any number of engines can
/// search the same codebook at once.
pub struct MorphEngine<'p> {
    config: AnalysisConfig,
    transform: CepstralTransform,
    profile: &'p VoiceProfile,
}

impl<'p> MorphEngine<'p> {
    /// Fails with [`MorphError::ProfileConfigMismatch`] if `profile` was built
    /// under a different frame layout or cepstral order.
    pub fn new(config: &AnalysisConfig, profile: &'p VoiceProfile) -> Result<Self> {
        config.validate()?;
        config.check_compatible(profile.config())?;
        Ok(Self {
            config: config.clone(),
            transform: CepstralTransform::new(config),
            profile,
        })
    }

    pub fn profile(&self) -> &VoiceProfile {
        self.profile
    }

    /// Morphed envelopes for every frame, in frame order.
    pub fn morph(
        &self,
        records: &[AnalysisRecord],
        cepstra: &[CepstralVector],
        morph: &MorphConfig,
    ) -> Result<Vec<Vec<f64>>> {
        Ok(self
            .morph_frames(records, cepstra, morph, &CancelToken::new())?
            .into_iter()
            .map(|frame| frame.envelope)
            .collect())
    }

    pub fn morph_frames(
        &self,
        records: &[AnalysisRecord],
        cepstra: &[CepstralVector],
        morph: &MorphConfig,
        cancel: &CancelToken,
    ) -> Result<Vec<MorphedFrame>> {
        morph.validate()?;
        if records.len() != cepstra.len() {
            return Err(MorphError::FeatureLengthMismatch {
                expected: records.len(),
                actual: cepstra.len(),
            });
        }
        let order = self.transform.order();
        if let Some(cepstrum) = cepstra.iter().find(|c| c.order() != order) {
            return Err(MorphError::FeatureLengthMismatch {
                expected: order,
                actual: cepstrum.order(),
            });
        }
        let num_bins = self.transform.num_bins();
        if let Some(record) = records.iter().find(|r| r.envelope.len() != num_bins) {
            return Err(MorphError::FeatureLengthMismatch {
                expected: num_bins,
                actual: record.envelope.len(),
            });
        }

        let mut frames = Vec::with_capacity(records.len());
        for start in (0..records.len()).step_by(FRAME_BATCH) {
            cancel.check()?;
            let end = (start + FRAME_BATCH).min(records.len());
            let batch: Vec<_> = records[start..end]
                .par_iter()
                .zip(&cepstra[start..end])
                .map(|(record, cepstrum)| self.morph_frame(record, cepstrum, morph.strength))
                .collect();
            frames.extend(batch);
        }

        tracing::debug!(
            frames = frames.len(),
            matched = frames.iter().filter(|f| f.matched.is_some()).count(),
            strength = morph.strength,
            "morphed envelopes"
        );
        Ok(frames)
    }

    /// Morphs a single frame. Unvoiced and sub-floor frames pass through unchanged.
    pub fn morph_frame(
        &self,
        record: &AnalysisRecord,
        cepstrum: &CepstralVector,
        strength: f64,
    ) -> MorphedFrame {
        if !record.is_voiced() || record.energy_db() < self.config.energy_floor_db {
            return MorphedFrame {
                envelope: record.envelope.clone(),
                cepstrum: cepstrum.clone(),
                matched: None,
            };
        }

        let (index, _) = self.profile.nearest(cepstrum);
        let blended = cepstrum.blend(&self.profile.codebook()[index], strength);

        // Invert only the change in shape; detail above order K stays the source's.
        let delta: Vec<f64> = std::iter::once(0.0)
            .chain(
                blended
                    .shape()
                    .iter()
                    .zip(cepstrum.shape())
                    .map(|(b, s)| b - s),
            )
            .collect();
        let envelope = record
            .envelope
            .iter()
            .zip(self.transform.log_envelope(&delta))
            .map(|(&p, d)| p * d.exp())
            .collect();

        MorphedFrame {
            envelope,
            cepstrum: blended,
            matched: Some(index),
        }
    }
}
