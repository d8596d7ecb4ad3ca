//! One-call pipeline entry points.

use rayon::prelude::*;

use crate::{
    analysis::{Analysis, FrameAnalyzer},
    cancel::CancelToken,
    cepstrum::{CepstralTransform, CepstralVector},
    config::{AnalysisConfig, MorphConfig},
    error::Result,
    morph::MorphEngine,
    profile::{FrameFilter, ProfileBuilder, VoiceProfile},
    synthesis::Synthesizer,
    waveform::Waveform,
};

/// Analysis, feature extraction and synthesis for one configuration.
///
/// ```no_run
/// # use voimorph::{AnalysisConfig, MorphConfig, VoiceMorpher, build_profile, FrameFilter, Waveform};
/// # fn run(vocal: Waveform, clips: Vec<Waveform>) -> voimorph::Result<()> {
/// let config = AnalysisConfig::for_sample_rate(vocal.sample_rate());
/// let profile = build_profile(config.clone(), &clips, FrameFilter::Voiced)?;
/// let morpher = VoiceMorpher::new(config)?;
/// let output = morpher.morph(&vocal, &profile, &MorphConfig::new(0.7)?)?;
/// # Ok(())
/// # }
/// ```
pub struct VoiceMorpher {
    analyzer: FrameAnalyzer,
    transform: CepstralTransform,
    synthesizer: Synthesizer,
}

impl VoiceMorpher {
    pub fn new(config: AnalysisConfig) -> Result<Self> {
        Ok(Self {
            transform: CepstralTransform::new(&config),
            synthesizer: Synthesizer::new(config.clone())?,
            analyzer: FrameAnalyzer::new(config)?,
        })
    }

    /// A morpher using the configuration `profile` was built under.
    pub fn for_profile(profile: &VoiceProfile) -> Result<Self> {
        Self::new(profile.config().clone())
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.synthesizer = self.synthesizer.with_seed(seed);
        self
    }

    pub fn config(&self) -> &AnalysisConfig {
        self.analyzer.config()
    }

    pub fn analyze(&self, waveform: &Waveform) -> Result<Analysis> {
        self.analyzer.analyze(waveform)
    }

    pub fn extract(&self, analysis: &Analysis) -> Vec<CepstralVector> {
        analysis
            .records
            .par_iter()
            .map(|r| self.transform.extract(&r.envelope))
            .collect()
    }

    pub fn profile_builder(&self) -> Result<ProfileBuilder> {
        ProfileBuilder::new(self.config().clone())
    }

    pub fn morph(
        &self,
        waveform: &Waveform,
        profile: &VoiceProfile,
        morph: &MorphConfig,
    ) -> Result<Waveform> {
        self.morph_with_cancel(waveform, profile, morph, &CancelToken::new())
    }

    /// Full pipeline: analyze, match against `profile`, blend and resynthesize.
    /// Output has exactly the input's length and sample rate.
    pub fn morph_with_cancel(
        &self,
        waveform: &Waveform,
        profile: &VoiceProfile,
        morph: &MorphConfig,
        cancel: &CancelToken,
    ) -> Result<Waveform> {
        morph.validate()?;
        let engine = MorphEngine::new(self.config(), profile)?;
        let analysis = self.analyzer.analyze_with(waveform, cancel)?;
        cancel.check()?;
        let cepstra = self.extract(&analysis);
        let frames = engine.morph_frames(&analysis.records, &cepstra, morph, cancel)?;
        let matched = frames.iter().filter(|f| f.matched.is_some()).count();
        let envelopes: Vec<_> = frames.into_iter().map(|f| f.envelope).collect();
        let output = self.synthesizer.synthesize_with(
            &analysis.records,
            &envelopes,
            analysis.num_samples,
            cancel,
        )?;
        tracing::info!(
            frames = analysis.len(),
            matched,
            strength = morph.strength,
            duration = output.duration(),
            "morphed waveform"
        );
        Ok(output)
    }

    /// Analysis followed by synthesis with the source envelopes.
    pub fn resynthesize(&self, waveform: &Waveform) -> Result<Waveform> {
        let analysis = self.analyze(waveform)?;
        let envelopes: Vec<_> = analysis
            .records
            .iter()
            .map(|r| r.envelope.clone())
            .collect();
        let output = self
            .synthesizer
            .synthesize(&analysis.records, &envelopes, analysis.num_samples)?;
        tracing::info!(
            frames = analysis.len(),
            duration = output.duration(),
            "resynthesized waveform"
        );
        Ok(output)
    }
}

/// Builds a profile from enrollment clips with the default frame floor.
pub fn build_profile(
    config: AnalysisConfig,
    clips: &[Waveform],
    filter: FrameFilter,
) -> Result<VoiceProfile> {
    let mut builder = ProfileBuilder::new(config)?.frame_filter(filter);
    for clip in clips {
        builder.add_sample(clip)?;
    }
    builder.build()
}
