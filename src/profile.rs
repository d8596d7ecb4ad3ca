//! Target-voice codebook built from enrollment clips.

use std::{
    fs::File,
    io::{BufReader, BufWriter, Write},
    ops::RangeInclusive,
    path::Path,
};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{
    analysis::{AnalysisRecord, FrameAnalyzer},
    cancel::CancelToken,
    cepstrum::{CepstralTransform, CepstralVector},
    config::{AnalysisConfig, Fingerprint},
    error::{MorphError, Result},
    waveform::Waveform,
};

const PROFILE_VERSION: u32 = 1;

/// Default floor on the number of usable frames in a codebook.
pub const DEFAULT_MIN_FRAMES: usize = 32;

/// Enrollment clip lengths outside this range still work but are logged.
const RECOMMENDED_CLIP_SECONDS: RangeInclusive<f64> = 3.0..=30.0;

const BRIGHTNESS_LOW_HZ: f64 = 1000.0;
const BRIGHTNESS_HIGH_HZ: f64 = 2000.0;

/// Which enrollment frames may enter the codebook. Frames below the energy
/// floor never do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameFilter {
    /// Voiced frames only.
    #[default]
    Voiced,
    /// Every audible frame, for breathy or whispered enrollment material.
    Audible,
}

/// Summary statistics of the enrolled voice.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct VoiceCharacteristics {
    /// Mean F0 over voiced codebook frames.
    pub mean_f0_hz: Option<f64>,
    /// Mean magnitude above 2 kHz over mean magnitude below 1 kHz.
    pub brightness: f64,
    /// Codebook entries.
    pub frames: usize,
    /// Enrollment clips that contributed.
    pub clips: usize,
    /// Total enrollment audio, in seconds.
    pub duration_secs: f64,
}

#[derive(Serialize, Deserialize)]
struct ProfileData {
    version: u32,
    config: AnalysisConfig,
    codebook: Vec<CepstralVector>,
    #[serde(default)]
    characteristics: VoiceCharacteristics,
}

/// An immutable, non-empty codebook of target-voice cepstral vectors and the
/// analysis configuration it was built under.
///
/// Lookups are pure reads, so one profile can serve any number of concurrent
/// morph runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ProfileData", into = "ProfileData")]
pub struct VoiceProfile {
    config: AnalysisConfig,
    codebook: Vec<CepstralVector>,
    characteristics: VoiceCharacteristics,
}

impl VoiceProfile {
    /// Wraps an existing codebook, checking it is non-empty and matches the configured order.
    pub fn from_codebook(config: AnalysisConfig, codebook: Vec<CepstralVector>) -> Result<Self> {
        config.validate()?;
        if codebook.is_empty() {
            return Err(MorphError::invalid_profile("codebook is empty"));
        }
        if let Some(i) = codebook
            .iter()
            .position(|c| c.order() != config.cepstral_order)
        {
            return Err(MorphError::invalid_profile(format!(
                "entry {} has {} coefficients, expected {}",
                i,
                codebook[i].order(),
                config.cepstral_order
            )));
        }
        if codebook
            .iter()
            .any(|c| c.coefficients().iter().any(|x| !x.is_finite()))
        {
            return Err(MorphError::invalid_profile("codebook contains non-finite values"));
        }
        let characteristics = VoiceCharacteristics {
            frames: codebook.len(),
            ..Default::default()
        };
        Ok(Self {
            config,
            codebook,
            characteristics,
        })
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    pub fn fingerprint(&self) -> Fingerprint {
        self.config.fingerprint()
    }

    pub fn codebook(&self) -> &[CepstralVector] {
        &self.codebook
    }

    pub fn len(&self) -> usize {
        self.codebook.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codebook.is_empty()
    }

    pub fn characteristics(&self) -> &VoiceCharacteristics {
        &self.characteristics
    }

    /// Index of and distance to the entry closest to `query` on coefficients 1..K.
    /// Ties resolve to the lowest index.
    pub fn nearest(&self, query: &CepstralVector) -> (usize, f64) {
        let mut best = (0, f64::INFINITY);
        for (i, entry) in self.codebook.iter().enumerate() {
            let d = entry.squared_distance(query);
            if d < best.1 {
                best = (i, d);
            }
        }
        (best.0, best.1.sqrt())
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.flush()?;
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }
}

impl TryFrom<ProfileData> for VoiceProfile {
    type Error = MorphError;

    fn try_from(data: ProfileData) -> Result<Self> {
        if data.version != PROFILE_VERSION {
            return Err(MorphError::invalid_profile(format!(
                "unsupported profile version {}",
                data.version
            )));
        }
        let mut profile = VoiceProfile::from_codebook(data.config, data.codebook)?;
        profile.characteristics = data.characteristics;
        Ok(profile)
    }
}

impl From<VoiceProfile> for ProfileData {
    fn from(profile: VoiceProfile) -> Self {
        Self {
            version: PROFILE_VERSION,
            config: profile.config,
            codebook: profile.codebook,
            characteristics: profile.characteristics,
        }
    }
}

/// Accumulates enrollment clips into a [`VoiceProfile`].
pub struct ProfileBuilder {
    analyzer: FrameAnalyzer,
    transform: CepstralTransform,
    filter: FrameFilter,
    min_frames: usize,
    cancel: CancelToken,
    codebook: Vec<CepstralVector>,
    f0_sum: f64,
    voiced: usize,
    low_magnitude: f64,
    high_magnitude: f64,
    clips: usize,
    duration: f64,
}

impl ProfileBuilder {
    pub fn new(config: AnalysisConfig) -> Result<Self> {
        let transform = CepstralTransform::new(&config);
        Ok(Self {
            analyzer: FrameAnalyzer::new(config)?,
            transform,
            filter: FrameFilter::default(),
            min_frames: DEFAULT_MIN_FRAMES,
            cancel: CancelToken::new(),
            codebook: Vec::new(),
            f0_sum: 0.0,
            voiced: 0,
            low_magnitude: 0.0,
            high_magnitude: 0.0,
            clips: 0,
            duration: 0.0,
        })
    }

    pub fn frame_filter(mut self, filter: FrameFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn min_frames(mut self, min_frames: usize) -> Self {
        self.min_frames = min_frames.max(1);
        self
    }

    pub fn cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Frames accepted so far.
    pub fn frames(&self) -> usize {
        self.codebook.len()
    }

    /// Analyzes one clip and adds its usable frames; returns how many were kept.
    ///
    /// Digitally silent clips are skipped rather than rejected.
    pub fn add_sample(&mut self, waveform: &Waveform) -> Result<usize> {
        if !waveform.is_empty() && waveform.is_silent() {
            tracing::warn!(
                duration = waveform.duration(),
                "skipping silent enrollment clip"
            );
            return Ok(0);
        }
        if !RECOMMENDED_CLIP_SECONDS.contains(&waveform.duration()) {
            tracing::warn!(
                duration = waveform.duration(),
                "enrollment clip outside the recommended 3-30 s"
            );
        }

        let analysis = self.analyzer.analyze_with(waveform, &self.cancel)?;
        let config = self.analyzer.config();
        let accepted: Vec<(&AnalysisRecord, CepstralVector)> = analysis
            .records
            .par_iter()
            .filter(|r| self.accepts(r))
            .map(|r| (r, self.transform.extract(&r.envelope)))
            .collect();

        let low_bin = (BRIGHTNESS_LOW_HZ / config.bin_hz()) as usize;
        let high_bin = (BRIGHTNESS_HIGH_HZ / config.bin_hz()).ceil() as usize;
        let kept = accepted.len();
        for (record, cepstrum) in accepted {
            if record.is_voiced() {
                self.f0_sum += record.f0;
                self.voiced += 1;
            }
            self.low_magnitude += mean_magnitude(record.envelope.get(..low_bin));
            self.high_magnitude += mean_magnitude(record.envelope.get(high_bin + 1..));
            self.codebook.push(cepstrum);
        }

        self.clips += 1;
        self.duration += waveform.duration();
        tracing::debug!(
            frames = analysis.len(),
            kept,
            total = self.codebook.len(),
            "enrollment clip analyzed"
        );
        Ok(kept)
    }

    fn accepts(&self, record: &AnalysisRecord) -> bool {
        record.energy_db() >= self.analyzer.config().energy_floor_db
            && (self.filter == FrameFilter::Audible || record.is_voiced())
    }

    pub fn build(self) -> Result<VoiceProfile> {
        if self.codebook.len() < self.min_frames {
            return Err(MorphError::InsufficientEnrollment {
                frames: self.codebook.len(),
                required: self.min_frames,
            });
        }
        let characteristics = VoiceCharacteristics {
            mean_f0_hz: (self.voiced > 0).then(|| self.f0_sum / self.voiced as f64),
            brightness: self.high_magnitude / (self.low_magnitude + 1e-10),
            frames: self.codebook.len(),
            clips: self.clips,
            duration_secs: self.duration,
        };
        tracing::info!(
            frames = characteristics.frames,
            clips = characteristics.clips,
            mean_f0 = ?characteristics.mean_f0_hz,
            "voice profile built"
        );
        let mut profile = VoiceProfile::from_codebook(self.analyzer.config().clone(), self.codebook)?;
        profile.characteristics = characteristics;
        Ok(profile)
    }
}

fn mean_magnitude(envelope: Option<&[f64]>) -> f64 {
    match envelope {
        Some(bins) if !bins.is_empty() => {
            bins.iter().map(|p| p.sqrt()).sum::<f64>() / bins.len() as f64
        }
        _ => 0.0,
    }
}
