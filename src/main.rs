use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use voimorph::{
    wav, AnalysisConfig, FrameFilter, MorphConfig, ProfileBuilder, VoiceMorpher, VoiceProfile,
    Waveform,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Morph the timbre of a vocal toward an enrolled voice")]
struct Cli {
    /// Log at debug level (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build a voice profile from enrollment clips
    Enroll {
        /// Enrollment WAV files
        #[arg(required = true)]
        clips: Vec<PathBuf>,

        /// Profile JSON to write
        #[arg(short, long)]
        output: PathBuf,

        /// Analysis configuration JSON; defaults follow the clips' sample rate
        #[arg(long)]
        config: Option<PathBuf>,

        /// Keep unvoiced but audible frames (whispered or breathy takes)
        #[arg(long)]
        allow_unvoiced: bool,

        /// Minimum number of usable frames
        #[arg(long, default_value_t = voimorph::profile::DEFAULT_MIN_FRAMES)]
        min_frames: usize,
    },
    /// Morph a vocal toward a profile
    Morph {
        input: PathBuf,
        output: PathBuf,

        #[arg(short, long)]
        profile: PathBuf,

        /// Blend strength in [0, 1]
        #[arg(short, long, default_value_t = 0.5)]
        strength: f64,

        /// Noise seed
        #[arg(long)]
        seed: Option<u64>,

        /// Scale the output to 0.95 peak
        #[arg(long)]
        normalize: bool,
    },
    /// Analyze and resynthesize without morphing
    Resynth {
        input: PathBuf,
        output: PathBuf,

        #[arg(long)]
        config: Option<PathBuf>,

        #[arg(long)]
        normalize: bool,
    },
    /// Print a profile summary
    Inspect { profile: PathBuf },
}

const NORMALIZED_PEAK: f32 = 0.95;

fn main() -> Result<()> {
    let cli = Cli::parse();
    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    match cli.command {
        Command::Enroll {
            clips,
            output,
            config,
            allow_unvoiced,
            min_frames,
        } => enroll(&clips, &output, config.as_deref(), allow_unvoiced, min_frames),
        Command::Morph {
            input,
            output,
            profile,
            strength,
            seed,
            normalize,
        } => {
            let profile = VoiceProfile::load(&profile)
                .with_context(|| format!("failed to load profile {}", profile.display()))?;
            let morph = MorphConfig::new(strength)?;
            let waveform = load_wav(&input)?;
            let mut morpher = VoiceMorpher::for_profile(&profile)?;
            if let Some(seed) = seed {
                morpher = morpher.with_seed(seed);
            }
            let result = morpher.morph(&waveform, &profile, &morph)?;
            save_wav(&output, result, normalize)
        }
        Command::Resynth {
            input,
            output,
            config,
            normalize,
        } => {
            let waveform = load_wav(&input)?;
            let config = load_config(config.as_deref(), waveform.sample_rate())?;
            let result = VoiceMorpher::new(config)?.resynthesize(&waveform)?;
            save_wav(&output, result, normalize)
        }
        Command::Inspect { profile } => {
            let profile = VoiceProfile::load(&profile)
                .with_context(|| format!("failed to load profile {}", profile.display()))?;
            let characteristics = profile.characteristics();
            println!("configuration: {}", profile.fingerprint());
            println!("codebook entries: {}", profile.len());
            println!("clips: {}", characteristics.clips);
            println!("enrollment audio: {:.1} s", characteristics.duration_secs);
            match characteristics.mean_f0_hz {
                Some(f0) => println!("mean F0: {:.1} Hz", f0),
                None => println!("mean F0: unvoiced"),
            }
            println!("brightness: {:.3}", characteristics.brightness);
            Ok(())
        }
    }
}

fn enroll(
    clips: &[PathBuf],
    output: &Path,
    config: Option<&Path>,
    allow_unvoiced: bool,
    min_frames: usize,
) -> Result<()> {
    let waveforms = clips
        .iter()
        .map(|path| load_wav(path))
        .collect::<Result<Vec<_>>>()?;
    let Some(sample_rate) = waveforms.first().map(Waveform::sample_rate) else {
        bail!("no enrollment clips given");
    };
    if let Some((path, w)) = clips
        .iter()
        .zip(&waveforms)
        .find(|(_, w)| w.sample_rate() != sample_rate)
    {
        bail!(
            "{} is {} Hz but the first clip is {} Hz",
            path.display(),
            w.sample_rate(),
            sample_rate
        );
    }

    let filter = if allow_unvoiced {
        FrameFilter::Audible
    } else {
        FrameFilter::Voiced
    };
    let mut builder = ProfileBuilder::new(load_config(config, sample_rate)?)?
        .frame_filter(filter)
        .min_frames(min_frames);
    for (path, waveform) in clips.iter().zip(&waveforms) {
        builder
            .add_sample(waveform)
            .with_context(|| format!("failed to analyze {}", path.display()))?;
    }
    let profile = builder.build()?;
    profile
        .save(output)
        .with_context(|| format!("failed to write {}", output.display()))?;
    tracing::info!(path = %output.display(), entries = profile.len(), "saved profile");
    Ok(())
}

fn load_config(path: Option<&Path>, sample_rate: u32) -> Result<AnalysisConfig> {
    let config = match path {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            serde_json::from_str(&text)
                .with_context(|| format!("failed to parse {}", path.display()))?
        }
        None => AnalysisConfig::for_sample_rate(sample_rate),
    };
    config.validate()?;
    Ok(config)
}

fn load_wav(path: &Path) -> Result<Waveform> {
    wav::load(path).with_context(|| format!("failed to read {}", path.display()))
}

fn save_wav(path: &Path, mut waveform: Waveform, normalize: bool) -> Result<()> {
    if normalize {
        waveform.normalize_peak(NORMALIZED_PEAK);
    }
    wav::save(path, &waveform).with_context(|| format!("failed to write {}", path.display()))?;
    tracing::info!(
        path = %path.display(),
        duration = waveform.duration(),
        "wrote output"
    );
    Ok(())
}
