use voimorph::{
    build_profile, AnalysisConfig, CancelToken, CepstralVector, FrameFilter, MorphConfig,
    MorphEngine, MorphError, VoiceMorpher, VoiceProfile, Waveform,
};

const RATE: u32 = 16000;

fn config() -> AnalysisConfig {
    AnalysisConfig::for_sample_rate(RATE)
}

mod signals {
    use std::f64::consts::TAU;

    use rand::{Rng, SeedableRng};
    use rand_pcg::Pcg32;

    use super::*;

    fn render(seconds: f64, seed: u64, dither: f64, f: impl Fn(f64) -> f64) -> Waveform {
        let mut rng = Pcg32::seed_from_u64(seed);
        let samples = (0..(seconds * RATE as f64) as usize)
            .map(|i| {
                let noise = if dither > 0.0 {
                    rng.gen_range(-dither..dither)
                } else {
                    0.0
                };
                (f(i as f64 / RATE as f64) + noise) as f32
            })
            .collect();
        Waveform::new(samples, RATE)
    }

    pub fn sine(freq: f64, amplitude: f64, seconds: f64) -> Waveform {
        render(seconds, 0, 0.0, |t| amplitude * (TAU * freq * t).sin())
    }

    /// Linear sweep from `from` to `to` Hz with a faint noise floor.
    pub fn sweep(from: f64, to: f64, seconds: f64) -> Waveform {
        let rate = (to - from) / seconds;
        render(seconds, 7, 1e-3, |t| {
            0.5 * (TAU * (from * t + 0.5 * rate * t * t)).sin()
        })
    }

    /// Harmonic tone with two formant-like peaks.
    pub fn vowel(f0: f64, formants: [f64; 2], seconds: f64) -> Waveform {
        render(seconds, 11, 1e-3, |t| {
            let s: f64 = (1..=24)
                .map(|h| {
                    let f = h as f64 * f0;
                    let gain = 0.05
                        + (-((f - formants[0]) / 250.0).powi(2)).exp()
                        + 0.6 * (-((f - formants[1]) / 350.0).powi(2)).exp();
                    gain * (TAU * f * t).sin()
                })
                .sum();
            0.2 * s
        })
    }

    pub fn noise(amplitude: f64, seconds: f64, seed: u64) -> Waveform {
        render(seconds, seed, amplitude, |_| 0.0)
    }

    pub fn silence(seconds: f64) -> Waveform {
        Waveform::new(vec![0.0; (seconds * RATE as f64) as usize], RATE)
    }
}

fn vowel_profile() -> VoiceProfile {
    build_profile(
        config(),
        &[
            signals::vowel(210.0, [400.0, 2300.0], 3.0),
            signals::vowel(190.0, [650.0, 1100.0], 3.0),
        ],
        FrameFilter::Voiced,
    )
    .unwrap()
}

fn block_rms(samples: &[f32], block: usize) -> Vec<f64> {
    samples
        .chunks_exact(block)
        .map(|c| (c.iter().map(|&x| (x as f64).powi(2)).sum::<f64>() / block as f64).sqrt())
        .collect()
}

mod scenario {
    use super::*;
    use voimorph::cepstrum::{log_power, POWER_FLOOR};

    #[test]
    fn sweep_against_white_noise_profile() {
        let profile = build_profile(
            config(),
            &[signals::noise(0.5, 5.0, 1)],
            FrameFilter::Audible,
        )
        .unwrap();
        assert!(!profile.is_empty());

        let sweep = signals::sweep(220.0, 880.0, 2.0);
        let morpher = VoiceMorpher::for_profile(&profile).unwrap();
        let output = morpher
            .morph(&sweep, &profile, &MorphConfig::new(0.4).unwrap())
            .unwrap();
        assert_eq!(output.len(), 32000);
        assert_eq!(output.sample_rate(), RATE);
        assert_eq!(output.duration(), 2.0);

        let analysis = morpher.analyze(&sweep).unwrap();
        let cepstra = morpher.extract(&analysis);
        let engine = MorphEngine::new(morpher.config(), &profile).unwrap();

        let mut voiced = 0;
        for (record, source) in analysis.records.iter().zip(&cepstra) {
            let partial = engine.morph_frame(record, source, 0.4);
            let full = engine.morph_frame(record, source, 1.0);
            let Some(index) = partial.matched else {
                assert_eq!(partial.envelope, record.envelope);
                continue;
            };
            voiced += 1;
            let matched = &profile.codebook()[index];

            for k in 1..source.order() {
                let (s, m, b) = (
                    source.coefficients()[k],
                    matched.coefficients()[k],
                    partial.cepstrum.coefficients()[k],
                );
                if (m - s).abs() > 1e-9 {
                    assert!((b - s) * (m - b) > 0.0, "coefficient {}: {} {} {}", k, s, b, m);
                }
            }
            assert_eq!(partial.cepstrum.energy(), source.energy());

            for ((&s, &p), &f) in record
                .envelope
                .iter()
                .zip(&partial.envelope)
                .zip(&full.envelope)
            {
                let (s, p, f) = (log_power(s), log_power(p), log_power(f));
                if s.min(f) <= POWER_FLOOR.ln() || (f - s).abs() < 1e-6 {
                    continue;
                }
                assert!(p > s.min(f) && p < s.max(f), "{} {} {}", s, p, f);
            }
        }
        assert!(voiced > analysis.len() / 2, "{} voiced", voiced);
    }
}

mod properties {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn strength_zero_equals_resynthesis() {
        let profile = vowel_profile();
        let morpher = VoiceMorpher::for_profile(&profile).unwrap();
        let source = signals::vowel(140.0, [800.0, 1500.0], 2.0);
        let morphed = morpher
            .morph(&source, &profile, &MorphConfig::new(0.0).unwrap())
            .unwrap();
        assert_eq!(morphed, morpher.resynthesize(&source).unwrap());
    }

    #[test]
    fn strength_one_takes_matched_shape() {
        let profile = vowel_profile();
        let morpher = VoiceMorpher::for_profile(&profile).unwrap();
        let analysis = morpher
            .analyze(&signals::vowel(140.0, [800.0, 1500.0], 2.0))
            .unwrap();
        let cepstra = morpher.extract(&analysis);
        let engine = MorphEngine::new(morpher.config(), &profile).unwrap();
        let frames = engine
            .morph_frames(
                &analysis.records,
                &cepstra,
                &MorphConfig::new(1.0).unwrap(),
                &CancelToken::new(),
            )
            .unwrap();

        let mut matched = 0;
        for (frame, source) in frames.iter().zip(&cepstra) {
            if let Some(index) = frame.matched {
                matched += 1;
                assert_eq!(frame.cepstrum.shape(), profile.codebook()[index].shape());
                assert_eq!(frame.cepstrum.energy(), source.energy());
            }
        }
        assert!(matched > frames.len() / 2);
    }

    #[test]
    fn quiet_input_is_left_alone() {
        let profile = vowel_profile();
        let morpher = VoiceMorpher::for_profile(&profile).unwrap();
        let quiet = signals::sine(220.0, 1e-5, 1.0);

        let analysis = morpher.analyze(&quiet).unwrap();
        assert!(analysis.records.iter().all(|r| !r.is_voiced()));
        assert!(analysis
            .records
            .iter()
            .all(|r| r.aperiodicity.iter().all(|&a| a == 1.0)));

        let morphed = morpher
            .morph(&quiet, &profile, &MorphConfig::new(1.0).unwrap())
            .unwrap();
        assert_eq!(morphed, morpher.resynthesize(&quiet).unwrap());
    }

    #[test]
    fn round_trip_keeps_duration_and_energy() {
        let morpher = VoiceMorpher::new(config()).unwrap();
        for seconds in [1.0, 2.0077] {
            let source = signals::sine(220.0, 0.5, seconds);
            let output = morpher.resynthesize(&source).unwrap();
            assert_eq!(output.len(), source.len());
            assert_eq!(output.sample_rate(), source.sample_rate());

            let n = source.len();
            let expected = block_rms(&source.samples()[2048..n - 2048], 2048);
            let actual = block_rms(&output.samples()[2048..n - 2048], 2048);
            for (e, a) in expected.iter().zip(&actual) {
                let db = 20.0 * (a / e).log10();
                assert!(db.abs() < 3.0, "{} dB", db);
            }
        }
    }

    #[test]
    fn matching_is_deterministic_with_duplicates() {
        let profile = vowel_profile();
        let mut doubled: Vec<CepstralVector> = profile.codebook().to_vec();
        doubled.extend_from_slice(profile.codebook());
        let doubled = VoiceProfile::from_codebook(config(), doubled).unwrap();

        let morpher = VoiceMorpher::for_profile(&profile).unwrap();
        let analysis = morpher
            .analyze(&signals::vowel(160.0, [500.0, 1900.0], 1.0))
            .unwrap();
        let cepstra = morpher.extract(&analysis);
        let engine = MorphEngine::new(morpher.config(), &doubled).unwrap();

        let run = || -> Vec<Option<usize>> {
            engine
                .morph_frames(
                    &analysis.records,
                    &cepstra,
                    &MorphConfig::default(),
                    &CancelToken::new(),
                )
                .unwrap()
                .into_iter()
                .map(|f| f.matched)
                .collect()
        };
        let first = run();
        for _ in 0..3 {
            assert_eq!(run(), first);
        }
        assert!(first.iter().flatten().all(|&i| i < profile.len()));
    }
}

mod enrollment {
    use super::*;

    #[test]
    fn silence_and_noise_are_insufficient() {
        let result = build_profile(
            config(),
            &[
                signals::silence(3.0),
                signals::noise(0.3, 3.0, 2),
                signals::noise(1e-5, 3.0, 3),
            ],
            FrameFilter::Voiced,
        );
        assert!(matches!(
            result,
            Err(MorphError::InsufficientEnrollment { .. })
        ));
    }

    #[test]
    fn saved_profile_morphs_identically() {
        let profile = vowel_profile();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("voice.json");
        profile.save(&path).unwrap();
        let loaded = VoiceProfile::load(&path).unwrap();
        pretty_assertions::assert_eq!(&loaded, &profile);

        let source = signals::vowel(150.0, [700.0, 1200.0], 1.0);
        let morpher = VoiceMorpher::for_profile(&loaded).unwrap();
        let strength = MorphConfig::new(0.8).unwrap();
        assert_eq!(
            morpher.morph(&source, &loaded, &strength).unwrap(),
            morpher.morph(&source, &profile, &strength).unwrap()
        );
    }

    #[test]
    fn incompatible_profile_is_rejected() {
        let profile = vowel_profile();
        let source = signals::vowel(150.0, [700.0, 1200.0], 1.0);
        let other = AnalysisConfig {
            cepstral_order: 30,
            ..config()
        };
        let morpher = VoiceMorpher::new(other).unwrap();
        assert!(matches!(
            morpher.morph(&source, &profile, &MorphConfig::default()),
            Err(MorphError::ProfileConfigMismatch { .. })
        ));
    }

    #[test]
    fn wrong_sample_rate_is_invalid_audio() {
        let profile = vowel_profile();
        let morpher = VoiceMorpher::for_profile(&profile).unwrap();
        let source = Waveform::new(vec![0.1; 44100], 44100);
        let err = morpher
            .morph(&source, &profile, &MorphConfig::default())
            .unwrap_err();
        assert!(matches!(err, MorphError::InvalidAudio { .. }));
        assert!(err.is_recoverable());
    }

    #[test]
    fn cancelled_morph_returns_nothing() {
        let profile = vowel_profile();
        let morpher = VoiceMorpher::for_profile(&profile).unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();
        let result = morpher.morph_with_cancel(
            &signals::vowel(150.0, [700.0, 1200.0], 1.0),
            &profile,
            &MorphConfig::default(),
            &cancel,
        );
        assert!(matches!(result, Err(MorphError::Cancelled)));
    }
}
