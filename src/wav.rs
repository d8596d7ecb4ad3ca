//! WAV file input and output.

use std::path::Path;

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};

use crate::{error::Result, waveform::Waveform};

/// Reads any integer or float PCM WAV file, down-mixed to mono.
pub fn load(path: impl AsRef<Path>) -> Result<Waveform> {
    let reader = WavReader::open(path)?;
    let spec = reader.spec();
    let samples: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<std::result::Result<_, _>>()?,
        SampleFormat::Int => {
            let scale = 1.0 / (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|x| x.map(|x| x as f32 * scale))
                .collect::<std::result::Result<_, _>>()?
        }
    };
    Ok(Waveform::from_interleaved(
        &samples,
        spec.channels as usize,
        spec.sample_rate,
    ))
}

/// Writes a mono 32-bit float WAV file.
pub fn save(path: impl AsRef<Path>, waveform: &Waveform) -> Result<()> {
    let spec = WavSpec {
        channels: 1,
        sample_rate: waveform.sample_rate(),
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    };
    let mut writer = WavWriter::create(path, spec)?;
    for &x in waveform.samples() {
        writer.write_sample(x)?;
    }
    writer.finalize()?;
    Ok(())
}
