//! WAV file I/O.
//!
//! Voice clips are written as 32-bit float, everything that goes through the
//! mixer as 16-bit PCM so browsers and simple players can open the result.
//!
//! Files are written next to their destination and renamed into place, so a
//! reader of the destination sees either the previous file or the new one.

use crate::Result;
use std::path::{Path, PathBuf};

/// Sample encoding used when writing a WAV file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WavEncoding {
    Float32,
    Pcm16,
}

/// Read a WAV file, return (samples, sample_rate, num_channels).
///
/// Samples are interleaved f32 in [-1, 1].
pub fn read_wav(path: impl AsRef<Path>) -> Result<(Vec<f32>, u32, u16)> {
    let reader = hound::WavReader::open(path)?;
    let spec = reader.spec();
    let sample_rate = spec.sample_rate;
    let channels = spec.channels;

    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<std::result::Result<Vec<_>, _>>()?,
        hound::SampleFormat::Int => {
            let max_val = (1u32 << (spec.bits_per_sample - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / max_val))
                .collect::<std::result::Result<Vec<_>, _>>()?
        }
    };

    Ok((samples, sample_rate, channels))
}

/// Write interleaved f32 samples as a WAV file.
pub fn write_wav(
    path: impl AsRef<Path>,
    samples: &[f32],
    sample_rate: u32,
    num_channels: u16,
    encoding: WavEncoding,
) -> Result<()> {
    let path = path.as_ref();
    let partial = partial_path(path);
    let written = write_wav_file(&partial, samples, sample_rate, num_channels, encoding)
        .and_then(|()| Ok(std::fs::rename(&partial, path)?));
    if written.is_err() {
        let _ = std::fs::remove_file(&partial);
    }
    written
}

/// Hidden sibling of `path` that the data is written to first.
fn partial_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.partial"))
}

fn write_wav_file(
    path: &Path,
    samples: &[f32],
    sample_rate: u32,
    num_channels: u16,
    encoding: WavEncoding,
) -> Result<()> {
    let (bits_per_sample, sample_format) = match encoding {
        WavEncoding::Float32 => (32, hound::SampleFormat::Float),
        WavEncoding::Pcm16 => (16, hound::SampleFormat::Int),
    };
    let spec = hound::WavSpec {
        channels: num_channels,
        sample_rate,
        bits_per_sample,
        sample_format,
    };
    let mut writer = hound::WavWriter::create(path, spec)?;
    match encoding {
        WavEncoding::Float32 => {
            for &s in samples {
                writer.write_sample(s)?;
            }
        }
        WavEncoding::Pcm16 => {
            for &s in samples {
                writer.write_sample(f32_to_i16(s))?;
            }
        }
    }
    writer.finalize()?;
    Ok(())
}

/// Convert a float sample to 16-bit PCM, saturating outside [-1, 1].
pub fn f32_to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16
}

/// Peak-normalize audio samples to [-1, 1].
pub fn peak_normalize(samples: &mut [f32]) {
    let max_abs = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);
    if max_abs > 1e-8 {
        let scale = 1.0 / max_abs;
        for s in samples.iter_mut() {
            *s *= scale;
        }
    }
}
