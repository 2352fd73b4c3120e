//! Join mixed segments into the final track.

use std::path::{Path, PathBuf};

use super::clip::AudioClip;
use super::wav::WavEncoding;
use crate::Result;

/// Format of the track written when there is nothing to concatenate.
const EMPTY_TRACK_RATE: u32 = 32000;

/// List the `.wav` files in `dir` in segment order.
///
/// Files are ordered by the number at the end of their stem (`mix_7`,
/// `mix_010`, `mix_1000`), then by name; files without one come last.
pub fn sorted_wav_files(dir: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.is_file() && path.extension().and_then(|e| e.to_str()) == Some("wav")
        })
        .collect();
    files.sort_by_cached_key(|path| {
        let index = segment_index(path);
        (index.is_none(), index, path.file_name().map(|n| n.to_os_string()))
    });
    Ok(files)
}

/// Trailing decimal number of the file stem.
fn segment_index(path: &Path) -> Option<u64> {
    let stem = path.file_stem()?.to_str()?;
    let digits = stem.len() - stem.trim_end_matches(|c: char| c.is_ascii_digit()).len();
    stem[stem.len() - digits..].parse().ok()
}

/// Concatenate clips, appending `gap_ms` of silence after each one.
///
/// Every clip is converted to the first clip's format.
pub fn concat_clips(clips: &[AudioClip], gap_ms: u32) -> Result<AudioClip> {
    let Some(first) = clips.first() else {
        return Ok(AudioClip::empty(EMPTY_TRACK_RATE, 1));
    };
    let mut combined = AudioClip::empty(first.sample_rate, first.channels);
    let gap = AudioClip::silent(gap_ms, first.sample_rate, first.channels);
    for clip in clips {
        combined.append(clip)?;
        combined.append(&gap)?;
    }
    Ok(combined)
}

/// Concatenate every `.wav` in `mixed_dir` into `output_path`.
///
/// Returns the files that were joined, in order.
pub fn concat_segments(
    mixed_dir: impl AsRef<Path>,
    output_path: impl AsRef<Path>,
    gap_ms: u32,
) -> Result<Vec<PathBuf>> {
    let files = sorted_wav_files(mixed_dir)?;
    let clips = files
        .iter()
        .map(AudioClip::load)
        .collect::<Result<Vec<_>>>()?;
    let combined = concat_clips(&clips, gap_ms)?;
    tracing::debug!(
        clips = files.len(),
        duration_ms = combined.duration_ms(),
        "concatenated segments"
    );
    combined.save(output_path, WavEncoding::Pcm16)?;
    Ok(files)
}
