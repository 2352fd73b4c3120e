//! Overlay a vocal segment onto the melody track.

use std::path::Path;

use super::clip::AudioClip;
use super::wav::WavEncoding;
use crate::Result;
use crate::config::MixConfig;

/// Mix two in-memory clips.
///
/// The voice is padded to the melody length, the melody attenuated and the
/// voice boosted by the configured gains, then the voice is laid over the
/// melody and the whole clip faded in and out. The result has the melody's
/// length, sample rate and channel layout.
pub fn mix_clips(melody: &AudioClip, voice: &AudioClip, config: &MixConfig) -> Result<AudioClip> {
    let voice = voice.matched_to(melody)?.pad_to_frames(melody.frames());
    let melody = melody.apply_gain_db(config.melody_gain_db);
    let voice = voice.apply_gain_db(config.voice_gain_db);
    Ok(melody
        .overlay(&voice)?
        .fade_in(config.fade_ms)
        .fade_out(config.fade_ms))
}

/// Mix the WAV files at `melody_path` and `voice_path` into `out_path`.
pub fn mix_segment(
    melody_path: impl AsRef<Path>,
    voice_path: impl AsRef<Path>,
    out_path: impl AsRef<Path>,
    config: &MixConfig,
) -> Result<()> {
    let melody = AudioClip::load(melody_path)?;
    let voice = AudioClip::load(voice_path)?;
    let mixed = mix_clips(&melody, &voice, config)?;
    mixed.save(out_path, WavEncoding::Pcm16)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::clip::db_to_amplitude;

    fn no_fade() -> MixConfig {
        MixConfig {
            fade_ms: 0,
            ..MixConfig::default()
        }
    }

    #[test]
    fn test_mix_keeps_melody_length_and_format() {
        let melody = AudioClip::new(vec![0.1; 3200], 32000, 1);
        let voice = AudioClip::new(vec![0.1; 1200], 24000, 1);
        let mixed = mix_clips(&melody, &voice, &MixConfig::default()).unwrap();
        assert_eq!(mixed.frames(), 3200);
        assert_eq!(mixed.sample_rate, 32000);
        assert_eq!(mixed.channels, 1);
    }

    #[test]
    fn test_mix_applies_gains() {
        let melody = AudioClip::new(vec![0.2; 100], 8000, 1);
        let voice = AudioClip::new(vec![0.1; 50], 8000, 1);
        let mixed = mix_clips(&melody, &voice, &no_fade()).unwrap();

        let melody_only = 0.2 * db_to_amplitude(-5.0);
        let both = melody_only + 0.1 * db_to_amplitude(5.0);
        assert!((mixed.samples[10] - both).abs() < 1e-5);
        // Past the end of the voice only the attenuated melody remains.
        assert!((mixed.samples[80] - melody_only).abs() < 1e-5);
    }

    #[test]
    fn test_mix_fades_edges() {
        let melody = AudioClip::new(vec![0.5; 8000], 8000, 1);
        let voice = AudioClip::new(vec![0.0; 8000], 8000, 1);
        let mixed = mix_clips(&melody, &voice, &MixConfig::default()).unwrap();
        assert_eq!(mixed.samples[0], 0.0);
        assert_eq!(*mixed.samples.last().unwrap(), 0.0);
        let center = 0.5 * db_to_amplitude(-5.0);
        assert!((mixed.samples[4000] - center).abs() < 1e-5);
    }

    #[test]
    fn test_mix_segment_files() {
        let dir = tempfile::tempdir().unwrap();
        let melody_path = dir.path().join("melody.wav");
        let voice_path = dir.path().join("segment_000.wav");
        let out_path = dir.path().join("mix_000.wav");

        AudioClip::new(vec![0.1; 32000], 32000, 1)
            .save(&melody_path, WavEncoding::Pcm16)
            .unwrap();
        AudioClip::new(vec![0.2; 12000], 24000, 1)
            .save(&voice_path, WavEncoding::Float32)
            .unwrap();

        mix_segment(&melody_path, &voice_path, &out_path, &MixConfig::default()).unwrap();

        let reader = hound::WavReader::open(&out_path).unwrap();
        assert_eq!(reader.spec().sample_rate, 32000);
        assert_eq!(reader.spec().bits_per_sample, 16);
        assert_eq!(reader.duration(), 32000);
    }
}
