//! Stand-in models and helpers shared by the integration tests.

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use aimusic_rs::audio::AudioClip;
use aimusic_rs::config::{OutputDirs, PipelineConfig};
use aimusic_rs::pipeline::{LyricModel, MelodyModel, SongPipeline, VoiceModel};
use aimusic_rs::{Error, Result};

pub const MELODY_RATE: u32 = 8000;
pub const VOICE_RATE: u32 = 16000;

/// Appends a fixed number of words to the prompt.
pub struct FakeLyrics {
    pub extra_words: usize,
    pub releases: Arc<AtomicUsize>,
}

impl LyricModel for FakeLyrics {
    fn generate_lyrics(&mut self, prompt: &str) -> Result<String> {
        let words: Vec<String> = (0..self.extra_words).map(|i| format!("la{i}")).collect();
        Ok(format!("{prompt} {}", words.join(" ")).trim().to_string())
    }

    fn release(&mut self) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}

/// One second of constant signal.
pub struct FakeMelody;

impl MelodyModel for FakeMelody {
    fn generate_melody(&mut self, _prompt: &str) -> Result<AudioClip> {
        Ok(AudioClip::new(vec![0.25; MELODY_RATE as usize], MELODY_RATE, 1))
    }
}

/// Half a second of signal per segment; fails on the listed call indices.
pub struct FakeVoice {
    pub fail_on: Vec<usize>,
    pub calls: usize,
}

impl VoiceModel for FakeVoice {
    fn synthesize(&mut self, text: &str) -> Result<AudioClip> {
        let call = self.calls;
        self.calls += 1;
        if self.fail_on.contains(&call) {
            return Err(Error::Audio(format!("synthetic failure for '{text}'")));
        }
        Ok(AudioClip::new(vec![0.1; VOICE_RATE as usize / 2], VOICE_RATE, 1))
    }
}

pub fn fake_pipeline(dirs: OutputDirs, lyric_words: usize, fail_on: Vec<usize>) -> SongPipeline {
    fake_pipeline_with_releases(dirs, lyric_words, fail_on, Arc::new(AtomicUsize::new(0)))
}

pub fn fake_pipeline_with_releases(
    dirs: OutputDirs,
    lyric_words: usize,
    fail_on: Vec<usize>,
    releases: Arc<AtomicUsize>,
) -> SongPipeline {
    let mut config = PipelineConfig::default();
    config.lyrics.words_per_segment = 5;
    SongPipeline::new(
        Box::new(FakeLyrics {
            extra_words: lyric_words,
            releases,
        }),
        Box::new(FakeMelody),
        Box::new(FakeVoice { fail_on, calls: 0 }),
        dirs,
        config,
    )
}

/// Frames in the final song for `clips` one-second mixes with 300 ms gaps.
pub fn expected_song_frames(clips: usize) -> usize {
    clips * (MELODY_RATE as usize + MELODY_RATE as usize * 300 / 1000)
}

pub fn write_static_index(dir: &Path) {
    std::fs::write(dir.join("index.html"), "<html>aimusic</html>").unwrap();
}
