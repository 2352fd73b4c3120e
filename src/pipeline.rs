//! End-to-end song pipeline.
//!
//! Orchestrates one prompt → song run:
//! 1. Remove clips left over from the previous run
//! 2. Generate lyrics (GPT-2) and split them into word chunks
//! 3. Generate the melody (MusicGen) and write `melody.wav`
//! 4. For every chunk: sing it (Bark), write the vocal, mix it onto the melody
//! 5. Concatenate the mixed clips into `final_song.wav`
//!
//! The three models sit behind traits so the orchestration can run with
//! lightweight stand-ins.

use std::path::{Path, PathBuf};

use candle_core::{DType, Device};
use serde::{Deserialize, Serialize};

use crate::audio::{AudioClip, WavEncoding, concat_segments, mix_segment, peak_normalize, sorted_wav_files};
use crate::config::{OutputDirs, PipelineConfig};
use crate::lyrics::{LyricGenerator, split_lyrics};
use crate::melody::MelodyGenerator;
use crate::model::hub::Hub;
use crate::voice::VoiceSynthesizer;
use crate::{Error, Result};

/// Prompt → lyrics.
pub trait LyricModel: Send {
    fn generate_lyrics(&mut self, prompt: &str) -> Result<String>;

    /// Drop loaded weights. The next call reloads them.
    fn release(&mut self) {}
}

/// Prompt → instrumental track.
pub trait MelodyModel: Send {
    fn generate_melody(&mut self, prompt: &str) -> Result<AudioClip>;

    fn release(&mut self) {}
}

/// Lyric chunk → vocal clip.
pub trait VoiceModel: Send {
    fn synthesize(&mut self, text: &str) -> Result<AudioClip>;

    fn release(&mut self) {}
}

/// Outcome of one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SongResult {
    pub lyrics: String,
    pub segments: Vec<String>,
    /// Mixed clips that made it into the final song, in order.
    pub mixed_files: Vec<PathBuf>,
    pub final_song_path: PathBuf,
}

/// The song pipeline: three models plus the output layout.
pub struct SongPipeline {
    lyrics: Box<dyn LyricModel>,
    melody: Box<dyn MelodyModel>,
    voice: Box<dyn VoiceModel>,
    dirs: OutputDirs,
    config: PipelineConfig,
}

impl SongPipeline {
    pub fn new(
        lyrics: Box<dyn LyricModel>,
        melody: Box<dyn MelodyModel>,
        voice: Box<dyn VoiceModel>,
        dirs: OutputDirs,
        config: PipelineConfig,
    ) -> Self {
        Self {
            lyrics,
            melody,
            voice,
            dirs,
            config,
        }
    }

    /// Build the candle-backed pipeline.
    ///
    /// Weights are fetched lazily on first use; this only sets up the hub
    /// client and the output directories.
    pub fn load(device: &Device, dtype: DType, dirs: OutputDirs, config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        dirs.ensure()?;
        let hub = Hub::new()?;
        let seed = config.seed;
        tracing::info!(device = ?device, ?dtype, generated = %dirs.generated.display(), "song pipeline ready");
        Ok(Self::new(
            Box::new(LyricGenerator::new(hub.clone(), config.lyrics.clone(), device.clone(), dtype, seed)),
            Box::new(MelodyGenerator::new(hub.clone(), config.melody.clone(), device.clone(), dtype, seed)),
            Box::new(VoiceSynthesizer::new(hub, config.voice.clone(), device.clone(), dtype, seed)),
            dirs,
            config,
        ))
    }

    pub fn dirs(&self) -> &OutputDirs {
        &self.dirs
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run the whole pipeline for `prompt`.
    pub fn generate(&mut self, prompt: &str) -> Result<SongResult> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(Error::InvalidInput("prompt is empty".into()));
        }
        let start = std::time::Instant::now();

        self.dirs.ensure()?;
        let removed = remove_stale_clips(&self.dirs.segments)? + remove_stale_clips(&self.dirs.mixed)?;
        if removed > 0 {
            tracing::debug!(removed, "removed clips from previous run");
        }

        tracing::info!("generating lyrics");
        let lyrics = self.lyrics.generate_lyrics(prompt);
        self.release_unless_resident(|p| p.lyrics.release());
        let lyrics = lyrics?;
        let segments = split_lyrics(&lyrics, self.config.lyrics.words_per_segment);
        tracing::info!(words = lyrics.split_whitespace().count(), segments = segments.len(), "lyrics ready");

        tracing::info!("generating melody");
        let melody = self.melody.generate_melody(prompt);
        self.release_unless_resident(|p| p.melody.release());
        let melody_path = self.dirs.melody_path();
        write_melody(melody?, &melody_path)?;

        let mut mixed_files = Vec::with_capacity(segments.len());
        for (index, text) in segments.iter().enumerate() {
            tracing::info!(segment = index, total = segments.len(), "synthesizing vocals");
            let voice_path = self.dirs.segment_path(index);
            let voiced = self
                .voice
                .synthesize(text)
                .and_then(|clip| clip.save(&voice_path, WavEncoding::Float32));
            if let Err(error) = voiced {
                tracing::warn!(segment = index, %error, "voice synthesis failed, skipping segment");
                continue;
            }
            let mixed_path = self.dirs.mixed_path(index);
            mix_segment(&melody_path, &voice_path, &mixed_path, &self.config.mix)?;
            mixed_files.push(mixed_path);
        }
        self.release_unless_resident(|p| p.voice.release());

        let final_song_path = self.dirs.final_song_path();
        let joined = concat_segments(&self.dirs.mixed, &final_song_path, self.config.mix.gap_ms)?;
        tracing::info!(
            mixed = joined.len(),
            skipped = segments.len() - mixed_files.len(),
            elapsed_s = start.elapsed().as_secs_f32(),
            path = %final_song_path.display(),
            "song generated"
        );

        Ok(SongResult {
            lyrics,
            segments,
            mixed_files,
            final_song_path,
        })
    }

    fn release_unless_resident(&mut self, release: impl FnOnce(&mut Self)) {
        if !self.config.keep_models_resident {
            release(self);
        }
    }
}

/// Delete every `*.wav` directly inside `dir`. Returns how many were removed.
pub fn remove_stale_clips(dir: &Path) -> Result<usize> {
    let files = sorted_wav_files(dir)?;
    for file in &files {
        std::fs::remove_file(file)?;
    }
    Ok(files.len())
}

/// Mono-mix the melody, scale it back to full scale if it clips, and write it
/// as 16-bit PCM.
fn write_melody(melody: AudioClip, path: &Path) -> Result<()> {
    let mut melody = melody.to_mono();
    let peak = melody.samples.iter().fold(0.0f32, |m, s| m.max(s.abs()));
    if peak > 1.0 {
        peak_normalize(&mut melody.samples);
    }
    tracing::debug!(duration_ms = melody.duration_ms(), peak, "writing melody");
    melody.save(path, WavEncoding::Pcm16)
}
