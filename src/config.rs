//! Pipeline configuration.
//!
//! Defaults reproduce the reference song pipeline: a 100-token GPT-2 lyric
//! sample, 25-word segments, 30 s of MusicGen melody, Bark vocals with the
//! `v2/en_speaker_9` preset, -5/+5 dB mixing with 300 ms fades and 300 ms gaps.
//!
//! Every struct is `#[serde(default)]`, so a JSON config file only needs the
//! fields it overrides.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Longest melody the published MusicGen checkpoints reach: 2048 decoder
/// positions at 50 frames/s, less the codebook delay.
pub const MAX_MELODY_DURATION_S: f64 = 40.0;

/// Top-level pipeline configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub lyrics: LyricConfig,
    pub melody: MelodyConfig,
    pub voice: VoiceConfig,
    pub mix: MixConfig,

    /// Keep model weights loaded between pipeline phases and requests.
    ///
    /// Off by default: each model is dropped once its phase is done, so only
    /// one model family is resident at a time.
    pub keep_models_resident: bool,

    /// Base seed for every sampler. `None` = fresh random seed per run.
    pub seed: Option<u64>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            lyrics: LyricConfig::default(),
            melody: MelodyConfig::default(),
            voice: VoiceConfig::default(),
            mix: MixConfig::default(),
            keep_models_resident: false,
            seed: None,
        }
    }
}

impl PipelineConfig {
    /// Load a (possibly partial) JSON config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("reading {}: {e}", path.display())))?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make a stage meaningless.
    pub fn validate(&self) -> Result<()> {
        if self.lyrics.max_length == 0 {
            return Err(Error::Config("lyrics.max_length must be > 0".into()));
        }
        if !(self.lyrics.top_p > 0.0 && self.lyrics.top_p <= 1.0) {
            return Err(Error::Config(format!(
                "lyrics.top_p must be in (0, 1], got {}",
                self.lyrics.top_p
            )));
        }
        if self.melody.duration_s <= 0.0 || self.melody.duration_s > MAX_MELODY_DURATION_S {
            return Err(Error::Config(format!(
                "melody.duration_s must be in (0, {MAX_MELODY_DURATION_S}], got {}",
                self.melody.duration_s
            )));
        }
        if self.melody.guidance_scale < 1.0 {
            return Err(Error::Config(format!(
                "melody.guidance_scale must be >= 1, got {}",
                self.melody.guidance_scale
            )));
        }
        if self.voice.voice_preset.trim().is_empty() {
            return Err(Error::Config("voice.voice_preset must not be empty".into()));
        }
        Ok(())
    }
}

/// Lyric generation settings (GPT-2 family).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LyricConfig {
    /// HuggingFace repo holding the fine-tuned weights.
    pub model_repo: String,
    /// HuggingFace repo holding `tokenizer.json`.
    pub tokenizer_repo: String,
    /// Total sequence length in tokens, prompt included.
    pub max_length: usize,
    pub top_k: usize,
    pub top_p: f64,
    pub temperature: f64,
    /// Words per synthesized segment.
    pub words_per_segment: usize,
}

impl Default for LyricConfig {
    fn default() -> Self {
        Self {
            model_repo: "SpartanCinder/GPT2-finetuned-lyric-generation".to_string(),
            tokenizer_repo: "openai-community/gpt2".to_string(),
            max_length: 100,
            top_k: 50,
            top_p: 0.95,
            temperature: 1.0,
            words_per_segment: 25,
        }
    }
}

/// Melody generation settings (MusicGen).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MelodyConfig {
    pub model_repo: String,
    pub duration_s: f64,
    pub top_k: usize,
    pub temperature: f64,
    /// Classifier-free guidance coefficient. 1.0 disables guidance.
    pub guidance_scale: f64,
}

impl Default for MelodyConfig {
    fn default() -> Self {
        Self {
            model_repo: "facebook/musicgen-small".to_string(),
            duration_s: 30.0,
            top_k: 250,
            temperature: 1.0,
            guidance_scale: 3.0,
        }
    }
}

/// Singing-voice settings (Bark).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceConfig {
    pub model_repo: String,
    /// Speaker preset under the repo's `speaker_embeddings/` directory.
    pub voice_preset: String,
    pub semantic_temperature: f64,
    pub coarse_temperature: f64,
    pub fine_temperature: f64,
    /// Stop semantic generation once the end token reaches this probability.
    pub min_eos_p: f64,
    pub max_semantic_tokens: usize,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            model_repo: "suno/bark-small".to_string(),
            voice_preset: "v2/en_speaker_9".to_string(),
            semantic_temperature: 0.7,
            coarse_temperature: 0.7,
            fine_temperature: 0.5,
            min_eos_p: 0.2,
            max_semantic_tokens: 768,
        }
    }
}

/// Mixing and concatenation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MixConfig {
    pub melody_gain_db: f32,
    pub voice_gain_db: f32,
    pub fade_ms: u32,
    /// Silence appended after every mixed clip in the final track.
    pub gap_ms: u32,
}

impl Default for MixConfig {
    fn default() -> Self {
        Self {
            melody_gain_db: -5.0,
            voice_gain_db: 5.0,
            fade_ms: 300,
            gap_ms: 300,
        }
    }
}

/// Output directory layout for one pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputDirs {
    /// Melody and final song live here.
    pub generated: PathBuf,
    /// Raw per-segment vocals.
    pub segments: PathBuf,
    /// Per-segment melody+voice mixes.
    pub mixed: PathBuf,
}

impl OutputDirs {
    pub const DEFAULT_GENERATED_DIR: &'static str = "generated_songs";
    pub const FINAL_SONG_FILE: &'static str = "final_song.wav";
    pub const MELODY_FILE: &'static str = "melody.wav";

    /// Default layout: segments and mixes in subdirectories of `generated`.
    pub fn new(generated: impl Into<PathBuf>) -> Self {
        let generated = generated.into();
        Self {
            segments: generated.join("segments"),
            mixed: generated.join("mixed_segments"),
            generated,
        }
    }

    /// Build from `GENERATED_DIR`, `SEGMENT_DIR` and `MIXED_DIR`.
    pub fn from_env() -> Self {
        let generated = std::env::var_os("GENERATED_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(Self::DEFAULT_GENERATED_DIR));
        let mut dirs = Self::new(generated);
        if let Some(segments) = std::env::var_os("SEGMENT_DIR") {
            dirs.segments = PathBuf::from(segments);
        }
        if let Some(mixed) = std::env::var_os("MIXED_DIR") {
            dirs.mixed = PathBuf::from(mixed);
        }
        dirs
    }

    /// Create all three directories.
    pub fn ensure(&self) -> Result<()> {
        for dir in [&self.generated, &self.segments, &self.mixed] {
            std::fs::create_dir_all(dir).map_err(|e| {
                Error::Config(format!("could not create {}: {e}", dir.display()))
            })?;
        }
        Ok(())
    }

    pub fn final_song_path(&self) -> PathBuf {
        self.generated.join(Self::FINAL_SONG_FILE)
    }

    pub fn melody_path(&self) -> PathBuf {
        self.generated.join(Self::MELODY_FILE)
    }

    pub fn segment_path(&self, index: usize) -> PathBuf {
        self.segments.join(format!("segment_{index:03}.wav"))
    }

    pub fn mixed_path(&self, index: usize) -> PathBuf {
        self.mixed.join(format!("mix_{index:03}.wav"))
    }
}
