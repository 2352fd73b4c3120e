//! Lyric chunk → sung vocal with Bark.

use candle_core::{DType, Device};
use tokenizers::Tokenizer;

use crate::audio::AudioClip;
use crate::config::VoiceConfig;
use crate::model::bark::{Bark, BarkConfig, BarkGenerationParams, HistoryPrompt, SAMPLE_RATE};
use crate::model::hub::Hub;
use crate::pipeline::VoiceModel;
use crate::{Error, Result};

/// Wrap lyrics in music notes so Bark sings rather than speaks.
pub fn singing_text(text: &str) -> String {
    format!("♪ {} ♪", text.trim())
}

struct LoadedModel {
    model: Bark,
    tokenizer: Tokenizer,
    history: HistoryPrompt,
}

/// Voice synthesizer with lazily loaded weights.
pub struct VoiceSynthesizer {
    hub: Hub,
    config: VoiceConfig,
    device: Device,
    dtype: DType,
    seed: Option<u64>,
    /// Calls so far; offsets the seed so segments differ.
    calls: u64,
    loaded: Option<LoadedModel>,
}

impl VoiceSynthesizer {
    pub fn new(hub: Hub, config: VoiceConfig, device: Device, dtype: DType, seed: Option<u64>) -> Self {
        Self {
            hub,
            config,
            device,
            dtype,
            seed,
            calls: 0,
            loaded: None,
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.is_some()
    }

    fn generation_params(&self) -> BarkGenerationParams {
        BarkGenerationParams {
            semantic_temperature: self.config.semantic_temperature,
            coarse_temperature: self.config.coarse_temperature,
            fine_temperature: self.config.fine_temperature,
            min_eos_p: self.config.min_eos_p,
            max_semantic_tokens: self.config.max_semantic_tokens,
        }
    }

    fn load_history(&self) -> Result<HistoryPrompt> {
        let repo = &self.config.model_repo;
        let preset = &self.config.voice_preset;
        let file = |kind: &str| self.hub.get(repo, &format!("speaker_embeddings/{preset}_{kind}_prompt.npy"));
        HistoryPrompt::from_npy(&file("semantic")?, &file("coarse")?, &file("fine")?)
    }

    fn ensure_loaded(&mut self) -> Result<&mut LoadedModel> {
        if self.loaded.is_none() {
            let repo = &self.config.model_repo;
            tracing::info!(model = %repo, preset = %self.config.voice_preset, "loading voice model");
            let cfg: BarkConfig = self.hub.config(repo)?;
            let vb = self.hub.weights(repo)?.var_builder(self.dtype, &self.device)?;
            let model = Bark::load(&cfg, vb).map_err(|e| Error::WeightLoad(format!("voice model: {e}")))?;
            let tokenizer = self.hub.tokenizer(repo)?;
            let history = self.load_history()?;
            self.loaded = Some(LoadedModel { model, tokenizer, history });
        }
        self.loaded
            .as_mut()
            .ok_or_else(|| Error::WeightLoad("voice model not loaded".into()))
    }
}

impl VoiceModel for VoiceSynthesizer {
    fn synthesize(&mut self, text: &str) -> Result<AudioClip> {
        let params = self.generation_params();
        let seed = self.seed.map(|s| s.wrapping_add(self.calls.wrapping_mul(3)));
        self.calls += 1;
        let loaded = self.ensure_loaded()?;

        let text = singing_text(text);
        let text_ids = loaded.tokenizer.encode(text.as_str(), false)?.get_ids().to_vec();
        tracing::debug!(tokens = text_ids.len(), "synthesizing voice");
        let samples = loaded
            .model
            .generate_audio(&text_ids, Some(&loaded.history), &params, seed)?;
        Ok(AudioClip::new(samples, SAMPLE_RATE, 1))
    }

    fn release(&mut self) {
        if self.loaded.take().is_some() {
            tracing::debug!("voice model released");
        }
    }
}
