//! Prompt → instrumental melody with MusicGen.

use candle_core::{DType, Device};
use tokenizers::Tokenizer;

use crate::audio::AudioClip;
use crate::config::MelodyConfig;
use crate::model::hub::Hub;
use crate::model::musicgen::{Musicgen, MusicgenConfig};
use crate::model::sampling::{Sampler, SamplingParams};
use crate::pipeline::MelodyModel;
use crate::{Error, Result};

struct LoadedModel {
    model: Musicgen,
    tokenizer: Tokenizer,
}

/// Melody generator with lazily loaded weights.
pub struct MelodyGenerator {
    hub: Hub,
    config: MelodyConfig,
    device: Device,
    dtype: DType,
    seed: Option<u64>,
    loaded: Option<LoadedModel>,
}

impl MelodyGenerator {
    pub fn new(hub: Hub, config: MelodyConfig, device: Device, dtype: DType, seed: Option<u64>) -> Self {
        Self {
            hub,
            config,
            device,
            dtype,
            seed,
            loaded: None,
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.is_some()
    }

    fn ensure_loaded(&mut self) -> Result<&mut LoadedModel> {
        if self.loaded.is_none() {
            let repo = &self.config.model_repo;
            tracing::info!(model = %repo, "loading melody model");
            let cfg: MusicgenConfig = self.hub.config(repo)?;
            let vb = self.hub.weights(repo)?.var_builder(self.dtype, &self.device)?;
            let model = Musicgen::load(&cfg, vb).map_err(|e| Error::WeightLoad(format!("melody model: {e}")))?;
            let tokenizer = self.hub.tokenizer(repo)?;
            self.loaded = Some(LoadedModel { model, tokenizer });
        }
        self.loaded
            .as_mut()
            .ok_or_else(|| Error::WeightLoad("melody model not loaded".into()))
    }
}

impl MelodyModel for MelodyGenerator {
    fn generate_melody(&mut self, prompt: &str) -> Result<AudioClip> {
        let params = SamplingParams {
            temperature: self.config.temperature,
            top_k: Some(self.config.top_k),
            top_p: None,
        };
        let mut sampler = Sampler::new(params, self.seed);
        let duration_s = self.config.duration_s;
        let guidance_scale = self.config.guidance_scale;
        if self.loaded.is_none() {
            // Only config.json is fetched here, so an unreachable duration
            // fails before any weights load.
            let cfg: MusicgenConfig = self.hub.config(&self.config.model_repo)?;
            cfg.frames_for(duration_s)?;
        }
        let loaded = self.ensure_loaded()?;

        let token_ids = loaded.tokenizer.encode(prompt, true)?.get_ids().to_vec();
        let cfg = loaded.model.config();
        let frames = cfg.frames_for(duration_s)?;
        let sample_rate = cfg.sample_rate();
        tracing::info!(frames, duration_s, guidance_scale, "generating melody");

        let codes = loaded
            .model
            .generate_codes(&token_ids, frames, guidance_scale, &mut sampler)?;
        let samples = loaded.model.decode_audio(&codes)?;
        let clip = AudioClip::new(samples, sample_rate, loaded.model.channels()).to_mono();
        tracing::info!(duration_ms = clip.duration_ms(), "melody generated");
        Ok(clip)
    }

    fn release(&mut self) {
        if self.loaded.take().is_some() {
            tracing::debug!("melody model released");
        }
    }
}
