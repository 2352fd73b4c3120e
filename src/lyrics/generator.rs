//! Prompt → lyrics with a fine-tuned GPT-2.

use candle_core::{DType, Device, Tensor};
use tokenizers::Tokenizer;

use crate::config::LyricConfig;
use crate::model::gpt2::{Gpt2Config, Gpt2LmHeadModel};
use crate::model::hub::Hub;
use crate::model::sampling::{Sampler, SamplingParams};
use crate::pipeline::LyricModel;
use crate::{Error, Result};

struct LoadedModel {
    model: Gpt2LmHeadModel,
    tokenizer: Tokenizer,
}

/// Lyric generator with lazily loaded weights.
pub struct LyricGenerator {
    hub: Hub,
    config: LyricConfig,
    device: Device,
    dtype: DType,
    seed: Option<u64>,
    loaded: Option<LoadedModel>,
}

impl LyricGenerator {
    pub fn new(hub: Hub, config: LyricConfig, device: Device, dtype: DType, seed: Option<u64>) -> Self {
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
            tracing::info!(model = %self.config.model_repo, "loading lyric model");
            let cfg: Gpt2Config = self.hub.config(&self.config.model_repo)?;
            let vb = self
                .hub
                .weights(&self.config.model_repo)?
                .var_builder(self.dtype, &self.device)?;
            let model = Gpt2LmHeadModel::load(&cfg, vb)
                .map_err(|e| Error::WeightLoad(format!("lyric model: {e}")))?;
            let tokenizer = self.hub.tokenizer(&self.config.tokenizer_repo)?;
            self.loaded = Some(LoadedModel { model, tokenizer });
        }
        self.loaded
            .as_mut()
            .ok_or_else(|| Error::WeightLoad("lyric model not loaded".into()))
    }

    fn sampling_params(&self) -> SamplingParams {
        SamplingParams {
            temperature: self.config.temperature,
            top_k: Some(self.config.top_k),
            top_p: Some(self.config.top_p),
        }
    }
}

impl LyricModel for LyricGenerator {
    fn generate_lyrics(&mut self, prompt: &str) -> Result<String> {
        let params = self.sampling_params();
        let max_length = self.config.max_length;
        let mut sampler = Sampler::new(params, self.seed);
        let device = self.device.clone();
        let loaded = self.ensure_loaded()?;

        let prompt_ids = loaded.tokenizer.encode(prompt, false)?.get_ids().to_vec();
        if prompt_ids.is_empty() {
            return Err(Error::InvalidInput("prompt produced no tokens".into()));
        }
        tracing::debug!(prompt_tokens = prompt_ids.len(), "generating lyrics");

        let eos = loaded.model.config().eos_token_id;
        let ids = generate_tokens(
            &mut loaded.model,
            &prompt_ids,
            max_length,
            eos,
            &mut sampler,
            &device,
        )?;
        let lyrics = loaded.tokenizer.decode(&ids, true)?;
        tracing::info!(
            new_tokens = ids.len() - prompt_ids.len(),
            "lyrics generated"
        );
        Ok(lyrics)
    }

    fn release(&mut self) {
        if self.loaded.take().is_some() {
            tracing::debug!("lyric model released");
        }
    }
}

/// Autoregressively extend `prompt_ids` until `max_length` total tokens or
/// `eos_token_id` is sampled.
///
/// Returns prompt and continuation together; the end token is not included.
/// A prompt already `max_length` long is returned unchanged.
pub fn generate_tokens(
    model: &mut Gpt2LmHeadModel,
    prompt_ids: &[u32],
    max_length: usize,
    eos_token_id: u32,
    sampler: &mut Sampler,
    device: &Device,
) -> Result<Vec<u32>> {
    let context = model.config().n_positions;
    if prompt_ids.len() > context {
        return Err(Error::InvalidInput(format!(
            "prompt is {} tokens, the lyric model accepts at most {context}",
            prompt_ids.len()
        )));
    }
    let max_length = max_length.min(context);
    let mut ids = prompt_ids.to_vec();
    if ids.len() >= max_length {
        return Ok(ids);
    }
    model.clear_kv_cache();

    let mut input = Tensor::new(prompt_ids, device)?.unsqueeze(0)?;
    while ids.len() < max_length {
        let logits = model.forward(&input)?.squeeze(0)?;
        let next = sampler.sample(&logits)?;
        if next == eos_token_id {
            break;
        }
        ids.push(next);
        input = Tensor::new(&[[next]], device)?;
    }
    model.clear_kv_cache();
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_nn::VarBuilder;

    fn tiny_model(eos: u32) -> Gpt2LmHeadModel {
        let cfg = Gpt2Config {
            vocab_size: 16,
            n_positions: 32,
            n_embd: 8,
            n_layer: 1,
            n_head: 2,
            n_inner: None,
            layer_norm_epsilon: 1e-5,
            eos_token_id: eos,
        };
        Gpt2LmHeadModel::load(&cfg, VarBuilder::zeros(DType::F32, &Device::Cpu)).unwrap()
    }

    #[test]
    fn test_generate_fills_to_max_length() {
        // Zero weights give flat logits; greedy picks token 0 every step.
        let mut model = tiny_model(15);
        let mut sampler = Sampler::new(SamplingParams::with_temperature(0.0), Some(0));
        let ids = generate_tokens(&mut model, &[3, 4], 10, 15, &mut sampler, &Device::Cpu).unwrap();
        assert_eq!(ids.len(), 10);
        assert_eq!(&ids[..2], &[3, 4]);
        assert!(ids[2..].iter().all(|&t| t == 0));
    }

    #[test]
    fn test_generate_stops_at_eos() {
        let mut model = tiny_model(0);
        let mut sampler = Sampler::new(SamplingParams::with_temperature(0.0), Some(0));
        let ids = generate_tokens(&mut model, &[5], 10, 0, &mut sampler, &Device::Cpu).unwrap();
        assert_eq!(ids, vec![5]);
    }

    #[test]
    fn test_prompt_at_max_length_is_unchanged() {
        let mut model = tiny_model(15);
        let mut sampler = Sampler::new(SamplingParams::with_temperature(1.0), Some(0));
        let prompt = [1u32, 2, 3, 4];
        let ids = generate_tokens(&mut model, &prompt, 4, 15, &mut sampler, &Device::Cpu).unwrap();
        assert_eq!(ids, prompt);
    }

    #[test]
    fn test_prompt_beyond_context_is_rejected() {
        let mut model = tiny_model(15);
        let mut sampler = Sampler::new(SamplingParams::with_temperature(0.0), Some(0));
        let prompt = vec![1u32; 33];
        let error = generate_tokens(&mut model, &prompt, 100, 15, &mut sampler, &Device::Cpu).unwrap_err();
        assert!(matches!(error, Error::InvalidInput(_)));
    }

    #[test]
    fn test_generation_stops_at_context() {
        let mut model = tiny_model(15);
        let mut sampler = Sampler::new(SamplingParams::with_temperature(0.0), Some(0));
        let ids = generate_tokens(&mut model, &[1, 2], 100, 15, &mut sampler, &Device::Cpu).unwrap();
        assert_eq!(ids.len(), 32);
    }
}
