//! GPT-2 causal language model.
//!
//! Loads HuggingFace `GPT2LMHeadModel` checkpoints. GPT-2 stores its
//! projections as `Conv1D` with `[in, out]` weights; they are transposed once
//! at load time so every projection is a plain [`candle_nn::Linear`].
//!
//! ```text
//! tokens → wte + wpe → N × (ln_1 → attn → + → ln_2 → mlp → +) → ln_f → wteᵀ
//! ```

use candle_core::{D, DType, Module, Tensor};
use candle_nn::{Embedding, LayerNorm, Linear, VarBuilder};
use serde::Deserialize;

use super::mask::causal_mask;
use crate::Result;

/// Subset of the HuggingFace `GPT2Config` the forward pass needs.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Gpt2Config {
    pub vocab_size: usize,
    pub n_positions: usize,
    pub n_embd: usize,
    pub n_layer: usize,
    pub n_head: usize,
    #[serde(default)]
    pub n_inner: Option<usize>,
    #[serde(default = "default_layer_norm_epsilon")]
    pub layer_norm_epsilon: f64,
    #[serde(default = "default_eos_token_id")]
    pub eos_token_id: u32,
}

fn default_layer_norm_epsilon() -> f64 {
    1e-5
}

fn default_eos_token_id() -> u32 {
    50256
}

impl Default for Gpt2Config {
    /// GPT-2 small (124M).
    fn default() -> Self {
        Self {
            vocab_size: 50257,
            n_positions: 1024,
            n_embd: 768,
            n_layer: 12,
            n_head: 12,
            n_inner: None,
            layer_norm_epsilon: default_layer_norm_epsilon(),
            eos_token_id: default_eos_token_id(),
        }
    }
}

impl Gpt2Config {
    pub fn inner_dim(&self) -> usize {
        self.n_inner.unwrap_or(4 * self.n_embd)
    }
}

/// Load a GPT-2 `Conv1D` (`[in, out]` weight) as a `Linear`.
fn conv1d(in_dim: usize, out_dim: usize, vb: VarBuilder) -> Result<Linear> {
    let weight = vb.get((in_dim, out_dim), "weight")?.t()?.contiguous()?;
    let bias = vb.get(out_dim, "bias")?;
    Ok(Linear::new(weight, Some(bias)))
}

fn layer_norm(size: usize, eps: f64, vb: VarBuilder) -> Result<LayerNorm> {
    Ok(candle_nn::layer_norm(size, eps, vb)?)
}

struct Attention {
    c_attn: Linear,
    c_proj: Linear,
    n_head: usize,
    head_dim: usize,
    kv_cache: Option<(Tensor, Tensor)>,
}

impl Attention {
    fn load(cfg: &Gpt2Config, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            c_attn: conv1d(cfg.n_embd, 3 * cfg.n_embd, vb.pp("c_attn"))?,
            c_proj: conv1d(cfg.n_embd, cfg.n_embd, vb.pp("c_proj"))?,
            n_head: cfg.n_head,
            head_dim: cfg.n_embd / cfg.n_head,
            kv_cache: None,
        })
    }

    fn forward(&mut self, xs: &Tensor, mask: Option<&Tensor>) -> Result<Tensor> {
        let (batch, seq_len, hidden) = xs.dims3()?;
        let qkv = self.c_attn.forward(xs)?;
        let split = |i: usize| -> Result<Tensor> {
            Ok(qkv
                .narrow(D::Minus1, i * hidden, hidden)?
                .reshape((batch, seq_len, self.n_head, self.head_dim))?
                .transpose(1, 2)?
                .contiguous()?)
        };
        let q = split(0)?;
        let mut k = split(1)?;
        let mut v = split(2)?;

        if let Some((past_k, past_v)) = &self.kv_cache {
            k = Tensor::cat(&[past_k, &k], 2)?;
            v = Tensor::cat(&[past_v, &v], 2)?;
        }
        self.kv_cache = Some((k.clone(), v.clone()));

        let scale = 1.0 / (self.head_dim as f64).sqrt();
        let att = (q.matmul(&k.t()?)? * scale)?;
        let att = match mask {
            Some(mask) => att.broadcast_add(mask)?,
            None => att,
        };
        let att = candle_nn::ops::softmax_last_dim(&att)?;
        let out = att
            .matmul(&v)?
            .transpose(1, 2)?
            .reshape((batch, seq_len, hidden))?;
        Ok(self.c_proj.forward(&out)?)
    }
}

struct Mlp {
    c_fc: Linear,
    c_proj: Linear,
}

impl Mlp {
    fn load(cfg: &Gpt2Config, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            c_fc: conv1d(cfg.n_embd, cfg.inner_dim(), vb.pp("c_fc"))?,
            c_proj: conv1d(cfg.inner_dim(), cfg.n_embd, vb.pp("c_proj"))?,
        })
    }

    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        // "gelu_new" is the tanh approximation.
        Ok(self.c_proj.forward(&self.c_fc.forward(xs)?.gelu()?)?)
    }
}

struct Block {
    ln_1: LayerNorm,
    attn: Attention,
    ln_2: LayerNorm,
    mlp: Mlp,
}

impl Block {
    fn load(cfg: &Gpt2Config, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            ln_1: layer_norm(cfg.n_embd, cfg.layer_norm_epsilon, vb.pp("ln_1"))?,
            attn: Attention::load(cfg, vb.pp("attn"))?,
            ln_2: layer_norm(cfg.n_embd, cfg.layer_norm_epsilon, vb.pp("ln_2"))?,
            mlp: Mlp::load(cfg, vb.pp("mlp"))?,
        })
    }

    fn forward(&mut self, xs: &Tensor, mask: Option<&Tensor>) -> Result<Tensor> {
        let residual = xs;
        let xs = (self.attn.forward(&self.ln_1.forward(xs)?, mask)? + residual)?;
        let residual = &xs;
        Ok((self.mlp.forward(&self.ln_2.forward(&xs)?)? + residual)?)
    }
}

/// GPT-2 with the tied language-model head.
pub struct Gpt2LmHeadModel {
    wte: Embedding,
    wpe: Embedding,
    blocks: Vec<Block>,
    ln_f: LayerNorm,
    lm_head: Linear,
    cfg: Gpt2Config,
    seq_len: usize,
}

impl Gpt2LmHeadModel {
    /// Build from a VarBuilder over a `GPT2LMHeadModel` or bare `GPT2Model`
    /// checkpoint (with or without the `transformer.` prefix).
    pub fn load(cfg: &Gpt2Config, vb: VarBuilder) -> Result<Self> {
        let vb = if vb.contains_tensor("transformer.wte.weight") {
            vb.pp("transformer")
        } else {
            vb
        };
        let wte = candle_nn::embedding(cfg.vocab_size, cfg.n_embd, vb.pp("wte"))?;
        let wpe = candle_nn::embedding(cfg.n_positions, cfg.n_embd, vb.pp("wpe"))?;
        let blocks = (0..cfg.n_layer)
            .map(|i| Block::load(cfg, vb.pp(format!("h.{i}"))))
            .collect::<Result<Vec<_>>>()?;
        let ln_f = layer_norm(cfg.n_embd, cfg.layer_norm_epsilon, vb.pp("ln_f"))?;
        let lm_head = Linear::new(wte.embeddings().clone(), None);
        Ok(Self {
            wte,
            wpe,
            blocks,
            ln_f,
            lm_head,
            cfg: cfg.clone(),
            seq_len: 0,
        })
    }

    pub fn config(&self) -> &Gpt2Config {
        &self.cfg
    }

    /// Tokens processed since the last [`Self::clear_kv_cache`].
    pub fn seq_len(&self) -> usize {
        self.seq_len
    }

    pub fn clear_kv_cache(&mut self) {
        for block in &mut self.blocks {
            block.attn.kv_cache = None;
        }
        self.seq_len = 0;
    }

    /// Feed `input_ids` `[B, T]` after the cached context.
    ///
    /// Returns logits for the last position, `[B, vocab]`.
    pub fn forward(&mut self, input_ids: &Tensor) -> Result<Tensor> {
        let (_batch, seq_len) = input_ids.dims2()?;
        let offset = self.seq_len;
        if offset + seq_len > self.cfg.n_positions {
            return Err(crate::Error::InvalidInput(format!(
                "sequence of {} tokens exceeds the {}-token context",
                offset + seq_len,
                self.cfg.n_positions
            )));
        }
        let device = input_ids.device();
        let positions = Tensor::arange(offset as u32, (offset + seq_len) as u32, device)?;
        let mut xs = self
            .wte
            .forward(input_ids)?
            .broadcast_add(&self.wpe.forward(&positions)?)?;

        let mask = if seq_len > 1 {
            Some(causal_mask(seq_len, offset, xs.dtype(), device)?)
        } else {
            None
        };
        for block in &mut self.blocks {
            xs = block.forward(&xs, mask.as_ref())?;
        }
        self.seq_len += seq_len;

        let last = xs.narrow(1, seq_len - 1, 1)?.squeeze(1)?;
        let logits = self.lm_head.forward(&self.ln_f.forward(&last)?)?;
        Ok(logits.to_dtype(DType::F32)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    fn tiny_config() -> Gpt2Config {
        Gpt2Config {
            vocab_size: 32,
            n_positions: 16,
            n_embd: 8,
            n_layer: 2,
            n_head: 2,
            n_inner: None,
            layer_norm_epsilon: 1e-5,
            eos_token_id: 31,
        }
    }

    #[test]
    fn test_config_from_hf_json() {
        let cfg: Gpt2Config = serde_json::from_str(
            r#"{"vocab_size": 50257, "n_positions": 1024, "n_embd": 768, "n_layer": 12,
                "n_head": 12, "activation_function": "gelu_new", "n_ctx": 1024}"#,
        )
        .unwrap();
        assert_eq!(cfg, Gpt2Config::default());
        assert_eq!(cfg.inner_dim(), 3072);
    }

    #[test]
    fn test_forward_shapes_and_cache() {
        let cfg = tiny_config();
        let vb = VarBuilder::zeros(DType::F32, &Device::Cpu);
        let mut model = Gpt2LmHeadModel::load(&cfg, vb).unwrap();

        let prompt = Tensor::new(&[[1u32, 2, 3]], &Device::Cpu).unwrap();
        let logits = model.forward(&prompt).unwrap();
        assert_eq!(logits.dims(), &[1, 32]);
        assert_eq!(model.seq_len(), 3);

        let next = Tensor::new(&[[4u32]], &Device::Cpu).unwrap();
        let logits = model.forward(&next).unwrap();
        assert_eq!(logits.dims(), &[1, 32]);
        assert_eq!(model.seq_len(), 4);

        model.clear_kv_cache();
        assert_eq!(model.seq_len(), 0);
    }

    #[test]
    fn test_forward_rejects_overlong_context() {
        let cfg = tiny_config();
        let vb = VarBuilder::zeros(DType::F32, &Device::Cpu);
        let mut model = Gpt2LmHeadModel::load(&cfg, vb).unwrap();
        let ids: Vec<u32> = (0..17).collect();
        let input = Tensor::from_vec(ids, (1, 17), &Device::Cpu).unwrap();
        assert!(model.forward(&input).is_err());
    }
}
