//! Bark's GPT networks.
//!
//! - [`BarkCausalModel`]: the semantic and coarse-acoustics stages, causal
//!   with a KV cache
//! - [`BarkFineModel`]: the fine-acoustics stage, non-causal, predicting one
//!   codebook at a time from the sum of the codebooks before it

use candle_core::{DType, Module, Tensor};
use candle_nn::{Embedding, LayerNorm, Linear, VarBuilder};
use serde::Deserialize;

use crate::model::mask::causal_mask;
use crate::{Error, Result};

/// One `*_config` section of the Bark `config.json`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BarkSubConfig {
    pub block_size: usize,
    pub input_vocab_size: usize,
    pub output_vocab_size: usize,
    pub num_layers: usize,
    pub num_heads: usize,
    pub hidden_size: usize,
    #[serde(default = "default_bias")]
    pub bias: bool,
    #[serde(default = "default_n_codes_total")]
    pub n_codes_total: usize,
    #[serde(default = "default_n_codes_given")]
    pub n_codes_given: usize,
}

fn default_bias() -> bool {
    true
}

fn default_n_codes_total() -> usize {
    8
}

fn default_n_codes_given() -> usize {
    1
}

fn layer_norm(size: usize, bias: bool, vb: VarBuilder) -> Result<LayerNorm> {
    let weight = vb.get(size, "weight")?;
    if bias {
        Ok(LayerNorm::new(weight, vb.get(size, "bias")?, 1e-5))
    } else {
        Ok(LayerNorm::new_no_bias(weight, 1e-5))
    }
}

struct SelfAttention {
    att_proj: Linear,
    out_proj: Linear,
    num_heads: usize,
    head_dim: usize,
    kv_cache: Option<(Tensor, Tensor)>,
}

impl SelfAttention {
    fn load(cfg: &BarkSubConfig, bias: bool, vb: VarBuilder) -> Result<Self> {
        let h = cfg.hidden_size;
        Ok(Self {
            att_proj: candle_nn::linear_b(h, 3 * h, bias, vb.pp("att_proj"))?,
            out_proj: candle_nn::linear_b(h, h, bias, vb.pp("out_proj"))?,
            num_heads: cfg.num_heads,
            head_dim: h / cfg.num_heads,
            kv_cache: None,
        })
    }

    /// `use_cache` appends to and attends over the cached keys/values.
    fn forward(&mut self, xs: &Tensor, mask: Option<&Tensor>, use_cache: bool) -> Result<Tensor> {
        let (batch, seq_len, hidden) = xs.dims3()?;
        let qkv = self.att_proj.forward(xs)?;
        let split = |i: usize| -> Result<Tensor> {
            Ok(qkv
                .narrow(2, i * hidden, hidden)?
                .reshape((batch, seq_len, self.num_heads, self.head_dim))?
                .transpose(1, 2)?
                .contiguous()?)
        };
        let q = split(0)?;
        let mut k = split(1)?;
        let mut v = split(2)?;

        if use_cache {
            if let Some((past_k, past_v)) = self.kv_cache.take() {
                k = Tensor::cat(&[&past_k, &k], 2)?;
                v = Tensor::cat(&[&past_v, &v], 2)?;
            }
            self.kv_cache = Some((k.clone(), v.clone()));
        }

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
        Ok(self.out_proj.forward(&out)?)
    }
}

struct Mlp {
    in_proj: Linear,
    out_proj: Linear,
}

impl Mlp {
    fn load(cfg: &BarkSubConfig, bias: bool, vb: VarBuilder) -> Result<Self> {
        let h = cfg.hidden_size;
        Ok(Self {
            in_proj: candle_nn::linear_b(h, 4 * h, bias, vb.pp("in_proj"))?,
            out_proj: candle_nn::linear_b(4 * h, h, bias, vb.pp("out_proj"))?,
        })
    }

    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        Ok(self.out_proj.forward(&self.in_proj.forward(xs)?.gelu_erf()?)?)
    }
}

struct Block {
    layernorm_1: LayerNorm,
    attn: SelfAttention,
    layernorm_2: LayerNorm,
    mlp: Mlp,
}

impl Block {
    /// `norm_bias` is separate from the linear bias: the fine model always
    /// uses biased layer norms.
    fn load(cfg: &BarkSubConfig, norm_bias: bool, vb: VarBuilder) -> Result<Self> {
        let h = cfg.hidden_size;
        Ok(Self {
            layernorm_1: layer_norm(h, norm_bias, vb.pp("layernorm_1"))?,
            attn: SelfAttention::load(cfg, cfg.bias, vb.pp("attn"))?,
            layernorm_2: layer_norm(h, norm_bias, vb.pp("layernorm_2"))?,
            mlp: Mlp::load(cfg, cfg.bias, vb.pp("mlp"))?,
        })
    }

    fn forward(&mut self, xs: &Tensor, mask: Option<&Tensor>, use_cache: bool) -> Result<Tensor> {
        let h = self.attn.forward(&self.layernorm_1.forward(xs)?, mask, use_cache)?;
        let xs = (xs + h)?;
        let h = self.mlp.forward(&self.layernorm_2.forward(&xs)?)?;
        Ok((xs + h)?)
    }
}

fn check_block_size(len: usize, block_size: usize) -> Result<()> {
    if len > block_size {
        return Err(Error::InvalidInput(format!(
            "sequence of {len} tokens exceeds the {block_size}-token block"
        )));
    }
    Ok(())
}

/// Causal GPT used by the semantic and coarse stages.
pub struct BarkCausalModel {
    input_embeds_layer: Embedding,
    position_embeds_layer: Embedding,
    layers: Vec<Block>,
    layernorm_final: LayerNorm,
    lm_head: Linear,
    cfg: BarkSubConfig,
    seq_len: usize,
}

impl BarkCausalModel {
    pub fn load(cfg: &BarkSubConfig, vb: VarBuilder) -> Result<Self> {
        let h = cfg.hidden_size;
        let layers = (0..cfg.num_layers)
            .map(|i| Block::load(cfg, cfg.bias, vb.pp(format!("layers.{i}"))))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            input_embeds_layer: candle_nn::embedding(cfg.input_vocab_size, h, vb.pp("input_embeds_layer"))?,
            position_embeds_layer: candle_nn::embedding(cfg.block_size, h, vb.pp("position_embeds_layer"))?,
            layers,
            layernorm_final: layer_norm(h, cfg.bias, vb.pp("layernorm_final"))?,
            lm_head: candle_nn::linear_no_bias(h, cfg.output_vocab_size, vb.pp("lm_head"))?,
            cfg: cfg.clone(),
            seq_len: 0,
        })
    }

    pub fn config(&self) -> &BarkSubConfig {
        &self.cfg
    }

    pub fn seq_len(&self) -> usize {
        self.seq_len
    }

    pub fn clear_kv_cache(&mut self) {
        for layer in &mut self.layers {
            layer.attn.kv_cache = None;
        }
        self.seq_len = 0;
    }

    /// Token embeddings, `[B, T]` → `[B, T, H]`.
    pub fn embed(&self, input_ids: &Tensor) -> Result<Tensor> {
        Ok(self.input_embeds_layer.forward(input_ids)?)
    }

    /// Feed token ids `[B, T]`; returns last-position logits `[B, vocab]`.
    pub fn forward(&mut self, input_ids: &Tensor) -> Result<Tensor> {
        let embeds = self.embed(input_ids)?;
        self.forward_embeds(&embeds)
    }

    /// Feed precomputed embeddings `[B, T, H]` after the cached context.
    pub fn forward_embeds(&mut self, embeds: &Tensor) -> Result<Tensor> {
        let (_batch, seq_len, _hidden) = embeds.dims3()?;
        let offset = self.seq_len;
        check_block_size(offset + seq_len, self.cfg.block_size)?;

        let positions = Tensor::arange(offset as u32, (offset + seq_len) as u32, embeds.device())?;
        let mut xs = embeds.broadcast_add(&self.position_embeds_layer.forward(&positions)?)?;
        let mask = if seq_len > 1 {
            Some(causal_mask(seq_len, offset, xs.dtype(), xs.device())?)
        } else {
            None
        };
        for layer in &mut self.layers {
            xs = layer.forward(&xs, mask.as_ref(), true)?;
        }
        self.seq_len += seq_len;

        let last = xs.narrow(1, seq_len - 1, 1)?.squeeze(1)?;
        let logits = self.lm_head.forward(&self.layernorm_final.forward(&last)?)?;
        Ok(logits.to_dtype(DType::F32)?)
    }
}

/// Non-causal GPT of the fine stage.
pub struct BarkFineModel {
    input_embeds_layers: Vec<Embedding>,
    position_embeds_layer: Embedding,
    layers: Vec<Block>,
    layernorm_final: LayerNorm,
    lm_heads: Vec<Linear>,
    cfg: BarkSubConfig,
}

impl BarkFineModel {
    pub fn load(cfg: &BarkSubConfig, vb: VarBuilder) -> Result<Self> {
        let h = cfg.hidden_size;
        let input_embeds_layers = (0..cfg.n_codes_total)
            .map(|k| {
                Ok(candle_nn::embedding(
                    cfg.input_vocab_size,
                    h,
                    vb.pp(format!("input_embeds_layers.{k}")),
                )?)
            })
            .collect::<Result<Vec<_>>>()?;
        let layers = (0..cfg.num_layers)
            .map(|i| Block::load(cfg, true, vb.pp(format!("layers.{i}"))))
            .collect::<Result<Vec<_>>>()?;
        // Heads are tied to the next codebook's embedding when not stored.
        let lm_heads = (0..cfg.n_codes_total - cfg.n_codes_given)
            .map(|i| {
                let name = format!("lm_heads.{i}");
                if vb.contains_tensor(&format!("{name}.weight")) {
                    Ok(candle_nn::linear_no_bias(h, cfg.output_vocab_size, vb.pp(name))?)
                } else {
                    let weight = input_embeds_layers[i + cfg.n_codes_given].embeddings().clone();
                    Ok(Linear::new(weight, None))
                }
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            input_embeds_layers,
            position_embeds_layer: candle_nn::embedding(cfg.block_size, h, vb.pp("position_embeds_layer"))?,
            layers,
            layernorm_final: layer_norm(h, true, vb.pp("layernorm_final"))?,
            lm_heads,
            cfg: cfg.clone(),
        })
    }

    pub fn config(&self) -> &BarkSubConfig {
        &self.cfg
    }

    /// Predict codebook `codebook` from `input_ids` `[B, T, n_codes_total]`.
    ///
    /// Only codebooks `0..=codebook` contribute to the input. Returns logits
    /// `[B, T, vocab]` for every position.
    pub fn forward(&mut self, codebook: usize, input_ids: &Tensor) -> Result<Tensor> {
        let (_batch, seq_len, n_codes) = input_ids.dims3()?;
        if codebook < self.cfg.n_codes_given || codebook >= self.cfg.n_codes_total || n_codes != self.cfg.n_codes_total {
            return Err(Error::InvalidInput(format!(
                "cannot predict codebook {codebook} from {n_codes} codebooks"
            )));
        }
        check_block_size(seq_len, self.cfg.block_size)?;

        let mut xs = self.input_embeds_layers[0].forward(&input_ids.narrow(2, 0, 1)?.squeeze(2)?)?;
        for k in 1..=codebook {
            let ids = input_ids.narrow(2, k, 1)?.squeeze(2)?;
            xs = (xs + self.input_embeds_layers[k].forward(&ids)?)?;
        }
        let positions = Tensor::arange(0u32, seq_len as u32, xs.device())?;
        let mut xs = xs.broadcast_add(&self.position_embeds_layer.forward(&positions)?)?;
        for layer in &mut self.layers {
            xs = layer.forward(&xs, None, false)?;
        }
        let xs = self.layernorm_final.forward(&xs)?;
        let logits = self.lm_heads[codebook - self.cfg.n_codes_given].forward(&xs)?;
        Ok(logits.to_dtype(DType::F32)?)
    }
}
