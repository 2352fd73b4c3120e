//! MusicGen text-to-music model.
//!
//! ```text
//! prompt → T5 encoder → enc_to_dec_proj ─┐
//!                                        ▼
//! BOS → decoder (K codebooks, delay pattern, CFG) → codes [K, F] → EnCodec → audio
//! ```
//!
//! The T5 encoder and the EnCodec codec come from `candle-transformers`; the
//! decoder is implemented here. All three load from one HuggingFace
//! `MusicgenForConditionalGeneration` checkpoint whose `config.json` carries
//! `text_encoder`, `audio_encoder` and `decoder` sub-configs.

use candle_core::{DType, Device, Module, Tensor};
use candle_nn::{Embedding, LayerNorm, Linear, VarBuilder};
use candle_transformers::models::{encodec, t5};
use serde::Deserialize;

use super::codec::CodecConfig;
use super::mask::causal_mask;
use super::sampling::Sampler;
use crate::{Error, Result};

/// Decoder section of the MusicGen `config.json`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MusicgenDecoderConfig {
    pub vocab_size: usize,
    pub max_position_embeddings: usize,
    pub num_hidden_layers: usize,
    pub ffn_dim: usize,
    pub num_attention_heads: usize,
    pub hidden_size: usize,
    pub num_codebooks: usize,
    #[serde(default = "default_pad_token_id")]
    pub pad_token_id: u32,
    #[serde(default = "default_pad_token_id")]
    pub bos_token_id: u32,
    #[serde(default)]
    pub scale_embedding: bool,
}

fn default_pad_token_id() -> u32 {
    2048
}

impl MusicgenDecoderConfig {
    /// Most frames one run can produce: BOS plus the delayed codebooks must
    /// fit in `max_position_embeddings`.
    pub fn max_frames(&self) -> usize {
        (self.max_position_embeddings + 1).saturating_sub(self.num_codebooks)
    }
}

impl Default for MusicgenDecoderConfig {
    /// `facebook/musicgen-small`.
    fn default() -> Self {
        Self {
            vocab_size: 2048,
            max_position_embeddings: 2048,
            num_hidden_layers: 24,
            ffn_dim: 4096,
            num_attention_heads: 16,
            hidden_size: 1024,
            num_codebooks: 4,
            pad_token_id: 2048,
            bos_token_id: 2048,
            scale_embedding: false,
        }
    }
}

/// Full MusicGen `config.json`.
#[derive(Debug, Clone, Deserialize)]
pub struct MusicgenConfig {
    pub text_encoder: t5::Config,
    pub audio_encoder: CodecConfig,
    pub decoder: MusicgenDecoderConfig,
}

impl MusicgenConfig {
    /// Codec frames per second (50 for the 32 kHz EnCodec).
    pub fn frame_rate(&self) -> f64 {
        self.audio_encoder.frame_rate()
    }

    /// Frames for `duration_s` seconds, rejecting durations the decoder
    /// cannot reach.
    pub fn frames_for(&self, duration_s: f64) -> Result<usize> {
        let frames = frames_for_duration(duration_s, self.frame_rate());
        let max_frames = self.decoder.max_frames();
        if frames > max_frames {
            return Err(Error::InvalidInput(format!(
                "{duration_s} s is {frames} frames, the melody model produces at most {max_frames} ({:.1} s)",
                max_frames as f64 / self.frame_rate()
            )));
        }
        Ok(frames)
    }

    pub fn sample_rate(&self) -> u32 {
        self.audio_encoder.sampling_rate as u32
    }
}

/// Sinusoidal position table rows `offset..offset + len`, `[len, dim]`.
///
/// Each row is `[cos(p·ω), sin(p·ω)]` with `ω_i = exp(-i·ln(10000)/(dim/2 - 1))`.
pub fn sinusoidal_positions(offset: usize, len: usize, dim: usize, device: &Device) -> Result<Tensor> {
    let half = dim / 2;
    let step = (10000f64).ln() / (half.max(2) - 1) as f64;
    let freqs: Vec<f64> = (0..half).map(|i| (-(i as f64) * step).exp()).collect();
    let mut data = Vec::with_capacity(len * dim);
    for p in offset..offset + len {
        let p = p as f64;
        data.extend(freqs.iter().map(|f| (p * f).cos() as f32));
        data.extend(freqs.iter().map(|f| (p * f).sin() as f32));
        // Odd widths get a zero column.
        data.extend(std::iter::repeat_n(0.0f32, dim - 2 * half));
    }
    Ok(Tensor::from_vec(data, (len, dim), device)?)
}

/// Delay layout of `num_codebooks` parallel streams over `frames` frames.
///
/// Sequence position 0 is BOS for every codebook; frame `f` of codebook `k`
/// sits at position `f + k + 1`. Positions outside a codebook's window hold
/// `pad_token`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelayPattern {
    pub num_codebooks: usize,
    pub frames: usize,
    pub pad_token: u32,
}

impl DelayPattern {
    /// Positions to generate after BOS.
    pub fn steps(&self) -> usize {
        self.frames + self.num_codebooks - 1
    }

    /// Token forced at `position` for `codebook`, or `None` when it is sampled.
    pub fn forced_token(&self, position: usize, codebook: usize) -> Option<u32> {
        if position <= codebook || position > codebook + self.frames {
            Some(self.pad_token)
        } else {
            None
        }
    }

    /// Undo the delay: `codes[k][f] = sequence[k][f + k + 1]`.
    pub fn extract(&self, sequence: &[Vec<u32>]) -> Result<Vec<Vec<u32>>> {
        sequence
            .iter()
            .enumerate()
            .map(|(k, stream)| {
                stream
                    .get(k + 1..k + 1 + self.frames)
                    .map(<[u32]>::to_vec)
                    .ok_or_else(|| {
                        Error::InvalidInput(format!(
                            "codebook {k} holds {} positions, need {}",
                            stream.len(),
                            k + 1 + self.frames
                        ))
                    })
            })
            .collect()
    }
}

/// Multi-head attention with an incremental self-attention cache or a fixed
/// cross-attention cache.
struct Attention {
    q_proj: Linear,
    k_proj: Linear,
    v_proj: Linear,
    out_proj: Linear,
    num_heads: usize,
    head_dim: usize,
    kv_cache: Option<(Tensor, Tensor)>,
}

impl Attention {
    fn load(cfg: &MusicgenDecoderConfig, vb: VarBuilder) -> Result<Self> {
        let h = cfg.hidden_size;
        Ok(Self {
            q_proj: candle_nn::linear_no_bias(h, h, vb.pp("q_proj"))?,
            k_proj: candle_nn::linear_no_bias(h, h, vb.pp("k_proj"))?,
            v_proj: candle_nn::linear_no_bias(h, h, vb.pp("v_proj"))?,
            out_proj: candle_nn::linear_no_bias(h, h, vb.pp("out_proj"))?,
            num_heads: cfg.num_attention_heads,
            head_dim: h / cfg.num_attention_heads,
            kv_cache: None,
        })
    }

    // [B, S, H] → [B, heads, S, D]
    fn heads(&self, xs: &Tensor) -> Result<Tensor> {
        let (batch, seq_len, _) = xs.dims3()?;
        Ok(xs
            .reshape((batch, seq_len, self.num_heads, self.head_dim))?
            .transpose(1, 2)?
            .contiguous()?)
    }

    /// Self-attention when `encoder_states` is `None`, cross-attention otherwise.
    fn forward(&mut self, xs: &Tensor, encoder_states: Option<&Tensor>, mask: Option<&Tensor>) -> Result<Tensor> {
        let (batch, seq_len, hidden) = xs.dims3()?;
        let scale = 1.0 / (self.head_dim as f64).sqrt();
        let q = (self.heads(&self.q_proj.forward(xs)?)? * scale)?;

        let (k, v) = match (encoder_states, self.kv_cache.take()) {
            // Encoder keys/values never change during generation.
            (Some(_), Some((k, v))) => {
                self.kv_cache = Some((k.clone(), v.clone()));
                (k, v)
            }
            (Some(enc), None) => {
                let k = self.heads(&self.k_proj.forward(enc)?)?;
                let v = self.heads(&self.v_proj.forward(enc)?)?;
                self.kv_cache = Some((k.clone(), v.clone()));
                (k, v)
            }
            (None, past) => {
                let mut k = self.heads(&self.k_proj.forward(xs)?)?;
                let mut v = self.heads(&self.v_proj.forward(xs)?)?;
                if let Some((past_k, past_v)) = past {
                    k = Tensor::cat(&[&past_k, &k], 2)?;
                    v = Tensor::cat(&[&past_v, &v], 2)?;
                }
                self.kv_cache = Some((k.clone(), v.clone()));
                (k, v)
            }
        };

        let att = q.matmul(&k.t()?)?;
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

struct DecoderLayer {
    self_attn: Attention,
    self_attn_layer_norm: LayerNorm,
    encoder_attn: Attention,
    encoder_attn_layer_norm: LayerNorm,
    fc1: Linear,
    fc2: Linear,
    final_layer_norm: LayerNorm,
}

impl DecoderLayer {
    fn load(cfg: &MusicgenDecoderConfig, vb: VarBuilder) -> Result<Self> {
        let h = cfg.hidden_size;
        Ok(Self {
            self_attn: Attention::load(cfg, vb.pp("self_attn"))?,
            self_attn_layer_norm: candle_nn::layer_norm(h, 1e-5, vb.pp("self_attn_layer_norm"))?,
            encoder_attn: Attention::load(cfg, vb.pp("encoder_attn"))?,
            encoder_attn_layer_norm: candle_nn::layer_norm(h, 1e-5, vb.pp("encoder_attn_layer_norm"))?,
            fc1: candle_nn::linear_no_bias(h, cfg.ffn_dim, vb.pp("fc1"))?,
            fc2: candle_nn::linear_no_bias(cfg.ffn_dim, h, vb.pp("fc2"))?,
            final_layer_norm: candle_nn::layer_norm(h, 1e-5, vb.pp("final_layer_norm"))?,
        })
    }

    fn forward(&mut self, xs: &Tensor, encoder_states: &Tensor, mask: Option<&Tensor>) -> Result<Tensor> {
        let residual = xs;
        let h = self.self_attn.forward(&self.self_attn_layer_norm.forward(xs)?, None, mask)?;
        let xs = (h + residual)?;

        let residual = &xs;
        let h = self.encoder_attn.forward(
            &self.encoder_attn_layer_norm.forward(&xs)?,
            Some(encoder_states),
            None,
        )?;
        let xs = (h + residual)?;

        let residual = &xs;
        let h = self.final_layer_norm.forward(&xs)?;
        let h = self.fc2.forward(&self.fc1.forward(&h)?.gelu_erf()?)?;
        Ok((h + residual)?)
    }

    fn clear_kv_cache(&mut self) {
        self.self_attn.kv_cache = None;
        self.encoder_attn.kv_cache = None;
    }
}

/// The MusicGen decoder: summed codebook embeddings, sinusoidal positions,
/// pre-norm layers and one LM head per codebook.
pub struct MusicgenDecoder {
    embed_tokens: Vec<Embedding>,
    layers: Vec<DecoderLayer>,
    layer_norm: LayerNorm,
    lm_heads: Vec<Linear>,
    cfg: MusicgenDecoderConfig,
    embed_scale: f64,
    seq_len: usize,
}

impl MusicgenDecoder {
    /// `vb` points at `decoder` inside the checkpoint.
    pub fn load(cfg: &MusicgenDecoderConfig, vb: VarBuilder) -> Result<Self> {
        let h = cfg.hidden_size;
        let dec = vb.pp("model").pp("decoder");
        let embed_tokens = (0..cfg.num_codebooks)
            .map(|k| Ok(candle_nn::embedding(cfg.vocab_size + 1, h, dec.pp(format!("embed_tokens.{k}")))?))
            .collect::<Result<Vec<_>>>()?;
        let layers = (0..cfg.num_hidden_layers)
            .map(|i| DecoderLayer::load(cfg, dec.pp(format!("layers.{i}"))))
            .collect::<Result<Vec<_>>>()?;
        let layer_norm = candle_nn::layer_norm(h, 1e-5, dec.pp("layer_norm"))?;
        let lm_heads = (0..cfg.num_codebooks)
            .map(|k| Ok(candle_nn::linear_no_bias(h, cfg.vocab_size, vb.pp(format!("lm_heads.{k}")))?))
            .collect::<Result<Vec<_>>>()?;
        let embed_scale = if cfg.scale_embedding { (h as f64).sqrt() } else { 1.0 };
        Ok(Self {
            embed_tokens,
            layers,
            layer_norm,
            lm_heads,
            cfg: cfg.clone(),
            embed_scale,
            seq_len: 0,
        })
    }

    pub fn config(&self) -> &MusicgenDecoderConfig {
        &self.cfg
    }

    pub fn clear_kv_cache(&mut self) {
        for layer in &mut self.layers {
            layer.clear_kv_cache();
        }
        self.seq_len = 0;
    }

    /// Feed `input_ids` `[B, K, T]` after the cached context, attending to
    /// `encoder_states` `[B, L, H]`.
    ///
    /// Returns last-position logits `[B, K, vocab]`.
    pub fn forward(&mut self, input_ids: &Tensor, encoder_states: &Tensor) -> Result<Tensor> {
        let (_batch, num_codebooks, seq_len) = input_ids.dims3()?;
        if num_codebooks != self.cfg.num_codebooks {
            return Err(Error::InvalidInput(format!(
                "expected {} codebooks, got {num_codebooks}",
                self.cfg.num_codebooks
            )));
        }
        let offset = self.seq_len;
        if offset + seq_len > self.cfg.max_position_embeddings {
            return Err(Error::InvalidInput(format!(
                "sequence of {} steps exceeds {} positions",
                offset + seq_len,
                self.cfg.max_position_embeddings
            )));
        }

        // Σ_k embed_k(ids[:, k]) → [B, T, H]
        let mut xs = self.embed_tokens[0].forward(&input_ids.narrow(1, 0, 1)?.squeeze(1)?)?;
        for (k, embed) in self.embed_tokens.iter().enumerate().skip(1) {
            xs = (xs + embed.forward(&input_ids.narrow(1, k, 1)?.squeeze(1)?)?)?;
        }
        if self.embed_scale != 1.0 {
            xs = (xs * self.embed_scale)?;
        }
        let positions = sinusoidal_positions(offset, seq_len, self.cfg.hidden_size, xs.device())?
            .to_dtype(xs.dtype())?;
        let mut xs = xs.broadcast_add(&positions)?;

        let mask = if seq_len > 1 {
            Some(causal_mask(seq_len, offset, xs.dtype(), xs.device())?)
        } else {
            None
        };
        for layer in &mut self.layers {
            xs = layer.forward(&xs, encoder_states, mask.as_ref())?;
        }
        self.seq_len += seq_len;

        let last = self.layer_norm.forward(&xs.narrow(1, seq_len - 1, 1)?)?;
        // K × [B, 1, V] → [B, K, V]
        let logits = self
            .lm_heads
            .iter()
            .map(|head| Ok(head.forward(&last)?))
            .collect::<Result<Vec<_>>>()?;
        Ok(Tensor::cat(&logits, 1)?.to_dtype(DType::F32)?)
    }
}

/// Mix conditional and unconditional logits: `u + (c - u) · scale`.
pub fn guided_logits(cond: &Tensor, uncond: &Tensor, scale: f64) -> Result<Tensor> {
    Ok(uncond.add(&((cond - uncond)? * scale)?)?)
}

/// Text encoder, decoder and codec of one MusicGen checkpoint.
pub struct Musicgen {
    text_encoder: t5::T5EncoderModel,
    enc_to_dec_proj: Option<Linear>,
    decoder: MusicgenDecoder,
    audio_encoder: encodec::Model,
    cfg: MusicgenConfig,
    device: Device,
}

impl Musicgen {
    pub fn load(cfg: &MusicgenConfig, vb: VarBuilder) -> Result<Self> {
        let text_encoder = t5::T5EncoderModel::load(vb.pp("text_encoder"), &cfg.text_encoder)?;
        let enc_to_dec_proj = if vb.contains_tensor("enc_to_dec_proj.weight") {
            Some(candle_nn::linear(
                cfg.text_encoder.d_model,
                cfg.decoder.hidden_size,
                vb.pp("enc_to_dec_proj"),
            )?)
        } else {
            None
        };
        let decoder = MusicgenDecoder::load(&cfg.decoder, vb.pp("decoder"))?;
        let audio_encoder = encodec::Model::new(&cfg.audio_encoder.to_encodec()?, vb.pp("audio_encoder"))?;
        Ok(Self {
            text_encoder,
            enc_to_dec_proj,
            decoder,
            audio_encoder,
            cfg: cfg.clone(),
            device: vb.device().clone(),
        })
    }

    pub fn config(&self) -> &MusicgenConfig {
        &self.cfg
    }

    /// Encode prompt tokens to decoder-width states `[1, L, H]`.
    pub fn encode_text(&mut self, token_ids: &[u32]) -> Result<Tensor> {
        let ids = Tensor::new(token_ids, &self.device)?.unsqueeze(0)?;
        let states = self.text_encoder.forward(&ids)?;
        match &self.enc_to_dec_proj {
            Some(proj) => Ok(proj.forward(&states)?),
            None => Ok(states),
        }
    }

    /// Generate `frames` codec frames conditioned on `token_ids`.
    ///
    /// With `guidance_scale > 1` a second, unconditional row attends to zero
    /// encoder states and the two rows' logits are mixed. Returns codes
    /// `[K][frames]`.
    pub fn generate_codes(
        &mut self,
        token_ids: &[u32],
        frames: usize,
        guidance_scale: f64,
        sampler: &mut Sampler,
    ) -> Result<Vec<Vec<u32>>> {
        let max_frames = self.cfg.decoder.max_frames();
        if frames > max_frames {
            return Err(Error::InvalidInput(format!(
                "{frames} frames requested, the decoder fits at most {max_frames}"
            )));
        }
        let cond = self.encode_text(token_ids)?;
        let use_cfg = guidance_scale > 1.0;
        let encoder_states = if use_cfg {
            Tensor::cat(&[&cond, &cond.zeros_like()?], 0)?
        } else {
            cond
        };
        let batch = encoder_states.dim(0)?;

        let num_codebooks = self.cfg.decoder.num_codebooks;
        let pattern = DelayPattern {
            num_codebooks,
            frames,
            pad_token: self.cfg.decoder.pad_token_id,
        };
        let mut sequence = vec![vec![self.cfg.decoder.bos_token_id]; num_codebooks];

        tracing::debug!(frames, steps = pattern.steps(), use_cfg, "generating melody codes");
        self.decoder.clear_kv_cache();
        for position in 1..=pattern.steps() {
            let last: Vec<u32> = sequence.iter().map(|stream| stream[position - 1]).collect();
            let ids = Tensor::from_vec(last, (1, num_codebooks, 1), &self.device)?
                .repeat((batch, 1, 1))?;
            let logits = self.decoder.forward(&ids, &encoder_states)?; // [B, K, V]
            let logits = if use_cfg {
                guided_logits(&logits.get(0)?, &logits.get(1)?, guidance_scale)?
            } else {
                logits.get(0)?
            };
            let rows: Vec<Vec<f32>> = logits.to_device(&Device::Cpu)?.to_vec2()?;
            for (k, stream) in sequence.iter_mut().enumerate() {
                let token = match pattern.forced_token(position, k) {
                    Some(token) => token,
                    None => sampler.sample_slice(&rows[k]),
                };
                stream.push(token);
            }
            if position % 250 == 0 {
                tracing::debug!(position, total = pattern.steps(), "melody decoding");
            }
        }
        self.decoder.clear_kv_cache();
        pattern.extract(&sequence)
    }

    /// Decode codes `[K][F]` to interleaved samples at the codec rate.
    pub fn decode_audio(&self, codes: &[Vec<u32>]) -> Result<Vec<f32>> {
        let num_codebooks = codes.len();
        let frames = codes.first().map_or(0, Vec::len);
        let flat: Vec<u32> = codes.iter().flatten().copied().collect();
        let codes = Tensor::from_vec(flat, (1, num_codebooks, frames), &self.device)?;
        let audio = self.audio_encoder.decode(&codes)?; // [1, C, S]
        let channels = audio.dim(1)?;
        // [1, C, S] → [S, C] interleaved
        let audio = audio.squeeze(0)?.t()?.contiguous()?;
        let samples = audio.to_dtype(DType::F32)?.flatten_all()?.to_vec1::<f32>()?;
        tracing::debug!(channels, samples = samples.len(), "melody decoded");
        Ok(samples)
    }

    pub fn channels(&self) -> u16 {
        self.cfg.audio_encoder.audio_channels as u16
    }
}

/// Number of codec frames for `duration_s` seconds.
pub fn frames_for_duration(duration_s: f64, frame_rate: f64) -> usize {
    (duration_s * frame_rate).round().max(1.0) as usize
}
