//! Bark text-to-audio model.
//!
//! Three GPT stages turn text into EnCodec codes, and the 24 kHz codec turns
//! those into audio:
//!
//! ```text
//! text ─► semantic GPT ─► semantic tokens (~50/s)
//!      ─► coarse GPT   ─► codebooks 0..2 (75/s, interleaved)
//!      ─► fine GPT     ─► codebooks 2..8
//!      ─► EnCodec      ─► 24 kHz waveform
//! ```
//!
//! A voice preset ("history prompt") supplies semantic, coarse and fine tokens
//! of a reference speaker that prefix every stage.

pub mod gpt;

use std::path::Path;

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::encodec;
use serde::Deserialize;

use self::gpt::{BarkCausalModel, BarkFineModel, BarkSubConfig};
use super::codec::CodecConfig;
use super::sampling::{Sampler, SamplingParams, filtered_probs};
use crate::{Error, Result};

pub const TEXT_ENCODING_OFFSET: u32 = 10_048;
pub const TEXT_PAD_TOKEN: u32 = 129_595;
pub const SEMANTIC_INFER_TOKEN: u32 = 129_599;
pub const SEMANTIC_VOCAB_SIZE: u32 = 10_000;
/// Padding in the semantic stage and its end-of-sequence token.
pub const SEMANTIC_PAD_TOKEN: u32 = 10_000;
pub const MAX_INPUT_SEMANTIC_LENGTH: usize = 256;

pub const CODEBOOK_SIZE: u32 = 1024;
pub const N_COARSE_CODEBOOKS: usize = 2;
pub const N_FINE_CODEBOOKS: usize = 8;
pub const COARSE_RATE_HZ: f64 = 75.0;
pub const SEMANTIC_RATE_HZ: f64 = 49.9;
pub const COARSE_SEMANTIC_PAD_TOKEN: u32 = 12_048;
pub const COARSE_INFER_TOKEN: u32 = 12_050;
pub const MAX_COARSE_HISTORY: usize = 630;
pub const COARSE_SLIDING_WINDOW: usize = 60;

pub const FINE_WINDOW: usize = 1024;
pub const FINE_HISTORY: usize = 512;

pub const SAMPLE_RATE: u32 = 24_000;

/// Bark `config.json`.
#[derive(Debug, Clone, Deserialize)]
pub struct BarkConfig {
    pub semantic_config: BarkSubConfig,
    pub coarse_acoustics_config: BarkSubConfig,
    pub fine_acoustics_config: BarkSubConfig,
    pub codec_config: CodecConfig,
}

/// Sampling settings of the three stages.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BarkGenerationParams {
    pub semantic_temperature: f64,
    pub coarse_temperature: f64,
    pub fine_temperature: f64,
    /// Stop the semantic stage once the end token reaches this probability.
    pub min_eos_p: f64,
    pub max_semantic_tokens: usize,
}

impl Default for BarkGenerationParams {
    fn default() -> Self {
        Self {
            semantic_temperature: 0.7,
            coarse_temperature: 0.7,
            fine_temperature: 0.5,
            min_eos_p: 0.2,
            max_semantic_tokens: 768,
        }
    }
}

/// Speaker conditioning tokens of one voice preset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryPrompt {
    pub semantic: Vec<u32>,
    /// `[2][T]`
    pub coarse: Vec<Vec<u32>>,
    /// `[8][T]`
    pub fine: Vec<Vec<u32>>,
}

impl HistoryPrompt {
    /// Read the three `.npy` arrays of a preset.
    pub fn from_npy(semantic: &Path, coarse: &Path, fine: &Path) -> Result<Self> {
        let semantic = read_npy_tokens(semantic)?;
        let coarse = read_npy_codebooks(coarse)?;
        let fine = read_npy_codebooks(fine)?;
        if coarse.len() != N_COARSE_CODEBOOKS || fine.len() != N_FINE_CODEBOOKS {
            return Err(Error::Config(format!(
                "voice preset has {} coarse and {} fine codebooks, expected {N_COARSE_CODEBOOKS} and {N_FINE_CODEBOOKS}",
                coarse.len(),
                fine.len()
            )));
        }
        Ok(Self { semantic, coarse, fine })
    }
}

fn to_tokens(values: Vec<i64>) -> Result<Vec<u32>> {
    values
        .into_iter()
        .map(|v| u32::try_from(v).map_err(|_| Error::Config(format!("invalid token {v} in voice preset"))))
        .collect()
}

fn read_npy_tokens(path: &Path) -> Result<Vec<u32>> {
    let tensor = Tensor::read_npy(path)?.to_dtype(DType::I64)?;
    to_tokens(tensor.flatten_all()?.to_vec1::<i64>()?)
}

fn read_npy_codebooks(path: &Path) -> Result<Vec<Vec<u32>>> {
    let tensor = Tensor::read_npy(path)?.to_dtype(DType::I64)?;
    tensor
        .to_vec2::<i64>()?
        .into_iter()
        .map(to_tokens)
        .collect()
}

/// Text token ids shifted into the semantic vocabulary, cut or padded to
/// [`MAX_INPUT_SEMANTIC_LENGTH`].
pub fn semantic_text_tokens(text_ids: &[u32]) -> Vec<u32> {
    let mut tokens: Vec<u32> = text_ids
        .iter()
        .take(MAX_INPUT_SEMANTIC_LENGTH)
        .map(|&id| id + TEXT_ENCODING_OFFSET)
        .collect();
    tokens.resize(MAX_INPUT_SEMANTIC_LENGTH, TEXT_PAD_TOKEN);
    tokens
}

/// The last [`MAX_INPUT_SEMANTIC_LENGTH`] history tokens, right-padded.
pub fn semantic_history_tokens(history: Option<&[u32]>) -> Vec<u32> {
    let history = history.unwrap_or(&[]);
    let start = history.len().saturating_sub(MAX_INPUT_SEMANTIC_LENGTH);
    let mut tokens = history[start..].to_vec();
    tokens.resize(MAX_INPUT_SEMANTIC_LENGTH, SEMANTIC_PAD_TOKEN);
    tokens
}

/// Coarse tokens per semantic token (≈ 3.006).
pub fn semantic_to_coarse_ratio() -> f64 {
    COARSE_RATE_HZ / SEMANTIC_RATE_HZ * N_COARSE_CODEBOOKS as f64
}

pub fn max_semantic_history() -> usize {
    (MAX_COARSE_HISTORY as f64 / semantic_to_coarse_ratio()).floor() as usize
}

/// Interleave codebooks frame by frame into the coarse vocabulary:
/// codebook `k` is offset by `k · CODEBOOK_SIZE` and everything by
/// [`SEMANTIC_VOCAB_SIZE`].
pub fn flatten_coarse(codes: &[Vec<u32>]) -> Vec<u32> {
    let frames = codes.iter().map(Vec::len).min().unwrap_or(0);
    (0..frames)
        .flat_map(|f| {
            codes
                .iter()
                .enumerate()
                .map(move |(k, stream)| stream[f] + k as u32 * CODEBOOK_SIZE + SEMANTIC_VOCAB_SIZE)
        })
        .collect()
}

/// Inverse of [`flatten_coarse`] for [`N_COARSE_CODEBOOKS`] codebooks.
/// A trailing partial frame is dropped.
pub fn unflatten_coarse(tokens: &[u32]) -> Vec<Vec<u32>> {
    let mut codes = vec![Vec::with_capacity(tokens.len() / N_COARSE_CODEBOOKS); N_COARSE_CODEBOOKS];
    for frame in tokens.chunks_exact(N_COARSE_CODEBOOKS) {
        for (k, &token) in frame.iter().enumerate() {
            let offset = SEMANTIC_VOCAB_SIZE + k as u32 * CODEBOOK_SIZE;
            codes[k].push(token.saturating_sub(offset).min(CODEBOOK_SIZE - 1));
        }
    }
    codes
}

/// Trim semantic and flattened coarse history to aligned tails.
///
/// The coarse tail loses its last two tokens so generation starts on a
/// codebook-0 step.
pub fn align_coarse_history(semantic: &[u32], coarse_flat: &[u32]) -> (Vec<u32>, Vec<u32>) {
    let ratio = semantic_to_coarse_ratio();
    let n_semantic = max_semantic_history()
        .min(semantic.len() - semantic.len() % 2)
        .min((coarse_flat.len() as f64 / ratio).floor() as usize);
    let n_coarse = ((n_semantic as f64 * ratio).round() as usize).min(coarse_flat.len());
    let semantic = semantic[semantic.len() - n_semantic..].to_vec();
    let mut coarse = coarse_flat[coarse_flat.len() - n_coarse..].to_vec();
    coarse.truncate(coarse.len().saturating_sub(2));
    (semantic, coarse)
}

/// Coarse tokens to generate for `semantic_len` semantic tokens (a whole
/// number of frames).
pub fn coarse_steps(semantic_len: usize) -> usize {
    let per_codebook = (semantic_len as f64 * semantic_to_coarse_ratio() / N_COARSE_CODEBOOKS as f64).floor();
    (per_codebook * N_COARSE_CODEBOOKS as f64).round() as usize
}

/// Logit range `[start, end)` of the codebook predicted at coarse step `step`.
pub fn coarse_logit_range(step: usize) -> (usize, usize) {
    let codebook = step % N_COARSE_CODEBOOKS;
    let start = SEMANTIC_VOCAB_SIZE as usize + codebook * CODEBOOK_SIZE as usize;
    (start, start + CODEBOOK_SIZE as usize)
}

/// One window of the fine stage over the padded `[T, 8]` buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FineWindow {
    /// First buffer row fed to the model.
    pub start: usize,
    /// First buffer row whose predictions are kept.
    pub fill_start: usize,
}

impl FineWindow {
    pub fn relative_fill_start(&self) -> usize {
        self.fill_start - self.start
    }
}

/// Windows covering `frames` new frames after `history` frames in a buffer
/// of `total` rows (`total >= FINE_WINDOW`).
pub fn fine_windows(frames: usize, history: usize, total: usize) -> Vec<FineWindow> {
    let excess = frames as i64 - (FINE_WINDOW as i64 - history as i64);
    let step = FINE_HISTORY as i64;
    let loops = if excess > 0 { (excess + step - 1) / step } else { 0 } as usize + 1;
    (0..loops)
        .map(|n| FineWindow {
            start: (n * FINE_HISTORY).min(total - FINE_WINDOW),
            fill_start: (history + n * FINE_HISTORY).min(total - FINE_HISTORY),
        })
        .collect()
}

/// Bark's three GPT stages and codec.
pub struct Bark {
    semantic: BarkCausalModel,
    coarse: BarkCausalModel,
    fine: BarkFineModel,
    codec: encodec::Model,
    device: Device,
}

impl Bark {
    pub fn load(cfg: &BarkConfig, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            semantic: BarkCausalModel::load(&cfg.semantic_config, vb.pp("semantic"))?,
            coarse: BarkCausalModel::load(&cfg.coarse_acoustics_config, vb.pp("coarse_acoustics"))?,
            fine: BarkFineModel::load(&cfg.fine_acoustics_config, vb.pp("fine_acoustics"))?,
            codec: encodec::Model::new(&cfg.codec_config.to_encodec()?, vb.pp("codec_model"))?,
            device: vb.device().clone(),
        })
    }

    /// Full text → waveform run. `text_ids` are tokenizer ids without
    /// special tokens. Returns mono samples at [`SAMPLE_RATE`].
    pub fn generate_audio(
        &mut self,
        text_ids: &[u32],
        history: Option<&HistoryPrompt>,
        params: &BarkGenerationParams,
        seed: Option<u64>,
    ) -> Result<Vec<f32>> {
        let sampler = |temperature: f64, stage: u64| {
            Sampler::new(
                SamplingParams::with_temperature(temperature),
                seed.map(|s| s.wrapping_add(stage)),
            )
        };

        let semantic = generate_semantic(
            &mut self.semantic,
            text_ids,
            history,
            params.min_eos_p,
            params.max_semantic_tokens,
            &mut sampler(params.semantic_temperature, 0),
            &self.device,
        )?;
        tracing::debug!(tokens = semantic.len(), "semantic stage done");
        if semantic.is_empty() {
            return Err(Error::Audio("semantic stage produced no tokens".into()));
        }

        let coarse = generate_coarse(
            &mut self.coarse,
            &semantic,
            history,
            &mut sampler(params.coarse_temperature, 1),
            &self.device,
        )?;
        tracing::debug!(frames = coarse[0].len(), "coarse stage done");
        if coarse[0].is_empty() {
            return Err(Error::Audio("coarse stage produced no frames".into()));
        }

        let fine = generate_fine(
            &mut self.fine,
            &coarse,
            history,
            &mut sampler(params.fine_temperature, 2),
            &self.device,
        )?;
        tracing::debug!(frames = fine[0].len(), "fine stage done");
        self.decode_audio(&fine)
    }

    /// Decode codes `[8][T]` to mono samples at [`SAMPLE_RATE`].
    pub fn decode_audio(&self, codes: &[Vec<u32>]) -> Result<Vec<f32>> {
        let frames = codes.first().map_or(0, Vec::len);
        let flat: Vec<u32> = codes.iter().flatten().copied().collect();
        let codes = Tensor::from_vec(flat, (1, codes.len(), frames), &self.device)?;
        let audio = self.codec.decode(&codes)?;
        Ok(audio.to_dtype(DType::F32)?.flatten_all()?.to_vec1::<f32>()?)
    }
}

/// Semantic tokens for `text_ids`, stopping at the end token, when its
/// probability reaches `min_eos_p`, or after `max_tokens`.
///
/// `max_tokens` is further capped so the prompt and every token but the
/// last fit in the model's block.
pub fn generate_semantic(
    model: &mut BarkCausalModel,
    text_ids: &[u32],
    history: Option<&HistoryPrompt>,
    min_eos_p: f64,
    max_tokens: usize,
    sampler: &mut Sampler,
    device: &Device,
) -> Result<Vec<u32>> {
    let text = Tensor::new(semantic_text_tokens(text_ids).as_slice(), device)?.unsqueeze(0)?;
    let past = semantic_history_tokens(history.map(|h| h.semantic.as_slice()));
    let past = Tensor::new(past.as_slice(), device)?.unsqueeze(0)?;
    let infer = Tensor::new(&[[SEMANTIC_INFER_TOKEN]], device)?;

    // Text and history share positions: their embeddings are summed.
    let context = (model.embed(&text)? + model.embed(&past)?)?;
    let embeds = Tensor::cat(&[&context, &model.embed(&infer)?], 1)?;
    let prompt_len = embeds.dim(1)?;
    let max_tokens = max_tokens.min((model.config().block_size + 1).saturating_sub(prompt_len));

    let params = sampler.params();
    let eos = SEMANTIC_PAD_TOKEN as usize;
    let mut tokens = Vec::new();
    if max_tokens == 0 {
        return Ok(tokens);
    }
    model.clear_kv_cache();
    let mut logits = model.forward_embeds(&embeds)?;
    loop {
        let row: Vec<f32> = logits.squeeze(0)?.to_device(&Device::Cpu)?.to_vec1()?;
        // Only semantic tokens plus the end token may be sampled.
        let row = &row[..=eos];
        let probs = filtered_probs(row, &params);
        let token = sampler.draw(&probs);
        if token as usize == eos || probs[eos] as f64 >= min_eos_p {
            break;
        }
        tokens.push(token);
        if tokens.len() == max_tokens {
            break;
        }
        logits = model.forward(&Tensor::new(&[[token]], device)?)?;
    }
    model.clear_kv_cache();
    Ok(tokens)
}

/// First two codebooks `[2][T]` for `semantic` tokens.
pub fn generate_coarse(
    model: &mut BarkCausalModel,
    semantic: &[u32],
    history: Option<&HistoryPrompt>,
    sampler: &mut Sampler,
    device: &Device,
) -> Result<Vec<Vec<u32>>> {
    let ratio = semantic_to_coarse_ratio();
    let max_semantic_history = max_semantic_history();
    let (semantic_history, coarse_history) = match history {
        Some(h) => align_coarse_history(&h.semantic, &flatten_coarse(&h.coarse)),
        None => (Vec::new(), Vec::new()),
    };
    let n_steps = coarse_steps(semantic.len());
    let base_semantic = semantic_history.len();
    let all_semantic: Vec<u32> = semantic_history.iter().chain(semantic).copied().collect();
    let mut coarse = coarse_history.clone();
    let params = sampler.params();

    let mut step = 0usize;
    while step < n_steps {
        let semantic_idx = base_semantic + (step as f64 / ratio).round() as usize;
        let from = semantic_idx.saturating_sub(max_semantic_history).min(all_semantic.len());
        let mut window: Vec<u32> = all_semantic[from..]
            .iter()
            .take(MAX_INPUT_SEMANTIC_LENGTH)
            .copied()
            .collect();
        window.resize(MAX_INPUT_SEMANTIC_LENGTH, COARSE_SEMANTIC_PAD_TOKEN);
        window.push(COARSE_INFER_TOKEN);
        window.extend_from_slice(&coarse[coarse.len().saturating_sub(MAX_COARSE_HISTORY)..]);

        // Each window starts from a fresh cache.
        model.clear_kv_cache();
        let mut input = Tensor::new(window.as_slice(), device)?.unsqueeze(0)?;
        for _ in 0..COARSE_SLIDING_WINDOW {
            if step >= n_steps {
                break;
            }
            let logits = model.forward(&input)?;
            let row: Vec<f32> = logits.squeeze(0)?.to_device(&Device::Cpu)?.to_vec1()?;
            let (start, end) = coarse_logit_range(step);
            let probs = filtered_probs(&row[start..end], &params);
            let token = sampler.draw(&probs) + start as u32;
            coarse.push(token);
            input = Tensor::new(&[[token]], device)?;
            step += 1;
        }
    }
    model.clear_kv_cache();
    Ok(unflatten_coarse(&coarse[coarse_history.len()..]))
}

/// Complete the remaining codebooks, returning all eight `[8][T]`.
pub fn generate_fine(
    model: &mut BarkFineModel,
    coarse: &[Vec<u32>],
    history: Option<&HistoryPrompt>,
    sampler: &mut Sampler,
    device: &Device,
) -> Result<Vec<Vec<u32>>> {
    let n_coarse = coarse.len();
    let frames = coarse.first().map_or(0, Vec::len);
    let params = sampler.params();

    // Rows are frames, columns codebooks; unknown codebooks hold the pad.
    let mut rows: Vec<[u32; N_FINE_CODEBOOKS]> = Vec::new();
    let mut n_history = 0;
    if let Some(h) = history {
        let len = h.fine.first().map_or(0, Vec::len);
        let start = len.saturating_sub(FINE_HISTORY);
        for f in start..len {
            rows.push(std::array::from_fn(|k| h.fine[k][f]));
        }
        n_history = len - start;
    }
    for f in 0..frames {
        rows.push(std::array::from_fn(|k| if k < n_coarse { coarse[k][f] } else { CODEBOOK_SIZE }));
    }
    let n_pad = FINE_WINDOW.saturating_sub(rows.len());
    rows.resize(rows.len() + n_pad, [CODEBOOK_SIZE; N_FINE_CODEBOOKS]);

    for window in fine_windows(frames, n_history, rows.len()) {
        let rel = window.relative_fill_start();
        let mut buffer: Vec<[u32; N_FINE_CODEBOOKS]> = rows[window.start..window.start + FINE_WINDOW].to_vec();
        for codebook in n_coarse..N_FINE_CODEBOOKS {
            let flat: Vec<u32> = buffer.iter().flatten().copied().collect();
            let input = Tensor::from_vec(flat, (1, FINE_WINDOW, N_FINE_CODEBOOKS), device)?;
            let logits = model.forward(codebook, &input)?.squeeze(0)?;
            let logits: Vec<Vec<f32>> = logits.to_device(&Device::Cpu)?.to_vec2()?;
            for (row, position_logits) in buffer.iter_mut().zip(&logits).skip(rel) {
                let probs = filtered_probs(&position_logits[..CODEBOOK_SIZE as usize], &params);
                row[codebook] = sampler.draw(&probs);
            }
        }
        for (offset, row) in buffer[rel..].iter().enumerate() {
            let target = &mut rows[window.fill_start + offset];
            target[n_coarse..].copy_from_slice(&row[n_coarse..]);
        }
    }

    let rows = &rows[n_history..n_history + frames];
    Ok((0..N_FINE_CODEBOOKS)
        .map(|k| rows.iter().map(|row| row[k]).collect())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_semantic_text_tokens() {
        let tokens = semantic_text_tokens(&[1, 2]);
        assert_eq!(tokens.len(), MAX_INPUT_SEMANTIC_LENGTH);
        assert_eq!(&tokens[..2], &[10_049, 10_050]);
        assert!(tokens[2..].iter().all(|&t| t == TEXT_PAD_TOKEN));

        let long: Vec<u32> = (0..300).collect();
        let tokens = semantic_text_tokens(&long);
        assert_eq!(tokens.len(), MAX_INPUT_SEMANTIC_LENGTH);
        assert_eq!(tokens[255], 255 + TEXT_ENCODING_OFFSET);
    }

    #[test]
    fn test_semantic_history_tokens() {
        let empty = semantic_history_tokens(None);
        assert!(empty.iter().all(|&t| t == SEMANTIC_PAD_TOKEN));

        let history: Vec<u32> = (0..300).collect();
        let tokens = semantic_history_tokens(Some(&history));
        assert_eq!(tokens[0], 44);
        assert_eq!(tokens[255], 299);
    }

    #[test]
    fn test_coarse_ratio_constants() {
        assert!((semantic_to_coarse_ratio() - 3.006_012).abs() < 1e-6);
        assert_eq!(max_semantic_history(), 209);
    }

    #[test]
    fn test_flatten_unflatten_coarse() {
        let codes = vec![vec![1, 2, 3], vec![4, 5, 6]];
        let flat = flatten_coarse(&codes);
        assert_eq!(flat, vec![10_001, 11_028, 10_002, 11_029, 10_003, 11_030]);
        assert_eq!(unflatten_coarse(&flat), codes);
        // Partial trailing frame is dropped.
        assert_eq!(unflatten_coarse(&flat[..5]), vec![vec![1, 2], vec![4, 5]]);
    }

    #[test]
    fn test_align_coarse_history() {
        let semantic: Vec<u32> = (0..301).collect();
        let coarse: Vec<u32> = (0..900).collect();
        let (semantic, coarse) = align_coarse_history(&semantic, &coarse);
        // min(209, 300, floor(900 / 3.006)) = 209 semantic tokens,
        // round(209 · 3.006) = 628 coarse tokens, minus two.
        assert_eq!(semantic.len(), 209);
        assert_eq!(*semantic.last().unwrap(), 300);
        assert_eq!(coarse.len(), 626);
        assert_eq!(coarse[0], 900 - 628);
    }

    #[test]
    fn test_coarse_steps_whole_frames() {
        assert_eq!(coarse_steps(0), 0);
        // 100 · 3.006 / 2 = 150.3 → 150 frames → 300 tokens.
        assert_eq!(coarse_steps(100), 300);
        assert_eq!(coarse_steps(7) % N_COARSE_CODEBOOKS, 0);
    }

    #[test]
    fn test_coarse_logit_range_alternates() {
        assert_eq!(coarse_logit_range(0), (10_000, 11_024));
        assert_eq!(coarse_logit_range(1), (11_024, 12_048));
        assert_eq!(coarse_logit_range(2), (10_000, 11_024));
    }

    #[test]
    fn test_fine_windows_short_clip() {
        let windows = fine_windows(100, 0, FINE_WINDOW);
        assert_eq!(windows, vec![FineWindow { start: 0, fill_start: 0 }]);
    }

    #[test]
    fn test_fine_windows_long_clip_with_history() {
        let windows = fine_windows(2000, 512, 2512);
        let expected = [(0, 512), (512, 1024), (1024, 1536), (1488, 2000)];
        assert_eq!(windows.len(), expected.len());
        for (window, &(start, fill_start)) in windows.iter().zip(&expected) {
            assert_eq!((window.start, window.fill_start), (start, fill_start));
        }
        assert_eq!(windows[3].relative_fill_start(), 512);
    }

    /// Zero-weight stage model config; `top_k = 1` then always picks index 0.
    fn stage_config(block_size: usize, input_vocab_size: usize, output_vocab_size: usize) -> BarkSubConfig {
        BarkSubConfig {
            block_size,
            input_vocab_size,
            output_vocab_size,
            num_layers: 1,
            num_heads: 2,
            hidden_size: 8,
            bias: true,
            n_codes_total: N_FINE_CODEBOOKS,
            n_codes_given: 1,
        }
    }

    fn first_token_sampler() -> Sampler {
        let params = SamplingParams {
            temperature: 1.0,
            top_k: Some(1),
            top_p: None,
        };
        Sampler::new(params, Some(0))
    }

    fn zeros() -> VarBuilder<'static> {
        VarBuilder::zeros(DType::F32, &Device::Cpu)
    }

    #[test]
    fn test_semantic_stops_at_the_block_limit() {
        // 256 text/history positions + infer token + 3 fed-back tokens.
        let cfg = stage_config(260, SEMANTIC_INFER_TOKEN as usize + 1, 10_048);
        let mut model = BarkCausalModel::load(&cfg, zeros()).unwrap();
        let tokens =
            generate_semantic(&mut model, &[1, 2, 3], None, 1.1, 4, &mut first_token_sampler(), &Device::Cpu)
                .unwrap();
        assert_eq!(tokens, vec![0; 4]);

        // Asking for more is capped to what the block holds.
        let tokens =
            generate_semantic(&mut model, &[1, 2, 3], None, 1.1, 768, &mut first_token_sampler(), &Device::Cpu)
                .unwrap();
        assert_eq!(tokens.len(), 4);
    }

    #[test]
    fn test_semantic_stops_on_end_probability() {
        let cfg = stage_config(300, SEMANTIC_INFER_TOKEN as usize + 1, 10_048);
        let mut model = BarkCausalModel::load(&cfg, zeros()).unwrap();
        // Any threshold <= 0 is already met by the end token's probability.
        let tokens =
            generate_semantic(&mut model, &[1, 2, 3], None, 0.0, 10, &mut first_token_sampler(), &Device::Cpu)
                .unwrap();
        assert!(tokens.is_empty());

        let tokens =
            generate_semantic(&mut model, &[1, 2, 3], None, 1.1, 0, &mut first_token_sampler(), &Device::Cpu)
                .unwrap();
        assert!(tokens.is_empty());
    }

    #[test]
    fn test_coarse_frames_follow_semantic_length() {
        let cfg = stage_config(1024, COARSE_INFER_TOKEN as usize + 1, 12_096);
        let mut model = BarkCausalModel::load(&cfg, zeros()).unwrap();
        let semantic = vec![5u32; 30];
        let coarse =
            generate_coarse(&mut model, &semantic, None, &mut first_token_sampler(), &Device::Cpu).unwrap();

        // 90 steps span two sliding windows.
        let frames = coarse_steps(semantic.len()) / N_COARSE_CODEBOOKS;
        assert_eq!(frames, 45);
        assert_eq!(coarse.len(), N_COARSE_CODEBOOKS);
        for codebook in &coarse {
            assert_eq!(codebook, &vec![0; frames]);
        }
    }

    #[test]
    fn test_coarse_with_voice_history() {
        let cfg = stage_config(1024, COARSE_INFER_TOKEN as usize + 1, 12_096);
        let mut model = BarkCausalModel::load(&cfg, zeros()).unwrap();
        let history = HistoryPrompt {
            semantic: vec![7; 300],
            coarse: vec![vec![3; 400]; N_COARSE_CODEBOOKS],
            fine: vec![vec![3; 400]; N_FINE_CODEBOOKS],
        };
        let coarse =
            generate_coarse(&mut model, &[5; 10], Some(&history), &mut first_token_sampler(), &Device::Cpu)
                .unwrap();
        assert_eq!(coarse[0].len(), coarse_steps(10) / N_COARSE_CODEBOOKS);
        assert_eq!(coarse[1].len(), coarse[0].len());
    }

    #[test]
    fn test_fine_keeps_coarse_codebooks() {
        let cfg = stage_config(FINE_WINDOW, CODEBOOK_SIZE as usize + 1, CODEBOOK_SIZE as usize);
        let mut model = BarkFineModel::load(&cfg, zeros()).unwrap();
        let coarse: Vec<Vec<u32>> = (0..N_COARSE_CODEBOOKS)
            .map(|k| (0..50).map(|f| (f * 7 + k as u32 * 13) % CODEBOOK_SIZE).collect())
            .collect();

        let fine = generate_fine(&mut model, &coarse, None, &mut first_token_sampler(), &Device::Cpu).unwrap();
        assert_eq!(fine.len(), N_FINE_CODEBOOKS);
        assert!(fine.iter().all(|codebook| codebook.len() == 50));
        assert_eq!(&fine[..N_COARSE_CODEBOOKS], coarse.as_slice());
        assert!(fine[N_COARSE_CODEBOOKS..].iter().flatten().all(|&code| code == 0));
    }

    #[test]
    fn test_fine_spans_several_windows_after_history() {
        let cfg = stage_config(FINE_WINDOW, CODEBOOK_SIZE as usize + 1, CODEBOOK_SIZE as usize);
        let mut model = BarkFineModel::load(&cfg, zeros()).unwrap();
        let history = HistoryPrompt {
            semantic: vec![7; 100],
            coarse: vec![vec![3; 600]; N_COARSE_CODEBOOKS],
            fine: vec![vec![3; 600]; N_FINE_CODEBOOKS],
        };
        let coarse = vec![vec![9u32; 600]; N_COARSE_CODEBOOKS];

        let fine =
            generate_fine(&mut model, &coarse, Some(&history), &mut first_token_sampler(), &Device::Cpu).unwrap();
        assert_eq!(fine.len(), N_FINE_CODEBOOKS);
        assert!(fine.iter().all(|codebook| codebook.len() == 600));
        assert_eq!(&fine[..N_COARSE_CODEBOOKS], coarse.as_slice());
        // No history code leaks into the output.
        assert!(fine[N_COARSE_CODEBOOKS..].iter().flatten().all(|&code| code == 0));
    }

    #[test]
    fn test_bark_config_with_hf_codec_section() {
        let sub = r#"{"block_size": 1024, "input_vocab_size": 10048, "output_vocab_size": 10048,
                      "num_layers": 12, "num_heads": 12, "hidden_size": 768}"#;
        let json = format!(
            r#"{{"semantic_config": {sub}, "coarse_acoustics_config": {sub}, "fine_acoustics_config": {sub},
                 "codec_config": {{"model_type": "encodec", "norm_type": "weight_norm", "pad_mode": "reflect",
                                   "sampling_rate": 24000, "upsampling_ratios": [8, 5, 4, 2]}}}}"#
        );
        let cfg: BarkConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg.codec_config.sampling_rate, SAMPLE_RATE as usize);
        assert!(cfg.codec_config.to_encodec().is_ok());
    }
}
