//! Token sampling for the autoregressive models.
//!
//! Logits are pulled to the CPU and filtered there: temperature, then top-k,
//! then nucleus (top-p), then one multinomial draw. Every sampler owns a
//! `ChaCha8Rng`, so a fixed seed reproduces a run.

use candle_core::{DType, Device, Tensor};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::Result;

/// Sampling parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingParams {
    /// `<= 0` selects greedy decoding.
    pub temperature: f64,
    /// Keep only the `k` most likely tokens. `None` disables.
    pub top_k: Option<usize>,
    /// Keep the smallest set whose probability mass reaches `p`. `None` disables.
    pub top_p: Option<f64>,
}

impl SamplingParams {
    pub fn with_temperature(temperature: f64) -> Self {
        Self {
            temperature,
            top_k: None,
            top_p: None,
        }
    }
}

/// Seedable token sampler.
pub struct Sampler {
    params: SamplingParams,
    rng: ChaCha8Rng,
}

impl Sampler {
    /// `seed = None` draws a fresh seed from the thread RNG.
    pub fn new(params: SamplingParams, seed: Option<u64>) -> Self {
        let seed = seed.unwrap_or_else(|| rand::rng().random());
        Self {
            params,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    pub fn params(&self) -> SamplingParams {
        self.params
    }

    /// Sample one index from a 1-D logits tensor.
    pub fn sample(&mut self, logits: &Tensor) -> Result<u32> {
        let logits: Vec<f32> = logits
            .to_device(&Device::Cpu)?
            .to_dtype(DType::F32)?
            .flatten_all()?
            .to_vec1()?;
        Ok(self.sample_slice(&logits))
    }

    /// Sample one index from raw logits.
    pub fn sample_slice(&mut self, logits: &[f32]) -> u32 {
        if self.params.temperature <= 0.0 {
            return argmax(logits);
        }
        let probs = filtered_probs(logits, &self.params);
        self.draw(&probs)
    }

    /// Draw one index from an already normalised distribution.
    pub fn draw(&mut self, probs: &[f32]) -> u32 {
        let draw: f64 = self.rng.random();
        sample_from_probs(probs, draw)
    }
}

/// Index of the largest logit (first one on ties).
pub fn argmax(logits: &[f32]) -> u32 {
    let mut best = 0usize;
    for (i, &v) in logits.iter().enumerate() {
        if v > logits[best] {
            best = i;
        }
    }
    best as u32
}

/// Softmax of `logits / temperature` with top-k and top-p applied.
///
/// Filtered entries get probability 0; the rest are renormalised.
pub fn filtered_probs(logits: &[f32], params: &SamplingParams) -> Vec<f32> {
    let temperature = params.temperature.max(1e-5) as f32;
    let scaled: Vec<f32> = logits.iter().map(|&l| l / temperature).collect();

    let mut order: Vec<usize> = (0..scaled.len()).collect();
    order.sort_by(|&a, &b| scaled[b].total_cmp(&scaled[a]));

    let mut keep = match params.top_k {
        Some(k) if k > 0 => k.min(order.len()),
        _ => order.len(),
    };

    let max = order.first().map(|&i| scaled[i]).unwrap_or(0.0);
    let mut probs = vec![0.0f32; scaled.len()];
    let mut total = 0.0f32;
    for &i in &order[..keep] {
        let p = (scaled[i] - max).exp();
        probs[i] = p;
        total += p;
    }
    if total <= 0.0 {
        return probs;
    }
    for &i in &order[..keep] {
        probs[i] /= total;
    }

    if let Some(top_p) = params.top_p {
        if top_p < 1.0 {
            let mut cumulative = 0.0f32;
            let mut cutoff = keep;
            for (rank, &i) in order[..keep].iter().enumerate() {
                cumulative += probs[i];
                if cumulative >= top_p as f32 {
                    cutoff = rank + 1;
                    break;
                }
            }
            for &i in &order[cutoff..keep] {
                probs[i] = 0.0;
            }
            keep = cutoff;
            let total: f32 = order[..keep].iter().map(|&i| probs[i]).sum();
            for &i in &order[..keep] {
                probs[i] /= total;
            }
        }
    }

    probs
}

/// Walk the CDF of `probs` with a uniform draw in `[0, 1)`.
pub fn sample_from_probs(probs: &[f32], draw: f64) -> u32 {
    let mut cumulative = 0.0f64;
    let mut last_nonzero = 0usize;
    for (i, &p) in probs.iter().enumerate() {
        if p <= 0.0 {
            continue;
        }
        last_nonzero = i;
        cumulative += p as f64;
        if draw < cumulative {
            return i as u32;
        }
    }
    // Floating-point rounding can leave the CDF just short of 1.
    last_nonzero as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_argmax() {
        assert_eq!(argmax(&[0.1, 3.0, -1.0, 3.0]), 1);
        assert_eq!(argmax(&[-5.0]), 0);
    }

    #[test]
    fn test_filtered_probs_sum_to_one() {
        let probs = filtered_probs(&[1.0, 2.0, 3.0, 4.0], &SamplingParams::with_temperature(1.0));
        let total: f32 = probs.iter().sum();
        assert!((total - 1.0).abs() < 1e-5);
        assert!(probs[3] > probs[2] && probs[2] > probs[1]);
    }

    #[test]
    fn test_top_k_keeps_k_tokens() {
        let params = SamplingParams {
            temperature: 1.0,
            top_k: Some(2),
            top_p: None,
        };
        let probs = filtered_probs(&[0.5, 4.0, 1.0, 3.0], &params);
        assert_eq!(probs[0], 0.0);
        assert_eq!(probs[2], 0.0);
        assert!(probs[1] > 0.0 && probs[3] > 0.0);
        assert!((probs[1] + probs[3] - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_top_p_drops_tail() {
        // Probabilities roughly [0.843, 0.114, 0.042]; p=0.9 keeps two tokens.
        let params = SamplingParams {
            temperature: 1.0,
            top_k: None,
            top_p: Some(0.9),
        };
        let probs = filtered_probs(&[3.0, 1.0, 0.0], &params);
        assert!(probs[0] > 0.0 && probs[1] > 0.0);
        assert_eq!(probs[2], 0.0);
    }

    #[test]
    fn test_low_temperature_sharpens() {
        let hot = filtered_probs(&[1.0, 2.0], &SamplingParams::with_temperature(2.0));
        let cold = filtered_probs(&[1.0, 2.0], &SamplingParams::with_temperature(0.5));
        assert!(cold[1] > hot[1]);
    }

    #[test]
    fn test_sample_from_probs_walks_cdf() {
        let probs = [0.25, 0.0, 0.5, 0.25];
        assert_eq!(sample_from_probs(&probs, 0.1), 0);
        assert_eq!(sample_from_probs(&probs, 0.3), 2);
        assert_eq!(sample_from_probs(&probs, 0.8), 3);
        assert_eq!(sample_from_probs(&probs, 0.999_999_9), 3);
    }

    #[test]
    fn test_greedy_sampler() {
        let mut sampler = Sampler::new(SamplingParams::with_temperature(0.0), Some(1));
        assert_eq!(sampler.sample_slice(&[0.0, 0.2, 5.0, 1.0]), 2);
    }

    #[test]
    fn test_seeded_sampler_reproducible() {
        let logits = [0.1f32, 0.4, 0.3, 0.2, 0.9, 0.0];
        let params = SamplingParams::with_temperature(1.0);
        let mut a = Sampler::new(params, Some(42));
        let mut b = Sampler::new(params, Some(42));
        let draws_a: Vec<u32> = (0..16).map(|_| a.sample_slice(&logits)).collect();
        let draws_b: Vec<u32> = (0..16).map(|_| b.sample_slice(&logits)).collect();
        assert_eq!(draws_a, draws_b);
    }

    #[test]
    fn test_sample_tensor() {
        let logits = Tensor::new(&[0.0f32, 10.0, 0.0], &Device::Cpu).unwrap();
        let mut sampler = Sampler::new(SamplingParams::with_temperature(0.0), None);
        assert_eq!(sampler.sample(&logits).unwrap(), 1);
    }
}
