//! EnCodec settings as written by HuggingFace `EncodecConfig`.
//!
//! Checkpoints spell the norm and padding modes in snake case
//! (`"weight_norm"`, `"reflect"`), which candle's [`encodec::Config`] does not
//! read. [`CodecConfig`] parses the checkpoint form and builds the candle
//! config from it. Candle has no reflect padding; replicate padding takes its
//! place.

use candle_transformers::models::encodec;
use serde::Deserialize;

use crate::{Error, Result};

/// `audio_encoder` (MusicGen) or `codec_config` (Bark) section of a
/// `config.json`. Missing fields take the `EncodecConfig` defaults.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CodecConfig {
    pub target_bandwidths: Vec<f64>,
    pub sampling_rate: usize,
    pub audio_channels: usize,
    pub normalize: bool,
    pub chunk_length_s: Option<f64>,
    pub overlap: Option<f64>,
    pub hidden_size: usize,
    pub num_filters: usize,
    pub num_residual_layers: usize,
    pub upsampling_ratios: Vec<usize>,
    pub norm_type: String,
    pub kernel_size: usize,
    pub last_kernel_size: usize,
    pub residual_kernel_size: usize,
    pub dilation_growth_rate: usize,
    pub use_causal_conv: bool,
    pub pad_mode: String,
    pub compress: usize,
    pub num_lstm_layers: usize,
    pub trim_right_ratio: f64,
    pub codebook_size: usize,
    pub codebook_dim: Option<usize>,
    pub use_conv_shortcut: bool,
}

impl Default for CodecConfig {
    /// The 24 kHz `facebook/encodec_24khz` layout.
    fn default() -> Self {
        Self {
            target_bandwidths: vec![1.5, 3.0, 6.0, 12.0, 24.0],
            sampling_rate: 24_000,
            audio_channels: 1,
            normalize: false,
            chunk_length_s: None,
            overlap: None,
            hidden_size: 128,
            num_filters: 32,
            num_residual_layers: 1,
            upsampling_ratios: vec![8, 5, 4, 2],
            norm_type: "weight_norm".to_string(),
            kernel_size: 7,
            last_kernel_size: 7,
            residual_kernel_size: 3,
            dilation_growth_rate: 2,
            use_causal_conv: true,
            pad_mode: "reflect".to_string(),
            compress: 2,
            num_lstm_layers: 2,
            trim_right_ratio: 1.0,
            codebook_size: 1024,
            codebook_dim: None,
            use_conv_shortcut: true,
        }
    }
}

impl CodecConfig {
    /// Codec frames per second.
    pub fn frame_rate(&self) -> f64 {
        let hop: usize = self.upsampling_ratios.iter().product();
        self.sampling_rate as f64 / hop.max(1) as f64
    }

    /// The candle model config.
    pub fn to_encodec(&self) -> Result<encodec::Config> {
        let norm_type = match self.norm_type.as_str() {
            "weight_norm" => encodec::NormType::WeightNorm,
            "time_group_norm" => encodec::NormType::TimeGroupNorm,
            other => return Err(Error::Config(format!("unsupported codec norm_type {other:?}"))),
        };
        let pad_mode = match self.pad_mode.as_str() {
            "reflect" | "replicate" => encodec::PadMode::Replicate,
            "constant" => encodec::PadMode::Constant,
            other => return Err(Error::Config(format!("unsupported codec pad_mode {other:?}"))),
        };
        Ok(encodec::Config {
            target_bandwidths: self.target_bandwidths.clone(),
            sampling_rate: self.sampling_rate,
            audio_channels: self.audio_channels,
            normalize: self.normalize,
            // Decoding never chunks.
            chunk_length_s: None,
            overlap: None,
            hidden_size: self.hidden_size,
            num_filters: self.num_filters,
            num_residual_layers: self.num_residual_layers,
            upsampling_ratios: self.upsampling_ratios.clone(),
            norm_type,
            kernel_size: self.kernel_size,
            last_kernel_size: self.last_kernel_size,
            residual_kernel_size: self.residual_kernel_size,
            dilation_growth_rate: self.dilation_growth_rate,
            use_causal_conv: self.use_causal_conv,
            pad_mode,
            compress: self.compress,
            num_lstm_layers: self.num_lstm_layers,
            trim_right_ratio: self.trim_right_ratio,
            codebook_size: self.codebook_size,
            codebook_dim: self.codebook_dim,
            use_conv_shortcut: self.use_conv_shortcut,
        })
    }
}
