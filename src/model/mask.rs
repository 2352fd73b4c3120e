//! Attention masks.

use candle_core::{DType, Device, Tensor};

use crate::Result;

/// Additive causal mask for `seq_len` new queries after `offset` cached keys.
///
/// Shape `[seq_len, offset + seq_len]`: `0` where query `i` may attend to key
/// `j` (`j <= offset + i`), `-inf` elsewhere. Broadcasts over batch and heads.
pub fn causal_mask(seq_len: usize, offset: usize, dtype: DType, device: &Device) -> Result<Tensor> {
    let total = offset + seq_len;
    let mask: Vec<f32> = (0..seq_len)
        .flat_map(|i| {
            (0..total).map(move |j| if j > offset + i { f32::NEG_INFINITY } else { 0.0 })
        })
        .collect();
    Ok(Tensor::from_vec(mask, (seq_len, total), device)?.to_dtype(dtype)?)
}
