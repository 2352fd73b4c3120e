//! Sample-rate conversion using rubato.

use rubato::{
    Resampler as _, SincFixedIn, SincInterpolationParameters, SincInterpolationType,
    WindowFunction,
};

use crate::Result;

const CHUNK_SIZE: usize = 1024;

/// Resample planar (one `Vec` per channel) audio from `from_rate` to `to_rate`.
///
/// The output of every channel has exactly
/// `round(input_len * to_rate / from_rate)` samples; the filter delay is
/// removed so the signal stays aligned with the source.
pub fn resample_planar(channels: &[Vec<f32>], from_rate: u32, to_rate: u32) -> Result<Vec<Vec<f32>>> {
    let input_len = channels.first().map(|c| c.len()).unwrap_or(0);
    if from_rate == to_rate || input_len == 0 {
        return Ok(channels.to_vec());
    }

    let ratio = to_rate as f64 / from_rate as f64;
    let expected_len = (input_len as f64 * ratio).round() as usize;

    let params = SincInterpolationParameters {
        sinc_len: 128,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 128,
        window: WindowFunction::BlackmanHarris2,
    };
    let mut resampler = SincFixedIn::<f32>::new(ratio, 1.0, params, CHUNK_SIZE, channels.len())?;
    let delay = resampler.output_delay();

    let mut output: Vec<Vec<f32>> = vec![Vec::with_capacity(expected_len + delay); channels.len()];
    let mut pos = 0;
    // Feed zero chunks past the end until the delayed tail has been flushed.
    while output[0].len() < expected_len + delay {
        let chunk: Vec<Vec<f32>> = channels
            .iter()
            .map(|channel| {
                let mut chunk: Vec<f32> = channel
                    .get(pos.min(input_len)..(pos + CHUNK_SIZE).min(input_len))
                    .unwrap_or(&[])
                    .to_vec();
                chunk.resize(CHUNK_SIZE, 0.0);
                chunk
            })
            .collect();

        let processed = resampler.process(&chunk, None)?;
        for (out, channel) in output.iter_mut().zip(processed) {
            out.extend_from_slice(&channel);
        }
        pos += CHUNK_SIZE;
    }

    Ok(output
        .into_iter()
        .map(|channel| channel[delay..delay + expected_len].to_vec())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_rate_is_identity() {
        let input = vec![vec![0.1, 0.2, 0.3]];
        let out = resample_planar(&input, 24000, 24000).unwrap();
        assert_eq!(out, input);
    }

    #[test]
    fn test_upsample_length() {
        // 24 kHz -> 32 kHz (4/3)
        let input = vec![vec![0.0f32; 2400]];
        let out = resample_planar(&input, 24000, 32000).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].len(), 3200);
    }

    #[test]
    fn test_downsample_stereo_length() {
        let input = vec![vec![0.0f32; 4800], vec![0.0f32; 4800]];
        let out = resample_planar(&input, 48000, 32000).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].len(), 3200);
        assert_eq!(out[1].len(), 3200);
    }

    #[test]
    fn test_constant_signal_survives() {
        let input = vec![vec![0.5f32; 8000]];
        let out = resample_planar(&input, 16000, 24000).unwrap();
        // Away from the edges the level is preserved.
        let mid = out[0][out[0].len() / 2];
        assert!((mid - 0.5).abs() < 0.02, "mid sample {mid}");
    }
}
