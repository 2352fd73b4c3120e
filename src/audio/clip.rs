//! In-memory audio clip with the editing operations the mixer needs.
//!
//! Samples are interleaved f32. Gain and overlay saturate at full scale the
//! same way 16-bit integer mixing does, so what is heard matches what is
//! written.

use std::path::Path;

use super::resample::resample_planar;
use super::wav::{WavEncoding, read_wav, write_wav};
use crate::{Error, Result};

/// Interleaved audio samples plus their format.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioClip {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioClip {
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: u16) -> Self {
        Self {
            samples,
            sample_rate,
            channels: channels.max(1),
        }
    }

    /// A clip with no frames.
    pub fn empty(sample_rate: u32, channels: u16) -> Self {
        Self::new(Vec::new(), sample_rate, channels)
    }

    /// `duration_ms` of digital silence.
    pub fn silent(duration_ms: u32, sample_rate: u32, channels: u16) -> Self {
        let frames = ms_to_frames(duration_ms, sample_rate);
        Self::new(vec![0.0; frames * channels.max(1) as usize], sample_rate, channels)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let (samples, sample_rate, channels) = read_wav(path)?;
        Ok(Self::new(samples, sample_rate, channels))
    }

    pub fn save(&self, path: impl AsRef<Path>, encoding: WavEncoding) -> Result<()> {
        write_wav(path, &self.samples, self.sample_rate, self.channels, encoding)
    }

    /// Number of frames (samples per channel).
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        self.frames() as u64 * 1000 / self.sample_rate as u64
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    fn to_planar(&self) -> Vec<Vec<f32>> {
        let channels = self.channels as usize;
        (0..channels)
            .map(|ch| self.samples.iter().skip(ch).step_by(channels).copied().collect())
            .collect()
    }

    fn from_planar(planar: Vec<Vec<f32>>, sample_rate: u32) -> Self {
        let channels = planar.len().max(1);
        let frames = planar.first().map(|c| c.len()).unwrap_or(0);
        let mut samples = Vec::with_capacity(frames * channels);
        for i in 0..frames {
            for channel in &planar {
                samples.push(channel[i]);
            }
        }
        Self::new(samples, sample_rate, channels as u16)
    }

    /// Average all channels into one.
    pub fn to_mono(&self) -> Self {
        if self.channels == 1 {
            return self.clone();
        }
        let channels = self.channels as usize;
        let samples = self
            .samples
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect();
        Self::new(samples, self.sample_rate, 1)
    }

    /// Convert to `channels` channels: mono is duplicated, anything else is
    /// downmixed to mono first.
    pub fn with_channels(&self, channels: u16) -> Self {
        let channels = channels.max(1);
        if channels == self.channels {
            return self.clone();
        }
        let mono = self.to_mono();
        if channels == 1 {
            return mono;
        }
        let samples = mono
            .samples
            .iter()
            .flat_map(|&s| std::iter::repeat_n(s, channels as usize))
            .collect();
        Self::new(samples, self.sample_rate, channels)
    }

    pub fn resample(&self, sample_rate: u32) -> Result<Self> {
        if sample_rate == 0 {
            return Err(Error::Audio("target sample rate must be > 0".into()));
        }
        if sample_rate == self.sample_rate {
            return Ok(self.clone());
        }
        let planar = resample_planar(&self.to_planar(), self.sample_rate, sample_rate)?;
        Ok(Self::from_planar(planar, sample_rate))
    }

    /// Convert to another clip's rate and channel layout.
    pub fn matched_to(&self, reference: &AudioClip) -> Result<Self> {
        Ok(self
            .resample(reference.sample_rate)?
            .with_channels(reference.channels))
    }

    /// Scale by `db` decibels, saturating at full scale.
    pub fn apply_gain_db(&self, db: f32) -> Self {
        let factor = db_to_amplitude(db);
        let samples = self
            .samples
            .iter()
            .map(|&s| (s * factor).clamp(-1.0, 1.0))
            .collect();
        Self::new(samples, self.sample_rate, self.channels)
    }

    /// Extend with silence until the clip is `frames` long. Longer clips are
    /// left untouched.
    pub fn pad_to_frames(&self, frames: usize) -> Self {
        let mut out = self.clone();
        let wanted = frames * self.channels as usize;
        if out.samples.len() < wanted {
            out.samples.resize(wanted, 0.0);
        }
        out
    }

    /// Mix `other` on top of `self`, starting at frame 0.
    ///
    /// The result keeps `self`'s length and format: `other` is converted to
    /// match and anything past the end of `self` is dropped.
    pub fn overlay(&self, other: &AudioClip) -> Result<Self> {
        let other = other.matched_to(self)?;
        let mut out = self.clone();
        for (dst, &src) in out.samples.iter_mut().zip(other.samples.iter()) {
            *dst = (*dst + src).clamp(-1.0, 1.0);
        }
        Ok(out)
    }

    /// Linear amplitude ramp from silence over the first `duration_ms`.
    pub fn fade_in(&self, duration_ms: u32) -> Self {
        let fade_frames = ms_to_frames(duration_ms, self.sample_rate).min(self.frames());
        let mut out = self.clone();
        let channels = self.channels as usize;
        for frame in 0..fade_frames {
            let gain = frame as f32 / fade_frames as f32;
            for s in &mut out.samples[frame * channels..(frame + 1) * channels] {
                *s *= gain;
            }
        }
        out
    }

    /// Linear amplitude ramp to silence over the last `duration_ms`.
    pub fn fade_out(&self, duration_ms: u32) -> Self {
        let total = self.frames();
        let fade_frames = ms_to_frames(duration_ms, self.sample_rate).min(total);
        let mut out = self.clone();
        let channels = self.channels as usize;
        let start = total - fade_frames;
        for frame in start..total {
            let gain = (total - 1 - frame) as f32 / fade_frames as f32;
            for s in &mut out.samples[frame * channels..(frame + 1) * channels] {
                *s *= gain;
            }
        }
        out
    }

    /// Append `other` (converted to this clip's format) to the end.
    pub fn append(&mut self, other: &AudioClip) -> Result<()> {
        let other = other.matched_to(self)?;
        self.samples.extend_from_slice(&other.samples);
        Ok(())
    }
}

/// Decibels to linear amplitude factor.
pub fn db_to_amplitude(db: f32) -> f32 {
    10f32.powf(db / 20.0)
}

/// Milliseconds to whole frames at `sample_rate`.
pub fn ms_to_frames(duration_ms: u32, sample_rate: u32) -> usize {
    (duration_ms as u64 * sample_rate as u64 / 1000) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(frames: usize, sample_rate: u32) -> AudioClip {
        let samples = (0..frames).map(|i| i as f32 / frames as f32 * 0.5).collect();
        AudioClip::new(samples, sample_rate, 1)
    }

    #[test]
    fn test_silent_length() {
        let clip = AudioClip::silent(300, 32000, 2);
        assert_eq!(clip.frames(), 9600);
        assert_eq!(clip.samples.len(), 19200);
        assert_eq!(clip.duration_ms(), 300);
        assert!(clip.samples.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_db_to_amplitude() {
        assert!((db_to_amplitude(0.0) - 1.0).abs() < 1e-6);
        assert!((db_to_amplitude(-6.0206) - 0.5).abs() < 1e-3);
        assert!((db_to_amplitude(5.0) - 1.778_279).abs() < 1e-4);
    }

    #[test]
    fn test_gain_saturates() {
        let clip = AudioClip::new(vec![0.9, -0.9, 0.1], 8000, 1);
        let louder = clip.apply_gain_db(6.0);
        assert_eq!(louder.samples[0], 1.0);
        assert_eq!(louder.samples[1], -1.0);
        assert!((louder.samples[2] - 0.1 * db_to_amplitude(6.0)).abs() < 1e-6);
    }

    #[test]
    fn test_to_mono_and_back() {
        let stereo = AudioClip::new(vec![0.2, 0.4, -0.2, -0.4], 8000, 2);
        let mono = stereo.to_mono();
        assert_eq!(mono.channels, 1);
        assert_eq!(mono.samples.len(), 2);
        assert!((mono.samples[0] - 0.3).abs() < 1e-6);
        assert!((mono.samples[1] + 0.3).abs() < 1e-6);

        let back = mono.with_channels(2);
        assert_eq!(back.channels, 2);
        assert_eq!(back.frames(), 2);
        assert_eq!(back.samples[0], back.samples[1]);
    }

    #[test]
    fn test_pad_to_frames_only_extends() {
        let clip = AudioClip::new(vec![0.5; 10], 8000, 1);
        assert_eq!(clip.pad_to_frames(25).frames(), 25);
        assert_eq!(clip.pad_to_frames(5).frames(), 10);
    }

    #[test]
    fn test_overlay_keeps_base_length() {
        let base = AudioClip::new(vec![0.25; 100], 8000, 1);
        let short = AudioClip::new(vec![0.5; 40], 8000, 1);
        let long = AudioClip::new(vec![0.5; 400], 8000, 1);

        let mixed = base.overlay(&short).unwrap();
        assert_eq!(mixed.frames(), 100);
        assert!((mixed.samples[0] - 0.75).abs() < 1e-6);
        assert!((mixed.samples[99] - 0.25).abs() < 1e-6);

        let mixed = base.overlay(&long).unwrap();
        assert_eq!(mixed.frames(), 100);
        assert!((mixed.samples[99] - 0.75).abs() < 1e-6);
    }

    #[test]
    fn test_overlay_converts_channels() {
        let base = AudioClip::new(vec![0.0; 20], 8000, 2);
        let mono = AudioClip::new(vec![0.5; 10], 8000, 1);
        let mixed = base.overlay(&mono).unwrap();
        assert_eq!(mixed.channels, 2);
        assert!(mixed.samples.iter().all(|&s| (s - 0.5).abs() < 1e-6));
    }

    #[test]
    fn test_fades() {
        let clip = AudioClip::new(vec![1.0; 1000], 1000, 1);
        let faded = clip.fade_in(100).fade_out(100);
        assert_eq!(faded.samples[0], 0.0);
        assert!((faded.samples[50] - 0.5).abs() < 1e-6);
        assert_eq!(faded.samples[500], 1.0);
        assert_eq!(faded.samples[999], 0.0);
        assert!(faded.samples[950] < 1.0);
    }

    #[test]
    fn test_fade_longer_than_clip() {
        let clip = ramp(10, 1000);
        let faded = clip.fade_in(1000);
        assert_eq!(faded.frames(), 10);
        assert_eq!(faded.samples[0], 0.0);
    }

    #[test]
    fn test_append_resamples() {
        let mut first = AudioClip::new(vec![0.0; 3200], 32000, 1);
        let second = AudioClip::new(vec![0.0; 2400], 24000, 1);
        first.append(&second).unwrap();
        assert_eq!(first.frames(), 6400);
        assert_eq!(first.sample_rate, 32000);
    }
}
