//! Audio utilities: WAV I/O, resampling, clip editing, mixing and
//! concatenation.

mod clip;
mod concat;
mod mixer;
mod resample;
mod wav;

pub use clip::{AudioClip, db_to_amplitude, ms_to_frames};
pub use concat::{concat_clips, concat_segments, sorted_wav_files};
pub use mixer::{mix_clips, mix_segment};
pub use resample::resample_planar;
pub use wav::{WavEncoding, f32_to_i16, peak_normalize, read_wav, write_wav};
