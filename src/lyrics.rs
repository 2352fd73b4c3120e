//! Lyric generation and segmentation.
//!
//! - [`generator`]: GPT-2 prompt continuation
//! - [`splitter`]: fixed-size word chunks for per-segment synthesis

pub mod generator;
pub mod splitter;

pub use generator::LyricGenerator;
pub use splitter::split_lyrics;
