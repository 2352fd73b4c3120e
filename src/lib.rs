//! Prompt-to-song generation in pure Rust.
//!
//! Chains three pretrained models on candle and mixes their output into one
//! WAV file:
//!
//! ```text
//! prompt → GPT-2 ──────► lyrics → 25-word segments
//!    │                                  │
//!    └──► MusicGen ─► melody.wav        ▼
//!                        │       Bark (per segment) → segment_NNN.wav
//!                        └───────────┬──────────────────┘
//!                                    ▼
//!                      mix (-5 dB / +5 dB, fades) → mix_NNN.wav
//!                                    ▼
//!                   concat (300 ms gaps) → final_song.wav
//! ```
//!
//! ## Modules
//!
//! - [`audio`]: WAV I/O, resampling, clip editing, mixing, concatenation
//! - [`model`]: GPT-2, MusicGen and Bark on candle, hub access, sampling
//! - [`lyrics`], [`melody`], [`voice`]: lazily loaded model wrappers
//! - [`pipeline`]: end-to-end orchestration
//! - [`manager`]: single worker thread with a bounded request queue
//! - [`server`]: axum HTTP API and static frontend

pub mod audio;
pub mod config;
pub mod lyrics;
pub mod manager;
pub mod melody;
pub mod model;
pub mod pipeline;
pub mod server;
pub mod voice;

mod error;

pub use error::{Error, Result};
