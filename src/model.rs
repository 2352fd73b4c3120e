//! Model components.
//!
//! ## Components
//!
//! - [`gpt2`]: GPT-2 causal LM for lyrics
//! - [`musicgen`]: MusicGen decoder over T5 text states and the 32 kHz EnCodec
//! - [`bark`]: Bark semantic/coarse/fine GPTs and the 24 kHz EnCodec
//!
//! Shared pieces: [`hub`] (HuggingFace downloads), [`codec`] (EnCodec
//! settings from checkpoint configs), [`sampling`] and [`mask`].

pub mod bark;
pub mod codec;
pub mod gpt2;
pub mod hub;
pub mod mask;
pub mod musicgen;
pub mod sampling;
