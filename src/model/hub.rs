//! HuggingFace Hub access for model weights, configs and tokenizers.
//!
//! Files are cached by `hf-hub` in the standard HuggingFace cache
//! (`~/.cache/huggingface/hub`), so only the first run downloads.

use std::path::{Path, PathBuf};

use candle_core::{DType, Device};
use candle_nn::VarBuilder;
use hf_hub::api::sync::Api;
use serde::de::DeserializeOwned;
use tokenizers::Tokenizer;

use crate::{Error, Result};

/// A weights file in one of the two formats published on the Hub.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WeightsFile {
    Safetensors(PathBuf),
    Pytorch(PathBuf),
}

impl WeightsFile {
    pub fn path(&self) -> &Path {
        match self {
            Self::Safetensors(path) | Self::Pytorch(path) => path,
        }
    }

    /// Open the weights as a [`VarBuilder`].
    pub fn var_builder(&self, dtype: DType, device: &Device) -> Result<VarBuilder<'static>> {
        match self {
            // SAFETY: the file lives in the hub cache and is not modified while mapped.
            Self::Safetensors(path) => unsafe {
                VarBuilder::from_mmaped_safetensors(&[path], dtype, device)
                    .map_err(|e| Error::WeightLoad(format!("{}: {e}", path.display())))
            },
            Self::Pytorch(path) => VarBuilder::from_pth(path, dtype, device)
                .map_err(|e| Error::WeightLoad(format!("{}: {e}", path.display()))),
        }
    }
}

/// Handle on the HuggingFace Hub.
#[derive(Clone)]
pub struct Hub {
    api: Api,
}

impl Hub {
    pub fn new() -> Result<Self> {
        Ok(Self { api: Api::new()? })
    }

    /// Fetch `filename` from model repo `repo_id`, downloading if not cached.
    pub fn get(&self, repo_id: &str, filename: &str) -> Result<PathBuf> {
        tracing::debug!(repo = repo_id, file = filename, "fetching from hub");
        self.api
            .model(repo_id.to_string())
            .get(filename)
            .map_err(|e| Error::HfHub(format!("{repo_id}/{filename}: {e}")))
    }

    /// Fetch the repo's weights, preferring safetensors over a pickle.
    pub fn weights(&self, repo_id: &str) -> Result<WeightsFile> {
        match self.get(repo_id, "model.safetensors") {
            Ok(path) => Ok(WeightsFile::Safetensors(path)),
            Err(safetensors_error) => {
                tracing::debug!(%safetensors_error, "no safetensors, trying pytorch_model.bin");
                self.get(repo_id, "pytorch_model.bin")
                    .map(WeightsFile::Pytorch)
                    .map_err(|e| {
                        Error::WeightLoad(format!(
                            "{repo_id} has neither model.safetensors nor pytorch_model.bin: {e}"
                        ))
                    })
            }
        }
    }

    /// Fetch and parse the repo's `config.json`.
    pub fn config<T: DeserializeOwned>(&self, repo_id: &str) -> Result<T> {
        read_json(self.get(repo_id, "config.json")?)
    }

    /// Fetch and load the repo's `tokenizer.json`.
    pub fn tokenizer(&self, repo_id: &str) -> Result<Tokenizer> {
        let path = self.get(repo_id, "tokenizer.json")?;
        Ok(Tokenizer::from_file(&path)?)
    }
}

/// Parse a JSON file into `T`.
pub fn read_json<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let text = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}
