//! Song manager: keeps the pipeline on one worker thread and queues requests.
//!
//! The manager owns one [`SongPipeline`]. Callers submit prompts which are
//! processed one at a time on a dedicated blocking thread, so the async
//! runtime stays free to serve downloads and static files. The queue is
//! bounded: when it is full, [`SongManager::generate`] fails fast with
//! [`Error::Busy`] instead of stacking more multi-minute jobs.
//!
//! # Example
//!
//! ```no_run
//! use aimusic_rs::config::{OutputDirs, PipelineConfig};
//! use aimusic_rs::manager::{ManagerConfig, SongManager};
//!
//! #[tokio::main]
//! async fn main() {
//!     let manager = SongManager::start(
//!         ManagerConfig::default(),
//!         OutputDirs::from_env(),
//!         PipelineConfig::default(),
//!     )
//!     .await
//!     .unwrap();
//!     let song = manager.generate("a song about the sea").await.unwrap();
//!     println!("{}", song.final_song_path.display());
//! }
//! ```

use candle_core::{DType, Device};
use tokio::sync::{mpsc, oneshot};

use crate::config::{OutputDirs, PipelineConfig};
use crate::pipeline::{SongPipeline, SongResult};
use crate::{Error, Result};

/// Configuration for the song manager.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// CUDA device ordinal (0 = first GPU). Ignored when CUDA is unavailable.
    pub cuda_device: usize,

    /// Run on the CPU even when a GPU is available.
    pub force_cpu: bool,

    /// Data type for model weights and activations.
    pub dtype: DType,

    /// Requests that may wait behind the one being generated.
    pub queue_capacity: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            cuda_device: 0,
            force_cpu: false,
            dtype: DType::F32,
            queue_capacity: 4,
        }
    }
}

/// A submitted generation request.
struct PendingRequest {
    prompt: String,
    reply: oneshot::Sender<Result<SongResult>>,
}

/// Handle for submitting prompts to a running manager.
#[derive(Clone)]
pub struct SongManager {
    tx: mpsc::Sender<PendingRequest>,
    queue_capacity: usize,
}

impl SongManager {
    /// Build the candle pipeline and start the worker.
    pub async fn start(config: ManagerConfig, dirs: OutputDirs, pipeline_config: PipelineConfig) -> Result<Self> {
        // Pipeline setup touches the filesystem and the hub cache.
        let pipeline = tokio::task::spawn_blocking(move || -> Result<SongPipeline> {
            let device = if config.force_cpu {
                Device::Cpu
            } else {
                preferred_device(config.cuda_device)
            };
            tracing::info!(device = ?device, "loading song pipeline");
            SongPipeline::load(&device, config.dtype, dirs, pipeline_config)
        })
        .await
        .map_err(|join_error| Error::Manager(format!("pipeline load task panicked: {join_error}")))?
        .map_err(|e| Error::Manager(format!("pipeline load failed: {e}")))?;

        Ok(Self::spawn(pipeline, config.queue_capacity))
    }

    /// Start a worker around an already built pipeline.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(pipeline: SongPipeline, queue_capacity: usize) -> Self {
        let queue_capacity = queue_capacity.max(1);
        let (tx, rx) = mpsc::channel::<PendingRequest>(queue_capacity);
        tokio::task::spawn_blocking(move || run_manager(pipeline, rx));
        Self { tx, queue_capacity }
    }

    /// Submit a prompt and wait for the finished song.
    pub async fn generate(&self, prompt: impl Into<String>) -> Result<SongResult> {
        let (reply_tx, reply_rx) = oneshot::channel::<Result<SongResult>>();
        let request = PendingRequest {
            prompt: prompt.into(),
            reply: reply_tx,
        };
        self.tx.try_send(request).map_err(|error| match error {
            mpsc::error::TrySendError::Full(_) => Error::Busy(self.queue_capacity),
            mpsc::error::TrySendError::Closed(_) => Error::Manager("manager has shut down".into()),
        })?;

        reply_rx
            .await
            .map_err(|_| Error::Manager("manager dropped reply channel".into()))?
    }
}

/// The manager loop. Runs on a dedicated blocking thread.
fn run_manager(mut pipeline: SongPipeline, mut rx: mpsc::Receiver<PendingRequest>) {
    while let Some(request) = rx.blocking_recv() {
        let result = pipeline.generate(&request.prompt);
        if let Err(error) = &result {
            tracing::error!(%error, "song generation failed");
        }
        // The caller may have gone away.
        let _ = request.reply.send(result);
    }
    tracing::info!("song manager shut down");
}

/// Return the preferred device: CUDA if available, otherwise CPU.
pub fn preferred_device(cuda_ordinal: usize) -> Device {
    Device::cuda_if_available(cuda_ordinal).unwrap_or(Device::Cpu)
}
