//! aimusic HTTP server.
//!
//! Serves `POST /api/generate`, `GET /api/download` and the static frontend.
//! Every flag can also be set through its environment variable.
//!
//! ```sh
//! GENERATED_DIR=/var/lib/aimusic PORT=8080 aimusic-server --static-dir ./frontend/dist
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;

use aimusic_rs::config::{OutputDirs, PipelineConfig};
use aimusic_rs::manager::{ManagerConfig, SongManager};
use aimusic_rs::server::{AppState, router};
use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "aimusic-server", about = "Prompt-to-song generation over HTTP")]
struct Args {
    /// Address to bind.
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    host: String,

    #[arg(long, env = "PORT", default_value_t = 8080)]
    port: u16,

    /// Prebuilt frontend; unknown paths fall back to its `index.html`.
    #[arg(long, env = "STATIC_DIR", default_value = "static")]
    static_dir: PathBuf,

    /// Requests allowed to wait behind the running one.
    #[arg(long, env = "QUEUE_CAPACITY", default_value_t = 4)]
    queue_capacity: usize,

    /// JSON pipeline config; missing fields keep their defaults.
    #[arg(long, env = "AIMUSIC_CONFIG")]
    config: Option<PathBuf>,

    /// CUDA device ordinal (0 = first GPU).
    #[arg(long, default_value_t = 0)]
    cuda_device: usize,

    /// Run on the CPU even when a GPU is available.
    #[arg(long, default_value_t = false)]
    cpu: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let dirs = OutputDirs::from_env();
    dirs.ensure()?;

    let pipeline_config = match &args.config {
        Some(path) => PipelineConfig::from_file(path)?,
        None => PipelineConfig::default(),
    };
    let manager_config = ManagerConfig {
        cuda_device: args.cuda_device,
        force_cpu: args.cpu,
        queue_capacity: args.queue_capacity,
        ..ManagerConfig::default()
    };

    // A failed start leaves the server up without a generator.
    let manager = match SongManager::start(manager_config, dirs.clone(), pipeline_config).await {
        Ok(manager) => Some(manager),
        Err(error) => {
            tracing::error!(%error, "generator unavailable");
            None
        }
    };

    let state = AppState {
        manager,
        dirs,
        static_dir: args.static_dir,
    };
    let app = router(state);

    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Listening on http://{addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutting down");
        })
        .await?;
    Ok(())
}
