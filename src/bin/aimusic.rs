//! One-shot song generation.
//!
//! Runs the pipeline once and prints the result as JSON.
//!
//! ```sh
//! aimusic "a melancholic ballad about autumn rain" --output-dir ./out --seed 7
//! ```

use std::path::PathBuf;

use aimusic_rs::config::{OutputDirs, PipelineConfig};
use aimusic_rs::manager::preferred_device;
use aimusic_rs::pipeline::SongPipeline;
use candle_core::{DType, Device};
use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "aimusic", about = "Generate a song from a text prompt")]
struct Args {
    /// Text prompt for lyrics and melody.
    prompt: String,

    /// Output directory. Defaults to `GENERATED_DIR` or `generated_songs`.
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// JSON pipeline config; missing fields keep their defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Seed every sampler for a reproducible run.
    #[arg(long)]
    seed: Option<u64>,

    /// Melody length in seconds.
    #[arg(long)]
    duration: Option<f64>,

    /// Keep all models loaded for the whole run.
    #[arg(long, default_value_t = false)]
    keep_models_resident: bool,

    /// CUDA device ordinal (0 = first GPU).
    #[arg(long, default_value_t = 0)]
    cuda_device: usize,

    /// Run on the CPU even when a GPU is available.
    #[arg(long, default_value_t = false)]
    cpu: bool,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => PipelineConfig::from_file(path)?,
        None => PipelineConfig::default(),
    };
    if args.seed.is_some() {
        config.seed = args.seed;
    }
    if let Some(duration) = args.duration {
        config.melody.duration_s = duration;
    }
    config.keep_models_resident |= args.keep_models_resident;

    let dirs = match args.output_dir {
        Some(dir) => OutputDirs::new(dir),
        None => OutputDirs::from_env(),
    };
    let device = if args.cpu {
        Device::Cpu
    } else {
        preferred_device(args.cuda_device)
    };

    let mut pipeline = SongPipeline::load(&device, DType::F32, dirs, config)?;
    let song = pipeline.generate(&args.prompt)?;
    println!("{}", serde_json::to_string_pretty(&song)?);
    Ok(())
}
