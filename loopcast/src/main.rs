//! loopcast - Main entry point
//!
//! Loops an audio file to a target duration with crossfades, encodes it, and
//! optionally renders a still-image video. Logs go to stderr; a JSON run
//! summary is printed to stdout.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{info, warn};

use loopcast::config::{resolve_log_level, CliOverrides, RunConfig};
use loopcast::pipeline;
use loopcast::synth::CancelToken;
use loopcast_common::config::resolve_toml_config;
use loopcast_common::logging::init_tracing;

/// Command-line arguments for loopcast
#[derive(Parser, Debug)]
#[command(name = "loopcast")]
#[command(about = "Create extended audio loops with crossfading")]
#[command(version)]
struct Args {
    /// Input audio file (MP3, FLAC, WAV, OGG, M4A, MKV)
    input: PathBuf,

    /// Output audio file [default: looped_<input>.<format>]
    #[arg(short, long, env = "LOOPCAST_OUTPUT")]
    output: Option<PathBuf>,

    /// Target duration in seconds [default: 3600]
    #[arg(short, long, env = "LOOPCAST_DURATION")]
    duration: Option<u64>,

    /// Crossfade between iterations in milliseconds [default: 5000]
    #[arg(short, long = "crossfade-ms", env = "LOOPCAST_CROSSFADE_MS")]
    crossfade_ms: Option<u64>,

    /// Output format: mp3, aac, ogg, flac, wav [default: mp3]
    #[arg(short, long, env = "LOOPCAST_FORMAT")]
    format: Option<String>,

    /// Lossy output bitrate in kbps [default: 320]
    #[arg(long, env = "LOOPCAST_BITRATE")]
    bitrate: Option<u32>,

    /// Encoder quality (ffmpeg -q:a)
    #[arg(long, env = "LOOPCAST_QUALITY")]
    quality: Option<u8>,

    /// ffmpeg executable
    #[arg(long, env = "LOOPCAST_FFMPEG")]
    ffmpeg: Option<PathBuf>,

    /// Source occurrences before doubling starts [default: 10]
    #[arg(long, env = "LOOPCAST_DOUBLING_THRESHOLD")]
    doubling_threshold: Option<u32>,

    /// Source occurrences per persisted chunk [default: 20]
    #[arg(long, env = "LOOPCAST_CHUNK_UNITS")]
    chunk_units: Option<u32>,

    /// Chunk build workers, 0 = all cores [default: 0]
    #[arg(long, env = "LOOPCAST_WORKERS")]
    workers: Option<usize>,

    /// Directory for temporary chunk files
    #[arg(long, env = "LOOPCAST_TEMP_DIR")]
    temp_dir: Option<PathBuf>,

    /// Also render a still-image video
    #[arg(long, env = "LOOPCAST_VIDEO")]
    video: bool,

    /// Still image for the video [default: thumbnail.jpg]
    #[arg(long, env = "LOOPCAST_IMAGE")]
    image: Option<PathBuf>,

    /// Video output file [default: <output stem>.mp4]
    #[arg(long, env = "LOOPCAST_VIDEO_OUTPUT")]
    video_output: Option<PathBuf>,

    /// Configuration file [default: ~/.config/loopcast/config.toml]
    #[arg(long, env = "LOOPCAST_CONFIG")]
    config: Option<PathBuf>,

    /// Log level when RUST_LOG is unset [default: info]
    #[arg(long, env = "LOOPCAST_LOG_LEVEL")]
    log_level: Option<String>,
}

impl Args {
    fn overrides(&self) -> CliOverrides {
        CliOverrides {
            input: self.input.clone(),
            output: self.output.clone(),
            crossfade_ms: self.crossfade_ms,
            duration_secs: self.duration,
            format: self.format.clone(),
            bitrate_kbps: self.bitrate,
            quality: self.quality,
            ffmpeg_path: self.ffmpeg.clone(),
            doubling_threshold_units: self.doubling_threshold,
            chunk_units: self.chunk_units,
            workers: self.workers,
            temp_dir: self.temp_dir.clone(),
            video: self.video,
            image: self.image.clone(),
            video_output: self.video_output.clone(),
            log_level: self.log_level.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let overrides = args.overrides();

    let toml = resolve_toml_config(args.config.as_deref()).context("Failed to load configuration")?;
    init_tracing(&resolve_log_level(&overrides, &toml));

    let config = RunConfig::resolve(&overrides, &toml).context("Invalid configuration")?;
    info!(
        "Looping {} -> {}",
        config.input.display(),
        config.output.display()
    );

    let cancel = CancelToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling at the next chunk boundary");
            interrupt.cancel();
        }
    });

    let summary = pipeline::run(&config, cancel)
        .await
        .with_context(|| format!("Failed to loop {}", config.input.display()))?;

    println!(
        "{}",
        serde_json::to_string_pretty(&summary).context("Failed to serialize run summary")?
    );
    info!("Done in {} ms", summary.elapsed_ms);
    Ok(())
}
