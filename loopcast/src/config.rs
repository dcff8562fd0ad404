//! Run configuration
//!
//! # Settings Sources Priority
//!
//! 1. Command-line arguments
//! 2. Environment variables (`LOOPCAST_*`, folded into the arguments by clap)
//! 3. TOML configuration file
//! 4. Compiled defaults
//!
//! The result is one explicit [`RunConfig`] per invocation.

use crate::audio::encoder::{EncodeSettings, OutputFormat};
use crate::error::{Error, Result};
use crate::mux::MuxOptions;
use crate::synth::SynthesisConfig;
use loopcast_common::config::{CompiledDefaults, TomlConfig};
use loopcast_common::timing::seconds_to_ms;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

/// Prefix of the default output file name
pub const OUTPUT_PREFIX: &str = "looped_";

/// Values supplied on the command line or through the environment
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CliOverrides {
    pub input: PathBuf,
    pub output: Option<PathBuf>,
    pub crossfade_ms: Option<u64>,
    pub duration_secs: Option<u64>,
    pub format: Option<String>,
    pub bitrate_kbps: Option<u32>,
    pub quality: Option<u8>,
    pub ffmpeg_path: Option<PathBuf>,
    pub doubling_threshold_units: Option<u32>,
    pub chunk_units: Option<u32>,
    pub workers: Option<usize>,
    pub temp_dir: Option<PathBuf>,
    /// Force the video step on
    pub video: bool,
    pub image: Option<PathBuf>,
    pub video_output: Option<PathBuf>,
    pub log_level: Option<String>,
}

/// Still-image video job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoJob {
    pub image: PathBuf,
    pub output: PathBuf,
    pub options: MuxOptions,
}

/// Fully resolved settings for one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    pub input: PathBuf,
    pub output: PathBuf,
    pub synthesis: SynthesisConfig,
    pub encode: EncodeSettings,
    pub video: Option<VideoJob>,
    pub decode_timeout: Duration,
    pub synthesis_timeout: Duration,
    pub log_level: String,
}

impl RunConfig {
    /// Merge command-line values over the TOML file over compiled defaults
    pub fn resolve(cli: &CliOverrides, toml: &TomlConfig) -> Result<Self> {
        let defaults = CompiledDefaults::get();

        if cli.input.as_os_str().is_empty() {
            return Err(Error::Config("no input file given".to_string()));
        }

        let format_name = cli
            .format
            .clone()
            .or_else(|| toml.encode.format.clone())
            .unwrap_or_else(|| defaults.output_format.to_string());
        let format: OutputFormat = format_name.parse()?;

        let crossfade_ms = cli
            .crossfade_ms
            .or(toml.crossfade_ms)
            .unwrap_or(defaults.crossfade_ms);
        let duration_secs = cli
            .duration_secs
            .or(toml.target_duration_secs)
            .unwrap_or(defaults.target_duration_secs);
        let target_ms = seconds_to_ms(duration_secs).ok_or_else(|| {
            Error::Config(format!("target duration of {}s is too long", duration_secs))
        })?;

        let doubling_threshold_units = cli
            .doubling_threshold_units
            .or(toml.synthesis.doubling_threshold_units)
            .unwrap_or(defaults.doubling_threshold_units);
        let chunk_units = cli
            .chunk_units
            .or(toml.synthesis.chunk_units)
            .unwrap_or(defaults.chunk_units);
        if doubling_threshold_units == 0 {
            return Err(Error::Config("doubling_threshold_units must be at least 1".to_string()));
        }
        if chunk_units == 0 {
            return Err(Error::Config("chunk_units must be at least 1".to_string()));
        }

        let synthesis = SynthesisConfig {
            crossfade_ms,
            target_ms,
            doubling_threshold_units,
            chunk_units,
            workers: cli.workers.or(toml.synthesis.workers).unwrap_or(defaults.workers),
            temp_dir: cli.temp_dir.clone().or_else(|| toml.synthesis.temp_dir.clone()),
        };
        if !synthesis.doubles_within_chunks() {
            warn!(
                "chunk_units {} is below twice doubling_threshold_units {}; chunks will be built without doubling",
                chunk_units, doubling_threshold_units
            );
        }

        let ffmpeg_path = cli
            .ffmpeg_path
            .clone()
            .or_else(|| toml.encode.ffmpeg_path.clone())
            .unwrap_or_else(|| PathBuf::from(defaults.ffmpeg_path));

        let encode = EncodeSettings {
            format,
            bitrate_kbps: cli
                .bitrate_kbps
                .or(toml.encode.bitrate_kbps)
                .unwrap_or(defaults.bitrate_kbps),
            quality: cli.quality.or(toml.encode.quality).or(defaults.quality),
            ffmpeg_path: ffmpeg_path.clone(),
            timeout: Duration::from_secs(
                toml.encode.timeout_secs.unwrap_or(defaults.encode_timeout_secs),
            ),
        };

        let output = cli
            .output
            .clone()
            .unwrap_or_else(|| default_output_path(&cli.input, format));

        let video_enabled =
            cli.video || cli.image.is_some() || toml.video.enabled.unwrap_or(false);
        let video = video_enabled.then(|| {
            let section = &toml.video;
            VideoJob {
                image: cli
                    .image
                    .clone()
                    .or_else(|| section.image.clone())
                    .unwrap_or_else(|| PathBuf::from(defaults.video_image)),
                output: cli
                    .video_output
                    .clone()
                    .or_else(|| section.output.clone())
                    .unwrap_or_else(|| default_video_path(&output)),
                options: MuxOptions {
                    video_codec: section
                        .video_codec
                        .clone()
                        .unwrap_or_else(|| defaults.video_codec.to_string()),
                    audio_codec: section
                        .audio_codec
                        .clone()
                        .unwrap_or_else(|| defaults.video_audio_codec.to_string()),
                    audio_bitrate_kbps: section
                        .audio_bitrate_kbps
                        .unwrap_or(defaults.video_audio_bitrate_kbps),
                    framerate: section.framerate.unwrap_or(defaults.video_framerate),
                    width: section.width.unwrap_or(defaults.video_width),
                    height: section.height.unwrap_or(defaults.video_height),
                    ffmpeg_path: ffmpeg_path.clone(),
                    timeout: Duration::from_secs(
                        section.timeout_secs.unwrap_or(defaults.video_timeout_secs),
                    ),
                },
            }
        });

        Ok(Self {
            input: cli.input.clone(),
            output,
            synthesis,
            encode,
            video,
            decode_timeout: Duration::from_secs(
                toml.synthesis
                    .decode_timeout_secs
                    .unwrap_or(defaults.decode_timeout_secs),
            ),
            synthesis_timeout: Duration::from_secs(
                toml.synthesis
                    .timeout_secs
                    .unwrap_or(defaults.synthesis_timeout_secs),
            ),
            log_level: resolve_log_level(cli, toml),
        })
    }
}

/// Log level from the command line, then the TOML file, then the default
pub fn resolve_log_level(cli: &CliOverrides, toml: &TomlConfig) -> String {
    cli.log_level
        .clone()
        .or_else(|| toml.logging.level.clone())
        .unwrap_or_else(|| CompiledDefaults::get().log_level.to_string())
}

/// `looped_<input stem>.<format extension>` next to the input
pub fn default_output_path(input: &Path, format: OutputFormat) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    let name = format!("{}{}.{}", OUTPUT_PREFIX, stem, format.file_extension());
    match input.parent() {
        Some(parent) => parent.join(name),
        None => PathBuf::from(name),
    }
}

/// `<output stem>.mp4` next to the audio output
pub fn default_video_path(output: &Path) -> PathBuf {
    output.with_extension("mp4")
}
