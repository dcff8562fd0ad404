//! Bootstrap configuration: compiled defaults and the optional TOML file
//!
//! Settings are resolved per invocation in priority order:
//! 1. Command-line arguments (highest priority)
//! 2. Environment variables (`LOOPCAST_*`, handled by the CLI layer)
//! 3. TOML configuration file
//! 4. Compiled defaults (fallback)
//!
//! Nothing here is process-wide state: the file is read once and the values
//! are handed to the caller, which builds an explicit run configuration.
//!
//! A missing configuration file is not an error. A file that exists but
//! cannot be read or parsed is.

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Application directory name under the platform config directory
pub const APP_DIR_NAME: &str = "loopcast";

/// Configuration file name
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Built-in defaults used when neither CLI, environment nor TOML set a value
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledDefaults {
    pub crossfade_ms: u64,
    pub target_duration_secs: u64,
    pub doubling_threshold_units: u32,
    pub chunk_units: u32,
    /// 0 selects the available parallelism
    pub workers: usize,
    pub output_format: &'static str,
    pub bitrate_kbps: u32,
    pub quality: Option<u8>,
    pub ffmpeg_path: &'static str,
    pub decode_timeout_secs: u64,
    pub synthesis_timeout_secs: u64,
    pub encode_timeout_secs: u64,
    pub video_image: &'static str,
    pub video_width: u32,
    pub video_height: u32,
    pub video_framerate: u32,
    pub video_codec: &'static str,
    pub video_audio_codec: &'static str,
    pub video_audio_bitrate_kbps: u32,
    pub video_timeout_secs: u64,
    pub log_level: &'static str,
}

impl CompiledDefaults {
    /// The defaults shipped with this build
    pub fn get() -> Self {
        Self {
            crossfade_ms: 5_000,
            target_duration_secs: 3_600,
            doubling_threshold_units: 10,
            chunk_units: 20,
            workers: 0,
            output_format: "mp3",
            bitrate_kbps: 320,
            quality: Some(0),
            ffmpeg_path: "ffmpeg",
            decode_timeout_secs: 300,
            synthesis_timeout_secs: 6 * 3_600,
            encode_timeout_secs: 3_600,
            video_image: "thumbnail.jpg",
            video_width: 1920,
            video_height: 1080,
            video_framerate: 2,
            video_codec: "libx264",
            video_audio_codec: "aac",
            video_audio_bitrate_kbps: 192,
            video_timeout_secs: 3 * 3_600,
            log_level: "info",
        }
    }
}

/// Contents of `config.toml`
///
/// Every field is optional; absent fields fall through to the compiled
/// defaults.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct TomlConfig {
    /// Crossfade between loop iterations, in milliseconds
    pub crossfade_ms: Option<u64>,

    /// Target output duration, in seconds
    pub target_duration_secs: Option<u64>,

    pub synthesis: SynthesisSection,
    pub encode: EncodeSection,
    pub video: VideoSection,
    pub logging: LoggingConfig,
}

/// `[synthesis]` table
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct SynthesisSection {
    /// Accumulator size (in source occurrences) at which doubling starts
    pub doubling_threshold_units: Option<u32>,

    /// Chunk ceiling in source occurrences
    pub chunk_units: Option<u32>,

    /// Chunk-building worker threads (0 = available parallelism)
    pub workers: Option<usize>,

    /// Root directory for temporary chunk storage (system temp if unset)
    pub temp_dir: Option<PathBuf>,

    pub timeout_secs: Option<u64>,
    pub decode_timeout_secs: Option<u64>,
}

/// `[encode]` table
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct EncodeSection {
    /// Output container/codec identifier (wav, mp3, aac, ogg, flac)
    pub format: Option<String>,
    pub bitrate_kbps: Option<u32>,
    /// Encoder-specific quality hint (`-q:a`)
    pub quality: Option<u8>,
    pub ffmpeg_path: Option<PathBuf>,
    pub timeout_secs: Option<u64>,
}

/// `[video]` table
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct VideoSection {
    pub enabled: Option<bool>,
    pub image: Option<PathBuf>,
    pub output: Option<PathBuf>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub framerate: Option<u32>,
    pub video_codec: Option<String>,
    pub audio_codec: Option<String>,
    pub audio_bitrate_kbps: Option<u32>,
    pub timeout_secs: Option<u64>,
}

/// `[logging]` table
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: Option<String>,
}

/// Default configuration file location for this platform
///
/// `~/.config/loopcast/config.toml` on Linux, the platform equivalent
/// elsewhere. `None` when the platform has no config directory.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(APP_DIR_NAME).join(CONFIG_FILE_NAME))
}

/// Parse TOML configuration text
pub fn parse_toml_config(text: &str) -> Result<TomlConfig> {
    toml::from_str(text).map_err(|e| Error::Config(format!("Failed to parse TOML: {}", e)))
}

/// Read and parse a configuration file
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    let config = parse_toml_config(&text)?;
    info!("Loaded configuration from {}", path.display());
    Ok(config)
}

/// Locate and load the configuration for this run
///
/// An explicit path must exist. Without one, the platform default location
/// is tried and silently skipped when absent.
pub fn resolve_toml_config(explicit: Option<&Path>) -> Result<TomlConfig> {
    if let Some(path) = explicit {
        if !path.exists() {
            return Err(Error::Config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }
        return load_toml_config(path);
    }

    match default_config_path() {
        Some(path) if path.exists() => load_toml_config(&path),
        Some(path) => {
            debug!("No config file at {}, using defaults", path.display());
            Ok(TomlConfig::default())
        }
        None => {
            debug!("Platform has no config directory, using defaults");
            Ok(TomlConfig::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compiled_defaults() {
        let defaults = CompiledDefaults::get();
        assert_eq!(defaults.crossfade_ms, 5_000);
        assert_eq!(defaults.target_duration_secs, 3_600);
        assert_eq!(defaults.chunk_units, 20);
        assert_eq!(defaults.doubling_threshold_units, 10);
        assert_eq!(defaults.log_level, "info");
    }

    #[test]
    fn test_empty_toml_is_default() {
        let config = parse_toml_config("").unwrap();
        assert_eq!(config, TomlConfig::default());
    }

    #[test]
    fn test_parse_sections() {
        let config = parse_toml_config(
            r#"
            crossfade_ms = 2500
            target_duration_secs = 7200

            [synthesis]
            chunk_units = 16
            workers = 2

            [encode]
            format = "wav"

            [video]
            enabled = true
            image = "cover.png"

            [logging]
            level = "debug"
            "#,
        )
        .unwrap();

        assert_eq!(config.crossfade_ms, Some(2500));
        assert_eq!(config.target_duration_secs, Some(7200));
        assert_eq!(config.synthesis.chunk_units, Some(16));
        assert_eq!(config.synthesis.workers, Some(2));
        assert_eq!(config.synthesis.doubling_threshold_units, None);
        assert_eq!(config.encode.format.as_deref(), Some("wav"));
        assert_eq!(config.video.enabled, Some(true));
        assert_eq!(config.video.image, Some(PathBuf::from("cover.png")));
        assert_eq!(config.logging.level.as_deref(), Some("debug"));
    }

    #[test]
    fn test_unknown_key_rejected() {
        let err = parse_toml_config("crossfade_seconds = 5").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_default_config_path_shape() {
        if let Some(path) = default_config_path() {
            assert!(path.ends_with("loopcast/config.toml"));
        }
    }
}
