//! Still-image video mux via ffmpeg
//!
//! Pairs the looped audio with a single image, scaled and letterboxed to the
//! frame size, at a very low frame rate. The video ends with the audio.

use crate::error::{Error, Result};
use crate::process::{run_with_timeout, stderr_text};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Encoder settings for the video container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MuxOptions {
    pub video_codec: String,
    pub audio_codec: String,
    pub audio_bitrate_kbps: u32,
    /// Frames per second of the still image
    pub framerate: u32,
    pub width: u32,
    pub height: u32,
    pub ffmpeg_path: PathBuf,
    pub timeout: Duration,
}

impl Default for MuxOptions {
    fn default() -> Self {
        Self {
            video_codec: "libx264".to_string(),
            audio_codec: "aac".to_string(),
            audio_bitrate_kbps: 192,
            framerate: 2,
            width: 1920,
            height: 1080,
            ffmpeg_path: PathBuf::from("ffmpeg"),
            timeout: Duration::from_secs(10_800),
        }
    }
}

/// Scale-then-pad filter centring the image in a `width`x`height` frame
fn scale_filter(width: u32, height: u32) -> String {
    format!(
        "scale={w}:{h}:force_original_aspect_ratio=decrease,pad={w}:{h}:(ow-iw)/2:(oh-ih)/2",
        w = width,
        h = height
    )
}

/// ffmpeg arguments for muxing `image` and `audio` into `output`
pub fn mux_args(audio: &Path, image: &Path, output: &Path, options: &MuxOptions) -> Vec<OsString> {
    let framerate = options.framerate.to_string();
    vec![
        OsString::from("-y"),
        "-loop".into(),
        "1".into(),
        "-framerate".into(),
        framerate.clone().into(),
        "-i".into(),
        image.into(),
        "-i".into(),
        audio.into(),
        "-c:v".into(),
        options.video_codec.clone().into(),
        "-tune".into(),
        "stillimage".into(),
        "-c:a".into(),
        options.audio_codec.clone().into(),
        "-b:a".into(),
        format!("{}k", options.audio_bitrate_kbps).into(),
        "-vf".into(),
        scale_filter(options.width, options.height).into(),
        "-pix_fmt".into(),
        "yuv420p".into(),
        "-shortest".into(),
        "-r".into(),
        framerate.into(),
        output.into(),
    ]
}

/// Render `output` from a still `image` and the `audio` track
///
/// # Errors
/// - `MuxFailed` when an input is missing (checked before spawning) or
///   ffmpeg exits non-zero; stderr is attached verbatim
/// - `Timeout` when ffmpeg outlives `options.timeout`
pub async fn mux_still_image(
    audio: &Path,
    image: &Path,
    output: &Path,
    options: &MuxOptions,
) -> Result<()> {
    for (label, path) in [("audio", audio), ("image", image)] {
        if !path.is_file() {
            return Err(Error::MuxFailed {
                reason: format!("{} file not found: {}", label, path.display()),
                diagnostics: String::new(),
            });
        }
    }

    info!(
        "Creating video {} from {} + {}",
        output.display(),
        image.display(),
        audio.display()
    );

    let args = mux_args(audio, image, output, options);
    let result = run_with_timeout(&options.ffmpeg_path, &args, options.timeout, "video mux").await;
    let output_status = match result {
        Ok(out) => out,
        Err(Error::Io(e)) => {
            return Err(Error::MuxFailed {
                reason: format!(
                    "failed to start {}: {}",
                    options.ffmpeg_path.display(),
                    e
                ),
                diagnostics: String::new(),
            })
        }
        Err(e) => return Err(e),
    };

    if !output_status.status.success() {
        return Err(Error::MuxFailed {
            reason: format!("ffmpeg exited with {}", output_status.status),
            diagnostics: stderr_text(&output_status.stderr),
        });
    }

    info!("Video created: {}", output.display());
    Ok(())
}
