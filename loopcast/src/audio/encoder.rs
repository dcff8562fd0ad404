//! Output encoding
//!
//! WAV is written directly with hound. Compressed formats, and WAV files too
//! large for a RIFF header, are encoded by ffmpeg reading raw float PCM from
//! its stdin, so no intermediate file is ever written.
//!
//! Streaming writers implement [`FrameSink`] so the synthesizer can emit audio
//! without holding the whole result in memory.

use crate::error::{Error, Result};
use crate::process::stderr_text;
use hound::{SampleFormat, WavSpec, WavWriter};
use serde::Serialize;
use std::ffi::OsString;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::str::FromStr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Largest WAV data chunk hound can describe (its RIFF sizes are `u32`),
/// less room for the header chunks
pub const WAV_DATA_LIMIT_BYTES: u64 = u32::MAX as u64 - 1024;

/// Samples converted per write to the encoder pipe
const PIPE_BLOCK_SAMPLES: usize = 32_768;

/// Supported output formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Wav,
    Mp3,
    Aac,
    Ogg,
    Flac,
}

impl FromStr for OutputFormat {
    type Err = Error;

    /// Parse a container/codec identifier (case-insensitive)
    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "wav" => Ok(Self::Wav),
            "mp3" => Ok(Self::Mp3),
            "aac" | "m4a" => Ok(Self::Aac),
            "ogg" | "vorbis" => Ok(Self::Ogg),
            "flac" => Ok(Self::Flac),
            other => Err(Error::Config(format!("unsupported output format: {}", other))),
        }
    }
}

impl OutputFormat {
    pub fn file_extension(&self) -> &'static str {
        match self {
            Self::Wav => "wav",
            Self::Mp3 => "mp3",
            Self::Aac => "m4a",
            Self::Ogg => "ogg",
            Self::Flac => "flac",
        }
    }

    /// ffmpeg audio encoder name
    fn ffmpeg_codec(&self) -> &'static str {
        match self {
            Self::Wav => "pcm_s16le",
            Self::Mp3 => "libmp3lame",
            Self::Aac => "aac",
            Self::Ogg => "libvorbis",
            Self::Flac => "flac",
        }
    }

    /// Whether producing this format needs the external encoder
    pub fn needs_transcode(&self) -> bool {
        !matches!(self, Self::Wav)
    }

    fn is_lossless(&self) -> bool {
        matches!(self, Self::Wav | Self::Flac)
    }
}

/// Sample encoding inside a WAV file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WavSampleFormat {
    /// 16-bit signed PCM (final output)
    Int16,
    /// 32-bit IEEE float (lossless for chunk storage)
    Float32,
}

impl WavSampleFormat {
    fn spec(&self, sample_rate: u32, channels: u16) -> WavSpec {
        WavSpec {
            channels,
            sample_rate,
            bits_per_sample: self.bytes_per_sample() as u16 * 8,
            sample_format: match self {
                Self::Int16 => SampleFormat::Int,
                Self::Float32 => SampleFormat::Float,
            },
        }
    }

    pub fn bytes_per_sample(&self) -> u64 {
        match self {
            Self::Int16 => 2,
            Self::Float32 => 4,
        }
    }
}

/// Most frames a single WAV file of this layout can hold
pub fn max_wav_frames(channels: u16, format: WavSampleFormat) -> u64 {
    WAV_DATA_LIMIT_BYTES / (channels.max(1) as u64 * format.bytes_per_sample())
}

/// Encoder configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodeSettings {
    pub format: OutputFormat,
    pub bitrate_kbps: u32,
    /// Encoder-specific quality hint, passed as `-q:a`
    pub quality: Option<u8>,
    pub ffmpeg_path: PathBuf,
    /// Limit on ffmpeg finishing once the last sample is written
    pub timeout: Duration,
}

impl Default for EncodeSettings {
    fn default() -> Self {
        Self {
            format: OutputFormat::Mp3,
            bitrate_kbps: 320,
            quality: Some(0),
            ffmpeg_path: PathBuf::from("ffmpeg"),
            timeout: Duration::from_secs(3_600),
        }
    }
}

/// Destination for streamed interleaved samples
pub trait FrameSink {
    /// Append interleaved samples (a whole number of frames)
    fn write_samples(&mut self, samples: &[f32]) -> Result<()>;

    /// Frames accepted so far
    fn frames_written(&self) -> u64;

    /// Flush and close the destination
    fn finish(&mut self) -> Result<()>;
}

/// In-memory sink, mostly for tests and short renders
#[derive(Debug, Default)]
pub struct MemorySink {
    channels: u16,
    samples: Vec<f32>,
}

impl MemorySink {
    pub fn new(channels: u16) -> Self {
        Self {
            channels,
            samples: Vec::new(),
        }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }
}

impl FrameSink for MemorySink {
    fn write_samples(&mut self, samples: &[f32]) -> Result<()> {
        self.samples.extend_from_slice(samples);
        Ok(())
    }

    fn frames_written(&self) -> u64 {
        (self.samples.len() / self.channels.max(1) as usize) as u64
    }

    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Streaming WAV file writer
///
/// Refuses any write that would push the data chunk past
/// [`WAV_DATA_LIMIT_BYTES`]; hound cannot describe a larger file.
pub struct WavFileSink {
    path: PathBuf,
    writer: Option<WavWriter<BufWriter<File>>>,
    format: WavSampleFormat,
    channels: u16,
    samples_written: u64,
    data_limit_bytes: u64,
}

impl WavFileSink {
    /// Create (or truncate) `path` as a WAV file
    pub fn create(
        path: &Path,
        sample_rate: u32,
        channels: u16,
        format: WavSampleFormat,
    ) -> Result<Self> {
        let writer = WavWriter::create(path, format.spec(sample_rate, channels)).map_err(|e| {
            Error::EncodeFailed(format!("failed to create {}: {}", path.display(), e))
        })?;

        Ok(Self {
            path: path.to_path_buf(),
            writer: Some(writer),
            format,
            channels,
            samples_written: 0,
            data_limit_bytes: WAV_DATA_LIMIT_BYTES,
        })
    }

    fn write_error(&self, e: hound::Error) -> Error {
        Error::EncodeFailed(format!("failed to write {}: {}", self.path.display(), e))
    }
}

impl FrameSink for WavFileSink {
    fn write_samples(&mut self, samples: &[f32]) -> Result<()> {
        let data_bytes =
            (self.samples_written + samples.len() as u64) * self.format.bytes_per_sample();
        if data_bytes > self.data_limit_bytes {
            return Err(Error::EncodeFailed(format!(
                "{} would exceed the WAV size limit ({} bytes of audio data)",
                self.path.display(),
                self.data_limit_bytes
            )));
        }

        let Some(writer) = self.writer.as_mut() else {
            return Err(Error::EncodeFailed(format!(
                "{} already finalized",
                self.path.display()
            )));
        };

        let result = match self.format {
            WavSampleFormat::Float32 => samples.iter().try_for_each(|&s| writer.write_sample(s)),
            WavSampleFormat::Int16 => {
                let mut sample_writer = writer.get_i16_writer(samples.len() as u32);
                for &sample in samples {
                    let clamped = sample.clamp(-1.0, 1.0);
                    sample_writer.write_sample((clamped * i16::MAX as f32) as i16);
                }
                sample_writer.flush()
            }
        };
        result.map_err(|e| self.write_error(e))?;

        self.samples_written += samples.len() as u64;
        Ok(())
    }

    fn frames_written(&self) -> u64 {
        self.samples_written / self.channels as u64
    }

    fn finish(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.take() {
            writer.finalize().map_err(|e| self.write_error(e))?;
            debug!(
                "Finalized {} ({} frames)",
                self.path.display(),
                self.frames_written()
            );
        }
        Ok(())
    }
}

/// ffmpeg arguments for encoding raw f32 PCM from stdin into `output`
pub fn pipe_args(
    output: &Path,
    sample_rate: u32,
    channels: u16,
    settings: &EncodeSettings,
) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        "-y".into(),
        "-hide_banner".into(),
        "-loglevel".into(),
        "error".into(),
        "-f".into(),
        "f32le".into(),
        "-ar".into(),
        sample_rate.to_string().into(),
        "-ac".into(),
        channels.to_string().into(),
        "-i".into(),
        "pipe:0".into(),
        "-vn".into(),
        "-c:a".into(),
        settings.format.ffmpeg_codec().into(),
    ];
    if settings.format == OutputFormat::Wav {
        // Switches to an RF64 header once the data passes 4 GiB
        args.push("-rf64".into());
        args.push("auto".into());
    }
    if !settings.format.is_lossless() {
        args.push("-b:a".into());
        args.push(format!("{}k", settings.bitrate_kbps).into());
        if let Some(quality) = settings.quality {
            args.push("-q:a".into());
            args.push(quality.to_string().into());
        }
    }
    args.push(output.into());
    args
}

/// Streams samples into an ffmpeg encoder through its stdin
///
/// Blocking API over a tokio child process: create and drive it from a
/// blocking thread of a tokio runtime (e.g. inside `spawn_blocking`).
/// The child is killed if the sink is dropped before [`FrameSink::finish`].
pub struct FfmpegSink {
    output: PathBuf,
    program: PathBuf,
    channels: u16,
    timeout: Duration,
    runtime: Handle,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    stderr: Option<JoinHandle<Vec<u8>>>,
    samples_written: u64,
    block: Vec<u8>,
}

impl FfmpegSink {
    /// Start ffmpeg writing `settings.format` to `output`
    ///
    /// # Errors
    /// `EncodeFailed` when there is no tokio runtime or ffmpeg cannot start
    pub fn spawn(
        output: &Path,
        sample_rate: u32,
        channels: u16,
        settings: &EncodeSettings,
    ) -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| Error::EncodeFailed(format!("encoder needs a tokio runtime: {}", e)))?;
        let _context = runtime.enter();

        let args = pipe_args(output, sample_rate, channels, settings);
        info!(
            "Encoding {} ({}, {} kbps) via {}",
            output.display(),
            settings.format.file_extension(),
            settings.bitrate_kbps,
            settings.ffmpeg_path.display()
        );
        debug!(args = ?args, "Spawning encoder");

        let mut child = Command::new(&settings.ffmpeg_path)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Error::EncodeFailed(format!(
                    "failed to start {}: {}",
                    settings.ffmpeg_path.display(),
                    e
                ))
            })?;

        let stdin = child.stdin.take();
        let stderr = child.stderr.take().map(|mut pipe| {
            runtime.spawn(async move {
                let mut text = Vec::new();
                let _ = pipe.read_to_end(&mut text).await;
                text
            })
        });

        Ok(Self {
            output: output.to_path_buf(),
            program: settings.ffmpeg_path.clone(),
            channels,
            timeout: settings.timeout,
            runtime,
            child: Some(child),
            stdin,
            stderr,
            samples_written: 0,
            block: Vec::with_capacity(PIPE_BLOCK_SAMPLES * 4),
        })
    }

    /// Close stdin and wait for the encoder to exit
    fn wait_for_exit(&mut self) -> Result<()> {
        drop(self.stdin.take());
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };

        let status = match self
            .runtime
            .block_on(tokio::time::timeout(self.timeout, child.wait()))
        {
            Ok(status) => status.map_err(|e| {
                Error::EncodeFailed(format!("failed to wait for {}: {}", self.program.display(), e))
            })?,
            Err(_) => {
                return Err(Error::Timeout {
                    step: "audio encode".to_string(),
                    seconds: self.timeout.as_secs(),
                })
            }
        };

        let diagnostics = match self.stderr.take() {
            Some(task) => self.runtime.block_on(task).unwrap_or_default(),
            None => Vec::new(),
        };

        if !status.success() {
            return Err(Error::EncodeFailed(format!(
                "{} exited with {}: {}",
                self.program.display(),
                status,
                stderr_text(&diagnostics)
            )));
        }
        Ok(())
    }
}

impl FrameSink for FfmpegSink {
    fn write_samples(&mut self, samples: &[f32]) -> Result<()> {
        for block in samples.chunks(PIPE_BLOCK_SAMPLES) {
            self.block.clear();
            for sample in block {
                self.block.extend_from_slice(&sample.to_le_bytes());
            }

            let Some(stdin) = self.stdin.as_mut() else {
                return Err(Error::EncodeFailed(format!(
                    "{} already finalized",
                    self.output.display()
                )));
            };
            if let Err(e) = self.runtime.block_on(stdin.write_all(&self.block)) {
                // A closed pipe means ffmpeg gave up; its exit status says why
                self.wait_for_exit()?;
                return Err(Error::EncodeFailed(format!(
                    "{} stopped accepting audio: {}",
                    self.program.display(),
                    e
                )));
            }
            self.samples_written += block.len() as u64;
        }
        Ok(())
    }

    fn frames_written(&self) -> u64 {
        self.samples_written / self.channels.max(1) as u64
    }

    fn finish(&mut self) -> Result<()> {
        if let Some(stdin) = self.stdin.as_mut() {
            self.runtime.block_on(stdin.flush()).map_err(|e| {
                Error::EncodeFailed(format!("failed to flush audio to {}: {}", self.program.display(), e))
            })?;
        }
        self.wait_for_exit()?;
        debug!(
            "Encoded {} ({} frames)",
            self.output.display(),
            self.frames_written()
        );
        Ok(())
    }
}

/// Open the encoder for `frames` frames of audio at `path`
///
/// WAV is written directly while it fits a RIFF header; larger WAV files and
/// every other format stream through [`FfmpegSink`], so call this from a
/// blocking thread of a tokio runtime.
pub fn open_sink(
    path: &Path,
    sample_rate: u32,
    channels: u16,
    frames: u64,
    settings: &EncodeSettings,
) -> Result<Box<dyn FrameSink>> {
    if !settings.format.needs_transcode() {
        if frames <= max_wav_frames(channels, WavSampleFormat::Int16) {
            let sink = WavFileSink::create(path, sample_rate, channels, WavSampleFormat::Int16)?;
            return Ok(Box::new(sink));
        }
        info!(
            "{} frames exceed the RIFF size limit, writing RF64 through ffmpeg",
            frames
        );
    }
    Ok(Box::new(FfmpegSink::spawn(path, sample_rate, channels, settings)?))
}
