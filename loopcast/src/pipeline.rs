//! End-to-end run: decode, synthesize, encode, optionally mux a video
//!
//! Blocking phases run on `spawn_blocking` under a time limit. When a limit
//! expires the cancel token is tripped so the worker stops at its next chunk
//! boundary, and the run fails with `Timeout`.
//!
//! Audio is streamed while it is synthesized, into a file in a scratch
//! directory next to the output, then renamed into place. An interrupted
//! render never shows up at the output path. WAV is written directly unless
//! it would outgrow a RIFF header; everything else is piped through ffmpeg.

use crate::audio::decoder::SourceDecoder;
use crate::audio::encoder::{open_sink, OutputFormat};
use crate::config::RunConfig;
use crate::error::{Error, Result};
use crate::mux::mux_still_image;
use crate::synth::{CancelToken, SynthesisReport, Synthesizer};
use loopcast_common::human_time::format_duration_ms;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::info;

/// What a completed run produced
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub input: PathBuf,
    pub output: PathBuf,
    pub format: OutputFormat,
    pub video: Option<PathBuf>,
    pub source_ms: u64,
    pub synthesis: SynthesisReport,
    pub elapsed_ms: u64,
}

/// Execute every phase of a run
pub async fn run(config: &RunConfig, cancel: CancelToken) -> Result<RunSummary> {
    let started = Instant::now();

    info!("Decoding {}", config.input.display());
    let input = config.input.clone();
    let source = run_blocking("decode", config.decode_timeout, &cancel, move || {
        SourceDecoder::decode_file(&input, None)
    })
    .await?;
    info!(
        "Source: {} ({} Hz, {} ch)",
        format_duration_ms(source.duration_ms()),
        source.sample_rate(),
        source.channels()
    );
    cancel.check()?;

    let scratch = scratch_dir(&config.output)?;
    let rendered = scratch
        .path()
        .join(format!("looped.{}", config.encode.format.file_extension()));

    let synthesizer = Synthesizer::new(config.synthesis.clone()).with_cancel_token(cancel.clone());
    let render_source = source.clone();
    let render_path = rendered.clone();
    let encode = config.encode.clone();
    let report = run_blocking("synthesis", config.synthesis_timeout, &cancel, move || {
        let output_frames = synthesizer.plan(&render_source)?.output_frames();
        let mut sink = open_sink(
            &render_path,
            render_source.sample_rate(),
            render_source.channels(),
            output_frames,
            &encode,
        )?;
        synthesizer.render(&render_source, &mut *sink)
    })
    .await?;
    info!(
        "Synthesized {} in {} combine operations",
        format_duration_ms(report.output_ms),
        report.combine_operations()
    );
    cancel.check()?;

    std::fs::rename(&rendered, &config.output).map_err(|e| {
        Error::EncodeFailed(format!("failed to write {}: {}", config.output.display(), e))
    })?;
    drop(scratch);
    info!("Audio written: {}", config.output.display());

    let video = match &config.video {
        Some(job) => {
            cancel.check()?;
            mux_still_image(&config.output, &job.image, &job.output, &job.options).await?;
            Some(job.output.clone())
        }
        None => None,
    };

    Ok(RunSummary {
        input: config.input.clone(),
        output: config.output.clone(),
        format: config.encode.format,
        video,
        source_ms: source.duration_ms(),
        synthesis: report,
        elapsed_ms: started.elapsed().as_millis() as u64,
    })
}

/// Scratch directory on the same filesystem as `output`
fn scratch_dir(output: &Path) -> Result<tempfile::TempDir> {
    let parent = match output.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    tempfile::Builder::new()
        .prefix(".loopcast-")
        .tempdir_in(&parent)
        .map_err(|e| {
            Error::EncodeFailed(format!(
                "failed to create scratch directory in {}: {}",
                parent.display(),
                e
            ))
        })
}

/// Run blocking work with a time limit
///
/// On expiry the token is cancelled; the worker thread exits at its next
/// cancellation check.
async fn run_blocking<T, F>(step: &str, limit: Duration, cancel: &CancelToken, work: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    let handle = tokio::task::spawn_blocking(work);
    match tokio::time::timeout(limit, handle).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_error)) => Err(Error::Io(std::io::Error::other(format!(
            "{} task failed: {}",
            step, join_error
        )))),
        Err(_) => {
            cancel.cancel();
            Err(Error::Timeout {
                step: step.to_string(),
                seconds: limit.as_secs(),
            })
        }
    }
}
