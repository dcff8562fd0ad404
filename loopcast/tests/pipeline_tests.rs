//! End-to-end runs: decode, synthesize, encode, optional video

mod helpers;

use helpers::generate_sine_wav;
use loopcast::audio::OutputFormat;
use loopcast::config::{CliOverrides, RunConfig};
use loopcast::pipeline;
use loopcast::synth::{CancelToken, ExecutionMode};
use loopcast::Error;
use loopcast_common::config::TomlConfig;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const RATE: u32 = 8_000;

/// 1.5 s stereo source looped to 20 s in chunks of four occurrences
fn overrides(dir: &TempDir, format: &str) -> CliOverrides {
    let input = dir.path().join("clip.wav");
    generate_sine_wav(&input, RATE, 2, 1_500, 440.0, 0.5).unwrap();

    CliOverrides {
        input,
        output: Some(dir.path().join(format!("looped_clip.{}", format))),
        crossfade_ms: Some(250),
        duration_secs: Some(20),
        format: Some(format.to_string()),
        chunk_units: Some(4),
        temp_dir: Some(dir.path().join("chunks")),
        ..Default::default()
    }
}

fn resolve(overrides: &CliOverrides) -> RunConfig {
    std::fs::create_dir_all(overrides.temp_dir.as_ref().unwrap()).unwrap();
    RunConfig::resolve(overrides, &TomlConfig::default()).unwrap()
}

fn leftover_scratch(dir: &Path) -> Vec<PathBuf> {
    std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .filter(|path| {
            path.file_name()
                .map(|name| name.to_string_lossy().starts_with(".loopcast-"))
                .unwrap_or(false)
        })
        .collect()
}

fn is_empty_dir(dir: &Path) -> bool {
    std::fs::read_dir(dir).unwrap().next().is_none()
}

#[tokio::test(flavor = "multi_thread")]
async fn test_run_writes_exact_wav() {
    let dir = TempDir::new().unwrap();
    let config = resolve(&overrides(&dir, "wav"));

    let summary = pipeline::run(&config, CancelToken::new()).await.unwrap();

    assert_eq!(summary.output, config.output);
    assert_eq!(summary.format, OutputFormat::Wav);
    assert_eq!(summary.source_ms, 1_500);
    assert!(summary.video.is_none());
    // ceil((20_000 - 250) / 1_250) = 16 = 4 x 4
    assert_eq!(summary.synthesis.mode, ExecutionMode::Chunked);
    assert_eq!(summary.synthesis.occurrences, 16);
    assert_eq!(summary.synthesis.output_ms, 20_000);

    let reader = hound::WavReader::open(&config.output).unwrap();
    assert_eq!(reader.spec().sample_rate, RATE);
    assert_eq!(reader.spec().channels, 2);
    assert_eq!(reader.duration(), 20 * RATE);

    assert!(leftover_scratch(dir.path()).is_empty());
    assert!(is_empty_dir(&dir.path().join("chunks")));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_summary_serializes() {
    let dir = TempDir::new().unwrap();
    let config = resolve(&overrides(&dir, "wav"));
    let summary = pipeline::run(&config, CancelToken::new()).await.unwrap();

    let json = serde_json::to_value(&summary).unwrap();
    assert_eq!(json["format"], "wav");
    assert_eq!(json["synthesis"]["mode"], "chunked");
    assert_eq!(json["synthesis"]["output_ms"], 20_000);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_missing_image_fails_mux_after_audio() {
    let dir = TempDir::new().unwrap();
    let config = resolve(&CliOverrides {
        image: Some(dir.path().join("missing.jpg")),
        ..overrides(&dir, "wav")
    });
    assert!(config.video.is_some());

    match pipeline::run(&config, CancelToken::new()).await {
        Err(Error::MuxFailed { reason, .. }) => assert!(reason.contains("image"), "{}", reason),
        other => panic!("expected MuxFailed, got {:?}", other),
    }
    // Audio was complete before the video step
    assert_eq!(hound::WavReader::open(&config.output).unwrap().duration(), 20 * RATE);
    assert!(leftover_scratch(dir.path()).is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_missing_input_is_unreadable() {
    let dir = TempDir::new().unwrap();
    let config = resolve(&CliOverrides {
        input: dir.path().join("nope.mp3"),
        ..overrides(&dir, "wav")
    });

    let result = pipeline::run(&config, CancelToken::new()).await;
    assert!(matches!(result, Err(Error::SourceUnreadable { .. })));
    assert!(!config.output.exists());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_cancelled_run_leaves_nothing_behind() {
    let dir = TempDir::new().unwrap();
    let config = resolve(&overrides(&dir, "wav"));
    let cancel = CancelToken::new();
    cancel.cancel();

    let result = pipeline::run(&config, cancel).await;
    assert!(matches!(result, Err(Error::Cancelled)));
    assert!(!config.output.exists());
    assert!(leftover_scratch(dir.path()).is_empty());
    assert!(is_empty_dir(&dir.path().join("chunks")));
}

#[cfg(unix)]
#[tokio::test(flavor = "multi_thread")]
async fn test_compressed_output_streams_through_encoder() {
    use std::os::unix::fs::PermissionsExt;

    let dir = TempDir::new().unwrap();
    // Stand-in encoder: copies the raw PCM on stdin to the output argument
    let encoder = dir.path().join("fake-ffmpeg");
    std::fs::write(&encoder, "#!/bin/sh\nfor last; do :; done\ncat > \"$last\"\n").unwrap();
    std::fs::set_permissions(&encoder, std::fs::Permissions::from_mode(0o755)).unwrap();

    let config = resolve(&CliOverrides {
        ffmpeg_path: Some(encoder),
        ..overrides(&dir, "flac")
    });
    let summary = pipeline::run(&config, CancelToken::new()).await.unwrap();

    assert_eq!(summary.format, OutputFormat::Flac);
    // 20 s of stereo f32le
    let bytes = std::fs::metadata(&config.output).unwrap().len();
    assert_eq!(bytes, 20 * RATE as u64 * 2 * 4);
    assert!(leftover_scratch(dir.path()).is_empty());
}
