//! Deterministic audio fixtures
//!
//! WAV files are written with hound so the decoder path can be exercised
//! without binary fixtures in the repository. In-memory buffers use the same
//! generators.

use hound::{WavSpec, WavWriter};
use loopcast::audio::AudioBuffer;
use std::f32::consts::PI;
use std::path::Path;

/// Generate a silent 16-bit stereo WAV file
pub fn generate_silent_wav<P: AsRef<Path>>(
    path: P,
    sample_rate: u32,
    duration_ms: u64,
) -> Result<(), hound::Error> {
    let spec = WavSpec {
        channels: 2,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = WavWriter::create(path, spec)?;
    let total_samples = sample_rate as u64 * duration_ms / 1000 * 2;
    for _ in 0..total_samples {
        writer.write_sample(0i16)?;
    }
    writer.finalize()
}

/// Generate a 16-bit sine WAV file with `channels` identical channels
pub fn generate_sine_wav<P: AsRef<Path>>(
    path: P,
    sample_rate: u32,
    channels: u16,
    duration_ms: u64,
    frequency_hz: f32,
    amplitude: f32,
) -> Result<(), hound::Error> {
    let spec = WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = WavWriter::create(path, spec)?;
    let total_frames = sample_rate as u64 * duration_ms / 1000;
    for frame in 0..total_frames {
        let t = frame as f32 / sample_rate as f32;
        let value = (2.0 * PI * frequency_hz * t).sin() * amplitude;
        let sample = (value * i16::MAX as f32) as i16;
        for _ in 0..channels {
            writer.write_sample(sample)?;
        }
    }
    writer.finalize()
}

/// Sine buffer with a slow amplitude ramp, so every frame differs from its
/// neighbours in a full loop period
pub fn sine_buffer(sample_rate: u32, channels: u16, duration_ms: u64) -> AudioBuffer {
    let frames = sample_rate as u64 * duration_ms / 1000;
    let mut samples = Vec::with_capacity(frames as usize * channels as usize);
    for frame in 0..frames {
        let t = frame as f32 / sample_rate as f32;
        let envelope = 0.2 + 0.6 * (frame as f32 / frames as f32);
        let value = (2.0 * PI * 220.0 * t).sin() * envelope;
        for ch in 0..channels {
            samples.push(if ch % 2 == 0 { value } else { -value });
        }
    }
    AudioBuffer::new(samples, sample_rate, channels, 16).expect("valid fixture")
}
