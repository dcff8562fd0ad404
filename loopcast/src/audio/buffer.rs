//! Immutable decoded audio and the two primitives loop synthesis is built on
//!
//! **Format:**
//! - Samples are f32 (floating point -1.0 to 1.0)
//! - Interleaved by channel: [L, R, L, R, ...] for stereo
//! - One frame = one sample per channel
//!
//! Buffers are never mutated after construction. Sample data sits behind an
//! `Arc` so cloning a buffer, or combining a buffer with itself, does not copy
//! its inputs.

use crate::error::{Error, Result};
use loopcast_common::timing::{frames_to_ms, ms_to_frames};
use std::sync::Arc;

/// Decoded PCM audio with a sample-accurate length
#[derive(Debug, Clone)]
pub struct AudioBuffer {
    /// Interleaved samples
    samples: Arc<[f32]>,

    /// Frames per second
    sample_rate: u32,

    /// Channel count (1 = mono, 2 = stereo, ...)
    channels: u16,

    /// Bit depth of the source material, kept for output encoding decisions
    bit_depth: u16,
}

impl AudioBuffer {
    /// Create a buffer from interleaved samples
    ///
    /// # Errors
    /// `IncompatibleFormat` when the sample rate or channel count is zero, or
    /// the sample count is not a whole number of frames.
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: u16, bit_depth: u16) -> Result<Self> {
        if sample_rate == 0 {
            return Err(Error::IncompatibleFormat("sample rate must be > 0".to_string()));
        }
        if channels == 0 {
            return Err(Error::IncompatibleFormat("channel count must be > 0".to_string()));
        }
        if samples.len() % channels as usize != 0 {
            return Err(Error::IncompatibleFormat(format!(
                "{} samples is not a whole number of {}-channel frames",
                samples.len(),
                channels
            )));
        }

        Ok(Self {
            samples: samples.into(),
            sample_rate,
            channels,
            bit_depth,
        })
    }

    /// Interleaved sample data
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn bit_depth(&self) -> u16 {
        self.bit_depth
    }

    /// Number of frames (exact length)
    pub fn frames(&self) -> u64 {
        (self.samples.len() / self.channels as usize) as u64
    }

    /// Duration in milliseconds, rounded to the nearest millisecond
    pub fn duration_ms(&self) -> u64 {
        frames_to_ms(self.frames(), self.sample_rate)
    }

    /// Convert a millisecond length to frames at this buffer's rate
    pub fn ms_to_frames(&self, ms: u64) -> u64 {
        ms_to_frames(ms, self.sample_rate)
    }

    /// Samples of one frame
    pub fn frame(&self, index: u64) -> Option<&[f32]> {
        let ch = self.channels as usize;
        let start = index as usize * ch;
        self.samples.get(start..start + ch)
    }

    /// True when both buffers share the same sample storage
    pub fn shares_samples_with(&self, other: &AudioBuffer) -> bool {
        Arc::ptr_eq(&self.samples, &other.samples)
    }

    /// Fail unless `other` can be mixed with this buffer
    pub fn check_compatible(&self, other: &AudioBuffer) -> Result<()> {
        if self.sample_rate != other.sample_rate || self.channels != other.channels {
            return Err(Error::IncompatibleFormat(format!(
                "{} Hz/{} ch vs {} Hz/{} ch",
                self.sample_rate, self.channels, other.sample_rate, other.channels
            )));
        }
        Ok(())
    }
}

impl PartialEq for AudioBuffer {
    fn eq(&self, other: &Self) -> bool {
        self.sample_rate == other.sample_rate
            && self.channels == other.channels
            && self.samples[..] == other.samples[..]
    }
}

/// Mix a fading-out tail with a fading-in head
///
/// `tail` and `head` hold the same number of interleaved frames. At frame `i`
/// of `n` the output is `tail * (1 - i/n) + head * (i/n)`.
///
/// This is the single mixing law for every seam: in-memory combines and
/// streamed chunk stitching both go through here.
pub fn crossfade_mix(tail: &[f32], head: &[f32], channels: usize, out: &mut Vec<f32>) {
    debug_assert_eq!(tail.len(), head.len());
    let frames = tail.len() / channels;
    out.reserve(tail.len());

    for frame_idx in 0..frames {
        let fade_in = frame_idx as f32 / frames as f32;
        let fade_out = 1.0 - fade_in;
        let base = frame_idx * channels;
        for ch in 0..channels {
            out.push(tail[base + ch] * fade_out + head[base + ch] * fade_in);
        }
    }
}

/// Overlap `b` onto the end of `a` with a linear crossfade of `crossfade_ms`
///
/// The result is `a` unchanged up to the overlap, the crossfaded overlap, then
/// the rest of `b` unchanged. Its length is `dA + dB - crossfade`.
///
/// # Errors
/// - `InvalidCrossfade`: negative, or longer than either input
/// - `IncompatibleFormat`: sample rate or channel count differ
pub fn combine(a: &AudioBuffer, b: &AudioBuffer, crossfade_ms: i64) -> Result<AudioBuffer> {
    a.check_compatible(b)?;
    if crossfade_ms < 0 {
        return Err(Error::InvalidCrossfade(format!(
            "crossfade must not be negative ({}ms)",
            crossfade_ms
        )));
    }
    let crossfade_ms = crossfade_ms as u64;
    let shortest_ms = a.duration_ms().min(b.duration_ms());
    if crossfade_ms > shortest_ms {
        return Err(Error::InvalidCrossfade(format!(
            "crossfade {}ms exceeds input duration {}ms",
            crossfade_ms, shortest_ms
        )));
    }

    // Millisecond rounding can land a few frames past the shorter input
    let crossfade_frames = a
        .ms_to_frames(crossfade_ms)
        .min(a.frames())
        .min(b.frames());
    combine_frames(a, b, crossfade_frames)
}

/// Frame-exact form of [`combine`]
///
/// Output has exactly `frames(a) + frames(b) - crossfade_frames` frames.
pub fn combine_frames(a: &AudioBuffer, b: &AudioBuffer, crossfade_frames: u64) -> Result<AudioBuffer> {
    a.check_compatible(b)?;
    if crossfade_frames > a.frames() || crossfade_frames > b.frames() {
        return Err(Error::InvalidCrossfade(format!(
            "crossfade of {} frames exceeds input length ({} / {} frames)",
            crossfade_frames,
            a.frames(),
            b.frames()
        )));
    }

    let ch = a.channels as usize;
    let overlap = crossfade_frames as usize * ch;
    let a_body = a.samples.len() - overlap;

    let mut out = Vec::with_capacity(a.samples.len() + b.samples.len() - overlap);
    out.extend_from_slice(&a.samples[..a_body]);
    crossfade_mix(&a.samples[a_body..], &b.samples[..overlap], ch, &mut out);
    out.extend_from_slice(&b.samples[overlap..]);

    Ok(AudioBuffer {
        samples: out.into(),
        sample_rate: a.sample_rate,
        channels: a.channels,
        bit_depth: a.bit_depth,
    })
}

/// Prefix of `a` no longer than `max_ms`
///
/// Returns `a` itself (shared samples) when it already fits.
///
/// # Errors
/// `InvalidDuration` when `max_ms` is negative
pub fn trim(a: &AudioBuffer, max_ms: i64) -> Result<AudioBuffer> {
    if max_ms < 0 {
        return Err(Error::InvalidDuration(format!(
            "trim length must not be negative ({}ms)",
            max_ms
        )));
    }
    Ok(trim_frames(a, a.ms_to_frames(max_ms as u64)))
}

/// Frame-exact form of [`trim`]
pub fn trim_frames(a: &AudioBuffer, max_frames: u64) -> AudioBuffer {
    if a.frames() <= max_frames {
        return a.clone();
    }
    let end = max_frames as usize * a.channels as usize;
    AudioBuffer {
        samples: a.samples[..end].into(),
        sample_rate: a.sample_rate,
        channels: a.channels,
        bit_depth: a.bit_depth,
    }
}
