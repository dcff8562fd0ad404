//! Streaming crossfade stitch of persisted chunks
//!
//! The stitcher keeps only the last `crossfade` frames of everything it has
//! seen. When a new slot arrives its first `crossfade` frames are mixed into
//! that held tail with [`crossfade_mix`], exactly as an in-memory combine
//! would; everything older than the held tail goes straight to the sink.
//! Memory use is one crossfade plus one read block, whatever the output length.

use crate::audio::buffer::crossfade_mix;
use crate::audio::encoder::FrameSink;
use crate::error::{Error, Result};
use std::collections::VecDeque;

/// Frames read from a slot per block
const BLOCK_FRAMES: usize = 16_384;

/// Joins a sequence of slots into a frame-capped sink
pub struct Stitcher<'a> {
    sink: &'a mut dyn FrameSink,
    channels: usize,
    crossfade_samples: usize,
    limit_frames: u64,
    emitted_frames: u64,
    held: VecDeque<f32>,
    slots: u64,
    scratch: Vec<f32>,
}

impl<'a> Stitcher<'a> {
    /// `limit_frames` caps the output; frames past it are dropped
    pub fn new(
        sink: &'a mut dyn FrameSink,
        channels: u16,
        crossfade_frames: u64,
        limit_frames: u64,
    ) -> Self {
        let channels = channels as usize;
        let crossfade_samples = crossfade_frames as usize * channels;
        Self {
            sink,
            channels,
            crossfade_samples,
            limit_frames,
            emitted_frames: 0,
            held: VecDeque::with_capacity(crossfade_samples + BLOCK_FRAMES * channels),
            slots: 0,
            scratch: Vec::with_capacity(BLOCK_FRAMES * channels),
        }
    }

    /// True once the sink holds `limit_frames` frames
    pub fn is_full(&self) -> bool {
        self.emitted_frames >= self.limit_frames
    }

    /// Slots pushed so far
    pub fn slots(&self) -> u64 {
        self.slots
    }

    /// Append one slot, crossfading it onto the previous one
    ///
    /// Every slot must be longer than the crossfade.
    pub fn push_slot<I>(&mut self, samples: I) -> Result<()>
    where
        I: IntoIterator<Item = Result<f32>>,
    {
        let mut samples = samples.into_iter();

        if self.slots > 0 && self.crossfade_samples > 0 {
            let head = samples
                .by_ref()
                .take(self.crossfade_samples)
                .collect::<Result<Vec<f32>>>()?;
            if head.len() != self.crossfade_samples || self.held.len() != self.crossfade_samples {
                return Err(Error::ChunkStorage(format!(
                    "slot {} is shorter than the crossfade",
                    self.slots
                )));
            }

            let tail: Vec<f32> = self.held.drain(..).collect();
            let mut mixed = Vec::with_capacity(head.len());
            crossfade_mix(&tail, &head, self.channels, &mut mixed);
            self.held.extend(mixed);
        }

        loop {
            let block = samples
                .by_ref()
                .take(BLOCK_FRAMES * self.channels)
                .collect::<Result<Vec<f32>>>()?;
            if block.is_empty() {
                break;
            }
            self.held.extend(block);
            self.release(self.crossfade_samples)?;
            if self.is_full() {
                break;
            }
        }

        self.slots += 1;
        Ok(())
    }

    /// Flush the held tail and return the frames written
    pub fn finish(mut self) -> Result<u64> {
        self.release(0)?;
        Ok(self.emitted_frames)
    }

    /// Emit held samples until at most `keep` remain
    fn release(&mut self, keep: usize) -> Result<()> {
        let excess = self.held.len().saturating_sub(keep);
        if excess == 0 {
            return Ok(());
        }

        let remaining_frames = self.limit_frames.saturating_sub(self.emitted_frames);
        let writable = excess.min((remaining_frames as usize).saturating_mul(self.channels));

        self.scratch.clear();
        self.scratch.extend(self.held.drain(..excess).take(writable));
        if !self.scratch.is_empty() {
            self.sink.write_samples(&self.scratch)?;
            self.emitted_frames += (self.scratch.len() / self.channels) as u64;
        }
        Ok(())
    }
}
