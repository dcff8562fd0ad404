//! Loop planning: how many source occurrences, and in which combine order
//!
//! A plan is pure arithmetic over frame counts; it never touches audio.
//!
//! # Occurrence arithmetic
//!
//! `n` occurrences of a source of `d0` frames, joined with `c`-frame
//! crossfades, last `n * (d0 - c) + c` frames. Combining an `a`-occurrence
//! buffer with a `b`-occurrence buffer yields `a + b` occurrences, so both
//! appending the source (`n + 1`) and doubling (`2n`) stay on whole
//! occurrences and every seam is a source-tail/source-head crossfade.
//!
//! # Step order
//!
//! Steps are derived MSB-first from the binary form of the occurrence count
//! `N`: linear appends build the leading bits until the accumulator reaches
//! the doubling threshold, then each remaining bit costs one double plus one
//! append when the bit is set. The accumulator never overshoots `N`, so at
//! most one `d0 - c` worth of audio is trimmed away at the end.

use crate::error::{Error, Result};
use loopcast_common::timing::frames_to_ms;
use serde::Serialize;

/// One combine operation on the accumulator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Step {
    /// `current = combine(current, source)`
    Append,
    /// `current = combine(current, current)`
    Double,
}

/// Frames of `occurrences` crossfaded copies of a `source_frames` clip
pub fn occurrence_frames(occurrences: u64, source_frames: u64, crossfade_frames: u64) -> u64 {
    if occurrences == 0 {
        return 0;
    }
    occurrences * (source_frames - crossfade_frames) + crossfade_frames
}

/// Smallest occurrence count whose length reaches `target_frames`
///
/// Requires `crossfade_frames < source_frames`.
pub fn occurrences_needed(source_frames: u64, crossfade_frames: u64, target_frames: u64) -> u64 {
    if target_frames <= source_frames {
        return 1;
    }
    let unit_gain = source_frames - crossfade_frames;
    (target_frames - crossfade_frames).div_ceil(unit_gain)
}

/// Combine steps that take one occurrence to exactly `occurrences`
///
/// Doubling starts once the accumulator holds at least `doubling_threshold`
/// occurrences.
pub fn build_steps(occurrences: u64, doubling_threshold: u64) -> Vec<Step> {
    if occurrences <= 1 {
        return Vec::new();
    }
    let threshold = doubling_threshold.max(1);

    // Low bits handled by doubling: as many as keep the linear prefix >= threshold
    let mut shift = 0u32;
    while shift < 63 && (occurrences >> (shift + 1)) >= threshold {
        shift += 1;
    }
    let prefix = occurrences >> shift;

    let mut steps = Vec::with_capacity((prefix - 1) as usize + 2 * shift as usize);
    steps.extend(std::iter::repeat(Step::Append).take((prefix - 1) as usize));
    for bit in (0..shift).rev() {
        steps.push(Step::Double);
        if (occurrences >> bit) & 1 == 1 {
            steps.push(Step::Append);
        }
    }
    steps
}

/// How to reach a target duration from one source clip
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoopPlan {
    pub source_frames: u64,
    pub crossfade_frames: u64,
    pub target_frames: u64,
    pub sample_rate: u32,
    /// Source occurrences in the untrimmed result
    pub occurrences: u64,
    /// In-memory combine sequence for `occurrences`
    pub steps: Vec<Step>,
}

impl LoopPlan {
    /// Plan a loop in frame units
    ///
    /// # Errors
    /// - `EmptySource`: the source has no frames
    /// - `DegenerateLoop`: the crossfade is not shorter than the source
    /// - `InvalidDuration`: the untrimmed result would overflow a frame count
    pub fn from_frames(
        source_frames: u64,
        crossfade_frames: u64,
        target_frames: u64,
        sample_rate: u32,
        doubling_threshold: u32,
    ) -> Result<Self> {
        if source_frames == 0 {
            return Err(Error::EmptySource);
        }
        if crossfade_frames >= source_frames {
            return Err(Error::DegenerateLoop {
                crossfade_ms: frames_to_ms(crossfade_frames, sample_rate),
                source_ms: frames_to_ms(source_frames, sample_rate),
            });
        }

        // The untrimmed result is shorter than target + one source length
        if target_frames.checked_add(source_frames).is_none() {
            return Err(Error::InvalidDuration(format!(
                "target of {} frames is too long",
                target_frames
            )));
        }

        let occurrences = occurrences_needed(source_frames, crossfade_frames, target_frames);
        let steps = build_steps(occurrences, doubling_threshold as u64);

        Ok(Self {
            source_frames,
            crossfade_frames,
            target_frames,
            sample_rate,
            occurrences,
            steps,
        })
    }

    /// Net frames each occurrence past the first contributes
    pub fn unit_gain(&self) -> u64 {
        self.source_frames - self.crossfade_frames
    }

    /// Frames of the untrimmed result
    pub fn built_frames(&self) -> u64 {
        occurrence_frames(self.occurrences, self.source_frames, self.crossfade_frames)
    }

    /// Frames after trimming: `min(target, built)`
    pub fn output_frames(&self) -> u64 {
        self.target_frames.min(self.built_frames())
    }

    /// True when the source alone covers the target
    pub fn is_trim_only(&self) -> bool {
        self.target_frames <= self.source_frames
    }

    pub fn doubles(&self) -> u64 {
        self.steps.iter().filter(|s| **s == Step::Double).count() as u64
    }

    pub fn appends(&self) -> u64 {
        self.steps.iter().filter(|s| **s == Step::Append).count() as u64
    }

    pub fn combine_count(&self) -> u64 {
        self.steps.len() as u64
    }

    /// Most occurrences whose joined length fits in `max_frames`
    ///
    /// 0 when not even one copy of the source fits.
    pub fn max_occurrences_within(&self, max_frames: u64) -> u64 {
        if self.source_frames > max_frames {
            return 0;
        }
        (max_frames - self.crossfade_frames) / self.unit_gain()
    }
}

/// Split of a plan into persisted chunks for bounded-memory rendering
///
/// `occurrences = full_chunks * chunk_occurrences + remainder_occurrences`.
/// Stitching the slots in order with the same crossfade reproduces the
/// in-memory result; the remainder slot closes the gap left by the full
/// chunks so the output always reaches the target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChunkPlan {
    /// Occurrences per full chunk (the chunk ceiling)
    pub chunk_occurrences: u64,
    pub full_chunks: u64,
    /// Occurrences in the final partial chunk (0 = none)
    pub remainder_occurrences: u64,
    pub source_frames: u64,
    pub crossfade_frames: u64,
}

impl ChunkPlan {
    /// Chunk a plan with a ceiling of `chunk_units` occurrences per chunk
    ///
    /// `None` when the whole result fits under one ceiling and should be
    /// built in memory.
    pub fn new(plan: &LoopPlan, chunk_units: u32) -> Option<Self> {
        let chunk_occurrences = (chunk_units as u64).max(1);
        if plan.occurrences <= chunk_occurrences {
            return None;
        }

        Some(Self {
            chunk_occurrences,
            full_chunks: plan.occurrences / chunk_occurrences,
            remainder_occurrences: plan.occurrences % chunk_occurrences,
            source_frames: plan.source_frames,
            crossfade_frames: plan.crossfade_frames,
        })
    }

    /// Occurrence count of each slot, in stitch order
    pub fn slots(&self) -> Vec<u64> {
        let mut slots = vec![self.chunk_occurrences; self.full_chunks as usize];
        if self.remainder_occurrences > 0 {
            slots.push(self.remainder_occurrences);
        }
        slots
    }

    /// Distinct chunk shapes to build; each is built once and reused by
    /// every slot of that shape
    pub fn distinct_chunks(&self) -> Vec<u64> {
        let mut chunks = vec![self.chunk_occurrences];
        if self.remainder_occurrences > 0 {
            chunks.push(self.remainder_occurrences);
        }
        chunks
    }

    /// Frames of a chunk holding `occurrences` occurrences
    pub fn chunk_frames(&self, occurrences: u64) -> u64 {
        occurrence_frames(occurrences, self.source_frames, self.crossfade_frames)
    }

    /// Frames of all slots stitched together
    pub fn stitched_frames(&self) -> u64 {
        let slots = self.slots();
        let total: u64 = slots.iter().map(|&occ| self.chunk_frames(occ)).sum();
        total - (slots.len() as u64 - 1) * self.crossfade_frames
    }

    /// Slots whose cumulative effective length stays below `target_frames`
    ///
    /// Each slot after the first contributes `chunk_frames - crossfade`.
    /// Every selected slot is needed; the slot after them crosses the target.
    pub fn slots_below_target(&self, target_frames: u64) -> usize {
        let mut cumulative = 0u64;
        let mut selected = 0usize;
        for (idx, occ) in self.slots().into_iter().enumerate() {
            let effective = if idx == 0 {
                self.chunk_frames(occ)
            } else {
                self.chunk_frames(occ) - self.crossfade_frames
            };
            if cumulative + effective >= target_frames {
                break;
            }
            cumulative += effective;
            selected += 1;
        }
        selected
    }
}
