//! Loop synthesizer: executes a [`LoopPlan`] in memory or in chunks
//!
//! **Modes:**
//! - In memory: the whole combine sequence runs on one accumulator. Used
//!   whenever the plan needs no more occurrences than the chunk ceiling.
//! - Chunked: each distinct chunk shape is built once (in parallel when there
//!   are several), persisted to a [`ChunkStore`], then streamed through the
//!   [`Stitcher`] into the output sink. Peak memory follows the chunk
//!   ceiling, not the target duration.
//!
//! Both modes produce the same samples for any source at least two
//! crossfades long.

use crate::audio::buffer::{combine_frames, trim_frames, AudioBuffer};
use crate::audio::encoder::{max_wav_frames, FrameSink, WavSampleFormat};
use crate::error::{Error, Result};
use crate::synth::cancel::CancelToken;
use crate::synth::chunk_store::ChunkStore;
use crate::synth::plan::{build_steps, ChunkPlan, LoopPlan, Step};
use crate::synth::stitch::Stitcher;
use loopcast_common::config::CompiledDefaults;
use loopcast_common::human_time::format_duration_ms;
use loopcast_common::timing::{checked_ms_to_frames, frames_to_ms};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use tracing::{debug, error, info, warn};

/// Parameters of one synthesis run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesisConfig {
    pub crossfade_ms: u64,
    pub target_ms: u64,
    /// Accumulator size (in source occurrences) at which doubling starts
    pub doubling_threshold_units: u32,
    /// Chunk ceiling in source occurrences
    pub chunk_units: u32,
    /// Chunk build workers; 0 = available parallelism
    pub workers: usize,
    /// Root for the chunk directory; system temp dir when unset
    pub temp_dir: Option<PathBuf>,
}

impl SynthesisConfig {
    /// Config with compiled defaults for everything but the two durations
    ///
    /// # Errors
    /// `InvalidCrossfade` / `InvalidDuration` for negative values
    pub fn new(crossfade_ms: i64, target_ms: i64) -> Result<Self> {
        if crossfade_ms < 0 {
            return Err(Error::InvalidCrossfade(format!(
                "crossfade must not be negative ({}ms)",
                crossfade_ms
            )));
        }
        if target_ms < 0 {
            return Err(Error::InvalidDuration(format!(
                "target duration must not be negative ({}ms)",
                target_ms
            )));
        }

        let defaults = CompiledDefaults::get();
        Ok(Self {
            crossfade_ms: crossfade_ms as u64,
            target_ms: target_ms as u64,
            doubling_threshold_units: defaults.doubling_threshold_units,
            chunk_units: defaults.chunk_units,
            workers: defaults.workers,
            temp_dir: None,
        })
    }

    /// Whether a full chunk is large enough for the doubling step to run
    ///
    /// Doubling needs the accumulator at the threshold, so a chunk below
    /// twice the threshold is built by appends alone.
    pub fn doubles_within_chunks(&self) -> bool {
        self.chunk_units as u64 >= 2 * self.doubling_threshold_units as u64
    }
}

/// How a run was executed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    InMemory,
    Chunked,
}

/// Outcome of a synthesis run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SynthesisReport {
    pub mode: ExecutionMode,
    pub sample_rate: u32,
    pub channels: u16,
    /// Source occurrences in the untrimmed result
    pub occurrences: u64,
    pub doubles: u64,
    pub appends: u64,
    /// Distinct chunks persisted (chunked mode)
    pub chunks_built: u64,
    /// Chunk slots streamed into the output (chunked mode)
    pub slots_stitched: u64,
    pub built_frames: u64,
    pub output_frames: u64,
    pub output_ms: u64,
}

impl SynthesisReport {
    /// Total crossfade operations, stitch seams included
    pub fn combine_operations(&self) -> u64 {
        self.doubles + self.appends + self.slots_stitched.saturating_sub(1)
    }
}

/// Repeats a source clip to a target duration
#[derive(Debug, Clone)]
pub struct Synthesizer {
    config: SynthesisConfig,
    cancel: CancelToken,
}

impl Synthesizer {
    pub fn new(config: SynthesisConfig) -> Self {
        Self {
            config,
            cancel: CancelToken::new(),
        }
    }

    /// Use `token` to cancel this synthesizer's runs
    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn config(&self) -> &SynthesisConfig {
        &self.config
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Plan a loop of `source` without touching its samples
    ///
    /// # Errors
    /// `InvalidCrossfade` / `InvalidDuration` when a length has no frame
    /// count at the source rate, plus the [`LoopPlan::from_frames`] errors.
    pub fn plan(&self, source: &AudioBuffer) -> Result<LoopPlan> {
        let rate = source.sample_rate();
        let crossfade_frames =
            checked_ms_to_frames(self.config.crossfade_ms, rate).ok_or_else(|| {
                Error::InvalidCrossfade(format!(
                    "{}ms is too long at {} Hz",
                    self.config.crossfade_ms, rate
                ))
            })?;
        let target_frames = checked_ms_to_frames(self.config.target_ms, rate).ok_or_else(|| {
            Error::InvalidDuration(format!(
                "{}ms is too long at {} Hz",
                self.config.target_ms, rate
            ))
        })?;

        LoopPlan::from_frames(
            source.frames(),
            crossfade_frames,
            target_frames,
            rate,
            self.config.doubling_threshold_units,
        )
    }

    /// Build the whole result in memory
    ///
    /// Output length is exactly `min(target, built)`; when the source alone
    /// covers the target the result is a prefix of it with no combines.
    pub fn synthesize(&self, source: &AudioBuffer) -> Result<(AudioBuffer, SynthesisReport)> {
        let plan = self.plan(source)?;
        self.log_plan(&plan);

        let built = self.execute_steps(source, &plan.steps, plan.crossfade_frames)?;
        let result = trim_frames(&built, plan.target_frames);
        verify_length(&plan, result.frames())?;

        let report = SynthesisReport {
            mode: ExecutionMode::InMemory,
            sample_rate: source.sample_rate(),
            channels: source.channels(),
            occurrences: plan.occurrences,
            doubles: plan.doubles(),
            appends: plan.appends(),
            chunks_built: 0,
            slots_stitched: 0,
            built_frames: built.frames(),
            output_frames: result.frames(),
            output_ms: result.duration_ms(),
        };
        Ok((result, report))
    }

    /// Write the result to `sink`, chunking when the plan exceeds the ceiling
    ///
    /// The sink is finished on success.
    pub fn render(&self, source: &AudioBuffer, sink: &mut dyn FrameSink) -> Result<SynthesisReport> {
        let plan = self.plan(source)?;

        let Some(chunks) = ChunkPlan::new(&plan, self.config.chunk_units) else {
            let (result, report) = self.synthesize(source)?;
            sink.write_samples(result.samples())?;
            sink.finish()?;
            return Ok(report);
        };
        let chunks = fit_chunk_files(&plan, chunks, source.channels())?;

        self.log_plan(&plan);
        self.render_chunked(source, &plan, &chunks, sink)
    }

    fn render_chunked(
        &self,
        source: &AudioBuffer,
        plan: &LoopPlan,
        chunks: &ChunkPlan,
        sink: &mut dyn FrameSink,
    ) -> Result<SynthesisReport> {
        info!(
            "Chunked render: {} x {} occurrences + remainder {}",
            chunks.full_chunks, chunks.chunk_occurrences, chunks.remainder_occurrences
        );

        let store = ChunkStore::create(
            self.config.temp_dir.as_deref(),
            source.sample_rate(),
            source.channels(),
        )?;

        let (chunks_built, doubles, appends) = self.build_chunks(source, plan, chunks, &store)?;

        let slots = chunks.slots();
        let needed = (chunks.slots_below_target(plan.target_frames) + 1).min(slots.len());
        let output_frames = plan.output_frames();

        let mut stitcher =
            Stitcher::new(sink, source.channels(), plan.crossfade_frames, output_frames);
        for (idx, &occurrences) in slots.iter().take(needed).enumerate() {
            self.cancel.check()?;
            debug!(
                "Stitching slot {}/{} ({} occurrences)",
                idx + 1,
                needed,
                occurrences
            );
            stitcher.push_slot(store.read(occurrences)?)?;
        }
        let slots_stitched = stitcher.slots();
        let written = stitcher.finish()?;
        sink.finish()?;
        drop(store);

        verify_length(plan, written)?;

        info!(
            "Chunked render complete: {} slots, {}",
            slots_stitched,
            format_duration_ms(frames_to_ms(written, source.sample_rate()))
        );

        Ok(SynthesisReport {
            mode: ExecutionMode::Chunked,
            sample_rate: source.sample_rate(),
            channels: source.channels(),
            occurrences: plan.occurrences,
            doubles,
            appends,
            chunks_built,
            slots_stitched,
            built_frames: plan.built_frames(),
            output_frames: written,
            output_ms: frames_to_ms(written, source.sample_rate()),
        })
    }

    /// Build and persist every distinct chunk shape
    ///
    /// Returns (chunks built, doubles, appends) over all built chunks.
    fn build_chunks(
        &self,
        source: &AudioBuffer,
        plan: &LoopPlan,
        chunks: &ChunkPlan,
        store: &ChunkStore,
    ) -> Result<(u64, u64, u64)> {
        let jobs = chunks.distinct_chunks();
        let workers = self.worker_count(jobs.len());
        debug!("Building {} chunk(s) on {} worker(s)", jobs.len(), workers);

        let next_job = AtomicUsize::new(0);
        let stop_flag = AtomicBool::new(false);

        let outcomes: Vec<Result<()>> = thread::scope(|scope| {
            let handles: Vec<_> = (0..workers)
                .map(|worker_id| {
                    let jobs = &jobs;
                    let next_job = &next_job;
                    let stop_flag = &stop_flag;
                    scope.spawn(move || -> Result<()> {
                        loop {
                            if stop_flag.load(Ordering::SeqCst) {
                                return Ok(());
                            }
                            let idx = next_job.fetch_add(1, Ordering::SeqCst);
                            let Some(&occurrences) = jobs.get(idx) else {
                                return Ok(());
                            };

                            debug!("Worker {} building chunk of {} occurrences", worker_id, occurrences);
                            if let Err(e) = self.build_chunk(source, plan, occurrences, store) {
                                stop_flag.store(true, Ordering::SeqCst);
                                return Err(e);
                            }
                        }
                    })
                })
                .collect();

            handles
                .into_iter()
                .map(|handle| {
                    handle.join().unwrap_or_else(|_| {
                        Err(Error::ChunkStorage("chunk worker panicked".to_string()))
                    })
                })
                .collect()
        });

        for outcome in outcomes {
            outcome?;
        }

        let threshold = self.config.doubling_threshold_units as u64;
        let (doubles, appends) = jobs.iter().fold((0, 0), |(d, a), &occurrences| {
            let steps = build_steps(occurrences, threshold);
            let doubles = steps.iter().filter(|s| **s == Step::Double).count() as u64;
            (d + doubles, a + steps.len() as u64 - doubles)
        });
        Ok((jobs.len() as u64, doubles, appends))
    }

    fn build_chunk(
        &self,
        source: &AudioBuffer,
        plan: &LoopPlan,
        occurrences: u64,
        store: &ChunkStore,
    ) -> Result<()> {
        self.cancel.check()?;
        let steps = build_steps(occurrences, self.config.doubling_threshold_units as u64);
        let chunk = self.execute_steps(source, &steps, plan.crossfade_frames)?;
        store.persist(occurrences, &chunk)?;
        Ok(())
    }

    /// Run a combine sequence starting from one copy of `source`
    fn execute_steps(
        &self,
        source: &AudioBuffer,
        steps: &[Step],
        crossfade_frames: u64,
    ) -> Result<AudioBuffer> {
        let mut current = source.clone();
        let mut occurrences = 1u64;

        for (idx, step) in steps.iter().enumerate() {
            self.cancel.check()?;
            current = match step {
                Step::Append => {
                    occurrences += 1;
                    combine_frames(&current, source, crossfade_frames)?
                }
                Step::Double => {
                    occurrences *= 2;
                    combine_frames(&current, &current, crossfade_frames)?
                }
            };
            debug!(
                step = idx + 1,
                op = ?step,
                occurrences,
                "Combined: {}",
                format_duration_ms(current.duration_ms())
            );
        }
        Ok(current)
    }

    fn worker_count(&self, jobs: usize) -> usize {
        let limit = match self.config.workers {
            0 => thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            n => n,
        };
        limit.min(jobs).max(1)
    }

    fn log_plan(&self, plan: &LoopPlan) {
        info!(
            "Loop plan: source {}, crossfade {}, target {} -> {} occurrences ({} doubles, {} appends)",
            format_duration_ms(frames_to_ms(plan.source_frames, plan.sample_rate)),
            format_duration_ms(frames_to_ms(plan.crossfade_frames, plan.sample_rate)),
            format_duration_ms(frames_to_ms(plan.target_frames, plan.sample_rate)),
            plan.occurrences,
            plan.doubles(),
            plan.appends()
        );
    }
}

/// Lower the chunk ceiling until one chunk fits in a chunk file
fn fit_chunk_files(plan: &LoopPlan, chunks: ChunkPlan, channels: u16) -> Result<ChunkPlan> {
    let max_frames = max_wav_frames(channels, WavSampleFormat::Float32);
    if chunks.chunk_frames(chunks.chunk_occurrences) <= max_frames {
        return Ok(chunks);
    }

    let fitting = plan.max_occurrences_within(max_frames);
    if fitting == 0 {
        return Err(Error::ChunkStorage(format!(
            "source of {} frames is too long for a chunk file",
            plan.source_frames
        )));
    }
    warn!(
        "Chunk ceiling lowered from {} to {} occurrences to fit chunk files",
        chunks.chunk_occurrences, fitting
    );
    // fitting < chunk_occurrences < occurrences, so the plan stays chunked
    Ok(ChunkPlan::new(plan, fitting as u32).unwrap_or(chunks))
}

/// Fail unless `actual_frames == min(target, built)`
fn verify_length(plan: &LoopPlan, actual_frames: u64) -> Result<()> {
    let expected_frames = plan.output_frames();
    if actual_frames != expected_frames {
        error!(
            "Output length {} frames does not match expected {} frames",
            actual_frames, expected_frames
        );
        return Err(Error::UnreachableTarget {
            expected_frames,
            actual_frames,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::encoder::MemorySink;

    /// Mono buffer at 1 kHz so frames equal milliseconds
    fn tone(frames: usize) -> AudioBuffer {
        let samples = (0..frames).map(|i| ((i % 97) as f32 / 97.0) - 0.5).collect();
        AudioBuffer::new(samples, 1000, 1, 16).unwrap()
    }

    fn config(crossfade_ms: i64, target_ms: i64, chunk_units: u32) -> SynthesisConfig {
        SynthesisConfig {
            chunk_units,
            ..SynthesisConfig::new(crossfade_ms, target_ms).unwrap()
        }
    }

    #[test]
    fn test_config_rejects_negative() {
        assert!(matches!(SynthesisConfig::new(-1, 10), Err(Error::InvalidCrossfade(_))));
        assert!(matches!(SynthesisConfig::new(10, -1), Err(Error::InvalidDuration(_))));
    }

    #[test]
    fn test_plan_rejects_overflowing_lengths() {
        let source = tone(200);
        let huge_target = Synthesizer::new(SynthesisConfig::new(100, i64::MAX).unwrap());
        assert!(matches!(huge_target.plan(&source), Err(Error::InvalidDuration(_))));

        let huge_crossfade = Synthesizer::new(SynthesisConfig::new(i64::MAX, 1_000).unwrap());
        assert!(matches!(huge_crossfade.plan(&source), Err(Error::InvalidCrossfade(_))));
    }

    #[test]
    fn test_default_chunks_leave_room_for_doubling() {
        let defaults = SynthesisConfig::new(0, 0).unwrap();
        assert!(defaults.doubles_within_chunks());
        let cramped = SynthesisConfig {
            chunk_units: 19,
            doubling_threshold_units: 10,
            ..defaults
        };
        assert!(!cramped.doubles_within_chunks());
    }

    #[test]
    fn test_chunk_ceiling_lowered_to_fit_chunk_files() {
        // 100M-frame source: 20 occurrences of stereo float are far past 4 GiB
        let plan = LoopPlan::from_frames(100_000_000, 0, 10_000_000_000, 48_000, 10).unwrap();
        let chunks = ChunkPlan::new(&plan, 20).unwrap();
        let fitted = fit_chunk_files(&plan, chunks, 2).unwrap();
        assert_eq!(fitted.chunk_occurrences, 5);
        assert!(fitted.chunk_frames(5) <= max_wav_frames(2, WavSampleFormat::Float32));
        assert_eq!(
            fitted.full_chunks * 5 + fitted.remainder_occurrences,
            plan.occurrences
        );

        let small = LoopPlan::from_frames(1_000, 0, 100_000, 48_000, 10).unwrap();
        let untouched = ChunkPlan::new(&small, 20).unwrap();
        assert_eq!(fit_chunk_files(&small, untouched.clone(), 2).unwrap(), untouched);
    }

    #[test]
    fn test_source_too_long_for_chunk_file() {
        let plan = LoopPlan::from_frames(600_000_000, 0, 10_000_000_000, 48_000, 10).unwrap();
        let chunks = ChunkPlan::new(&plan, 2).unwrap();
        assert!(matches!(fit_chunk_files(&plan, chunks, 2), Err(Error::ChunkStorage(_))));
    }

    #[test]
    fn test_synthesize_exact_duration() {
        let synth = Synthesizer::new(config(30, 2_345, 100));
        let (result, report) = synth.synthesize(&tone(200)).unwrap();
        assert_eq!(result.duration_ms(), 2_345);
        assert_eq!(report.mode, ExecutionMode::InMemory);
        assert_eq!(report.output_frames, 2_345);
        // ceil((2345 - 30) / 170) = 14
        assert_eq!(report.occurrences, 14);
    }

    #[test]
    fn test_short_target_is_trim() {
        let source = tone(200);
        let synth = Synthesizer::new(config(30, 150, 10));
        let (result, report) = synth.synthesize(&source).unwrap();
        assert_eq!(result.samples(), &source.samples()[..150]);
        assert_eq!(report.combine_operations(), 0);
    }

    #[test]
    fn test_render_small_plan_stays_in_memory() {
        let source = tone(200);
        let synth = Synthesizer::new(config(30, 900, 10));
        let mut sink = MemorySink::new(1);
        let report = synth.render(&source, &mut sink).unwrap();
        assert_eq!(report.mode, ExecutionMode::InMemory);
        assert_eq!(sink.frames_written(), 900);
    }

    #[test]
    fn test_render_chunked_matches_in_memory() {
        let source = tone(200);
        let in_memory = Synthesizer::new(config(30, 9_999, 1_000))
            .synthesize(&source)
            .unwrap()
            .0;

        let synth = Synthesizer::new(config(30, 9_999, 4));
        let mut sink = MemorySink::new(1);
        let report = synth.render(&source, &mut sink).unwrap();

        assert_eq!(report.mode, ExecutionMode::Chunked);
        assert_eq!(report.output_frames, 9_999);
        assert_eq!(report.chunks_built, 2);
        assert_eq!(sink.samples(), in_memory.samples());
    }

    #[test]
    fn test_cancelled_before_start() {
        let token = CancelToken::new();
        token.cancel();
        let synth = Synthesizer::new(config(30, 9_999, 4)).with_cancel_token(token);
        let mut sink = MemorySink::new(1);
        assert!(matches!(synth.render(&tone(200), &mut sink), Err(Error::Cancelled)));
        assert!(matches!(synth.synthesize(&tone(200)), Err(Error::Cancelled)));
    }

    #[test]
    fn test_worker_count_bounds() {
        let mut cfg = config(30, 1_000, 4);
        cfg.workers = 3;
        let synth = Synthesizer::new(cfg);
        assert_eq!(synth.worker_count(2), 2);
        assert_eq!(synth.worker_count(8), 3);
        assert_eq!(synth.worker_count(0), 1);
    }

    #[test]
    fn test_verify_length_flags_mismatch() {
        let plan = LoopPlan::from_frames(100, 10, 500, 1000, 10).unwrap();
        assert!(verify_length(&plan, 500).is_ok());
        assert!(matches!(
            verify_length(&plan, 499),
            Err(Error::UnreachableTarget {
                expected_frames: 500,
                actual_frames: 499
            })
        ));
    }
}
