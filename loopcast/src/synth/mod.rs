//! Duration-targeted loop synthesis
//!
//! A [`plan`] decides how many source occurrences are needed and the order of
//! doubling and appending combines; the [`synthesizer`] executes it in memory
//! or through persisted chunks and the streaming [`stitch`].

pub mod cancel;
pub mod chunk_store;
pub mod plan;
pub mod stitch;
pub mod synthesizer;

pub use cancel::CancelToken;
pub use plan::{ChunkPlan, LoopPlan, Step};
pub use synthesizer::{ExecutionMode, SynthesisConfig, SynthesisReport, Synthesizer};

use crate::audio::buffer::AudioBuffer;
use crate::error::Result;

/// Repeat `source` with `crossfade_ms` crossfades to exactly `target_ms`
///
/// In-memory shorthand for [`Synthesizer::synthesize`] with default
/// doubling threshold.
pub fn synthesize(source: &AudioBuffer, crossfade_ms: i64, target_ms: i64) -> Result<AudioBuffer> {
    let config = SynthesisConfig::new(crossfade_ms, target_ms)?;
    let (result, _report) = Synthesizer::new(config).synthesize(source)?;
    Ok(result)
}
