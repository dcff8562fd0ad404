//! loopcast: duration-targeted audio loops
//!
//! Repeats a source clip with linear crossfades until it reaches an exact
//! target duration, then encodes it and optionally pairs it with a still
//! image as a video.
//!
//! **Architecture:**
//! - `audio`: immutable buffers, the combine/trim primitives, decode and encode
//! - `synth`: loop planning and execution, in memory or through persisted chunks
//! - `mux`: still-image video via ffmpeg
//! - `pipeline`: the end-to-end run with timeouts and cancellation
//! - `config`: CLI, environment, TOML and compiled defaults merged per run

pub mod audio;
pub mod config;
pub mod error;
pub mod mux;
pub mod pipeline;
pub mod process;
pub mod synth;

pub use error::{Error, Result};
