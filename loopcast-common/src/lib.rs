//! # Loopcast Common Library
//!
//! Shared code for the loopcast workspace:
//! - Configuration file discovery and TOML bootstrap configuration
//! - Frame/millisecond timing conversions
//! - Human-readable duration formatting for log output
//! - Tracing subscriber initialization

pub mod config;
pub mod error;
pub mod human_time;
pub mod logging;
pub mod timing;

pub use error::{Error, Result};
