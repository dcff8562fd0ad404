//! Shared fixtures for loopcast integration tests

#![allow(dead_code)]

pub mod audio_generator;

pub use audio_generator::{generate_sine_wav, generate_silent_wav, sine_buffer};
