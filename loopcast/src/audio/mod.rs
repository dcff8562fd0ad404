//! Audio buffers, decoding and encoding

pub mod buffer;
pub mod decoder;
pub mod encoder;

pub use buffer::{combine, combine_frames, crossfade_mix, trim, trim_frames, AudioBuffer};
pub use decoder::SourceDecoder;
pub use encoder::{EncodeSettings, FrameSink, OutputFormat};
