//! Source decoding using symphonia
//!
//! Decodes MP3, FLAC, WAV, Vorbis, AAC/M4A and Matroska audio to interleaved
//! f32 PCM, keeping the source channel layout and sample rate.

use crate::audio::buffer::AudioBuffer;
use crate::error::{Error, Result};
use std::path::Path;
use symphonia::core::audio::{AudioBuffer as SymphoniaBuffer, AudioBufferRef, Signal};
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::conv::IntoSample;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::sample::Sample;
use tracing::{debug, info, warn};

/// Whole-file decoder for the loop source
pub struct SourceDecoder;

impl SourceDecoder {
    /// Decode an entire file into an [`AudioBuffer`]
    ///
    /// `format_hint` names the container (e.g. `"mkv"`, `"mp3"`); without it
    /// the file extension is used as the hint and the content is probed.
    ///
    /// # Errors
    /// `SourceUnreadable` when the file is missing, zero bytes long, of an
    /// unsupported format, or has no audio track.
    pub fn decode_file(path: &Path, format_hint: Option<&str>) -> Result<AudioBuffer> {
        let unreadable = |reason: String| Error::SourceUnreadable {
            path: path.to_path_buf(),
            reason,
        };

        let metadata = std::fs::metadata(path).map_err(|e| unreadable(e.to_string()))?;
        if !metadata.is_file() {
            return Err(unreadable("not a regular file".to_string()));
        }
        if metadata.len() == 0 {
            return Err(unreadable("file is empty".to_string()));
        }

        info!("Loading audio file: {}", path.display());

        let file = std::fs::File::open(path).map_err(|e| unreadable(e.to_string()))?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        match format_hint {
            Some(format) => {
                hint.with_extension(format);
            }
            None => {
                if let Some(ext_str) = path.extension().and_then(|e| e.to_str()) {
                    hint.with_extension(ext_str);
                }
            }
        }

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .map_err(|e| unreadable(format!("unrecognized format: {}", e)))?;

        let mut format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| unreadable("no audio track found".to_string()))?;

        let track_id = track.id;
        let codec_params = track.codec_params.clone();

        let sample_rate = codec_params
            .sample_rate
            .ok_or_else(|| unreadable("sample rate not found".to_string()))?;
        let bit_depth = codec_params.bits_per_sample.unwrap_or(16) as u16;

        let mut decoder = symphonia::default::get_codecs()
            .make(&codec_params, &DecoderOptions::default())
            .map_err(|e| unreadable(format!("failed to create decoder: {}", e)))?;

        let mut samples = Vec::new();
        let mut channels = codec_params.channels.map(|c| c.count() as u16);

        loop {
            let packet = match format.next_packet() {
                Ok(packet) => packet,
                Err(e) if is_end_of_stream(&e) => {
                    debug!("Reached end of file");
                    break;
                }
                // Includes ResetRequired: a truncated source must not loop silently
                Err(e) => return Err(unreadable(format!("failed to read packet: {}", e))),
            };

            if packet.track_id() != track_id {
                continue;
            }

            match decoder.decode(&packet) {
                Ok(decoded) => {
                    // Some containers only announce the layout in the first frame
                    let decoded_channels = decoded.spec().channels.count() as u16;
                    match channels {
                        None => channels = Some(decoded_channels),
                        Some(expected) if expected != decoded_channels => {
                            return Err(unreadable(format!(
                                "channel count changed mid-stream ({} -> {})",
                                expected, decoded_channels
                            )));
                        }
                        Some(_) => {}
                    }
                    Self::convert_samples_to_f32(&decoded, &mut samples);
                }
                Err(SymphoniaError::DecodeError(e)) => {
                    warn!("Skipping undecodable packet: {}", e);
                    continue;
                }
                Err(e) => return Err(unreadable(format!("decode failed: {}", e))),
            }
        }

        let channels =
            channels.ok_or_else(|| unreadable("channel layout not found".to_string()))?;

        debug!(
            "Decoded {} frames at {} Hz, {} channels",
            samples.len() / channels as usize,
            sample_rate,
            channels
        );

        AudioBuffer::new(samples, sample_rate, channels, bit_depth)
    }

    /// Append a decoded packet to `output` as interleaved f32
    fn convert_samples_to_f32(decoded: &AudioBufferRef, output: &mut Vec<f32>) {
        match decoded {
            AudioBufferRef::F32(buf) => Self::interleave_planar(&**buf, output),
            AudioBufferRef::F64(buf) => Self::interleave_planar(&**buf, output),
            AudioBufferRef::S32(buf) => Self::interleave_planar(&**buf, output),
            AudioBufferRef::S24(buf) => Self::interleave_planar(&**buf, output),
            AudioBufferRef::S16(buf) => Self::interleave_planar(&**buf, output),
            AudioBufferRef::S8(buf) => Self::interleave_planar(&**buf, output),
            AudioBufferRef::U32(buf) => Self::interleave_planar(&**buf, output),
            AudioBufferRef::U24(buf) => Self::interleave_planar(&**buf, output),
            AudioBufferRef::U16(buf) => Self::interleave_planar(&**buf, output),
            AudioBufferRef::U8(buf) => Self::interleave_planar(&**buf, output),
        }
    }

    /// Interleave planar samples, normalizing to [-1.0, 1.0]
    fn interleave_planar<S>(buf: &SymphoniaBuffer<S>, output: &mut Vec<f32>)
    where
        S: Sample + IntoSample<f32>,
    {
        let num_channels = buf.spec().channels.count();
        let num_frames = buf.frames();
        output.reserve(num_frames * num_channels);

        for frame_idx in 0..num_frames {
            for ch_idx in 0..num_channels {
                output.push(buf.chan(ch_idx)[frame_idx].into_sample());
            }
        }
    }
}

/// Whether a packet read error is the normal end of the stream
fn is_end_of_stream(err: &SymphoniaError) -> bool {
    matches!(err, SymphoniaError::IoError(e) if e.kind() == std::io::ErrorKind::UnexpectedEof)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_only_eof_ends_the_stream() {
        let eof = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "end of stream");
        assert!(is_end_of_stream(&SymphoniaError::IoError(eof)));

        let broken = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe");
        assert!(!is_end_of_stream(&SymphoniaError::IoError(broken)));
        assert!(!is_end_of_stream(&SymphoniaError::ResetRequired));
        assert!(!is_end_of_stream(&SymphoniaError::DecodeError("bad frame")));
    }

    #[test]
    fn test_missing_file_is_unreadable() {
        let dir = TempDir::new().unwrap();
        let result = SourceDecoder::decode_file(&dir.path().join("song.mp3"), None);
        assert!(matches!(result, Err(Error::SourceUnreadable { .. })));
    }

    #[test]
    fn test_empty_file_is_unreadable() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("song.mp3");
        std::fs::write(&path, b"").unwrap();

        match SourceDecoder::decode_file(&path, None) {
            Err(Error::SourceUnreadable { reason, .. }) => assert!(reason.contains("empty")),
            other => panic!("expected SourceUnreadable, got {:?}", other),
        }
    }

    #[test]
    fn test_garbage_file_is_unreadable() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("noise.bin");
        std::fs::write(&path, vec![0x5au8; 4096]).unwrap();

        let result = SourceDecoder::decode_file(&path, None);
        assert!(matches!(result, Err(Error::SourceUnreadable { .. })));
    }

    #[test]
    fn test_directory_is_unreadable() {
        let dir = TempDir::new().unwrap();
        let result = SourceDecoder::decode_file(dir.path(), None);
        assert!(matches!(result, Err(Error::SourceUnreadable { .. })));
    }
}
