//! Scratch storage for persisted chunks
//!
//! Chunks are 32-bit float WAV files so the stitched output is bit-identical
//! to an in-memory build. A chunk is written under a temporary name and
//! renamed into place once complete, so a failed or cancelled build never
//! leaves a readable partial chunk behind.
//!
//! The whole directory is removed when the store is dropped, on success,
//! failure and cancellation alike.

use crate::audio::buffer::AudioBuffer;
use crate::audio::encoder::{max_wav_frames, FrameSink, WavFileSink, WavSampleFormat};
use crate::error::{Error, Result};
use hound::WavReader;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, warn};

const DIR_PREFIX: &str = "loopcast-chunks-";

/// Temporary directory of chunk files, keyed by occurrence count
#[derive(Debug)]
pub struct ChunkStore {
    dir: Option<TempDir>,
    path: PathBuf,
    sample_rate: u32,
    channels: u16,
}

impl ChunkStore {
    /// Create a fresh directory under `root`, or the system temp dir
    pub fn create(root: Option<&Path>, sample_rate: u32, channels: u16) -> Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(DIR_PREFIX);
        let dir = match root {
            Some(root) => builder.tempdir_in(root),
            None => builder.tempdir(),
        }
        .map_err(|e| Error::ChunkStorage(format!("failed to create chunk directory: {}", e)))?;

        let path = dir.path().to_path_buf();
        debug!("Chunk directory: {}", path.display());

        Ok(Self {
            dir: Some(dir),
            path,
            sample_rate,
            channels,
        })
    }

    /// File holding the chunk of `occurrences` occurrences
    pub fn chunk_path(&self, occurrences: u64) -> PathBuf {
        self.path.join(format!("chunk_{:06}.wav", occurrences))
    }

    /// Persist a built chunk
    pub fn persist(&self, occurrences: u64, buffer: &AudioBuffer) -> Result<PathBuf> {
        if buffer.sample_rate() != self.sample_rate || buffer.channels() != self.channels {
            return Err(Error::IncompatibleFormat(format!(
                "chunk is {} Hz/{} ch, store expects {} Hz/{} ch",
                buffer.sample_rate(),
                buffer.channels(),
                self.sample_rate,
                self.channels
            )));
        }

        let max_frames = max_wav_frames(self.channels, WavSampleFormat::Float32);
        if buffer.frames() > max_frames {
            return Err(Error::ChunkStorage(format!(
                "chunk of {} frames exceeds the {} frames a chunk file can hold",
                buffer.frames(),
                max_frames
            )));
        }

        let final_path = self.chunk_path(occurrences);
        let partial_path = final_path.with_extension("partial");

        let mut sink =
            WavFileSink::create(&partial_path, self.sample_rate, self.channels, WavSampleFormat::Float32)
                .map_err(|e| Error::ChunkStorage(e.to_string()))?;
        sink.write_samples(buffer.samples())
            .and_then(|_| sink.finish())
            .map_err(|e| Error::ChunkStorage(e.to_string()))?;

        std::fs::rename(&partial_path, &final_path).map_err(|e| {
            Error::ChunkStorage(format!("failed to store {}: {}", final_path.display(), e))
        })?;

        debug!(
            "Persisted chunk of {} occurrences ({} frames)",
            occurrences,
            buffer.frames()
        );
        Ok(final_path)
    }

    /// Stream the interleaved samples of a persisted chunk
    pub fn read(&self, occurrences: u64) -> Result<impl Iterator<Item = Result<f32>>> {
        let reader = self.open_reader(occurrences)?;
        let path = self.chunk_path(occurrences);
        Ok(reader.into_samples::<f32>().map(move |sample| {
            sample.map_err(|e| {
                Error::ChunkStorage(format!("failed to read {}: {}", path.display(), e))
            })
        }))
    }

    fn open_reader(&self, occurrences: u64) -> Result<WavReader<std::io::BufReader<std::fs::File>>> {
        let path = self.chunk_path(occurrences);
        let reader = WavReader::open(&path)
            .map_err(|e| Error::ChunkStorage(format!("failed to open {}: {}", path.display(), e)))?;

        let spec = reader.spec();
        if spec.sample_rate != self.sample_rate
            || spec.channels != self.channels
            || spec.sample_format != hound::SampleFormat::Float
        {
            return Err(Error::ChunkStorage(format!(
                "{} has unexpected format {:?}",
                path.display(),
                spec
            )));
        }
        Ok(reader)
    }
}

impl Drop for ChunkStore {
    fn drop(&mut self) {
        if let Some(dir) = self.dir.take() {
            if let Err(e) = dir.close() {
                warn!(
                    "Failed to remove chunk directory {}: {}",
                    self.path.display(),
                    e
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(frames: usize, channels: u16) -> AudioBuffer {
        let samples = (0..frames * channels as usize)
            .map(|i| (i as f32 * 0.001).sin())
            .collect();
        AudioBuffer::new(samples, 8000, channels, 16).unwrap()
    }

    #[test]
    fn test_persist_and_read_is_lossless() {
        let root = TempDir::new().unwrap();
        let store = ChunkStore::create(Some(root.path()), 8000, 2).unwrap();
        let chunk = ramp(500, 2);

        let path = store.persist(3, &chunk).unwrap();
        assert!(path.exists());
        assert_eq!(hound::WavReader::open(&path).unwrap().duration(), 500);

        let samples: Vec<f32> = store.read(3).unwrap().collect::<Result<_>>().unwrap();
        assert_eq!(samples.as_slice(), chunk.samples());
        assert!(!path.with_extension("partial").exists());
    }

    #[test]
    fn test_drop_removes_directory() {
        let root = TempDir::new().unwrap();
        let store = ChunkStore::create(Some(root.path()), 8000, 1).unwrap();
        let chunk = store.persist(1, &ramp(10, 1)).unwrap();
        let dir = chunk.parent().unwrap().to_path_buf();
        assert!(dir.exists());

        drop(store);
        assert!(!dir.exists());
    }

    #[test]
    fn test_missing_chunk_is_storage_error() {
        let store = ChunkStore::create(None, 8000, 1).unwrap();
        assert!(matches!(store.read(7), Err(Error::ChunkStorage(_))));
    }

    #[test]
    fn test_rejects_mismatched_chunk() {
        let store = ChunkStore::create(None, 8000, 2).unwrap();
        let mono = ramp(10, 1);
        assert!(matches!(store.persist(1, &mono), Err(Error::IncompatibleFormat(_))));
    }
}
