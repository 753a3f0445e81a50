//! Frame sampling from a decoded video.
//!
//! Decoding itself is a collaborator concern: callers supply a
//! [`VideoDecoder`] and the sampler turns its raw frame stream into
//! timestamped [`Frame`]s.

use image::RgbImage;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Errors from frame sampling.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SamplerError {
    #[error("Failed to read video: {path}")]
    SourceUnavailable { path: PathBuf, reason: String },

    #[error("No valid frames extracted after preprocessing")]
    EmptySequence,

    #[error("Frame index {index} out of valid range (0..{len})")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("Sampling stride must be at least 1")]
    InvalidStride,
}

/// An opened video stream.
pub trait FrameReader {
    /// Source frames per second.
    fn frame_rate(&self) -> f64;

    /// Total number of frames, when the container reports it.
    fn frame_count(&self) -> Option<usize> {
        None
    }

    /// Next decoded frame in RGB, or `None` at end of stream.
    fn read_next(&mut self) -> Option<RgbImage>;
}

/// Opens videos for sampling.
pub trait VideoDecoder: Send + Sync {
    fn open(&self, path: &Path) -> Result<Box<dyn FrameReader + Send>, SamplerError>;
}

/// One sampled frame. Cloning shares the pixel buffer.
#[derive(Debug, Clone)]
pub struct Frame {
    pub image: Arc<RgbImage>,
    /// Seconds from the start of the video, rounded to 2 decimals.
    pub timestamp: f64,
    /// Index of this frame in the source stream (before sampling).
    pub source_index: usize,
}

impl Frame {
    pub fn new(image: RgbImage, timestamp: f64, source_index: usize) -> Self {
        Self {
            image: Arc::new(image),
            timestamp,
            source_index,
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// Round a timestamp to the fixed 2-decimal precision.
pub fn round_timestamp(seconds: f64) -> f64 {
    (seconds * 100.0).round() / 100.0
}

/// The output of sampling one video.
#[derive(Debug, Clone)]
pub struct SampledVideo {
    pub path: PathBuf,
    pub frame_rate: f64,
    pub frames: Vec<Frame>,
}

impl SampledVideo {
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn timestamps(&self) -> Vec<f64> {
        self.frames.iter().map(|f| f.timestamp).collect()
    }

    /// Timestamp of the `index`-th sampled frame.
    pub fn timestamp_at(&self, index: usize) -> Result<f64, SamplerError> {
        self.frames
            .get(index)
            .map(|f| f.timestamp)
            .ok_or(SamplerError::IndexOutOfRange {
                index,
                len: self.frames.len(),
            })
    }
}

/// Extracts every `stride`-th frame from a video.
#[derive(Debug, Clone, Copy)]
pub struct FrameSampler {
    stride: usize,
}

impl FrameSampler {
    pub fn new(stride: usize) -> Result<Self, SamplerError> {
        if stride == 0 {
            return Err(SamplerError::InvalidStride);
        }
        Ok(Self { stride })
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Decode `path` and keep frames whose source index is a multiple of the stride.
    pub fn sample(
        &self,
        decoder: &dyn VideoDecoder,
        path: &Path,
    ) -> Result<SampledVideo, SamplerError> {
        let mut reader = decoder.open(path)?;

        let frame_rate = reader.frame_rate();
        if !frame_rate.is_finite() || frame_rate <= 0.0 {
            return Err(SamplerError::SourceUnavailable {
                path: path.to_path_buf(),
                reason: format!("invalid frame rate {}", frame_rate),
            });
        }

        let capacity = reader
            .frame_count()
            .map(|n| n / self.stride + 1)
            .unwrap_or_default();
        let mut frames = Vec::with_capacity(capacity);

        let mut index = 0usize;
        while let Some(image) = reader.read_next() {
            if index % self.stride == 0 {
                let timestamp = round_timestamp(index as f64 / frame_rate);
                frames.push(Frame::new(image, timestamp, index));
            }
            index += 1;
        }

        if frames.is_empty() {
            return Err(SamplerError::EmptySequence);
        }

        tracing::debug!(
            path = %path.display(),
            decoded = index,
            sampled = frames.len(),
            frame_rate,
            "Sampled video"
        );

        Ok(SampledVideo {
            path: path.to_path_buf(),
            frame_rate,
            frames,
        })
    }
}

impl Default for FrameSampler {
    fn default() -> Self {
        Self { stride: 1 }
    }
}
