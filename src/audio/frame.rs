//! Fixed-length blocks of captured audio

use std::sync::Arc;

/// Reference capture rate used by the detector defaults
pub const DEFAULT_SAMPLE_RATE: u32 = 44_100;

/// Reference frame length (samples per frame)
pub const DEFAULT_FRAME_LEN: usize = 2048;

/// Sample rate and frame length, constant for a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameFormat {
    pub sample_rate: u32,
    pub frame_len: usize,
}

impl FrameFormat {
    pub const fn new(sample_rate: u32, frame_len: usize) -> Self {
        Self {
            sample_rate,
            frame_len,
        }
    }

    /// Duration of one frame in seconds
    pub fn frame_seconds(&self) -> f64 {
        self.frame_len as f64 / self.sample_rate as f64
    }

    /// Number of whole frames needed to cover `seconds` of audio
    pub fn frames_for(&self, seconds: f64) -> usize {
        (seconds * self.sample_rate as f64 / self.frame_len as f64).ceil() as usize
    }
}

impl Default for FrameFormat {
    fn default() -> Self {
        Self::new(DEFAULT_SAMPLE_RATE, DEFAULT_FRAME_LEN)
    }
}

/// One captured frame of signed 16-bit mono samples
///
/// Frames are immutable once captured; cloning shares the sample buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    samples: Arc<[i16]>,
}

impl Frame {
    pub fn new(samples: impl Into<Arc<[i16]>>) -> Self {
        Self {
            samples: samples.into(),
        }
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

impl From<Vec<i16>> for Frame {
    fn from(samples: Vec<i16>) -> Self {
        Self::new(samples)
    }
}

/// Split a contiguous sample buffer into whole frames
///
/// A trailing partial frame is dropped.
pub fn split_frames(samples: &[i16], frame_len: usize) -> Vec<Frame> {
    if frame_len == 0 {
        return Vec::new();
    }
    samples
        .chunks_exact(frame_len)
        .map(|chunk| Frame::new(chunk.to_vec()))
        .collect()
}
