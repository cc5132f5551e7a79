//! Frame sources feeding the detector

use std::collections::VecDeque;

use thiserror::Error;

use super::frame::{Frame, FrameFormat, split_frames};

#[derive(Error, Debug)]
pub enum SourceError {
    /// Samples were lost at the source; the next read may succeed
    #[error("audio input overrun, {dropped} samples dropped")]
    Overrun { dropped: usize },
    /// No frame arrived within the source's poll interval
    #[error("no audio within the poll interval")]
    Idle,
    /// The source will produce no further frames
    #[error("audio source closed")]
    Closed,
    #[error("audio device error: {0}")]
    Device(String),
}

impl SourceError {
    /// Whether the read loop should keep going after this error
    pub fn is_recoverable(&self) -> bool {
        matches!(self, SourceError::Overrun { .. } | SourceError::Idle)
    }
}

/// Blocking source of fixed-size frames
pub trait FrameSource: Send {
    fn format(&self) -> FrameFormat;

    /// Block until the next frame is available
    ///
    /// Live sources may return [`SourceError::Idle`] instead of blocking
    /// indefinitely, so callers get to check their stop condition.
    fn read_frame(&mut self) -> Result<Frame, SourceError>;
}

/// Pre-recorded frames, returned in order and then `Closed`
pub struct MemorySource {
    format: FrameFormat,
    frames: VecDeque<Frame>,
}

impl MemorySource {
    pub fn new(format: FrameFormat, frames: impl IntoIterator<Item = Frame>) -> Self {
        Self {
            format,
            frames: frames.into_iter().collect(),
        }
    }

    /// Build from a contiguous buffer; a trailing partial frame is dropped
    pub fn from_samples(format: FrameFormat, samples: &[i16]) -> Self {
        Self::new(format, split_frames(samples, format.frame_len))
    }

    pub fn remaining(&self) -> usize {
        self.frames.len()
    }
}

impl FrameSource for MemorySource {
    fn format(&self) -> FrameFormat {
        self.format
    }

    fn read_frame(&mut self) -> Result<Frame, SourceError> {
        self.frames.pop_front().ok_or(SourceError::Closed)
    }
}
