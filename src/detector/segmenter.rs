//! Hysteresis segmentation of the frame stream
//!
//! A frame is *strong* when its peak power clears the threshold and its
//! dominant frequency falls inside the passband. Strong frames open or extend
//! a segment; after the last strong frame the segment keeps absorbing frames
//! until the hold window runs out, so short gaps inside one call do not split
//! it. The first non-strong frame past the hold window closes the segment.

use crate::audio::frame::Frame;
use crate::audio::spectrum::SpectralVerdict;

/// Frames tolerated after the last strong frame (about 7 s at 44.1 kHz / 2048)
pub const DEFAULT_HOLD_LIMIT: usize = 150;

/// Typical songbird vocalization range
pub const DEFAULT_BAND_LOW_HZ: f64 = 1000.0;
pub const DEFAULT_BAND_HIGH_HZ: f64 = 8000.0;

/// Inclusive frequency range a strong frame must peak in
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Passband {
    pub low_hz: f64,
    pub high_hz: f64,
}

impl Passband {
    pub const fn new(low_hz: f64, high_hz: f64) -> Self {
        Self { low_hz, high_hz }
    }

    pub fn contains(&self, frequency: f64) -> bool {
        frequency >= self.low_hz && frequency <= self.high_hz
    }
}

impl Default for Passband {
    fn default() -> Self {
        Self::new(DEFAULT_BAND_LOW_HZ, DEFAULT_BAND_HIGH_HZ)
    }
}

/// What a single frame did to the segmentation state
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Not accumulating; frame discarded
    Idle,
    /// Frame appended to the open segment
    Extended { strong: bool },
    /// A segment just ended; its samples are handed out
    Closed(Vec<i16>),
}

#[derive(Debug, Clone)]
pub struct SegmentationStateMachine {
    active: bool,
    hold_counter: usize,
    hold_limit: usize,
    passband: Passband,
    accumulated: Vec<i16>,
}

impl Default for SegmentationStateMachine {
    fn default() -> Self {
        Self::new(DEFAULT_HOLD_LIMIT, Passband::default())
    }
}

impl SegmentationStateMachine {
    /// Starts idle with the hold window already exhausted
    pub fn new(hold_limit: usize, passband: Passband) -> Self {
        Self {
            active: false,
            hold_counter: hold_limit,
            hold_limit,
            passband,
            accumulated: Vec::new(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn hold_counter(&self) -> usize {
        self.hold_counter
    }

    pub fn hold_limit(&self) -> usize {
        self.hold_limit
    }

    pub fn accumulated_len(&self) -> usize {
        self.accumulated.len()
    }

    pub fn is_strong(&self, verdict: &SpectralVerdict, threshold: f64) -> bool {
        verdict.peak_power > threshold && self.passband.contains(verdict.peak_frequency)
    }

    /// Advance by one frame
    pub fn step(&mut self, frame: &Frame, verdict: &SpectralVerdict, threshold: f64) -> Step {
        let strong = self.is_strong(verdict, threshold);
        let within_hold = self.hold_counter < self.hold_limit;

        if strong || within_hold {
            if !self.active || strong {
                self.hold_counter = 0;
            }
            self.active = true;
            self.accumulated.extend_from_slice(frame.samples());
            self.hold_counter += 1;
            return Step::Extended { strong };
        }

        self.active = false;
        self.hold_counter = self.hold_limit;
        if self.accumulated.is_empty() {
            Step::Idle
        } else {
            Step::Closed(std::mem::take(&mut self.accumulated))
        }
    }

    /// Drop any open segment without emitting it
    pub fn discard(&mut self) -> usize {
        let dropped = self.accumulated.len();
        self.accumulated.clear();
        self.active = false;
        self.hold_counter = self.hold_limit;
        dropped
    }
}
