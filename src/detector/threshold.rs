//! Power threshold strategies
//!
//! Two ways of deciding how loud a frame must be to count as a candidate
//! signal:
//! - [`NoiseFloorCalibrator`] measures ambient noise once over a warm-up
//!   window and fixes the threshold at a fraction of its peak power.
//! - [`AdaptiveThreshold`] blends sub-threshold observations into a running
//!   value, for clips that have no warm-up history.
//!
//! Both sit behind [`ThresholdProvider`] so the detector does not care which
//! one a session was configured with.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::audio::source::{FrameSource, SourceError};
use crate::audio::spectrum::power_spectrum;

pub const DEFAULT_WARMUP: Duration = Duration::from_secs(10);
pub const DEFAULT_CALIBRATION_DIVISOR: f64 = 4.0;
pub const DEFAULT_BLEND_FACTOR: f64 = 0.9;

#[derive(Error, Debug)]
pub enum CalibrationError {
    #[error("failed to capture warm-up audio: {0}")]
    Source(#[from] SourceError),
    #[error("warm-up window produced no audio")]
    Empty,
}

/// How a session obtains its power threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ThresholdMode {
    /// One-shot noise floor calibration, threshold fixed afterwards
    #[default]
    Calibrated,
    /// No warm-up; running blend seeded by the first frame
    Adaptive,
    /// Calibrated seed refined by the adaptive blend
    Hybrid,
}

impl ThresholdMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThresholdMode::Calibrated => "calibrated",
            ThresholdMode::Adaptive => "adaptive",
            ThresholdMode::Hybrid => "hybrid",
        }
    }

    pub fn needs_warmup(&self) -> bool {
        matches!(self, ThresholdMode::Calibrated | ThresholdMode::Hybrid)
    }
}

impl std::str::FromStr for ThresholdMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "calibrated" => Ok(ThresholdMode::Calibrated),
            "adaptive" => Ok(ThresholdMode::Adaptive),
            "hybrid" => Ok(ThresholdMode::Hybrid),
            other => Err(format!("Invalid threshold mode: {}", other)),
        }
    }
}

/// Source of the current power threshold for one session
pub trait ThresholdProvider: Send {
    /// Current threshold; never negative
    fn value(&self) -> f64;

    /// Feed the peak power of a frame that has just been classified
    fn observe(&mut self, peak_power: f64);

    /// Whether a value exists yet; unseeded providers take the first
    /// observation before any frame is compared
    fn is_seeded(&self) -> bool {
        true
    }
}

/// Threshold that never moves after it is set
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FixedThreshold {
    value: f64,
}

impl FixedThreshold {
    pub fn new(value: f64) -> Self {
        Self {
            value: value.max(0.0),
        }
    }
}

impl ThresholdProvider for FixedThreshold {
    fn value(&self) -> f64 {
        self.value
    }

    fn observe(&mut self, _peak_power: f64) {}
}

/// One-shot ambient noise measurement
#[derive(Debug, Clone)]
pub struct NoiseFloorCalibrator {
    warmup: Duration,
    divisor: f64,
}

impl Default for NoiseFloorCalibrator {
    fn default() -> Self {
        Self::new(DEFAULT_WARMUP, DEFAULT_CALIBRATION_DIVISOR)
    }
}

impl NoiseFloorCalibrator {
    pub fn new(warmup: Duration, divisor: f64) -> Self {
        Self { warmup, divisor }
    }

    /// Capture the warm-up window and derive the initial threshold
    ///
    /// Blocks until the whole window has been read. Any read failure aborts
    /// calibration; nothing partial is returned.
    pub fn calibrate(&self, source: &mut dyn FrameSource) -> Result<FixedThreshold, CalibrationError> {
        let format = source.format();
        let frames = format.frames_for(self.warmup.as_secs_f64());
        info!(
            warmup_secs = self.warmup.as_secs_f64(),
            frames, "Calibrating noise floor"
        );

        let mut samples: Vec<i16> = Vec::with_capacity(frames * format.frame_len);
        let mut read = 0;
        while read < frames {
            let frame = match source.read_frame() {
                Ok(frame) => frame,
                Err(SourceError::Idle) => continue,
                Err(e) => return Err(e.into()),
            };
            read += 1;
            samples.extend_from_slice(frame.samples());
        }

        let threshold = self.threshold_for(&samples)?;
        info!(threshold, "Noise floor threshold set");
        Ok(FixedThreshold::new(threshold))
    }

    /// Threshold for an already captured warm-up signal
    ///
    /// One transform over the whole signal, no window: the global peak
    /// power divided by the configured divisor.
    pub fn threshold_for(&self, samples: &[i16]) -> Result<f64, CalibrationError> {
        if samples.is_empty() {
            return Err(CalibrationError::Empty);
        }
        let signal: Vec<f64> = samples.iter().map(|&s| s as f64).collect();
        let peak = power_spectrum(&signal).into_iter().fold(0.0f64, f64::max);
        debug!(peak, samples = samples.len(), "Warm-up spectrum peak");
        Ok(peak / self.divisor)
    }
}

/// Running threshold pulled down by quiet observations
///
/// Only observations below the current value are blended in, so a burst of
/// loud non-target noise cannot drag the threshold up.
#[derive(Debug, Clone, PartialEq)]
pub struct AdaptiveThreshold {
    value: Option<f64>,
    blend_factor: f64,
}

impl Default for AdaptiveThreshold {
    fn default() -> Self {
        Self::new(DEFAULT_BLEND_FACTOR)
    }
}

impl AdaptiveThreshold {
    /// Unseeded; the first observation becomes the threshold
    pub fn new(blend_factor: f64) -> Self {
        Self {
            value: None,
            blend_factor: blend_factor.clamp(0.0, 1.0),
        }
    }

    pub fn seeded(value: f64, blend_factor: f64) -> Self {
        Self {
            value: Some(value.max(0.0)),
            blend_factor: blend_factor.clamp(0.0, 1.0),
        }
    }

    pub fn blend_factor(&self) -> f64 {
        self.blend_factor
    }

    /// Blend `observed` in unconditionally
    ///
    /// For callers that also want loud observations to raise the threshold.
    pub fn blend(&mut self, observed: f64) {
        let observed = observed.max(0.0);
        self.value = Some(match self.value {
            Some(current) => self.blend_factor * current + (1.0 - self.blend_factor) * observed,
            None => observed,
        });
    }
}

impl ThresholdProvider for AdaptiveThreshold {
    fn value(&self) -> f64 {
        self.value.unwrap_or(0.0)
    }

    fn is_seeded(&self) -> bool {
        self.value.is_some()
    }

    fn observe(&mut self, peak_power: f64) {
        match self.value {
            None => self.value = Some(peak_power.max(0.0)),
            Some(current) if peak_power < current => self.blend(peak_power),
            Some(_) => {}
        }
    }
}
