//! Acoustic event detection
//!
//! [`Detector`] is the per-session context: it owns the spectral analyzer,
//! the threshold provider, the segmentation state machine and the emitter,
//! and pushes frames through them strictly one at a time.

pub mod emitter;
pub mod segmenter;
pub mod threshold;

use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;
use tracing::{debug, info, trace, warn};

use crate::audio::frame::{Frame, FrameFormat};
use crate::audio::source::{FrameSource, SourceError};
use crate::audio::spectrum::{SpectralAnalyzer, SpectrumError};

pub use emitter::{CandidateSegment, SegmentEmitter};
pub use segmenter::{Passband, SegmentationStateMachine, Step};
pub use threshold::{
    AdaptiveThreshold, CalibrationError, FixedThreshold, NoiseFloorCalibrator, ThresholdMode,
    ThresholdProvider,
};

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error(transparent)]
    Spectrum(#[from] SpectrumError),
    #[error("audio source failed: {0}")]
    Source(#[from] SourceError),
}

/// Fixed parameters of a detection session
#[derive(Debug, Clone, PartialEq)]
pub struct DetectorConfig {
    pub format: FrameFormat,
    pub hold_limit: usize,
    pub passband: Passband,
    pub min_segment_secs: f64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            format: FrameFormat::default(),
            hold_limit: segmenter::DEFAULT_HOLD_LIMIT,
            passband: Passband::default(),
            min_segment_secs: emitter::DEFAULT_MIN_SEGMENT_SECS,
        }
    }
}

/// Counters reported when a run loop ends
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub frames: u64,
    pub segments: u64,
    pub overruns: u64,
    /// Samples of an unfinished segment dropped at stop
    pub discarded_samples: usize,
}

/// Build the threshold provider for `mode`
///
/// Calibrating modes consume the warm-up window from `source` first.
pub fn threshold_provider(
    mode: ThresholdMode,
    calibrator: &NoiseFloorCalibrator,
    blend_factor: f64,
    source: &mut dyn FrameSource,
) -> Result<Box<dyn ThresholdProvider>, CalibrationError> {
    Ok(match mode {
        ThresholdMode::Calibrated => Box::new(calibrator.calibrate(source)?),
        ThresholdMode::Adaptive => Box::new(AdaptiveThreshold::new(blend_factor)),
        ThresholdMode::Hybrid => {
            let seed = calibrator.calibrate(source)?;
            Box::new(AdaptiveThreshold::seeded(seed.value(), blend_factor))
        }
    })
}

pub struct Detector {
    analyzer: SpectralAnalyzer,
    threshold: Box<dyn ThresholdProvider>,
    segmenter: SegmentationStateMachine,
    emitter: SegmentEmitter,
    summary: RunSummary,
}

impl Detector {
    pub fn new(config: &DetectorConfig, threshold: Box<dyn ThresholdProvider>) -> Self {
        Self {
            analyzer: SpectralAnalyzer::new(config.format),
            threshold,
            segmenter: SegmentationStateMachine::new(config.hold_limit, config.passband),
            emitter: SegmentEmitter::new(config.format.sample_rate, config.min_segment_secs),
            summary: RunSummary::default(),
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold.value()
    }

    pub fn is_active(&self) -> bool {
        self.segmenter.is_active()
    }

    pub fn summary(&self) -> &RunSummary {
        &self.summary
    }

    /// Push one frame through analysis, segmentation and acceptance
    ///
    /// The threshold is read before the frame is classified and updated
    /// after, so each frame sees the value left by the previous one. An
    /// unseeded threshold is first seeded from the frame itself, so the
    /// opening frame of a session is never strong on its own.
    pub fn process_frame(&mut self, frame: &Frame) -> Result<Option<CandidateSegment>, SpectrumError> {
        let verdict = self.analyzer.analyze(frame)?;
        if !self.threshold.is_seeded() {
            self.threshold.observe(verdict.peak_power);
        }
        let threshold = self.threshold.value();
        let step = self.segmenter.step(frame, &verdict, threshold);
        self.threshold.observe(verdict.peak_power);
        self.summary.frames += 1;

        match step {
            Step::Extended { strong: true } => {
                trace!(
                    power = verdict.peak_power,
                    frequency = verdict.peak_frequency,
                    threshold,
                    "Strong frame"
                );
                Ok(None)
            }
            Step::Closed(samples) => {
                let segment = self.emitter.finish(samples);
                if let Some(segment) = &segment {
                    self.summary.segments += 1;
                    info!(
                        duration_secs = segment.duration_seconds,
                        "Segment accepted"
                    );
                }
                Ok(segment)
            }
            _ => Ok(None),
        }
    }

    /// Read frames until the source closes or `stop` is raised
    ///
    /// Overruns are logged and skipped. An idle source just loops back to
    /// the stop check. A segment still open when the loop ends is discarded
    /// rather than emitted.
    pub fn run<F>(
        &mut self,
        source: &mut dyn FrameSource,
        stop: &AtomicBool,
        mut on_segment: F,
    ) -> Result<RunSummary, DetectorError>
    where
        F: FnMut(CandidateSegment),
    {
        while !stop.load(Ordering::Acquire) {
            let frame = match source.read_frame() {
                Ok(frame) => frame,
                Err(SourceError::Idle) => continue,
                Err(e) if e.is_recoverable() => {
                    warn!("Stream read error: {}", e);
                    self.summary.overruns += 1;
                    continue;
                }
                Err(SourceError::Closed) => break,
                Err(e) => return Err(e.into()),
            };

            if let Some(segment) = self.process_frame(&frame)? {
                on_segment(segment);
            }
        }

        let discarded = self.segmenter.discard();
        if discarded > 0 {
            debug!(samples = discarded, "Discarding unfinished segment");
        }
        self.summary.discarded_samples += discarded;
        Ok(self.summary.clone())
    }
}
