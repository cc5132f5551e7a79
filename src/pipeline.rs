//! Detection sessions
//!
//! Streaming mode runs the detector on a blocking capture thread and hands
//! accepted segments to an async reporting worker over a channel, so a slow
//! classifier never holds up capture. Clip mode runs one decoded recording
//! through the same detector and reports its segments in order.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::audio::source::{FrameSource, MemorySource};
use crate::audio::wav::Clip;
use crate::conf::Settings;
use crate::detector::{
    CalibrationError, CandidateSegment, Detector, DetectorConfig, DetectorError,
    NoiseFloorCalibrator, RunSummary, ThresholdMode, threshold_provider,
};
use crate::location::Location;
use crate::report::{ReportError, SegmentReport, SegmentReporter};

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("noise floor calibration failed: {0}")]
    Calibration(#[from] CalibrationError),
    #[error(transparent)]
    Detector(#[from] DetectorError),
    #[error(transparent)]
    Report(#[from] ReportError),
    #[error("detection task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Everything needed to start a detector for one session
#[derive(Debug, Clone)]
pub struct Session {
    pub detector: DetectorConfig,
    pub mode: ThresholdMode,
    pub calibrator: NoiseFloorCalibrator,
    pub blend_factor: f64,
}

impl Session {
    pub fn from_settings(settings: &Settings, sample_rate: u32) -> Self {
        Self {
            detector: settings.detector_config(sample_rate),
            mode: settings.threshold_mode,
            calibrator: settings.calibrator(),
            blend_factor: settings.blend_factor,
        }
    }

    pub fn with_mode(mut self, mode: ThresholdMode) -> Self {
        self.mode = mode;
        self
    }
}

/// Where accepted segments go, and the coordinates they are tagged with
#[derive(Clone)]
pub struct Reporting {
    pub reporter: Arc<SegmentReporter>,
    pub location: Location,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListenSummary {
    pub run: RunSummary,
    pub reported: u64,
    pub failed: u64,
}

/// Detect on a live source until it closes or `stop` is raised
///
/// Calibration (when the mode needs it) runs first on the capture thread.
/// Segments already queued when capture ends are still reported.
pub async fn listen(
    source: Box<dyn FrameSource>,
    session: Session,
    reporting: Option<Reporting>,
    stop: Arc<AtomicBool>,
) -> Result<ListenSummary, PipelineError> {
    let (tx, mut rx) = mpsc::unbounded_channel::<CandidateSegment>();

    let worker = tokio::spawn(async move {
        let mut reported = 0u64;
        let mut failed = 0u64;
        while let Some(segment) = rx.recv().await {
            let Some(reporting) = &reporting else {
                info!(
                    duration_secs = segment.duration_seconds,
                    "Segment detected (no classifier configured)"
                );
                continue;
            };
            match reporting.reporter.report(&segment, reporting.location).await {
                Ok(_) => reported += 1,
                Err(e) => {
                    error!("Failed to report segment: {}", e);
                    failed += 1;
                }
            }
        }
        debug!("Reporting worker drained");
        (reported, failed)
    });

    let capture = tokio::task::spawn_blocking(move || -> Result<RunSummary, PipelineError> {
        let mut source = source;
        let provider = threshold_provider(
            session.mode,
            &session.calibrator,
            session.blend_factor,
            source.as_mut(),
        )?;
        info!(
            mode = session.mode.as_str(),
            threshold = provider.value(),
            "Listening"
        );

        let mut detector = Detector::new(&session.detector, provider);
        let summary = detector.run(source.as_mut(), &stop, |segment| {
            if tx.send(segment).is_err() {
                warn!("Reporting worker gone, dropping segment");
            }
        })?;
        Ok(summary)
    });

    let run = capture.await?;
    let (reported, failed) = worker.await?;
    let run = run?;

    info!(
        frames = run.frames,
        segments = run.segments,
        overruns = run.overruns,
        reported,
        failed,
        "Session ended"
    );
    Ok(ListenSummary {
        run,
        reported,
        failed,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClipSegment {
    pub index: usize,
    pub duration_seconds: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<SegmentReport>,
}

/// Result of running one recording through the detector
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClipAnalysis {
    pub sample_rate: u32,
    pub duration_seconds: f64,
    pub frames: u64,
    pub segments: Vec<ClipSegment>,
    /// Distinct labels across all segments, sorted
    pub labels: Vec<String>,
}

/// Detect segments in a decoded recording and report them one by one
///
/// The session's frame format is rebuilt around the clip's own sample rate.
/// A trailing partial frame and an unfinished final segment are dropped.
pub async fn analyze_clip(
    clip: Clip,
    session: Session,
    reporting: Option<&Reporting>,
) -> Result<ClipAnalysis, PipelineError> {
    let sample_rate = clip.sample_rate;
    let duration_seconds = clip.samples.len() as f64 / sample_rate.max(1) as f64;

    let (run, candidates) = tokio::task::spawn_blocking(
        move || -> Result<(RunSummary, Vec<CandidateSegment>), PipelineError> {
            let mut config = session.detector;
            config.format.sample_rate = sample_rate;
            let mut source = MemorySource::from_samples(config.format, &clip.samples);

            let provider = threshold_provider(
                session.mode,
                &session.calibrator,
                session.blend_factor,
                &mut source,
            )?;
            let mut detector = Detector::new(&config, provider);
            let mut candidates = Vec::new();
            let run = detector.run(&mut source, &AtomicBool::new(false), |segment| {
                candidates.push(segment)
            })?;
            Ok((run, candidates))
        },
    )
    .await??;

    let mut segments = Vec::with_capacity(candidates.len());
    let mut labels = std::collections::BTreeSet::new();
    for (index, candidate) in candidates.iter().enumerate() {
        let report = match reporting {
            Some(reporting) => {
                let report = reporting
                    .reporter
                    .report(candidate, reporting.location)
                    .await?;
                labels.extend(report.labels.iter().cloned());
                Some(report)
            }
            None => None,
        };
        segments.push(ClipSegment {
            index,
            duration_seconds: candidate.duration_seconds,
            report,
        });
    }

    Ok(ClipAnalysis {
        sample_rate,
        duration_seconds,
        frames: run.frames,
        segments,
        labels: labels.into_iter().collect(),
    })
}
