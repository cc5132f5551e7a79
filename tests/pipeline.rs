//! End-to-end detection sessions over in-memory audio
//!
//! A quiet warm-up calibrates the threshold, then a 2 kHz tone burst stands
//! in for a bird call. Classifier and store are in-memory fakes.

use std::f64::consts::PI;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use chirp::audio::wav::Clip;
use chirp::classifier::{Classifier, ClassifierError, ClassifyRequest, Detection};
use chirp::conf::Settings;
use chirp::location::Location;
use chirp::store::{DetectionStore, SightingRecord, StoreError};
use chirp::{
    Frame, FrameFormat, MemorySource, Reporting, SegmentReporter, Session, ThresholdMode,
    analyze_clip, listen,
};

const WARMUP_FRAMES: usize = 216;

struct Noise(u32);

impl Noise {
    /// Low-level deterministic hiss in [-16, 16]
    fn frame(&mut self, format: FrameFormat) -> Frame {
        let samples: Vec<i16> = (0..format.frame_len)
            .map(|_| {
                self.0 = self.0.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
                ((self.0 >> 16) % 33) as i16 - 16
            })
            .collect();
        Frame::new(samples)
    }
}

/// Tone on bin 93, about 2 kHz at 44.1 kHz / 2048
fn call(format: FrameFormat) -> Frame {
    let n = format.frame_len as f64;
    let samples: Vec<i16> = (0..format.frame_len)
        .map(|i| (6000.0 * (2.0 * PI * 93.0 * i as f64 / n).sin()).round() as i16)
        .collect();
    Frame::new(samples)
}

fn recording(format: FrameFormat, calls: usize, trailing: usize) -> Vec<Frame> {
    let mut noise = Noise(7);
    let mut frames: Vec<Frame> = (0..WARMUP_FRAMES).map(|_| noise.frame(format)).collect();
    frames.extend(std::iter::repeat_n(call(format), calls));
    frames.extend((0..trailing).map(|_| noise.frame(format)));
    frames
}

struct FakeClassifier {
    calls: Mutex<usize>,
    fail: bool,
}

#[async_trait]
impl Classifier for FakeClassifier {
    async fn classify(&self, request: ClassifyRequest<'_>) -> Result<Vec<Detection>, ClassifierError> {
        *self.calls.lock().unwrap() += 1;
        assert!(request.audio_path.exists());
        if self.fail {
            return Err(ClassifierError::Other("service unavailable".into()));
        }
        let detection = |name: &str| Detection {
            common_name: name.to_string(),
            scientific_name: None,
            confidence: 0.9,
            start_time: None,
            end_time: None,
        };
        Ok(vec![
            detection("Carolina Wren"),
            detection("Carolina Wren"),
            detection("Northern Cardinal"),
        ])
    }
}

#[derive(Default)]
struct FakeStore {
    sightings: Mutex<Vec<SightingRecord>>,
}

#[async_trait]
impl DetectionStore for FakeStore {
    async fn record(&self, sighting: &SightingRecord) -> Result<(), StoreError> {
        self.sightings.lock().unwrap().push(sighting.clone());
        Ok(())
    }
}

struct Harness {
    classifier: Arc<FakeClassifier>,
    store: Arc<FakeStore>,
    scratch: tempfile::TempDir,
    reporting: Reporting,
}

fn harness(fail: bool) -> Harness {
    let classifier = Arc::new(FakeClassifier {
        calls: Mutex::new(0),
        fail,
    });
    let store = Arc::new(FakeStore::default());
    let scratch = tempfile::tempdir().unwrap();
    let reporter = SegmentReporter::new(classifier.clone(), store.clone(), 0.25)
        .with_scratch_dir(scratch.path());
    Harness {
        classifier,
        store,
        reporting: Reporting {
            reporter: Arc::new(reporter),
            location: Location::new(35.78, -78.64).unwrap(),
        },
        scratch,
    }
}

fn session() -> Session {
    Session::from_settings(&Settings::default(), 44_100).with_mode(ThresholdMode::Calibrated)
}

#[tokio::test]
async fn quiet_site_reports_nothing() {
    let format = FrameFormat::default();
    let h = harness(false);
    let source = MemorySource::new(format, recording(format, 0, 200));

    let summary = listen(
        Box::new(source),
        session(),
        Some(h.reporting.clone()),
        Arc::new(AtomicBool::new(false)),
    )
    .await
    .unwrap();

    assert_eq!(summary.run.frames, 200);
    assert_eq!(summary.run.segments, 0);
    assert_eq!(*h.classifier.calls.lock().unwrap(), 0);
    assert!(h.store.sightings.lock().unwrap().is_empty());
}

#[tokio::test]
async fn call_is_segmented_classified_and_recorded() {
    let format = FrameFormat::default();
    let h = harness(false);
    let source = MemorySource::new(format, recording(format, 10, 200));

    let summary = listen(
        Box::new(source),
        session(),
        Some(h.reporting.clone()),
        Arc::new(AtomicBool::new(false)),
    )
    .await
    .unwrap();

    assert_eq!(summary.run.segments, 1);
    assert_eq!(summary.reported, 1);
    assert_eq!(summary.failed, 0);
    assert_eq!(*h.classifier.calls.lock().unwrap(), 1);

    let sightings = h.store.sightings.lock().unwrap();
    let labels: Vec<&str> = sightings.iter().map(|s| s.label.as_str()).collect();
    assert_eq!(labels, vec!["Carolina Wren", "Northern Cardinal"]);
    assert!(sightings.iter().all(|s| s.latitude == 35.78 && s.longitude == -78.64));
    assert!(std::fs::read_dir(h.scratch.path()).unwrap().next().is_none());
}

#[tokio::test]
async fn classifier_outage_does_not_stop_the_session() {
    let format = FrameFormat::default();
    let h = harness(true);
    let mut frames = recording(format, 10, 200);
    frames.extend(std::iter::repeat_n(call(format), 10));
    let mut noise = Noise(99);
    frames.extend((0..200).map(|_| noise.frame(format)));
    let source = MemorySource::new(format, frames);

    let summary = listen(
        Box::new(source),
        session(),
        Some(h.reporting.clone()),
        Arc::new(AtomicBool::new(false)),
    )
    .await
    .unwrap();

    assert_eq!(summary.run.segments, 2);
    assert_eq!(summary.reported, 0);
    assert_eq!(summary.failed, 2);
    assert!(h.store.sightings.lock().unwrap().is_empty());
    assert!(std::fs::read_dir(h.scratch.path()).unwrap().next().is_none());
}

#[tokio::test]
async fn clip_mode_reports_each_segment() {
    let format = FrameFormat::default();
    let h = harness(false);
    // Adaptive mode has no warm-up, so the clip is framed by digital silence
    let mut samples = vec![0i16; 20 * format.frame_len];
    for _ in 0..10 {
        samples.extend_from_slice(call(format).samples());
    }
    samples.extend(std::iter::repeat_n(0i16, 200 * format.frame_len));
    let clip = Clip {
        samples,
        sample_rate: format.sample_rate,
    };

    let session = session().with_mode(ThresholdMode::Adaptive);
    let analysis = analyze_clip(clip, session, Some(&h.reporting)).await.unwrap();

    assert_eq!(analysis.frames, 230);
    assert_eq!(analysis.segments.len(), 1);
    assert_eq!(analysis.labels, vec!["Carolina Wren", "Northern Cardinal"]);
    let report = analysis.segments[0].report.as_ref().unwrap();
    assert_eq!(report.detections, 3);
    assert_eq!(report.recorded, 2);
}
