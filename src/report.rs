//! Hand-off of accepted segments to the classifier and the sighting store

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use jiff::Zoned;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::audio::wav::buffer_to_wav;
use crate::classifier::{Classifier, ClassifierError, ClassifyRequest};
use crate::detector::CandidateSegment;
use crate::location::Location;
use crate::store::{DetectionStore, SightingRecord};

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("failed to create temporary segment file: {0}")]
    Scratch(#[from] std::io::Error),
    #[error("failed to encode segment as WAV: {0}")]
    Encode(#[from] hound::Error),
    #[error("classification failed: {0}")]
    Classify(#[from] ClassifierError),
}

/// Outcome of reporting one segment
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SegmentReport {
    pub duration_seconds: f64,
    /// Raw detections returned by the classifier
    pub detections: usize,
    /// Distinct labels, sorted
    pub labels: Vec<String>,
    /// Labels the store accepted
    pub recorded: usize,
}

pub struct SegmentReporter {
    classifier: Arc<dyn Classifier>,
    store: Arc<dyn DetectionStore>,
    min_confidence: f32,
    scratch_dir: Option<PathBuf>,
    timezone: Option<String>,
}

impl SegmentReporter {
    pub fn new(
        classifier: Arc<dyn Classifier>,
        store: Arc<dyn DetectionStore>,
        min_confidence: f32,
    ) -> Self {
        Self {
            classifier,
            store,
            min_confidence,
            scratch_dir: None,
            timezone: None,
        }
    }

    /// Directory for temporary WAV files; the system temp dir otherwise
    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = Some(dir.into());
        self
    }

    /// IANA zone used for sighting timestamps instead of the system zone
    pub fn with_timezone(mut self, timezone: Option<String>) -> Self {
        self.timezone = timezone;
        self
    }

    fn now(&self) -> Zoned {
        let now = Zoned::now();
        match &self.timezone {
            Some(tz) => now.in_tz(tz).unwrap_or_else(|e| {
                warn!("Unknown timezone {}: {}", tz, e);
                now.clone()
            }),
            None => now,
        }
    }

    /// Classify `segment` and record one sighting per distinct label
    ///
    /// The temporary WAV is removed whether or not classification succeeds.
    /// Store failures are logged and skipped so the remaining labels are
    /// still recorded.
    pub async fn report(
        &self,
        segment: &CandidateSegment,
        location: Location,
    ) -> Result<SegmentReport, ReportError> {
        let timestamp = self.now();

        let wav = {
            let mut builder = tempfile::Builder::new();
            builder.prefix("chirp-segment-").suffix(".wav");
            match &self.scratch_dir {
                Some(dir) => builder.tempfile_in(dir)?,
                None => builder.tempfile()?,
            }
        };
        buffer_to_wav(&segment.samples, wav.path(), segment.sample_rate)?;
        debug!(path = %wav.path().display(), "Wrote segment");

        let detections = self
            .classifier
            .classify(ClassifyRequest {
                audio_path: wav.path(),
                sample_rate: segment.sample_rate,
                location,
                timestamp: &timestamp,
                min_confidence: self.min_confidence,
            })
            .await?;
        drop(wav);

        let labels: BTreeSet<String> = detections.iter().map(|d| d.common_name.clone()).collect();
        let recorded_at = timestamp.strftime("%Y-%m-%dT%H:%M:%S%:z").to_string();

        let mut recorded = 0;
        for label in &labels {
            let sighting = SightingRecord {
                label: label.clone(),
                latitude: location.latitude,
                longitude: location.longitude,
                timestamp: recorded_at.clone(),
            };
            match self.store.record(&sighting).await {
                Ok(()) => recorded += 1,
                Err(e) => warn!("Failed to record {}: {}", label, e),
            }
        }

        if labels.is_empty() {
            debug!(duration_secs = segment.duration_seconds, "No species detected");
        } else {
            info!(
                duration_secs = segment.duration_seconds,
                "Detected {}",
                labels.iter().cloned().collect::<Vec<_>>().join(", ")
            );
        }

        Ok(SegmentReport {
            duration_seconds: segment.duration_seconds,
            detections: detections.len(),
            labels: labels.into_iter().collect(),
            recorded,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::Detection;
    use crate::store::StoreError;
    use async_trait::async_trait;
    use std::sync::Mutex;

    fn detection(name: &str, confidence: f32) -> Detection {
        Detection {
            common_name: name.to_string(),
            scientific_name: None,
            confidence,
            start_time: None,
            end_time: None,
        }
    }

    fn segment() -> CandidateSegment {
        let samples: Vec<i16> = (0..4 * 8_000).map(|i| ((i % 64) * 100) as i16).collect();
        CandidateSegment {
            duration_seconds: samples.len() as f64 / 8_000.0,
            samples,
            sample_rate: 8_000,
        }
    }

    fn location() -> Location {
        Location::new(40.44, -79.99).unwrap()
    }

    /// Checks the WAV it is handed and answers with fixed detections
    struct ScriptedClassifier {
        detections: Vec<Detection>,
        seen: Mutex<Vec<(PathBuf, f32)>>,
    }

    #[async_trait]
    impl Classifier for ScriptedClassifier {
        async fn classify(
            &self,
            request: ClassifyRequest<'_>,
        ) -> Result<Vec<Detection>, ClassifierError> {
            let reader = hound::WavReader::open(request.audio_path).unwrap();
            let spec = reader.spec();
            assert_eq!(spec.channels, 1);
            assert_eq!(spec.bits_per_sample, 16);
            assert_eq!(spec.sample_rate, request.sample_rate);
            assert_eq!(reader.len(), 4 * 8_000);

            self.seen
                .lock()
                .unwrap()
                .push((request.audio_path.to_path_buf(), request.min_confidence));
            Ok(self.detections.clone())
        }
    }

    struct FailingClassifier;

    #[async_trait]
    impl Classifier for FailingClassifier {
        async fn classify(
            &self,
            _request: ClassifyRequest<'_>,
        ) -> Result<Vec<Detection>, ClassifierError> {
            Err(ClassifierError::Other("model not loaded".into()))
        }
    }

    #[derive(Default)]
    struct MemoryStore {
        sightings: Mutex<Vec<SightingRecord>>,
        reject: Option<&'static str>,
    }

    #[async_trait]
    impl DetectionStore for MemoryStore {
        async fn record(&self, sighting: &SightingRecord) -> Result<(), StoreError> {
            if self.reject == Some(sighting.label.as_str()) {
                return Err(StoreError::Unavailable("disk full".into()));
            }
            self.sightings.lock().unwrap().push(sighting.clone());
            Ok(())
        }
    }

    fn is_empty(dir: &std::path::Path) -> bool {
        std::fs::read_dir(dir).unwrap().next().is_none()
    }

    #[tokio::test]
    async fn duplicate_labels_are_recorded_once() {
        let scratch = tempfile::tempdir().unwrap();
        let classifier = Arc::new(ScriptedClassifier {
            detections: vec![
                detection("Song Sparrow", 0.9),
                detection("American Robin", 0.4),
                detection("Song Sparrow", 0.7),
            ],
            seen: Mutex::new(Vec::new()),
        });
        let store = Arc::new(MemoryStore::default());
        let reporter = SegmentReporter::new(classifier.clone(), store.clone(), 0.25)
            .with_scratch_dir(scratch.path());

        let report = reporter.report(&segment(), location()).await.unwrap();

        assert_eq!(report.detections, 3);
        assert_eq!(report.labels, vec!["American Robin", "Song Sparrow"]);
        assert_eq!(report.recorded, 2);
        assert!((report.duration_seconds - 4.0).abs() < 1e-12);

        let sightings = store.sightings.lock().unwrap();
        assert_eq!(sightings.len(), 2);
        assert!(sightings.iter().all(|s| s.latitude == 40.44 && s.longitude == -79.99));
        assert!(
            sightings
                .iter()
                .all(|s| s.timestamp.parse::<jiff::Timestamp>().is_ok())
        );

        let seen = classifier.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].1, 0.25);
        assert!(!seen[0].0.exists());
        assert!(is_empty(scratch.path()));
    }

    #[tokio::test]
    async fn classifier_failure_is_surfaced_and_cleans_up() {
        let scratch = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::default());
        let reporter = SegmentReporter::new(Arc::new(FailingClassifier), store.clone(), 0.25)
            .with_scratch_dir(scratch.path());

        let err = reporter.report(&segment(), location()).await.unwrap_err();

        assert!(matches!(err, ReportError::Classify(_)));
        assert!(store.sightings.lock().unwrap().is_empty());
        assert!(is_empty(scratch.path()));
    }

    #[tokio::test]
    async fn store_failure_does_not_stop_other_labels() {
        let scratch = tempfile::tempdir().unwrap();
        let classifier = Arc::new(ScriptedClassifier {
            detections: vec![detection("Blue Jay", 0.8), detection("Tufted Titmouse", 0.6)],
            seen: Mutex::new(Vec::new()),
        });
        let store = Arc::new(MemoryStore {
            reject: Some("Blue Jay"),
            ..Default::default()
        });
        let reporter =
            SegmentReporter::new(classifier, store.clone(), 0.25).with_scratch_dir(scratch.path());

        let report = reporter.report(&segment(), location()).await.unwrap();

        assert_eq!(report.labels, vec!["Blue Jay", "Tufted Titmouse"]);
        assert_eq!(report.recorded, 1);
        let sightings = store.sightings.lock().unwrap();
        assert_eq!(sightings.len(), 1);
        assert_eq!(sightings[0].label, "Tufted Titmouse");
    }

    #[tokio::test]
    async fn no_detections_is_not_an_error() {
        let scratch = tempfile::tempdir().unwrap();
        let classifier = Arc::new(ScriptedClassifier {
            detections: Vec::new(),
            seen: Mutex::new(Vec::new()),
        });
        let store = Arc::new(MemoryStore::default());
        let reporter =
            SegmentReporter::new(classifier, store.clone(), 0.5).with_scratch_dir(scratch.path());

        let report = reporter.report(&segment(), location()).await.unwrap();
        assert!(report.labels.is_empty());
        assert_eq!(report.recorded, 0);
        assert!(is_empty(scratch.path()));
    }
}
