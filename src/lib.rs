//! Acoustic event detection for bird calls
//!
//! Audio frames are analyzed one at a time for their dominant frequency and
//! peak power, segmented with a hysteresis state machine, and segments long
//! enough to hold a call are handed to an external species classifier.

pub mod audio;
pub mod classifier;
pub mod conf;
pub mod detector;
pub mod location;
pub mod pipeline;
pub mod report;
pub mod store;

pub use audio::{Frame, FrameFormat, FrameSource, MemorySource, SpectralAnalyzer, SpectralVerdict};
pub use classifier::{Classifier, ClassifierError, ClassifyRequest, Detection, HttpClassifier};
pub use conf::Settings;
pub use detector::{CandidateSegment, Detector, DetectorConfig, RunSummary, ThresholdMode};
pub use location::{FixedLocation, Location, LocationProvider};
pub use pipeline::{ClipAnalysis, Reporting, Session, analyze_clip, listen};
pub use report::{SegmentReport, SegmentReporter};
pub use store::{DetectionStore, JsonlStore, SightingRecord};
