//! Minimum-duration acceptance of closed segments

use tracing::trace;

/// Segments must be strictly longer than this to be classified
pub const DEFAULT_MIN_SEGMENT_SECS: f64 = 3.0;

/// A closed segment long enough to be worth classifying
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateSegment {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
    pub duration_seconds: f64,
}

#[derive(Debug, Clone)]
pub struct SegmentEmitter {
    sample_rate: u32,
    min_duration_secs: f64,
}

impl SegmentEmitter {
    pub fn new(sample_rate: u32, min_duration_secs: f64) -> Self {
        Self {
            sample_rate,
            min_duration_secs,
        }
    }

    pub fn duration_of(&self, samples: usize) -> f64 {
        samples as f64 / self.sample_rate as f64
    }

    /// Accept or silently drop a closed segment
    pub fn finish(&self, samples: Vec<i16>) -> Option<CandidateSegment> {
        let duration_seconds = self.duration_of(samples.len());
        if duration_seconds > self.min_duration_secs {
            Some(CandidateSegment {
                samples,
                sample_rate: self.sample_rate,
                duration_seconds,
            })
        } else {
            trace!(duration_seconds, "Dropping short segment");
            None
        }
    }
}
