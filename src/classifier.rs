//! Species classifier collaborator
//!
//! The detector never identifies species itself. Accepted segments are
//! written to a WAV file and handed to a [`Classifier`] together with the
//! recording location and time.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use jiff::Zoned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::location::Location;

/// Confidence floor passed to the classifier by convention
pub const DEFAULT_MIN_CONFIDENCE: f32 = 0.25;

pub const DEFAULT_CLASSIFIER_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("failed to read segment audio: {0}")]
    Io(#[from] std::io::Error),
    #[error("classifier request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("classifier returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("classifier error: {0}")]
    Other(String),
}

/// One labeled detection returned by the classifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub common_name: String,
    #[serde(default)]
    pub scientific_name: Option<String>,
    pub confidence: f32,
    #[serde(default)]
    pub start_time: Option<f64>,
    #[serde(default)]
    pub end_time: Option<f64>,
}

/// Everything the classifier gets for one segment
#[derive(Debug, Clone, Copy)]
pub struct ClassifyRequest<'a> {
    /// 16-bit mono PCM WAV at `sample_rate`
    pub audio_path: &'a Path,
    pub sample_rate: u32,
    pub location: Location,
    pub timestamp: &'a Zoned,
    pub min_confidence: f32,
}

#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, request: ClassifyRequest<'_>) -> Result<Vec<Detection>, ClassifierError>;
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ClassifyResponse {
    List(Vec<Detection>),
    Wrapped { detections: Vec<Detection> },
}

impl From<ClassifyResponse> for Vec<Detection> {
    fn from(response: ClassifyResponse) -> Self {
        match response {
            ClassifyResponse::List(detections) => detections,
            ClassifyResponse::Wrapped { detections } => detections,
        }
    }
}

/// Classifier reached over HTTP
///
/// POSTs the WAV body to `endpoint` with `lat`, `lon`, `date`, `week` and
/// `min_conf` query parameters and expects either a JSON array of detections
/// or an object with a `detections` array.
pub struct HttpClassifier {
    client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

impl HttpClassifier {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            timeout,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn query(request: &ClassifyRequest<'_>) -> Vec<(&'static str, String)> {
        // Week number in the 1..=48 scheme used by common bird classifiers
        let date = request.timestamp.date();
        let week = ((date.month() as i32 - 1) * 4 + ((date.day() as i32 - 1) / 7).min(3) + 1).to_string();

        vec![
            ("lat", request.location.latitude.to_string()),
            ("lon", request.location.longitude.to_string()),
            ("date", request.timestamp.strftime("%Y-%m-%d").to_string()),
            ("week", week),
            ("min_conf", request.min_confidence.to_string()),
            ("sample_rate", request.sample_rate.to_string()),
        ]
    }
}

#[async_trait]
impl Classifier for HttpClassifier {
    async fn classify(&self, request: ClassifyRequest<'_>) -> Result<Vec<Detection>, ClassifierError> {
        let body = tokio::fs::read(request.audio_path).await?;
        debug!(
            endpoint = %self.endpoint,
            bytes = body.len(),
            "Sending segment to classifier"
        );

        let response = self
            .client
            .post(&self.endpoint)
            .query(&Self::query(&request))
            .header(reqwest::header::CONTENT_TYPE, "audio/wav")
            .timeout(self.timeout)
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClassifierError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ClassifyResponse = response.json().await?;
        Ok(parsed.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_bare_and_wrapped_responses() {
        let bare = r#"[{"common_name": "American Robin", "confidence": 0.81}]"#;
        let wrapped = r#"{"detections": [{"common_name": "Blue Jay", "scientific_name": "Cyanocitta cristata", "confidence": 0.6, "start_time": 0.0, "end_time": 3.0}]}"#;

        let bare: Vec<Detection> = serde_json::from_str::<ClassifyResponse>(bare).unwrap().into();
        assert_eq!(bare[0].common_name, "American Robin");
        assert_eq!(bare[0].scientific_name, None);

        let wrapped: Vec<Detection> = serde_json::from_str::<ClassifyResponse>(wrapped).unwrap().into();
        assert_eq!(wrapped[0].scientific_name.as_deref(), Some("Cyanocitta cristata"));
        assert_eq!(wrapped[0].end_time, Some(3.0));
    }

    #[test]
    fn query_carries_location_time_and_confidence() {
        let timestamp: Zoned = "2024-05-17T06:30:00-04:00[-04:00]".parse().unwrap();
        let request = ClassifyRequest {
            audio_path: Path::new("segment.wav"),
            sample_rate: 44_100,
            location: Location::new(40.44, -79.99).unwrap(),
            timestamp: &timestamp,
            min_confidence: DEFAULT_MIN_CONFIDENCE,
        };

        let query = HttpClassifier::query(&request);
        let get = |key: &str| {
            query
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.clone())
                .unwrap()
        };

        assert_eq!(get("lat"), "40.44");
        assert_eq!(get("lon"), "-79.99");
        assert_eq!(get("date"), "2024-05-17");
        assert_eq!(get("week"), "19");
        assert_eq!(get("min_conf"), "0.25");
    }
}
