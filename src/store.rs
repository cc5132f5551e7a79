//! Persistence of labeled sightings

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("failed to write sighting log: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to encode sighting: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("sighting store unavailable: {0}")]
    Unavailable(String),
}

/// One species label observed at a place and time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SightingRecord {
    pub label: String,
    pub latitude: f64,
    pub longitude: f64,
    /// RFC 3339 with offset
    pub timestamp: String,
}

#[async_trait]
pub trait DetectionStore: Send + Sync {
    async fn record(&self, sighting: &SightingRecord) -> Result<(), StoreError>;
}

/// Default log location under the platform data directory
pub fn default_store_path() -> Option<PathBuf> {
    ProjectDirs::from("", "", "chirp").map(|dirs| dirs.data_dir().join("sightings.jsonl"))
}

/// Append-only JSON Lines log, one sighting per line
pub struct JsonlStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl DetectionStore for JsonlStore {
    async fn record(&self, sighting: &SightingRecord) -> Result<(), StoreError> {
        let mut line = serde_json::to_vec(sighting)?;
        line.push(b'\n');

        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sighting(label: &str) -> SightingRecord {
        SightingRecord {
            label: label.to_string(),
            latitude: 40.44,
            longitude: -79.99,
            timestamp: "2024-05-17T06:30:00-04:00".to_string(),
        }
    }

    #[tokio::test]
    async fn appends_one_line_per_sighting() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonlStore::new(dir.path().join("nested").join("sightings.jsonl"));

        store.record(&sighting("Northern Cardinal")).await.unwrap();
        store.record(&sighting("Carolina Wren")).await.unwrap();

        let contents = std::fs::read_to_string(store.path()).unwrap();
        let records: Vec<SightingRecord> = contents
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(records, vec![sighting("Northern Cardinal"), sighting("Carolina Wren")]);
    }

    #[test]
    fn default_path_ends_in_log_file() {
        if let Some(path) = default_store_path() {
            assert!(path.ends_with("sightings.jsonl"));
        }
    }
}
