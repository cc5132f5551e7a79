use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::audio::frame::{DEFAULT_FRAME_LEN, DEFAULT_SAMPLE_RATE, FrameFormat};
use crate::classifier::{DEFAULT_CLASSIFIER_TIMEOUT, DEFAULT_MIN_CONFIDENCE};
use crate::detector::emitter::DEFAULT_MIN_SEGMENT_SECS;
use crate::detector::segmenter::{DEFAULT_BAND_HIGH_HZ, DEFAULT_BAND_LOW_HZ, DEFAULT_HOLD_LIMIT};
use crate::detector::threshold::{
    DEFAULT_BLEND_FACTOR, DEFAULT_CALIBRATION_DIVISOR, DEFAULT_WARMUP,
};
use crate::detector::{DetectorConfig, NoiseFloorCalibrator, Passband, ThresholdMode};
use crate::location::FixedLocation;
use crate::store::default_store_path;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("could not determine config directory")]
    NoConfigDir,
    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialize settings to TOML: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("invalid setting: {0}")]
    Invalid(String),
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Settings {
    /// Preferred audio input device name
    /// If None, uses system default device
    #[serde(default)]
    pub audio_device: Option<String>,

    /// Capture rate in Hz; the input device must support it
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    /// Samples per analysis frame
    #[serde(default = "default_frame_len")]
    pub frame_len: usize,

    #[serde(default)]
    pub threshold_mode: ThresholdMode,

    /// Noise-floor warm-up window in seconds
    #[serde(default = "default_warmup_secs")]
    pub warmup_secs: f64,

    #[serde(default = "default_calibration_divisor")]
    pub calibration_divisor: f64,

    /// Weight kept by the old threshold on each adaptive update
    #[serde(default = "default_blend_factor")]
    pub blend_factor: f64,

    /// Frames kept after the last strong frame
    #[serde(default = "default_hold_limit")]
    pub hold_limit: usize,

    #[serde(default = "default_band_low_hz")]
    pub band_low_hz: f64,

    #[serde(default = "default_band_high_hz")]
    pub band_high_hz: f64,

    #[serde(default = "default_min_segment_secs")]
    pub min_segment_secs: f64,

    #[serde(default = "default_min_confidence")]
    pub min_confidence: f32,

    /// Classifier URL; segments are only logged when unset
    #[serde(default)]
    pub classifier_endpoint: Option<String>,

    #[serde(default = "default_classifier_timeout_secs")]
    pub classifier_timeout_secs: u64,

    /// Sighting log; defaults to the platform data directory
    #[serde(default)]
    pub store_path: Option<PathBuf>,

    #[serde(default)]
    pub latitude: Option<f64>,

    #[serde(default)]
    pub longitude: Option<f64>,

    /// IANA zone for sighting timestamps, e.g. "America/New_York"
    #[serde(default)]
    pub timezone: Option<String>,
}

fn default_sample_rate() -> u32 {
    DEFAULT_SAMPLE_RATE
}

fn default_frame_len() -> usize {
    DEFAULT_FRAME_LEN
}

fn default_warmup_secs() -> f64 {
    DEFAULT_WARMUP.as_secs_f64()
}

fn default_calibration_divisor() -> f64 {
    DEFAULT_CALIBRATION_DIVISOR
}

fn default_blend_factor() -> f64 {
    DEFAULT_BLEND_FACTOR
}

fn default_hold_limit() -> usize {
    DEFAULT_HOLD_LIMIT
}

fn default_band_low_hz() -> f64 {
    DEFAULT_BAND_LOW_HZ
}

fn default_band_high_hz() -> f64 {
    DEFAULT_BAND_HIGH_HZ
}

fn default_min_segment_secs() -> f64 {
    DEFAULT_MIN_SEGMENT_SECS
}

fn default_min_confidence() -> f32 {
    DEFAULT_MIN_CONFIDENCE
}

fn default_classifier_timeout_secs() -> u64 {
    DEFAULT_CLASSIFIER_TIMEOUT.as_secs()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            audio_device: None,
            sample_rate: default_sample_rate(),
            frame_len: default_frame_len(),
            threshold_mode: ThresholdMode::default(),
            warmup_secs: default_warmup_secs(),
            calibration_divisor: default_calibration_divisor(),
            blend_factor: default_blend_factor(),
            hold_limit: default_hold_limit(),
            band_low_hz: default_band_low_hz(),
            band_high_hz: default_band_high_hz(),
            min_segment_secs: default_min_segment_secs(),
            min_confidence: default_min_confidence(),
            classifier_endpoint: None,
            classifier_timeout_secs: default_classifier_timeout_secs(),
            store_path: None,
            latitude: None,
            longitude: None,
            timezone: None,
        }
    }
}

impl Settings {
    /// Load config from the platform config directory
    /// Returns default settings if file doesn't exist or fails to parse
    pub fn load() -> Self {
        let Some(path) = config_path() else {
            warn!("Could not determine config directory, using defaults");
            return Self::default();
        };

        if !path.exists() {
            info!("No config file found at {}, using defaults", path.display());
            return Self::default();
        }

        match Self::load_from(&path) {
            Ok(settings) => {
                info!("Loaded settings from: {}", path.display());
                settings
            }
            Err(e) => {
                warn!("{}, using defaults", e);
                Self::default()
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(toml::from_str(&contents)?)
    }

    /// Save config to the platform config directory
    pub fn save(&self) -> Result<PathBuf, ConfigError> {
        let path = config_path().ok_or(ConfigError::NoConfigDir)?;
        self.save_to(&path)?;
        info!("Saved settings to: {}", path.display());
        Ok(path)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| ConfigError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let toml = self.to_toml()?;
        fs::write(path, toml).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Reject values the detector cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sample_rate == 0 {
            return Err(ConfigError::Invalid("sample_rate must be positive".into()));
        }
        if self.frame_len < 2 {
            return Err(ConfigError::Invalid("frame_len must be at least 2".into()));
        }
        if !(0.0..=1.0).contains(&self.blend_factor) {
            return Err(ConfigError::Invalid(format!(
                "blend_factor must be within [0, 1], got {}",
                self.blend_factor
            )));
        }
        if self.calibration_divisor <= 0.0 {
            return Err(ConfigError::Invalid(
                "calibration_divisor must be positive".into(),
            ));
        }
        if self.warmup_secs < 0.0 || !self.warmup_secs.is_finite() {
            return Err(ConfigError::Invalid(
                "warmup_secs must be a finite non-negative number".into(),
            ));
        }
        if self.hold_limit == 0 {
            return Err(ConfigError::Invalid("hold_limit must be at least 1".into()));
        }
        if self.band_low_hz > self.band_high_hz {
            return Err(ConfigError::Invalid(format!(
                "band_low_hz ({}) is above band_high_hz ({})",
                self.band_low_hz, self.band_high_hz
            )));
        }
        Ok(())
    }

    pub fn format(&self) -> FrameFormat {
        FrameFormat::new(self.sample_rate, self.frame_len)
    }

    /// Detector parameters for a session running at `sample_rate`
    pub fn detector_config(&self, sample_rate: u32) -> DetectorConfig {
        DetectorConfig {
            format: FrameFormat::new(sample_rate, self.frame_len),
            hold_limit: self.hold_limit,
            passband: Passband::new(self.band_low_hz, self.band_high_hz),
            min_segment_secs: self.min_segment_secs,
        }
    }

    pub fn calibrator(&self) -> NoiseFloorCalibrator {
        NoiseFloorCalibrator::new(
            Duration::from_secs_f64(self.warmup_secs),
            self.calibration_divisor,
        )
    }

    pub fn location(&self) -> FixedLocation {
        FixedLocation::new(self.latitude, self.longitude)
    }

    pub fn classifier_timeout(&self) -> Duration {
        Duration::from_secs(self.classifier_timeout_secs)
    }

    pub fn resolved_store_path(&self) -> Option<PathBuf> {
        self.store_path.clone().or_else(default_store_path)
    }
}

/// Get the path to the config file: ~/.config/chirp/config.toml
pub fn config_path() -> Option<PathBuf> {
    ProjectDirs::from("", "", "chirp").map(|dirs| dirs.config_dir().join("config.toml"))
}
