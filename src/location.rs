use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum LocationError {
    #[error("no location configured; set latitude/longitude in config.toml or pass --lat/--lon")]
    Unconfigured,
    #[error("coordinates out of range: lat {latitude}, lon {longitude}")]
    OutOfRange { latitude: f64, longitude: f64 },
}

/// WGS84 coordinates attached to every detection of a session
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
}

impl Location {
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, LocationError> {
        if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
            return Err(LocationError::OutOfRange {
                latitude,
                longitude,
            });
        }
        Ok(Self {
            latitude,
            longitude,
        })
    }
}

pub trait LocationProvider: Send + Sync {
    fn locate(&self) -> Result<Location, LocationError>;
}

/// Coordinates taken as given from configuration or the command line
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedLocation {
    latitude: Option<f64>,
    longitude: Option<f64>,
}

impl FixedLocation {
    pub fn new(latitude: Option<f64>, longitude: Option<f64>) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

impl LocationProvider for FixedLocation {
    fn locate(&self) -> Result<Location, LocationError> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) => Location::new(lat, lon),
            _ => Err(LocationError::Unconfigured),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_location_requires_both_coordinates() {
        assert_eq!(
            FixedLocation::new(Some(40.0), None).locate(),
            Err(LocationError::Unconfigured)
        );
        let location = FixedLocation::new(Some(40.44), Some(-79.99)).locate().unwrap();
        assert_eq!(location.latitude, 40.44);
        assert_eq!(location.longitude, -79.99);
    }

    #[test]
    fn rejects_impossible_coordinates() {
        assert!(matches!(
            Location::new(91.0, 0.0),
            Err(LocationError::OutOfRange { .. })
        ));
        assert!(Location::new(-90.0, 180.0).is_ok());
    }
}
