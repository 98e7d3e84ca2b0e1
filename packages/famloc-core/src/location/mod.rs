//! Location acquisition.
//!
//! Sources are tried in preference order, each bounded by its own timeout:
//! - `where-am-i` (GeoClue demo client)
//! - GeoClue2 over D-Bus (client protocol walk via `gdbus`)
//! - IP geolocation (city-level, works on any networked host)

mod geoclue;
mod geoip;
mod where_am_i;

pub use geoclue::{GdbusBridge, GeoClueBridge, GeoClueSource};
pub use geoip::{GEOIP_URL, GeoIpSource};
pub use where_am_i::WhereAmISource;

use crate::error::LocationError;
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

/// A latitude/longitude pair in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Finite and within WGS84 bounds.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

impl std::fmt::Display for Coordinates {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "lat={:.6}, lon={:.6}", self.latitude, self.longitude)
    }
}

/// One location reading for one device, as posted to the backend.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocationSample {
    pub device_id: String,
    pub latitude: f64,
    pub longitude: f64,
}

impl LocationSample {
    pub fn new(device_id: impl Into<String>, latitude: f64, longitude: f64) -> Self {
        Self {
            device_id: device_id.into(),
            latitude,
            longitude,
        }
    }

    pub fn from_coordinates(device_id: impl Into<String>, coordinates: Coordinates) -> Self {
        Self::new(device_id, coordinates.latitude, coordinates.longitude)
    }

    pub fn coordinates(&self) -> Coordinates {
        Coordinates::new(self.latitude, self.longitude)
    }
}

/// One way of obtaining the device's position.
#[async_trait]
pub trait LocationSource: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Upper bound for a single [`LocationSource::locate`] attempt.
    fn timeout(&self) -> Duration;

    async fn locate(&self) -> Result<Coordinates, LocationError>;
}

/// A successful acquisition and the source that produced it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocationFix {
    pub coordinates: Coordinates,
    pub source: &'static str,
}

/// Ordered list of sources; the first success wins.
pub struct LocationChain {
    sources: Vec<Box<dyn LocationSource>>,
}

impl LocationChain {
    pub fn new(sources: Vec<Box<dyn LocationSource>>) -> Self {
        Self { sources }
    }

    /// where-am-i, then GeoClue over D-Bus, then IP geolocation.
    pub fn system_default() -> reqwest::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(crate::cloud::HTTP_TIMEOUT)
            .build()?;
        Ok(Self::new(vec![
            Box::new(WhereAmISource::new()),
            Box::new(GeoClueSource::new(std::sync::Arc::new(GdbusBridge::new()))),
            Box::new(GeoIpSource::new(http)),
        ]))
    }

    pub fn source_names(&self) -> Vec<&'static str> {
        self.sources.iter().map(|s| s.name()).collect()
    }

    /// Try each source in order until one yields valid coordinates.
    pub async fn acquire(&self) -> Result<LocationFix, LocationError> {
        let mut failures = Vec::with_capacity(self.sources.len());

        for source in &self.sources {
            let name = source.name();
            let limit = source.timeout();

            let result = match tokio::time::timeout(limit, source.locate()).await {
                Ok(result) => result,
                Err(_) => Err(LocationError::TimedOut {
                    source_name: name,
                    secs: limit.as_secs(),
                }),
            };

            match result {
                Ok(coordinates) if coordinates.is_valid() => {
                    tracing::info!("Location obtained via {}", name);
                    return Ok(LocationFix {
                        coordinates,
                        source: name,
                    });
                }
                Ok(coordinates) => {
                    tracing::warn!("{} returned invalid coordinates ({})", name, coordinates);
                    failures.push(format!("{}: invalid coordinates", name));
                }
                Err(e) => {
                    tracing::debug!("{} failed: {}, trying next source", name, e);
                    failures.push(e.to_string());
                }
            }
        }

        Err(LocationError::NoLocationAvailable(failures))
    }
}
