//! IP-based geolocation fallback (city-level accuracy).

use super::{Coordinates, LocationSource};
use crate::error::LocationError;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

/// Free IP geolocation endpoint; no key required.
pub const GEOIP_URL: &str = "http://ip-api.com/json/";

const NAME: &str = "ip-geolocation";

#[derive(Debug, Deserialize)]
struct GeoIpResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    message: Option<String>,
    lat: Option<f64>,
    lon: Option<f64>,
}

pub struct GeoIpSource {
    http: reqwest::Client,
    url: String,
}

impl GeoIpSource {
    pub fn new(http: reqwest::Client) -> Self {
        Self {
            http,
            url: GEOIP_URL.to_string(),
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }
}

#[async_trait]
impl LocationSource for GeoIpSource {
    fn name(&self) -> &'static str {
        NAME
    }

    fn timeout(&self) -> Duration {
        crate::cloud::HTTP_TIMEOUT
    }

    async fn locate(&self) -> Result<Coordinates, LocationError> {
        let resp = self
            .http
            .get(&self.url)
            .send()
            .await
            .map_err(|e| LocationError::unavailable(NAME, format!("request failed: {}", e)))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(LocationError::unavailable(
                NAME,
                format!("server returned {}", status),
            ));
        }

        let body: GeoIpResponse = resp
            .json()
            .await
            .map_err(|e| LocationError::unavailable(NAME, format!("failed to parse response: {}", e)))?;

        if body.status.as_deref() == Some("fail") {
            return Err(LocationError::unavailable(
                NAME,
                body.message.unwrap_or_else(|| "lookup failed".to_string()),
            ));
        }

        match (body.lat, body.lon) {
            (Some(lat), Some(lon)) => Ok(Coordinates::new(lat, lon)),
            _ => Err(LocationError::unavailable(NAME, "response has no coordinates")),
        }
    }
}
