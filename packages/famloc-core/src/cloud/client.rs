use crate::config::{AgentConfig, DeviceIdentity};
use crate::error::ApiError;
use crate::location::LocationSample;
use serde::Serialize;
use std::time::Duration;

/// Per-request timeout for every backend call.
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Build the shared HTTP client, optionally accepting invalid certificates.
pub fn build_http_client(skip_tls_verify: bool) -> reqwest::Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder().timeout(HTTP_TIMEOUT);
    if skip_tls_verify {
        tracing::warn!("TLS certificate verification is disabled for the backend");
        builder = builder.danger_accept_invalid_certs(true);
    }
    builder.build()
}

/// Client for the authenticated backend endpoints.
#[derive(Debug, Clone)]
pub struct CloudClient {
    http: reqwest::Client,
    registry_url: String,
    location_url: String,
}

impl CloudClient {
    pub fn new(http: reqwest::Client, config: &AgentConfig) -> Self {
        Self {
            http,
            registry_url: config.url_for(&config.registry_path),
            location_url: config.url_for(&config.location_path),
        }
    }

    /// Register or update this device's identity record.
    pub async fn register_device(
        &self,
        identity: &DeviceIdentity,
        token: &str,
    ) -> Result<(), ApiError> {
        tracing::debug!("Registering device {} at {}", identity.id, self.registry_url);
        self.post_json(&self.registry_url, identity, token).await?;
        tracing::info!("Device registered: {} ({})", identity.name, identity.id);
        Ok(())
    }

    /// Post one location sample.
    pub async fn post_location(&self, sample: &LocationSample, token: &str) -> Result<(), ApiError> {
        self.post_json(&self.location_url, sample, token).await?;
        tracing::debug!(
            "Posted location: lat={:.6}, lon={:.6}",
            sample.latitude,
            sample.longitude
        );
        Ok(())
    }

    async fn post_json<T: Serialize + ?Sized>(
        &self,
        url: &str,
        payload: &T,
        token: &str,
    ) -> Result<(), ApiError> {
        if token.is_empty() {
            return Err(ApiError::NotAuthenticated);
        }

        let resp = self
            .http
            .post(url)
            .bearer_auth(token)
            .json(payload)
            .send()
            .await?;

        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }

        let body = resp.text().await.unwrap_or_default();
        match status.as_u16() {
            401 | 403 => Err(ApiError::Unauthorized {
                status: status.as_u16(),
                body,
            }),
            code => {
                tracing::error!("Request to {} failed: {} - {}", url, status, body);
                Err(ApiError::Server { status: code, body })
            }
        }
    }
}
