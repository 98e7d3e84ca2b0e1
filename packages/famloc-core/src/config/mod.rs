//! Agent configuration: device identity, credentials, backend endpoint.
//!
//! Persisted as one JSON file per installation with credentials encrypted by
//! [`secret_box`]. See [`ConfigStore`].

pub mod secret_box;
mod store;

pub use secret_box::SecretBox;
pub use store::{ConfigStore, ENV_CONFIG_PATH, ENV_ENDPOINT, endpoint_override};

use serde::{Deserialize, Serialize};

/// Stable identity of this device as known to the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceIdentity {
    pub id: String,
    pub name: String,
    /// Family this device belongs to; the authenticated username.
    pub family_id: String,
}

/// Username/password pair. Cleartext in memory only.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn is_complete(&self) -> bool {
        !self.username.is_empty() && !self.password.is_empty()
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Everything the agent needs to run, as loaded from disk.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentConfig {
    pub device_id: String,
    pub device_name: String,
    pub credentials: Credentials,
    /// Backend base URL, without trailing slash.
    pub endpoint: String,
    /// `None` until the user has been asked whether to verify certificates.
    pub skip_tls_verify: Option<bool>,
    /// Device registry path below `endpoint`, e.g. `/my-family/53/Family`.
    pub registry_path: String,
    /// Location post path below `endpoint`, e.g. `/my-family/53/Location`.
    pub location_path: String,
}

impl AgentConfig {
    /// A config for a first run: fresh device id, everything else empty.
    pub fn fresh() -> Self {
        Self {
            device_id: uuid::Uuid::new_v4().to_string(),
            device_name: String::new(),
            credentials: Credentials::default(),
            endpoint: String::new(),
            skip_tls_verify: None,
            registry_path: String::new(),
            location_path: String::new(),
        }
    }

    /// The identity registered with the backend.
    pub fn identity(&self) -> DeviceIdentity {
        DeviceIdentity {
            id: self.device_id.clone(),
            name: self.device_name.clone(),
            family_id: self.credentials.username.clone(),
        }
    }

    pub fn skip_tls_verify(&self) -> bool {
        self.skip_tls_verify.unwrap_or(false)
    }

    /// Fields that still have to be supplied before the agent can run.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.device_name.trim().is_empty() {
            missing.push("device_name");
        }
        if self.endpoint.is_empty() {
            missing.push("endpoint");
        }
        if self.skip_tls_verify.is_none() {
            missing.push("skip_tls_verify");
        }
        if self.registry_path.is_empty() {
            missing.push("registry_path");
        }
        if self.location_path.is_empty() {
            missing.push("location_path");
        }
        if !self.credentials.is_complete() {
            missing.push("credentials");
        }
        missing
    }

    pub fn needs_configuration(&self) -> bool {
        !self.missing_fields().is_empty()
    }

    /// Join a configured path onto the endpoint.
    pub fn url_for(&self, path: &str) -> String {
        join_url(&self.endpoint, path)
    }
}

/// Trim whitespace and trailing slashes from a base URL.
pub fn normalize_endpoint(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

/// Normalize a path so it starts with exactly one `/`.
pub fn normalize_path(path: &str) -> String {
    let trimmed = path.trim().trim_start_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{}", trimmed)
    }
}

pub(crate) fn join_url(base: &str, path: &str) -> String {
    format!("{}{}", base.trim_end_matches('/'), normalize_path(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_config_needs_everything() {
        let config = AgentConfig::fresh();
        assert!(!config.device_id.is_empty());
        assert_eq!(
            config.missing_fields(),
            vec![
                "device_name",
                "endpoint",
                "skip_tls_verify",
                "registry_path",
                "location_path",
                "credentials"
            ]
        );
        assert!(!config.skip_tls_verify());
    }

    #[test]
    fn fresh_ids_are_unique() {
        assert_ne!(AgentConfig::fresh().device_id, AgentConfig::fresh().device_id);
    }

    #[test]
    fn identity_uses_username_as_family() {
        let mut config = AgentConfig::fresh();
        config.device_name = "Laptop".to_string();
        config.credentials = Credentials::new("fam", "pw");
        let identity = config.identity();
        assert_eq!(identity.id, config.device_id);
        assert_eq!(identity.name, "Laptop");
        assert_eq!(identity.family_id, "fam");
    }

    #[test]
    fn credentials_debug_redacts_password() {
        let creds = Credentials::new("fam", "secret-pw");
        let debug = format!("{:?}", creds);
        assert!(debug.contains("fam"));
        assert!(!debug.contains("secret-pw"));
    }

    #[test]
    fn url_joining() {
        assert_eq!(normalize_endpoint(" https://x.example/ "), "https://x.example");
        assert_eq!(normalize_path("my-family/53/Family"), "/my-family/53/Family");
        assert_eq!(normalize_path("//auth"), "/auth");
        assert_eq!(join_url("https://x/", "/auth"), "https://x/auth");
    }
}
