//! File-backed configuration store.
//!
//! The config file lives at `~/.config/famloc/agent.json` by default. Writes go
//! to a sibling temp file created owner-only and are renamed into place.

use super::secret_box::{self, SecretBox};
use super::{AgentConfig, Credentials, normalize_endpoint, normalize_path};
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Environment variable overriding the config file location.
pub const ENV_CONFIG_PATH: &str = "FAMLOC_CONFIG";

/// Environment variable overriding the backend endpoint for one run.
pub const ENV_ENDPOINT: &str = "FAMLOC_ENDPOINT";

const CONFIG_DIR_NAME: &str = "famloc";
const CONFIG_FILE_NAME: &str = "agent.json";

/// On-disk representation. Credentials are SecretBox blobs.
#[derive(Debug, Default, Serialize, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    device_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    device_name: String,
    /// Older agents wrote this as `website`.
    #[serde(default, alias = "website", skip_serializing_if = "String::is_empty")]
    endpoint: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    encrypted_user: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    encrypted_pass: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    skip_tls_verify: Option<bool>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    registry_path: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    location_path: String,
}

/// Loads and saves the single [`AgentConfig`] of this installation.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at `$FAMLOC_CONFIG`, or `<config dir>/famloc/agent.json`.
    pub fn at_default_location() -> Result<Self, ConfigError> {
        if let Ok(path) = std::env::var(ENV_CONFIG_PATH) {
            let path = path.trim();
            if !path.is_empty() {
                tracing::debug!("Using config path from environment: {}", path);
                return Ok(Self::new(path));
            }
        }
        Ok(Self::new(default_config_dir()?.join(CONFIG_FILE_NAME)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Load the config, or a fresh one with a new device id if no file exists.
    ///
    /// Credentials that fail to decrypt are dropped so the user is asked again.
    pub fn load(&self) -> Result<AgentConfig, ConfigError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let config = AgentConfig::fresh();
                tracing::info!(
                    "No config file at {:?}, generated new device ID: {}",
                    self.path,
                    config.device_id
                );
                return Ok(config);
            }
            Err(e) => {
                return Err(ConfigError::Io {
                    path: self.path.clone(),
                    source: e,
                });
            }
        };

        let file: ConfigFile =
            serde_json::from_str(&content).map_err(|e| ConfigError::Parse {
                path: self.path.clone(),
                source: e,
            })?;

        let generated_id = file.device_id.trim().is_empty();
        let device_id = if generated_id {
            let id = uuid::Uuid::new_v4().to_string();
            tracing::info!("Config has no device ID, generated new one: {}", id);
            id
        } else {
            file.device_id
        };

        let username = open_or_empty(&device_id, &file.encrypted_user, "username");
        let password = open_or_empty(&device_id, &file.encrypted_pass, "password");

        tracing::debug!("Config loaded from {:?}", self.path);

        let config = AgentConfig {
            device_id,
            device_name: file.device_name,
            credentials: Credentials { username, password },
            endpoint: normalize_endpoint(&file.endpoint),
            skip_tls_verify: file.skip_tls_verify,
            registry_path: normalize_path(&file.registry_path),
            location_path: normalize_path(&file.location_path),
        };

        // The id must stay stable across loads
        if generated_id {
            self.save(&config)?;
        }

        Ok(config)
    }

    /// Encrypt credentials and atomically replace the config file.
    pub fn save(&self, config: &AgentConfig) -> Result<(), ConfigError> {
        let secrets = SecretBox::for_device(&config.device_id);
        let encrypted_user = seal_unless_empty(&secrets, &config.credentials.username, "username")?;
        let encrypted_pass = seal_unless_empty(&secrets, &config.credentials.password, "password")?;

        let file = ConfigFile {
            device_id: config.device_id.clone(),
            device_name: config.device_name.clone(),
            endpoint: normalize_endpoint(&config.endpoint),
            encrypted_user,
            encrypted_pass,
            skip_tls_verify: config.skip_tls_verify,
            registry_path: normalize_path(&config.registry_path),
            location_path: normalize_path(&config.location_path),
        };

        let json = serde_json::to_string_pretty(&file).map_err(ConfigError::Serialize)?;
        write_atomically(&self.path, json.as_bytes())?;

        tracing::info!("Config saved to: {:?}", self.path);
        Ok(())
    }

    /// Forget the stored credentials, keeping device identity and endpoint.
    pub fn clear_credentials(&self) -> Result<AgentConfig, ConfigError> {
        let mut config = self.load()?;
        config.credentials = Credentials::default();
        self.save(&config)?;
        tracing::info!("Stored credentials cleared");
        Ok(config)
    }
}

/// Endpoint override from `$FAMLOC_ENDPOINT`, normalized. Never persisted.
pub fn endpoint_override() -> Option<String> {
    std::env::var(ENV_ENDPOINT)
        .ok()
        .map(|url| normalize_endpoint(&url))
        .filter(|url| !url.is_empty())
}

/// Get the famloc config directory
fn default_config_dir() -> Result<PathBuf, ConfigError> {
    let config_dir = dirs::config_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join(".config")))
        .ok_or(ConfigError::NoConfigDir)?;
    Ok(config_dir.join(CONFIG_DIR_NAME))
}

fn open_or_empty(device_id: &str, blob: &str, field: &str) -> String {
    if blob.is_empty() {
        return String::new();
    }
    match secret_box::open_with_legacy(blob, device_id) {
        Ok(plaintext) => plaintext,
        Err(e) => {
            tracing::warn!("Stored {} could not be decrypted ({}), it must be re-entered", field, e);
            String::new()
        }
    }
}

fn seal_unless_empty(
    secrets: &SecretBox,
    plaintext: &str,
    field: &'static str,
) -> Result<String, ConfigError> {
    if plaintext.is_empty() {
        return Ok(String::new());
    }
    secrets
        .seal(plaintext)
        .map_err(|source| ConfigError::Seal { field, source })
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> ConfigError + '_ {
    move |source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn create_config_dir(dir: &Path) -> Result<(), ConfigError> {
    if dir.as_os_str().is_empty() || dir.exists() {
        return Ok(());
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        fs::DirBuilder::new()
            .recursive(true)
            .mode(0o700)
            .create(dir)
            .map_err(io_error(dir))
    }

    #[cfg(not(unix))]
    {
        fs::create_dir_all(dir).map_err(io_error(dir))
    }
}

/// Write `contents` to a temp file next to `path`, then rename over it.
fn write_atomically(path: &Path, contents: &[u8]) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        create_config_dir(dir)?;
    }

    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);
    if tmp_path.exists() {
        fs::remove_file(&tmp_path).map_err(io_error(&tmp_path))?;
    }

    {
        let mut options = fs::OpenOptions::new();
        options.write(true).create_new(true);

        // Owner read/write only
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let mut file = options.open(&tmp_path).map_err(io_error(&tmp_path))?;
        file.write_all(contents).map_err(io_error(&tmp_path))?;
        file.sync_all().map_err(io_error(&tmp_path))?;
    }

    fs::rename(&tmp_path, path).map_err(io_error(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn configured(config: &mut AgentConfig) {
        config.device_name = "Laptop".to_string();
        config.endpoint = "https://x".to_string();
        config.skip_tls_verify = Some(false);
        config.registry_path = "/my-family/53/Family".to_string();
        config.location_path = "/my-family/53/Location".to_string();
        config.credentials = Credentials::new("fam", "pw");
    }

    #[test]
    fn missing_file_yields_fresh_config() {
        let dir = TempDir::new().unwrap();
        let store = ConfigStore::new(dir.path().join("agent.json"));

        assert!(!store.exists());
        let config = store.load().unwrap();
        assert!(!config.device_id.is_empty());
        assert!(config.credentials.username.is_empty());
        assert!(config.credentials.password.is_empty());
        assert!(config.endpoint.is_empty());
        assert!(config.needs_configuration());
        // load alone never writes
        assert!(!store.exists());
    }

    #[test]
    fn first_run_configure_save_and_reload() {
        let dir = TempDir::new().unwrap();
        let store = ConfigStore::new(dir.path().join("nested").join("agent.json"));

        let mut config = store.load().unwrap();
        let device_id = config.device_id.clone();
        configured(&mut config);
        store.save(&config).unwrap();

        let reloaded = store.load().unwrap();
        assert_eq!(reloaded.device_id, device_id);
        assert_eq!(reloaded.endpoint, "https://x");
        assert_eq!(reloaded.credentials.username, "fam");
        assert_eq!(reloaded.credentials.password, "pw");
        assert!(!reloaded.needs_configuration());
        assert_eq!(reloaded, config);
    }

    #[test]
    fn credentials_are_not_stored_in_cleartext() {
        let dir = TempDir::new().unwrap();
        let store = ConfigStore::new(dir.path().join("agent.json"));
        let mut config = AgentConfig::fresh();
        configured(&mut config);
        config.credentials = Credentials::new("family-user", "very-secret-pw");
        store.save(&config).unwrap();

        let raw = fs::read_to_string(store.path()).unwrap();
        assert!(!raw.contains("family-user"));
        assert!(!raw.contains("very-secret-pw"));

        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        let blob = value["encrypted_pass"].as_str().unwrap();
        assert_eq!(
            super::super::secret_box::open(blob, &config.device_id).unwrap(),
            "very-secret-pw"
        );
    }

    #[test]
    fn saving_twice_decodes_identically() {
        let dir = TempDir::new().unwrap();
        let store = ConfigStore::new(dir.path().join("agent.json"));
        let mut config = AgentConfig::fresh();
        configured(&mut config);

        store.save(&config).unwrap();
        let first = store.load().unwrap();
        store.save(&config).unwrap();
        let second = store.load().unwrap();

        assert_eq!(first, config);
        assert_eq!(second, config);
    }

    #[test]
    fn unparsable_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("agent.json");
        fs::write(&path, "{ not json").unwrap();

        let err = ConfigStore::new(&path).load().unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn undecryptable_credentials_are_dropped() {
        let dir = TempDir::new().unwrap();
        let store = ConfigStore::new(dir.path().join("agent.json"));
        let mut config = AgentConfig::fresh();
        configured(&mut config);
        store.save(&config).unwrap();

        // Changing the device id invalidates the sealed secrets.
        let raw = fs::read_to_string(store.path()).unwrap();
        let mut value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        value["device_id"] = serde_json::json!("another-device");
        fs::write(store.path(), value.to_string()).unwrap();

        let reloaded = store.load().unwrap();
        assert_eq!(reloaded.device_id, "another-device");
        assert_eq!(reloaded.credentials, Credentials::default());
        assert_eq!(reloaded.endpoint, "https://x");
        assert_eq!(reloaded.missing_fields(), vec!["credentials"]);
    }

    #[test]
    fn legacy_website_key_and_empty_device_id() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("agent.json");
        fs::write(
            &path,
            r#"{"device_id":"","device_name":"Phone","website":"https://legacy.example/","skip_tls_verify":true}"#,
        )
        .unwrap();

        let config = ConfigStore::new(&path).load().unwrap();
        assert!(!config.device_id.is_empty());
        assert_eq!(config.device_name, "Phone");
        assert_eq!(config.endpoint, "https://legacy.example");
        assert_eq!(config.skip_tls_verify, Some(true));
    }

    #[test]
    fn generated_device_id_is_persisted() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("agent.json");
        fs::write(&path, r#"{"device_id":"","device_name":"Phone"}"#).unwrap();
        let store = ConfigStore::new(&path);

        let first = store.load().unwrap();
        let second = store.load().unwrap();
        assert!(!first.device_id.is_empty());
        assert_eq!(first.device_id, second.device_id);

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["device_id"], serde_json::json!(first.device_id));
        assert_eq!(raw["device_name"], serde_json::json!("Phone"));
    }

    #[test]
    fn credentials_from_earlier_agents_are_migrated() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("agent.json");
        let laptop_agent = SecretBox::with_salt("dev-9", secret_box::LEGACY_KEY_SALTS[0]);
        let sealed = |plaintext: &str| laptop_agent.seal(plaintext).unwrap();
        let legacy = serde_json::json!({
            "device_id": "dev-9",
            "website": "https://legacy.example",
            "encrypted_user": sealed("fam"),
            "encrypted_pass": sealed("pw"),
        });
        fs::write(&path, legacy.to_string()).unwrap();
        let store = ConfigStore::new(&path);

        let config = store.load().unwrap();
        assert_eq!(config.credentials, Credentials::new("fam", "pw"));

        // Saving re-seals under the current key
        store.save(&config).unwrap();
        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        let blob = raw["encrypted_pass"].as_str().unwrap();
        assert_eq!(secret_box::open(blob, "dev-9").unwrap(), "pw");
    }

    #[test]
    fn clear_credentials_keeps_identity() {
        let dir = TempDir::new().unwrap();
        let store = ConfigStore::new(dir.path().join("agent.json"));
        let mut config = AgentConfig::fresh();
        configured(&mut config);
        store.save(&config).unwrap();

        let cleared = store.clear_credentials().unwrap();
        assert_eq!(cleared.device_id, config.device_id);
        assert_eq!(store.load().unwrap().credentials, Credentials::default());
    }

    #[cfg(unix)]
    #[test]
    fn config_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let store = ConfigStore::new(dir.path().join("agent.json"));
        let mut config = AgentConfig::fresh();
        configured(&mut config);
        store.save(&config).unwrap();
        store.save(&config).unwrap();

        let mode = fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert!(!dir.path().join("agent.json.tmp").exists());
    }
}
