//! GeoClue2 system location service.
//!
//! Client protocol: obtain a client from the manager, set `DesktopId` (the
//! daemon's agent may reject unknown ids, so a short list of well-known ids is
//! tried), request EXACT accuracy, start, poll `Location`, read coordinates,
//! stop. The client is stopped on every exit path once obtained.

use super::{Coordinates, LocationSource};
use crate::error::LocationError;
use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;

const NAME: &str = "geoclue";

const GEOCLUE_DEST: &str = "org.freedesktop.GeoClue2";
const MANAGER_PATH: &str = "/org/freedesktop/GeoClue2/Manager";
const CLIENT_PATH_PREFIX: &str = "/org/freedesktop/GeoClue2/Client/";
const OBJECT_PATH_PREFIX: &str = "/org/freedesktop/GeoClue2/";
const CLIENT_IFACE: &str = "org.freedesktop.GeoClue2.Client";
const LOCATION_IFACE: &str = "org.freedesktop.GeoClue2.Location";

/// GClueAccuracyLevel EXACT.
pub const ACCURACY_EXACT: u32 = 8;

/// Desktop ids tried in order until the daemon accepts one.
const DESKTOP_IDS: &[&str] = &[
    "l8myfamily-agent",
    "org.gnome.Shell",
    "gnome-shell",
    "firefox",
    "org.mozilla.firefox",
    "chromium",
    "google-chrome",
];

const POLL_INTERVAL: Duration = Duration::from_millis(500);
const MAX_POLLS: u32 = 30;

const CALL_TIMEOUT: Duration = Duration::from_secs(5);
const INTROSPECT_TIMEOUT: Duration = Duration::from_secs(3);

/// IPC operations against the GeoClue2 daemon.
#[async_trait]
pub trait GeoClueBridge: Send + Sync {
    /// Whether the manager object answers at all.
    async fn is_available(&self) -> bool;

    /// `Manager.GetClient`, returning the client object path.
    async fn get_client(&self) -> Result<String>;

    async fn set_desktop_id(&self, client: &str, desktop_id: &str) -> Result<()>;

    async fn set_accuracy_level(&self, client: &str, level: u32) -> Result<()>;

    async fn start(&self, client: &str) -> Result<()>;

    async fn stop(&self, client: &str) -> Result<()>;

    /// The client's `Location` object path, `None` while no fix exists.
    async fn location_path(&self, client: &str) -> Result<Option<String>>;

    /// A double property (`Latitude`, `Longitude`) of a Location object.
    async fn location_property(&self, location: &str, property: &str) -> Result<f64>;
}

/// Stops the client when dropped unless stopped explicitly first.
struct ClientGuard {
    bridge: Arc<dyn GeoClueBridge>,
    client: Option<String>,
}

impl ClientGuard {
    async fn stop(mut self) {
        if let Some(client) = self.client.take() {
            if let Err(e) = self.bridge.stop(&client).await {
                tracing::debug!("Failed to stop GeoClue client {}: {}", client, e);
            }
        }
    }
}

impl Drop for ClientGuard {
    fn drop(&mut self) {
        let Some(client) = self.client.take() else {
            return;
        };
        // Abandoned mid-walk (timeout or cancellation)
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let bridge = self.bridge.clone();
            handle.spawn(async move {
                if let Err(e) = bridge.stop(&client).await {
                    tracing::debug!("Failed to stop abandoned GeoClue client {}: {}", client, e);
                }
            });
        }
    }
}

/// [`LocationSource`] walking the GeoClue2 client protocol.
pub struct GeoClueSource {
    bridge: Arc<dyn GeoClueBridge>,
    poll_interval: Duration,
    max_polls: u32,
}

impl GeoClueSource {
    pub fn new(bridge: Arc<dyn GeoClueBridge>) -> Self {
        Self {
            bridge,
            poll_interval: POLL_INTERVAL,
            max_polls: MAX_POLLS,
        }
    }

    pub fn with_polling(mut self, interval: Duration, max_polls: u32) -> Self {
        self.poll_interval = interval;
        self.max_polls = max_polls;
        self
    }

    async fn configure_and_poll(&self, client: &str) -> Result<Coordinates> {
        let mut last_err = None;
        let mut accepted = None;
        for desktop_id in DESKTOP_IDS {
            match self.bridge.set_desktop_id(client, desktop_id).await {
                Ok(()) => {
                    accepted = Some(*desktop_id);
                    break;
                }
                Err(e) => last_err = Some(e),
            }
        }
        let desktop_id = accepted.ok_or_else(|| {
            anyhow!(
                "failed to set desktop ID (tried {} options): {}",
                DESKTOP_IDS.len(),
                last_err.map(|e| e.to_string()).unwrap_or_default()
            )
        })?;
        tracing::debug!("GeoClue accepted desktop ID {}", desktop_id);

        self.bridge
            .set_accuracy_level(client, ACCURACY_EXACT)
            .await
            .context("failed to set accuracy level")?;

        self.bridge
            .start(client)
            .await
            .context("failed to start GeoClue client")?;

        for _ in 0..self.max_polls {
            tokio::time::sleep(self.poll_interval).await;

            let location = match self.bridge.location_path(client).await {
                Ok(Some(path)) => path,
                Ok(None) => continue,
                Err(e) => {
                    tracing::trace!("GeoClue location poll failed: {}", e);
                    continue;
                }
            };

            let latitude = self
                .bridge
                .location_property(&location, "Latitude")
                .await
                .context("failed to get latitude")?;
            let longitude = self
                .bridge
                .location_property(&location, "Longitude")
                .await
                .context("failed to get longitude")?;
            return Ok(Coordinates::new(latitude, longitude));
        }

        bail!("timeout waiting for GeoClue location")
    }
}

#[async_trait]
impl LocationSource for GeoClueSource {
    fn name(&self) -> &'static str {
        NAME
    }

    fn timeout(&self) -> Duration {
        // Setup calls plus the full poll budget
        self.poll_interval * self.max_polls + CALL_TIMEOUT * 4
    }

    async fn locate(&self) -> Result<Coordinates, LocationError> {
        if !self.bridge.is_available().await {
            return Err(LocationError::unavailable(NAME, "GeoClue2 service not available"));
        }

        let client = self
            .bridge
            .get_client()
            .await
            .map_err(|e| LocationError::unavailable(NAME, format!("failed to get client: {:#}", e)))?;

        let guard = ClientGuard {
            bridge: self.bridge.clone(),
            client: Some(client.clone()),
        };
        let result = self.configure_and_poll(&client).await;
        guard.stop().await;

        result.map_err(|e| LocationError::unavailable(NAME, format!("{:#}", e)))
    }
}

/// [`GeoClueBridge`] implemented with the `gdbus` command-line tool.
#[derive(Debug, Default, Clone)]
pub struct GdbusBridge;

impl GdbusBridge {
    pub fn new() -> Self {
        Self
    }

    async fn run(args: &[&str], limit: Duration) -> Result<String> {
        let mut cmd = Command::new("gdbus");
        cmd.args(args).kill_on_drop(true);

        let output = tokio::time::timeout(limit, cmd.output())
            .await
            .map_err(|_| anyhow!("gdbus timed out after {}s", limit.as_secs()))?
            .context("failed to run gdbus")?;

        if !output.status.success() {
            bail!("{}", String::from_utf8_lossy(&output.stderr).trim());
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn call(object_path: &str, method: &str, args: &[&str]) -> Result<String> {
        let mut full = vec![
            "call",
            "--system",
            "--dest",
            GEOCLUE_DEST,
            "--object-path",
            object_path,
            "--method",
            method,
        ];
        full.extend_from_slice(args);
        Self::run(&full, CALL_TIMEOUT)
            .await
            .with_context(|| format!("{} on {}", method, object_path))
    }

    async fn set_client_property(client: &str, property: &str, value: &str) -> Result<()> {
        Self::call(
            client,
            "org.freedesktop.DBus.Properties.Set",
            &[CLIENT_IFACE, property, value],
        )
        .await
        .map(|_| ())
    }
}

#[async_trait]
impl GeoClueBridge for GdbusBridge {
    async fn is_available(&self) -> bool {
        Self::run(
            &[
                "introspect",
                "--system",
                "--dest",
                GEOCLUE_DEST,
                "--object-path",
                MANAGER_PATH,
            ],
            INTROSPECT_TIMEOUT,
        )
        .await
        .is_ok()
    }

    async fn get_client(&self) -> Result<String> {
        let output = Self::call(MANAGER_PATH, "org.freedesktop.GeoClue2.Manager.GetClient", &[]).await?;
        parse_object_path(&output, CLIENT_PATH_PREFIX)
            .ok_or_else(|| anyhow!("could not parse client path from: {}", output.trim()))
    }

    async fn set_desktop_id(&self, client: &str, desktop_id: &str) -> Result<()> {
        Self::set_client_property(client, "DesktopId", &format!("<'{}'>", desktop_id)).await
    }

    async fn set_accuracy_level(&self, client: &str, level: u32) -> Result<()> {
        Self::set_client_property(client, "RequestedAccuracyLevel", &format!("<uint32 {}>", level))
            .await
    }

    async fn start(&self, client: &str) -> Result<()> {
        Self::call(client, "org.freedesktop.GeoClue2.Client.Start", &[])
            .await
            .map(|_| ())
    }

    async fn stop(&self, client: &str) -> Result<()> {
        Self::call(client, "org.freedesktop.GeoClue2.Client.Stop", &[])
            .await
            .map(|_| ())
    }

    async fn location_path(&self, client: &str) -> Result<Option<String>> {
        let output = Self::call(
            client,
            "org.freedesktop.DBus.Properties.Get",
            &[CLIENT_IFACE, "Location"],
        )
        .await?;
        Ok(parse_object_path(&output, OBJECT_PATH_PREFIX))
    }

    async fn location_property(&self, location: &str, property: &str) -> Result<f64> {
        let output = Self::call(
            location,
            "org.freedesktop.DBus.Properties.Get",
            &[LOCATION_IFACE, property],
        )
        .await?;
        parse_double(&output).ok_or_else(|| anyhow!("could not parse {} from: {}", property, output.trim()))
    }
}

/// First single-quoted object path in gdbus output starting with `prefix`.
///
/// `(objectpath '/org/freedesktop/GeoClue2/Client/1',)` → `/org/.../Client/1`.
/// The empty path `'/'` never matches.
fn parse_object_path(output: &str, prefix: &str) -> Option<String> {
    output
        .split('\'')
        .skip(1)
        .step_by(2)
        .find(|candidate| candidate.starts_with(prefix) && candidate.len() > prefix.len())
        .map(str::to_string)
}

/// Parse a double from gdbus output: `(<double 37.7749>,)` or `(<37.7749>,)`.
fn parse_double(output: &str) -> Option<f64> {
    output
        .trim()
        .trim_start_matches("(<")
        .trim_start_matches("double ")
        .trim_end_matches(",)")
        .trim_end_matches('>')
        .trim()
        .parse()
        .ok()
}
