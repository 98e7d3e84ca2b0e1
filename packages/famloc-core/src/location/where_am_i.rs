//! Location via `where-am-i` from the GeoClue demo tools, when installed.

use super::{Coordinates, LocationSource};
use crate::error::LocationError;
use async_trait::async_trait;
use std::time::Duration;
use tokio::process::Command;

const NAME: &str = "where-am-i";

/// Seconds `where-am-i` itself waits for a fix.
const FIX_TIMEOUT_SECS: u64 = 10;

pub struct WhereAmISource {
    timeout: Duration,
}

impl WhereAmISource {
    pub fn new() -> Self {
        Self {
            timeout: Duration::from_secs(30),
        }
    }
}

impl Default for WhereAmISource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LocationSource for WhereAmISource {
    fn name(&self) -> &'static str {
        NAME
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn locate(&self) -> Result<Coordinates, LocationError> {
        let output = Command::new("where-am-i")
            .args(["-t", &FIX_TIMEOUT_SECS.to_string()])
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| LocationError::unavailable(NAME, format!("failed to run: {}", e)))?;

        if !output.status.success() {
            return Err(LocationError::unavailable(
                NAME,
                format!("exited with {}", output.status),
            ));
        }

        parse_where_am_i(&String::from_utf8_lossy(&output.stdout))
            .ok_or_else(|| LocationError::unavailable(NAME, "could not parse location from output"))
    }
}

/// Extract the first `Latitude:` and `Longitude:` values.
fn parse_where_am_i(output: &str) -> Option<Coordinates> {
    let latitude = labelled_number(output, "Latitude:")?;
    let longitude = labelled_number(output, "Longitude:")?;
    Some(Coordinates::new(latitude, longitude))
}

fn labelled_number(output: &str, label: &str) -> Option<f64> {
    let start = output.find(label)? + label.len();
    let number: String = output[start..]
        .trim_start()
        .chars()
        .take_while(|c| c.is_ascii_digit() || matches!(c, '.' | '-' | '+'))
        .collect();
    number.parse().ok()
}
