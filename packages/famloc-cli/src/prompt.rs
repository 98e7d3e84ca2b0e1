//! Interactive terminal prompts for first-run configuration and second-factor codes.

use anyhow::{Context, Result};
use async_trait::async_trait;
use dialoguer::{Confirm, Input, Password};
use famloc_core::SecondFactorPrompt;
use famloc_core::agent::MAX_SECOND_FACTOR_ATTEMPTS;
use famloc_core::config::{AgentConfig, Credentials, normalize_endpoint, normalize_path};

/// Ask for every field the config is missing, or for all of them with `reset`.
///
/// The device id is never prompted for. Returns whether anything was entered.
pub fn configure(config: &mut AgentConfig, reset: bool) -> Result<bool> {
    let missing = config.missing_fields();
    let wants = |field: &str| reset || missing.iter().any(|m| *m == field);
    let mut changed = false;

    if wants("device_name") {
        config.device_name = ask_text("Device name", &config.device_name)?;
        changed = true;
    }

    if wants("endpoint") {
        let endpoint = ask_text("Backend URL (e.g. https://family.example.org)", &config.endpoint)?;
        config.endpoint = normalize_endpoint(&endpoint);
        changed = true;
    }

    if wants("skip_tls_verify") {
        let skip = Confirm::new()
            .with_prompt("Skip TLS certificate verification (self-signed server)?")
            .default(config.skip_tls_verify())
            .interact()
            .context("Failed to read TLS choice")?;
        config.skip_tls_verify = Some(skip);
        changed = true;
    }

    if wants("registry_path") {
        let path = ask_text("Device registry path (e.g. /my-family/53/Family)", &config.registry_path)?;
        config.registry_path = normalize_path(&path);
        changed = true;
    }

    if wants("location_path") {
        let path = ask_text("Location path (e.g. /my-family/53/Location)", &config.location_path)?;
        config.location_path = normalize_path(&path);
        changed = true;
    }

    if wants("credentials") {
        let username = ask_text("Username", &config.credentials.username)?;
        let password = Password::new()
            .with_prompt("Password")
            .interact()
            .context("Failed to read password")?;
        config.credentials = Credentials::new(username, password);
        changed = true;
    }

    Ok(changed)
}

fn ask_text(prompt: &str, current: &str) -> Result<String> {
    let mut input = Input::<String>::new().with_prompt(prompt);
    if !current.is_empty() {
        input = input.default(current.to_string());
    }
    let value = input
        .interact_text()
        .with_context(|| format!("Failed to read {}", prompt))?;
    Ok(value.trim().to_string())
}

/// Reads second-factor codes from the terminal.
pub struct TerminalPrompt;

#[async_trait]
impl SecondFactorPrompt for TerminalPrompt {
    async fn second_factor_code(&self, attempt: u32) -> Option<String> {
        let prompt = if attempt == 1 {
            "Enter your 6-digit authenticator code".to_string()
        } else {
            format!(
                "Enter your 6-digit authenticator code (attempt {} of {})",
                attempt, MAX_SECOND_FACTOR_ATTEMPTS
            )
        };

        let answer = tokio::task::spawn_blocking(move || {
            Input::<String>::new().with_prompt(prompt).interact_text()
        })
        .await;

        match answer {
            Ok(Ok(code)) => Some(code),
            Ok(Err(e)) => {
                tracing::warn!("Failed to read authenticator code: {}", e);
                None
            }
            Err(e) => {
                tracing::warn!("Prompt task failed: {}", e);
                None
            }
        }
    }
}
