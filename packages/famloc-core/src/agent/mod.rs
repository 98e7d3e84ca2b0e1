//! The long-running agent: authenticate, register, then post the device's
//! location on a fixed interval until cancelled.
//!
//! Token rejection during a cycle triggers exactly one re-authentication and
//! one retry. A second rejection skips the cycle; the next tick starts over.

use crate::auth::{AuthClient, AuthOutcome};
use crate::cloud::{CloudClient, build_http_client};
use crate::config::{AgentConfig, Credentials, DeviceIdentity};
use crate::error::{ApiError, AuthError, ConfigError, StartupError};
use crate::location::{LocationChain, LocationFix, LocationSample};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Default time between location posts.
pub const POST_INTERVAL: Duration = Duration::from_secs(10);

/// Codes the user may enter before startup gives up.
pub const MAX_SECOND_FACTOR_ATTEMPTS: u32 = 3;

/// Source of second-factor codes during startup, usually an interactive prompt.
#[async_trait]
pub trait SecondFactorPrompt: Send + Sync {
    /// Ask for a code. `attempt` starts at 1. `None` aborts startup.
    async fn second_factor_code(&self, attempt: u32) -> Option<String>;
}

/// What a single cycle did.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    Posted {
        fix: LocationFix,
        reauthenticated: bool,
    },
    NoLocation,
    Skipped {
        reason: String,
    },
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct LoopStats {
    pub cycles: u64,
    pub posted: u64,
    pub no_location: u64,
    pub skipped: u64,
    pub reauthentications: u64,
    pub last_posted_at: Option<DateTime<Utc>>,
}

pub struct AgentLoop {
    identity: DeviceIdentity,
    credentials: Credentials,
    auth: AuthClient,
    cloud: CloudClient,
    chain: LocationChain,
    interval: Duration,
    registered: bool,
    stats: LoopStats,
}

impl AgentLoop {
    /// Build the loop from a complete configuration.
    pub fn new(config: &AgentConfig, chain: LocationChain) -> Result<Self, StartupError> {
        let missing: Vec<&'static str> = config
            .missing_fields()
            .into_iter()
            .filter(|field| !matches!(*field, "device_name" | "skip_tls_verify"))
            .collect();
        if !missing.is_empty() {
            return Err(ConfigError::Incomplete(missing).into());
        }

        let http = build_http_client(config.skip_tls_verify()).map_err(StartupError::Http)?;

        Ok(Self {
            identity: config.identity(),
            credentials: config.credentials.clone(),
            auth: AuthClient::new(http.clone(), &config.endpoint)
                .with_credentials(config.credentials.clone()),
            cloud: CloudClient::new(http, config),
            chain,
            interval: POST_INTERVAL,
            registered: false,
            stats: LoopStats::default(),
        })
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn auth(&self) -> &AuthClient {
        &self.auth
    }

    pub fn stats(&self) -> &LoopStats {
        &self.stats
    }

    pub fn is_registered(&self) -> bool {
        self.registered
    }

    /// Authenticate (completing a second factor through `prompt` if asked to),
    /// then register the device.
    pub async fn start(&mut self, prompt: &dyn SecondFactorPrompt) -> Result<(), StartupError> {
        let outcome = self
            .auth
            .authenticate(&self.credentials.username, &self.credentials.password)
            .await?;

        match outcome {
            AuthOutcome::Authenticated => {}
            AuthOutcome::SecondFactorSetupRequired => {
                return Err(StartupError::SecondFactorSetupRequired);
            }
            AuthOutcome::SecondFactorRequired => self.complete_second_factor(prompt).await?,
        }

        self.register().await.map_err(StartupError::Registration)
    }

    async fn complete_second_factor(
        &mut self,
        prompt: &dyn SecondFactorPrompt,
    ) -> Result<(), StartupError> {
        for attempt in 1..=MAX_SECOND_FACTOR_ATTEMPTS {
            let Some(code) = prompt.second_factor_code(attempt).await else {
                return Err(StartupError::SecondFactorAborted);
            };

            match self.auth.verify_second_factor(&code).await {
                Ok(()) => return Ok(()),
                Err(e @ (AuthError::InvalidCode | AuthError::Verification(_)))
                    if attempt < MAX_SECOND_FACTOR_ATTEMPTS =>
                {
                    tracing::warn!(
                        "{} ({} of {} attempts)",
                        e,
                        attempt,
                        MAX_SECOND_FACTOR_ATTEMPTS
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(StartupError::SecondFactorAborted)
    }

    async fn register(&mut self) -> Result<(), ApiError> {
        let token = self.auth.bearer_token().unwrap_or_default().to_string();
        self.cloud.register_device(&self.identity, &token).await?;
        self.registered = true;
        Ok(())
    }

    /// Register if still needed, then post.
    async fn deliver(&mut self, sample: &LocationSample) -> Result<(), ApiError> {
        if !self.registered {
            self.register().await?;
        }
        let token = self.auth.bearer_token().unwrap_or_default().to_string();
        self.cloud.post_location(sample, &token).await
    }

    async fn try_reauthenticate(&mut self) -> Result<(), String> {
        self.stats.reauthentications += 1;
        match self.auth.reauthenticate().await {
            Ok(AuthOutcome::Authenticated) => Ok(()),
            Ok(AuthOutcome::SecondFactorRequired) => {
                self.auth.invalidate();
                Err("re-authentication requires a second-factor code".to_string())
            }
            Ok(AuthOutcome::SecondFactorSetupRequired) => {
                Err("re-authentication requires second-factor enrollment".to_string())
            }
            Err(e) => Err(format!("re-authentication failed: {}", e)),
        }
    }

    async fn cycle(&mut self) -> CycleOutcome {
        let fix = match self.chain.acquire().await {
            Ok(fix) => fix,
            Err(e) => {
                tracing::warn!("Error getting location: {}", e);
                return CycleOutcome::NoLocation;
            }
        };

        let sample = LocationSample::from_coordinates(&self.identity.id, fix.coordinates);

        let err = match self.deliver(&sample).await {
            Ok(()) => {
                return CycleOutcome::Posted {
                    fix,
                    reauthenticated: false,
                };
            }
            Err(e) => e,
        };

        if !err.is_unauthorized() {
            tracing::warn!("Error posting location: {}", err);
            return CycleOutcome::Skipped {
                reason: err.to_string(),
            };
        }

        tracing::warn!("Token rejected ({}), re-authenticating", err);
        if let Err(reason) = self.try_reauthenticate().await {
            tracing::warn!("Skipping cycle: {}", reason);
            return CycleOutcome::Skipped { reason };
        }

        match self.deliver(&sample).await {
            Ok(()) => CycleOutcome::Posted {
                fix,
                reauthenticated: true,
            },
            Err(e) => {
                tracing::warn!("Error posting location after re-authentication: {}", e);
                CycleOutcome::Skipped {
                    reason: e.to_string(),
                }
            }
        }
    }

    /// Acquire one fix and post it.
    pub async fn run_cycle(&mut self) -> CycleOutcome {
        let outcome = self.cycle().await;

        self.stats.cycles += 1;
        match &outcome {
            CycleOutcome::Posted { fix, .. } => {
                self.stats.posted += 1;
                self.stats.last_posted_at = Some(Utc::now());
                tracing::info!("Posted location via {}: {}", fix.source, fix.coordinates);
            }
            CycleOutcome::NoLocation => self.stats.no_location += 1,
            CycleOutcome::Skipped { .. } => self.stats.skipped += 1,
        }

        outcome
    }

    /// Run cycles until `cancel` fires. The first cycle starts immediately;
    /// an in-flight cycle is abandoned on cancellation.
    pub async fn run(&mut self, cancel: CancellationToken) -> LoopStats {
        tracing::info!(
            "Starting location agent for device {} every {}s",
            self.identity.id,
            self.interval.as_secs_f64()
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::info!("Shutdown requested, abandoning in-flight cycle");
                    break;
                }
                _ = self.run_cycle() => {}
            }
        }

        tracing::info!(
            "Agent stopped after {} cycles ({} posted)",
            self.stats.cycles,
            self.stats.posted
        );
        self.stats.clone()
    }
}
