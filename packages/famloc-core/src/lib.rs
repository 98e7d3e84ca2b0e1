//! Famloc Core Library
//!
//! This crate provides the core functionality for the family-location agent:
//! - Configuration persisted as JSON with device-bound encrypted credentials
//! - Bearer-token authentication with second-factor step-up
//! - Device registration and location posting against the family backend
//! - Location acquisition with ordered fallback (GeoClue, then IP geolocation)
//! - The periodic posting loop with bounded re-authentication
//!
//! # Example
//!
//! ```no_run
//! use famloc_core::{AgentLoop, ConfigStore, LocationChain, SecondFactorPrompt};
//! use tokio_util::sync::CancellationToken;
//!
//! struct NoPrompt;
//!
//! #[async_trait::async_trait]
//! impl SecondFactorPrompt for NoPrompt {
//!     async fn second_factor_code(&self, _attempt: u32) -> Option<String> {
//!         None
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ConfigStore::at_default_location()?.load()?;
//!
//!     let mut agent = AgentLoop::new(&config, LocationChain::system_default()?)?;
//!     agent.start(&NoPrompt).await?;
//!
//!     let stats = agent.run(CancellationToken::new()).await;
//!     println!("Posted {} locations", stats.posted);
//!
//!     Ok(())
//! }
//! ```

pub mod agent;
pub mod auth;
pub mod cloud;
pub mod config;
pub mod error;
pub mod location;

// Re-export commonly used types
pub use agent::{AgentLoop, CycleOutcome, LoopStats, SecondFactorPrompt};
pub use auth::{AuthClient, AuthOutcome, AuthState};
pub use cloud::CloudClient;
pub use config::{AgentConfig, ConfigStore, Credentials, DeviceIdentity};
pub use error::{ApiError, AuthError, ConfigError, CryptoError, LocationError, StartupError};
pub use location::{Coordinates, LocationChain, LocationFix, LocationSample, LocationSource};
