//! Authentication module for famloc agents.
//!
//! Provides the bearer-token exchange with optional second-factor step-up.

mod client;
mod session;

pub use client::{AuthClient, AuthOutcome};
pub use session::{AuthSession, AuthState};
