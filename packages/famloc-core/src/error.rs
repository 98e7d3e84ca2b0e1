//! Error taxonomy shared by the agent pipeline.
//!
//! Control-flow signals (second factor required, enrollment required) are not
//! errors; see [`crate::auth::AuthOutcome`].

use std::path::PathBuf;
use thiserror::Error;

/// Failures loading or saving the agent configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to find a configuration directory")]
    NoConfigDir,

    #[error("failed to parse config file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to serialize config: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("config file I/O failed for {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encrypt {field}: {source}")]
    Seal {
        field: &'static str,
        #[source]
        source: CryptoError,
    },

    #[error("configuration incomplete, missing: {}", .0.join(", "))]
    Incomplete(Vec<&'static str>),
}

/// Failures sealing or opening a secret.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    #[error("malformed secret blob: {0}")]
    Malformed(String),

    #[error("secret could not be decrypted (wrong device id or tampered blob)")]
    Decrypt,

    #[error("encryption failed")]
    Encrypt,
}

/// Failures of the authentication protocol.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("credentials not configured")]
    MissingCredentials,

    #[error("authentication failed ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("authentication failed: empty token in response")]
    EmptyToken,

    #[error("no second-factor verification pending")]
    NotPending,

    #[error("invalid second-factor code: must be 6 digits")]
    InvalidCode,

    #[error("second-factor verification failed: {0}")]
    Verification(String),

    #[error("auth request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Failures of authenticated backend calls (registration, location post).
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("not authenticated")]
    NotAuthenticated,

    #[error("server rejected token ({status}): {body}")]
    Unauthorized { status: u16, body: String },

    #[error("server returned status {status}: {body}")]
    Server { status: u16, body: String },

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

impl ApiError {
    /// Whether this failure should trigger a re-authentication attempt.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ApiError::NotAuthenticated | ApiError::Unauthorized { .. })
    }
}

/// Failures acquiring a location fix.
#[derive(Debug, Error)]
pub enum LocationError {
    #[error("{source_name} unavailable: {reason}")]
    Unavailable {
        source_name: &'static str,
        reason: String,
    },

    #[error("{source_name} timed out after {secs}s")]
    TimedOut { source_name: &'static str, secs: u64 },

    #[error("no location available ({})", .0.join("; "))]
    NoLocationAvailable(Vec<String>),
}

impl LocationError {
    pub(crate) fn unavailable(source_name: &'static str, reason: impl Into<String>) -> Self {
        LocationError::Unavailable {
            source_name,
            reason: reason.into(),
        }
    }
}

/// Failures of the agent startup sequence (authenticate, second factor, register).
#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to authenticate: {0}")]
    Auth(#[from] AuthError),

    #[error("two-factor setup required - please complete TFA setup via the web dashboard first")]
    SecondFactorSetupRequired,

    #[error("second-factor verification aborted")]
    SecondFactorAborted,

    #[error("failed to register device: {0}")]
    Registration(#[source] ApiError),

    #[error("failed to build HTTP client: {0}")]
    Http(#[source] reqwest::Error),
}
