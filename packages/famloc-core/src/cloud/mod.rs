//! Backend communication module.
//!
//! Provides the HTTP client for device registration and location posting.

mod client;

pub use client::{CloudClient, HTTP_TIMEOUT, build_http_client};
