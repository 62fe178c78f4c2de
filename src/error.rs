// FleetWatch - ChromeOS fleet collector
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Error types for FleetWatch
//!
//! Only configuration, authentication and control errors ever reach a
//! caller. Fetch failures are absorbed by the collection pipeline and
//! per-metric conversion failures collapse to the `None` sentinel.

use thiserror::Error;

/// Result type alias for FleetWatch operations
pub type Result<T> = std::result::Result<T, FleetError>;

/// Main error type for FleetWatch operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FleetError {
    /// Login or secret missing / malformed, no remote call was attempted
    #[error("Not configured: {0}")]
    NotConfigured(String),

    /// Credential exchange failed
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Transport-level failure (connect, timeout, TLS)
    #[error("Network error: {0}")]
    Network(String),

    /// Remote API answered with a non-success status
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// Response body was not the expected JSON shape
    #[error("Decode error: {0}")]
    Decode(String),

    /// Control batch rejected
    #[error("Invalid control: {0}")]
    InvalidControl(String),

    /// Collector has been destroyed
    #[error("Collector stopped")]
    Stopped,
}

impl FleetError {
    /// Whether the error belongs to a fetch stream (recoverable by restarting
    /// the stream on the next pass).
    pub fn is_fetch_error(&self) -> bool {
        matches!(
            self,
            FleetError::Network(_) | FleetError::Http { .. } | FleetError::Decode(_)
        )
    }
}

impl From<serde_json::Error> for FleetError {
    fn from(err: serde_json::Error) -> Self {
        FleetError::Decode(err.to_string())
    }
}

#[cfg(feature = "http")]
impl From<reqwest::Error> for FleetError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            FleetError::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            FleetError::Http {
                status: status.as_u16(),
                message: err.to_string(),
            }
        } else {
            FleetError::Network(err.to_string())
        }
    }
}
