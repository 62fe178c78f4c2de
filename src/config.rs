// FleetWatch - ChromeOS fleet collector
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Configuration types for FleetWatch

use std::collections::HashSet;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{FleetError, Result};

/// Collector-level configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    /// Directory API base URL, relative paths are joined onto it
    pub api_base_url: String,

    /// Chrome management (telemetry) API base URL
    pub telemetry_base_url: String,

    /// OAuth2 token endpoint used for the refresh-token exchange
    pub token_url: String,

    /// OAuth client id
    pub login: Option<String>,

    /// "<client secret> <refresh token>" in either order
    pub secret: Option<String>,

    /// Only list devices of this organizational unit (by name)
    pub org_unit_filter: Option<String>,

    /// Only list devices matching this serial number
    pub serial_number_filter: Option<String>,

    /// Comma separated property names routed to the dynamic bucket
    pub historical_properties: String,

    /// Explicit current organizational unit (overridden by the filter)
    pub current_org_unit: Option<String>,

    /// Scheduler wake-up period
    pub tick_interval_ms: u64,

    /// Minimum spacing between two collection passes
    pub collection_interval_ms: u64,

    /// Pause polling when no statistics request arrived for this long
    pub inactivity_timeout_ms: u64,

    /// Bearer token time-to-live
    pub token_ttl_ms: u64,

    /// Per-request timeout handed to the transport
    pub request_timeout_ms: u64,

    /// Index of the unit selected when neither filter nor selection is set
    pub default_org_unit_position: usize,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            api_base_url: "https://admin.googleapis.com".to_string(),
            telemetry_base_url: "https://chromemanagement.googleapis.com".to_string(),
            token_url: "https://oauth2.googleapis.com/token".to_string(),
            login: None,
            secret: None,
            org_unit_filter: None,
            serial_number_filter: None,
            historical_properties: String::new(),
            current_org_unit: None,
            tick_interval_ms: 500,
            collection_interval_ms: 30_000,
            inactivity_timeout_ms: 3 * 60 * 1000,
            token_ttl_ms: 3000 * 1000,
            request_timeout_ms: 30_000,
            default_org_unit_position: 0,
        }
    }
}

impl CollectorConfig {
    /// Create a configuration with credentials set
    pub fn with_credentials(login: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            login: Some(login.into()),
            secret: Some(secret.into()),
            ..Default::default()
        }
    }

    /// Set the organizational unit filter
    pub fn org_unit_filter(mut self, name: impl Into<String>) -> Self {
        self.org_unit_filter = Some(name.into());
        self
    }

    /// Set the serial number filter
    pub fn serial_number_filter(mut self, serial: impl Into<String>) -> Self {
        self.serial_number_filter = Some(serial.into());
        self
    }

    /// Set the comma separated historical properties
    pub fn historical_properties(mut self, names: impl Into<String>) -> Self {
        self.historical_properties = names.into();
        self
    }

    /// Historical property names as a trimmed set
    pub fn historical_property_set(&self) -> HashSet<String> {
        parse_property_list(&self.historical_properties)
    }

    /// Filter value, `None` when unset or blank
    pub fn org_unit_filter_value(&self) -> Option<&str> {
        non_blank(self.org_unit_filter.as_deref())
    }

    /// Serial filter value, `None` when unset or blank
    pub fn serial_number_filter_value(&self) -> Option<&str> {
        non_blank(self.serial_number_filter.as_deref())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }

    pub fn collection_interval(&self) -> Duration {
        Duration::from_millis(self.collection_interval_ms)
    }

    pub fn inactivity_timeout(&self) -> Duration {
        Duration::from_millis(self.inactivity_timeout_ms)
    }

    pub fn token_ttl(&self) -> Duration {
        Duration::from_millis(self.token_ttl_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Validated credentials
    ///
    /// # Errors
    ///
    /// Returns [`FleetError::NotConfigured`] if the login or secret is
    /// missing, or the secret does not hold exactly two parts.
    pub fn credentials(&self) -> Result<Credentials> {
        let login = non_blank(self.login.as_deref())
            .ok_or_else(|| FleetError::NotConfigured("login is empty".to_string()))?;
        let secret = non_blank(self.secret.as_deref())
            .ok_or_else(|| FleetError::NotConfigured("secret is empty".to_string()))?;
        Credentials::parse(login, secret)
    }
}

/// OAuth client credentials with the long-lived refresh token
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
}

impl Credentials {
    /// Split `secret` into client secret and refresh token.
    ///
    /// The two whitespace separated parts may come in either order: the one
    /// containing a `/` is the refresh token.
    pub fn parse(login: &str, secret: &str) -> Result<Self> {
        let parts: Vec<&str> = secret.split_whitespace().collect();
        if parts.len() != 2 {
            return Err(FleetError::NotConfigured(
                "secret must hold a client secret and a refresh token".to_string(),
            ));
        }
        let (client_secret, refresh_token) = if parts[0].contains('/') {
            (parts[1], parts[0])
        } else {
            (parts[0], parts[1])
        };
        Ok(Self {
            client_id: login.trim().to_string(),
            client_secret: client_secret.to_string(),
            refresh_token: refresh_token.to_string(),
        })
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"***")
            .field("refresh_token", &"***")
            .finish()
    }
}

/// Split a comma separated list into a set of trimmed, non-empty names
pub fn parse_property_list(value: &str) -> HashSet<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
