// FleetWatch Exporter - Collector settings
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Collector settings assembled from an optional JSON file and CLI flags.
//!
//! Flags given on the command line win over values from the file.

use std::path::Path;

use fleetwatch::{CollectorConfig, FleetError, ScriptedTransport};

/// Settings errors.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Invalid JSON in {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid fixture: {0}")]
    Fixture(#[from] FleetError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Command line values that override the file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub api_base_url: Option<String>,
    pub login: Option<String>,
    pub secret: Option<String>,
    pub org_unit_filter: Option<String>,
    pub serial_number_filter: Option<String>,
    pub historical_properties: Option<String>,
    pub current_org_unit: Option<String>,
    pub collection_interval_ms: Option<u64>,
}

fn read_json(path: &Path) -> Result<serde_json::Value, SettingsError> {
    if !path.exists() {
        return Err(SettingsError::FileNotFound(path.display().to_string()));
    }
    let text = std::fs::read_to_string(path)?;
    serde_json::from_str(&text).map_err(|source| SettingsError::Json {
        path: path.display().to_string(),
        source,
    })
}

/// Load the collector configuration.
pub fn load_config(path: Option<&Path>, overrides: Overrides) -> Result<CollectorConfig, SettingsError> {
    let mut config = match path {
        Some(path) => {
            let value = read_json(path)?;
            serde_json::from_value(value).map_err(|source| SettingsError::Json {
                path: path.display().to_string(),
                source,
            })?
        }
        None => CollectorConfig::default(),
    };

    if let Some(url) = overrides.api_base_url {
        config.api_base_url = url;
    }
    if overrides.login.is_some() {
        config.login = overrides.login;
    }
    if overrides.secret.is_some() {
        config.secret = overrides.secret;
    }
    if overrides.org_unit_filter.is_some() {
        config.org_unit_filter = overrides.org_unit_filter;
    }
    if overrides.serial_number_filter.is_some() {
        config.serial_number_filter = overrides.serial_number_filter;
    }
    if let Some(names) = overrides.historical_properties {
        config.historical_properties = names;
    }
    if overrides.current_org_unit.is_some() {
        config.current_org_unit = overrides.current_org_unit;
    }
    if let Some(ms) = overrides.collection_interval_ms {
        config.collection_interval_ms = ms;
    }
    Ok(config)
}

/// Load a replay fixture: URL prefix to canned response(s).
pub fn load_fixture(path: &Path) -> Result<ScriptedTransport, SettingsError> {
    let value = read_json(path)?;
    Ok(ScriptedTransport::from_fixture(&value)?)
}
