// FleetWatch - ChromeOS fleet collector
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! # FleetWatch - ChromeOS fleet collector
//!
//! A background collection engine for a remote device-management API.
//!
//! ## Key Features
//!
//! - **Token-gated fetching**: lazily refreshed bearer token with a fixed TTL
//! - **Pagination across passes**: one page per stream per pass, cursors
//!   carried forward, reset on failure
//! - **Device cache**: upsert-by-id, copy-on-read snapshots
//! - **Stats projection**: unit conversions, date normalization, latest
//!   sample extraction, static vs dynamic routing
//! - **Inactivity pause**: no remote calls while nobody asks for data
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use fleetwatch::{CollectorConfig, FleetCommunicator, ScriptedTransport};
//! use serde_json::json;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let transport = Arc::new(ScriptedTransport::new());
//! transport.respond("https://oauth2.googleapis.com/token", json!({"access_token": "tok"}));
//! transport.respond("/admin/directory/v1/users", json!({"users": []}));
//!
//! let config = CollectorConfig::with_credentials("client-id", "secret 1//refresh");
//! let communicator = FleetCommunicator::new(config, transport);
//!
//! let stats = communicator.get_statistics().await.unwrap();
//! assert_eq!(stats.statistics["ChromeOSDevicesCount"], "None");
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`communicator`]: Collector state and console-facing operations
//! - [`scheduler`]: Background collection loop
//! - [`liveness`]: Inactivity pause controller
//! - [`fetcher`]: Paginated directory and telemetry fetches
//! - [`token`]: Bearer token lifecycle
//! - [`cache`]: Device cache
//! - [`projection`]: Stats projection engine
//! - [`statistics`]: Summary statistics and controls
//! - [`transport`]: HTTP and scripted transports

// Modules
pub mod cache;
pub mod communicator;
pub mod config;
pub mod device;
pub mod error;
pub mod fetcher;
pub mod liveness;
pub mod org_unit;
pub mod projection;
pub mod scheduler;
pub mod statistics;
pub mod token;
pub mod transport;

// Re-exports for convenient access
pub use cache::DeviceCache;
pub use communicator::FleetCommunicator;
pub use config::{CollectorConfig, Credentials};
pub use device::{DefaultFieldMapper, DeviceId, DeviceRecord, FieldMapper, PropertyMap};
pub use error::{FleetError, Result};
pub use fetcher::{Cursors, Fetcher, Page};
pub use liveness::{LivenessController, MonotonicClock};
pub use org_unit::OrgUnit;
pub use projection::{Projection, ProjectionEngine, NONE};
pub use scheduler::{Collect, CollectorStatus, Scheduler};
pub use statistics::{AdvancedControl, ControlKind, ControllableProperty, ExtendedStatistics};
pub use token::TokenManager;
#[cfg(feature = "http")]
pub use transport::HttpTransport;
pub use transport::{ScriptedTransport, Transport};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_projection_roundtrip() {
        let engine = ProjectionEngine::default();
        let device = DeviceRecord::new("d1").with_raw("MemoryTotal(GB)", "17179869184");
        let projected = engine.projected(&device);
        assert_eq!(projected.properties["MemoryTotal(GB)"], "16.0");
    }
}
