// FleetWatch Exporter - HTTP surface for the FleetWatch collector
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! # FleetWatch Exporter
//!
//! Runs a FleetWatch collector and serves its statistics, devices and
//! controls over HTTP, plus a Prometheus endpoint.
//!
//! ## Usage
//!
//! ```bash
//! # Live collection
//! FLEETWATCH_SECRET="<client secret> <refresh token>" \
//!     fleetwatch-exporter --login <client id> --org-unit MOTF
//!
//! # Replay canned API responses
//! fleetwatch-exporter --fixture fixture.json --login demo --secret "demo 1//demo"
//! ```

mod metrics;
mod settings;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use clap::Parser;
use fleetwatch::{
    CollectorStatus, ControllableProperty, FleetCommunicator, FleetError, HttpTransport, Transport,
};
use metrics::encode_metrics;
use serde::{Deserialize, Serialize};
use settings::{load_config, load_fixture, Overrides};
use tokio::net::TcpListener;
use tracing::{error, info, Level};
use tracing_subscriber::EnvFilter;

/// FleetWatch collector and exporter
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "9100")]
    port: u16,

    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory API base URL
    #[arg(long)]
    base_url: Option<String>,

    /// OAuth client id
    #[arg(long, env = "FLEETWATCH_LOGIN")]
    login: Option<String>,

    /// "<client secret> <refresh token>"
    #[arg(long, env = "FLEETWATCH_SECRET", hide_env_values = true)]
    secret: Option<String>,

    /// Only list devices of this organizational unit
    #[arg(long)]
    org_unit: Option<String>,

    /// Only list the device with this serial number
    #[arg(long)]
    serial: Option<String>,

    /// Comma separated properties reported as dynamic statistics
    #[arg(long)]
    historical: Option<String>,

    /// Minimum spacing between collection passes, in milliseconds
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Replay responses from a JSON fixture instead of calling the API
    #[arg(long)]
    fixture: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

/// Application state shared across handlers.
struct AppState {
    communicator: FleetCommunicator,
    start_time: std::time::Instant,
}

#[derive(Debug, thiserror::Error)]
enum StartupError {
    #[error(transparent)]
    Settings(#[from] settings::SettingsError),

    #[error(transparent)]
    Collector(#[from] FleetError),

    #[error("Server error: {0}")]
    Io(#[from] std::io::Error),
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    init_tracing(&args.log_level);

    info!("FleetWatch Exporter v{}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = run(args).await {
        error!("{}", e);
        std::process::exit(1);
    }
}

/// `RUST_LOG` wins; otherwise the library and the exporter log at `level`.
fn init_tracing(level: &str) {
    let level = level.parse::<Level>().unwrap_or(Level::INFO);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "fleetwatch={lvl},fleetwatch_exporter={lvl},warn",
            lvl = level
        ))
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

async fn run(args: Args) -> Result<(), StartupError> {
    let overrides = Overrides {
        api_base_url: args.base_url,
        login: args.login,
        secret: args.secret,
        org_unit_filter: args.org_unit,
        serial_number_filter: args.serial,
        historical_properties: args.historical,
        current_org_unit: None,
        collection_interval_ms: args.interval_ms,
    };
    let config = load_config(args.config.as_deref(), overrides)?;

    let transport: Arc<dyn Transport> = match args.fixture {
        Some(path) => {
            info!("Replaying API responses from {}", path.display());
            Arc::new(load_fixture(&path)?)
        }
        None => Arc::new(HttpTransport::from_config(&config)?),
    };

    let communicator = FleetCommunicator::new(config, transport);
    if communicator.start() {
        info!("Collector started, paused until the first request");
    }

    let state = Arc::new(AppState {
        communicator: communicator.clone(),
        start_time: std::time::Instant::now(),
    });

    let app = Router::new()
        .route("/", get(index))
        .route("/statistics", get(statistics_handler))
        .route("/devices", get(devices_handler))
        .route("/control", post(control_handler))
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/status", get(status_handler))
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    info!("Serving fleet data on {} (scrape /metrics)", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    communicator.destroy().await;
    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}

/// Error body returned by the JSON endpoints.
#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

fn error_response(err: FleetError) -> Response {
    let status = match err {
        FleetError::NotConfigured(_) | FleetError::Auth(_) => StatusCode::SERVICE_UNAVAILABLE,
        FleetError::InvalidControl(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::BAD_GATEWAY,
    };
    let body = ErrorBody {
        error: err.to_string(),
    };
    (status, Json(body)).into_response()
}

const INDEX: &str = r#"<!DOCTYPE html>
<html>
<head><title>FleetWatch</title></head>
<body>
<h1>FleetWatch</h1>
<ul>
<li><a href="/statistics">/statistics</a> account summary and unit selector</li>
<li><a href="/devices">/devices</a> cached devices, narrow with <code>?ids=a,b</code></li>
<li><code>POST /control</code> select the organizational unit</li>
<li><a href="/status">/status</a> collector counters</li>
<li><a href="/metrics">/metrics</a> Prometheus scrape target</li>
</ul>
</body>
</html>"#;

async fn index() -> Html<&'static str> {
    Html(INDEX)
}

/// Statistics handler - extends liveness and returns the account summary.
async fn statistics_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.communicator.get_statistics().await {
        Ok(stats) => Json(stats).into_response(),
        Err(e) => {
            error!("Statistics request failed: {}", e);
            error_response(e)
        }
    }
}

#[derive(Debug, Deserialize)]
struct DeviceQuery {
    ids: Option<String>,
}

fn parse_ids(ids: &str) -> Vec<String> {
    ids.split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect()
}

/// Devices handler - returns cached devices, optionally filtered by id.
async fn devices_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DeviceQuery>,
) -> impl IntoResponse {
    let devices = match query.ids.as_deref() {
        Some(ids) => {
            let ids = parse_ids(ids);
            state.communicator.retrieve_devices_by_id(&ids).await
        }
        None => state.communicator.retrieve_devices().await,
    };
    Json(devices)
}

/// Control handler - applies a batch of controllable properties.
async fn control_handler(
    State(state): State<Arc<AppState>>,
    Json(properties): Json<Vec<ControllableProperty>>,
) -> Response {
    match state.communicator.control_properties(&properties).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(e),
    }
}

/// Refreshes the gauges from the collector before encoding them.
async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    metrics::update_from_status(&state.communicator.status());
    metrics::update_devices(&state.communicator.cached_devices());
    (
        [("Content-Type", "text/plain; version=0.0.4")],
        encode_metrics(),
    )
}

/// Liveness of the HTTP surface alone; never touches the collector.
async fn health_handler() -> &'static str {
    "alive"
}

/// 503 until the collector loop is running.
async fn ready_handler(State(state): State<Arc<AppState>>) -> Response {
    let status = state.communicator.status();
    if !status.running {
        return (StatusCode::SERVICE_UNAVAILABLE, "collector not running").into_response();
    }
    if status.paused {
        return (StatusCode::OK, "running, paused until the next request").into_response();
    }
    (StatusCode::OK, "running").into_response()
}

#[derive(Serialize)]
struct StatusBody {
    version: &'static str,
    serving_secs: u64,
    collector: CollectorStatus,
}

/// Collector counters plus exporter build and uptime.
async fn status_handler(State(state): State<Arc<AppState>>) -> Json<StatusBody> {
    Json(StatusBody {
        version: env!("CARGO_PKG_VERSION"),
        serving_secs: state.start_time.elapsed().as_secs(),
        collector: state.communicator.status(),
    })
}
