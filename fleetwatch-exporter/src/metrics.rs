// FleetWatch Exporter - Prometheus metrics definitions
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Prometheus metrics for FleetWatch monitoring.
//!
//! Collector counters come from [`CollectorStatus`]; per-device gauges are
//! derived from the projected statistics of each cached device, keeping
//! only values that parse as numbers.

use fleetwatch::{CollectorStatus, DeviceRecord};
use lazy_static::lazy_static;
use prometheus::{register_gauge, register_gauge_vec, Encoder, Gauge, GaugeVec, TextEncoder};

lazy_static! {
    // ============================================================
    // Collector Metrics (from CollectorStatus)
    // ============================================================

    /// Devices held in the cache.
    pub static ref CACHED_DEVICES: Gauge = register_gauge!(
        "fleetwatch_cached_devices",
        "Devices held in the collector cache"
    ).unwrap();

    /// Cached devices reporting online.
    pub static ref ONLINE_DEVICES: Gauge = register_gauge!(
        "fleetwatch_online_devices",
        "Cached devices reporting online"
    ).unwrap();

    /// Organizational units seen by the last listing.
    pub static ref ORG_UNITS: Gauge = register_gauge!(
        "fleetwatch_org_units",
        "Organizational units seen by the last listing"
    ).unwrap();

    pub static ref PASSES_COMPLETED: Gauge = register_gauge!(
        "fleetwatch_passes_completed",
        "Collection passes completed"
    ).unwrap();

    pub static ref PASSES_FAILED: Gauge = register_gauge!(
        "fleetwatch_passes_failed",
        "Collection passes aborted by an error"
    ).unwrap();

    /// Fetch streams restarted from their first page.
    pub static ref FETCH_RESETS: Gauge = register_gauge!(
        "fleetwatch_fetch_resets",
        "Fetch streams restarted from their first page"
    ).unwrap();

    /// 1 while polling is paused for inactivity.
    pub static ref PAUSED: Gauge = register_gauge!(
        "fleetwatch_paused",
        "Collector paused for inactivity (1=paused, 0=active)"
    ).unwrap();

    pub static ref RUNNING: Gauge = register_gauge!(
        "fleetwatch_running",
        "Collection loop running (1=running, 0=stopped)"
    ).unwrap();

    // ============================================================
    // Device Metrics
    // ============================================================

    /// Numeric device statistics (labeled by device and metric name).
    pub static ref DEVICE_STATISTIC: GaugeVec = register_gauge_vec!(
        "fleetwatch_device_statistic",
        "Numeric device statistic",
        &["device", "metric"]
    ).unwrap();

    /// Per-device online flag.
    pub static ref DEVICE_ONLINE: GaugeVec = register_gauge_vec!(
        "fleetwatch_device_online",
        "Device online state (1=online, 0=offline)",
        &["device"]
    ).unwrap();
}

fn flag(value: bool) -> f64 {
    if value {
        1.0
    } else {
        0.0
    }
}

/// Update collector metrics from a status snapshot.
pub fn update_from_status(status: &CollectorStatus) {
    CACHED_DEVICES.set(status.cached_devices as f64);
    ORG_UNITS.set(status.org_units as f64);
    PASSES_COMPLETED.set(status.passes_completed as f64);
    PASSES_FAILED.set(status.passes_failed as f64);
    FETCH_RESETS.set(status.fetch_resets as f64);
    PAUSED.set(flag(status.paused));
    RUNNING.set(flag(status.running));
}

/// Numeric value of a projected statistic, if it has one.
///
/// Sentinels, text and `NN.N%` style values are skipped.
pub fn numeric(value: &str) -> Option<f64> {
    value.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Replace the per-device gauges with the given devices.
pub fn update_devices(devices: &[DeviceRecord]) {
    DEVICE_STATISTIC.reset();
    DEVICE_ONLINE.reset();

    let mut online = 0usize;
    for device in devices {
        if device.device_online {
            online += 1;
        }
        DEVICE_ONLINE
            .with_label_values(&[device.device_id.as_str()])
            .set(flag(device.device_online));

        let stats = device.properties.iter().chain(device.dynamic_statistics.iter());
        for (name, value) in stats {
            if let Some(v) = numeric(value) {
                DEVICE_STATISTIC
                    .with_label_values(&[device.device_id.as_str(), name.as_str()])
                    .set(v);
            }
        }
    }
    ONLINE_DEVICES.set(online as f64);
}

/// Encode all metrics to Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8_lossy(&buffer).into_owned()
}
