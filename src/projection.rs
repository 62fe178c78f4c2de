// FleetWatch - ChromeOS fleet collector
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Stats projection engine
//!
//! Turns a device's raw field bag into the static and dynamic property maps
//! reported to the console. Each metric is bound to a pure transform in a
//! table; a transform failure is logged and the metric is reported as
//! [`NONE`] so one malformed field never fails the whole projection.
//!
//! # Example
//!
//! ```
//! use fleetwatch::projection::ProjectionEngine;
//! use fleetwatch::device::PropertyMap;
//!
//! let engine = ProjectionEngine::default();
//! let mut raw = PropertyMap::new();
//! raw.insert("MACAddress".into(), "a1b2c3d4e5f6".into());
//!
//! let projected = engine.project(&raw);
//! assert_eq!(projected.properties["MACAddress"], "A1:B2:C3:D4:E5:F6");
//! assert_eq!(projected.properties["SerialNumber"], "None");
//! ```

pub mod convert;

use std::collections::HashSet;

use crate::config::CollectorConfig;
use crate::device::{DeviceRecord, PropertyMap};

pub use convert::ConvertError;
use convert::ConvertResult;

/// Sentinel reported for a metric that has no usable value
pub const NONE: &str = "None";

/// Group prefix of the CPU temperature properties
pub const CPU_TEMPERATURE_GROUP: &str = "CPUTemperature#";

/// Raw field whose presence marks a device online
pub const ONLINE_MARKER: &str = "VolumeLevel(%)";

const CHROMEBOOK: &str = "Chromebook";

type Transform = fn(&str) -> ConvertResult;

/// Static metrics in reporting order
const METRICS: &[(&str, Transform)] = &[
    ("Status", convert::verbatim),
    ("SerialNumber", convert::verbatim),
    ("CPUModel", convert::verbatim),
    ("Architecture", convert::verbatim),
    ("MACAddress", convert::hardware_address),
    ("ChromeOSVersion", convert::verbatim),
    ("PlatformVersion", convert::first_token),
    ("FirmwareVersion", convert::verbatim),
    ("TPMFirmwareVersion", convert::verbatim),
    ("BootMode", convert::verbatim),
    ("EnrollmentTime", convert::human_datetime),
    ("AutoUpdateExpiration", convert::month_year),
    ("AnnotatedUser", convert::verbatim),
    ("OrgUnit", convert::verbatim),
    ("MemoryTotal(GB)", convert::gigabytes),
    ("LastSync", convert::human_datetime),
    ("MemoryFree(GB)", convert::last_free_memory),
    ("CPUUtilization(%)", convert::settled_cpu_utilization),
    ("RecentActivity", convert::last_activity),
    ("RecentUsers", convert::last_user_email),
    ("IPAddress", convert::last_ip_address),
    ("WANIPAddress", convert::last_wan_ip_address),
    ("VolumeLevel(%)", convert::verbatim),
];

/// Dynamic-eligible temperature metrics and the sensor label they read
const CPU_TEMPERATURES: &[(&str, &str)] = &[
    ("Core1(C)", "Core 1\n"),
    ("Core0(C)", "Core 0\n"),
    ("PackageId0(C)", "Package id 0\n"),
    ("IwlWifi_1(C)", "iwlwifi_1\n"),
];

/// Output of one projection
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Projection {
    pub properties: PropertyMap,
    pub dynamic_statistics: PropertyMap,
}

/// Projects raw field bags into reported properties
#[derive(Debug, Clone, Default)]
pub struct ProjectionEngine {
    historical: HashSet<String>,
}

impl ProjectionEngine {
    /// Engine routing `historical` property names to the dynamic map
    pub fn new(historical: HashSet<String>) -> Self {
        Self { historical }
    }

    pub fn from_config(config: &CollectorConfig) -> Self {
        Self::new(config.historical_property_set())
    }

    /// Names of all metrics this engine reports
    pub fn metric_names() -> impl Iterator<Item = &'static str> {
        METRICS
            .iter()
            .map(|(name, _)| *name)
            .chain(CPU_TEMPERATURES.iter().map(|(name, _)| *name))
    }

    /// Whether `property` (possibly group-prefixed) is historical
    pub fn is_historical(&self, property: &str) -> bool {
        if self.historical.is_empty() {
            return false;
        }
        let name = property
            .split_once('#')
            .map_or(property, |(_, name)| name);
        self.historical.contains(name)
    }

    /// Project one raw field bag
    pub fn project(&self, raw: &PropertyMap) -> Projection {
        let mut out = Projection::default();

        for (name, transform) in METRICS {
            let value = raw.get(*name).map(String::as_str).unwrap_or_default();
            out.properties
                .insert(name.to_string(), resolve(name, transform(value)));
        }

        for (name, label) in CPU_TEMPERATURES {
            let property = format!("{}{}", CPU_TEMPERATURE_GROUP, name);
            let value = raw.get(*name).map(String::as_str).unwrap_or_default();
            match convert::cpu_temperature(value, label) {
                Ok(temperature) if self.is_historical(&property) => {
                    out.dynamic_statistics.insert(property, temperature);
                }
                Ok(temperature) => {
                    out.properties.insert(property, temperature);
                }
                Err(e) => {
                    log::debug!("Metric {} unavailable: {}", property, e);
                    out.properties.insert(property, NONE.to_string());
                }
            }
        }

        out
    }

    /// Project `device` in place: display name, model, online flag and both
    /// property maps. Only `raw` is read so repeated calls are stable.
    pub fn apply(&self, device: &mut DeviceRecord) {
        let Projection {
            properties,
            dynamic_statistics,
        } = self.project(&device.raw);

        device.device_name = display_name(&device.device_model, &device.device_name);
        if device.device_model.contains(CHROMEBOOK) {
            device.device_model = CHROMEBOOK.to_string();
        }
        device.device_online = device.raw.contains_key(ONLINE_MARKER);
        device.properties = properties;
        device.dynamic_statistics = dynamic_statistics;
    }

    /// Projected copy of `device`
    pub fn projected(&self, device: &DeviceRecord) -> DeviceRecord {
        let mut copy = device.clone();
        self.apply(&mut copy);
        copy
    }
}

/// `"<model> (<name>)"`
pub fn display_name(model: &str, name: &str) -> String {
    format!("{} ({})", model, name)
}

fn resolve(name: &str, result: ConvertResult) -> String {
    result.unwrap_or_else(|e| {
        if e != ConvertError::Missing {
            log::debug!("Metric {} unavailable: {}", name, e);
        }
        NONE.to_string()
    })
}
