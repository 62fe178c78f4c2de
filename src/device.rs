// FleetWatch - ChromeOS fleet collector
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Device records and the raw-JSON field mapper
//!
//! A [`FieldMapper`] turns one device object of the directory API into a
//! [`DeviceRecord`] whose `raw` bag holds flat property name → string
//! pairs. The projection engine later fills `properties` and
//! `dynamic_statistics` from that bag.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

/// Flat property bag
pub type PropertyMap = BTreeMap<String, String>;

/// Unique identifier for a device
pub type DeviceId = String;

/// A device of the cached fleet inventory
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRecord {
    pub device_id: DeviceId,
    pub device_name: String,
    pub device_model: String,
    pub device_online: bool,
    /// Raw values produced by the field mapper
    #[serde(skip)]
    pub raw: PropertyMap,
    /// Projected static properties
    pub properties: PropertyMap,
    /// Projected dynamic (historical) properties
    pub dynamic_statistics: PropertyMap,
}

impl DeviceRecord {
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            ..Default::default()
        }
    }

    /// Add a raw field
    pub fn with_raw(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.raw.insert(name.into(), value.into());
        self
    }
}

/// Turns a device's raw JSON into a record with its raw field bag
pub trait FieldMapper: Send + Sync + 'static {
    /// Map one device object, `None` when it has no usable id
    fn map(&self, device: &Value) -> Option<DeviceRecord>;
}

/// Table driven mapper: property name → JSON pointer
#[derive(Debug, Clone)]
pub struct DefaultFieldMapper {
    id_pointer: String,
    name_pointers: Vec<String>,
    model_pointer: String,
    fields: Vec<(String, String)>,
}

/// Property name → JSON pointer into a ChromeOS device object
const CHROMEOS_FIELDS: &[(&str, &str)] = &[
    ("Status", "/status"),
    ("SerialNumber", "/serialNumber"),
    ("CPUModel", "/cpuInfo/0/model"),
    ("Architecture", "/cpuInfo/0/architecture"),
    ("MACAddress", "/macAddress"),
    ("ChromeOSVersion", "/osVersion"),
    ("PlatformVersion", "/platformVersion"),
    ("FirmwareVersion", "/firmwareVersion"),
    ("TPMFirmwareVersion", "/tpmVersionInfo/firmwareVersion"),
    ("BootMode", "/bootMode"),
    ("EnrollmentTime", "/lastEnrollmentTime"),
    ("AutoUpdateExpiration", "/autoUpdateExpiration"),
    ("AnnotatedUser", "/annotatedUser"),
    ("OrgUnit", "/orgUnitPath"),
    ("MemoryTotal(GB)", "/systemRamTotal"),
    ("LastSync", "/lastSync"),
    ("MemoryFree(GB)", "/systemRamFreeReports"),
    ("CPUUtilization(%)", "/cpuStatusReports"),
    ("RecentActivity", "/activeTimeRanges"),
    ("RecentUsers", "/recentUsers"),
    ("IPAddress", "/lastKnownNetwork"),
    ("WANIPAddress", "/lastKnownNetwork"),
    ("VolumeLevel(%)", "/audioStatusReport"),
    ("Core1(C)", "/cpuStatusReports"),
    ("Core0(C)", "/cpuStatusReports"),
    ("PackageId0(C)", "/cpuStatusReports"),
    ("IwlWifi_1(C)", "/cpuStatusReports"),
];

impl Default for DefaultFieldMapper {
    fn default() -> Self {
        Self {
            id_pointer: "/deviceId".to_string(),
            name_pointers: vec!["/annotatedAssetId".to_string(), "/serialNumber".to_string()],
            model_pointer: "/model".to_string(),
            fields: CHROMEOS_FIELDS
                .iter()
                .map(|(name, pointer)| (name.to_string(), pointer.to_string()))
                .collect(),
        }
    }
}

impl DefaultFieldMapper {
    /// Mapper with a custom field table
    pub fn with_fields(fields: Vec<(String, String)>) -> Self {
        Self {
            fields,
            ..Default::default()
        }
    }

    /// Number of mapped properties
    pub fn field_count(&self) -> usize {
        self.fields.len()
    }
}

impl FieldMapper for DefaultFieldMapper {
    fn map(&self, device: &Value) -> Option<DeviceRecord> {
        let device_id = device
            .pointer(&self.id_pointer)
            .and_then(value_text)
            .filter(|id| !id.is_empty())?;

        let device_name = self
            .name_pointers
            .iter()
            .find_map(|p| device.pointer(p).and_then(value_text).filter(|n| !n.is_empty()))
            .unwrap_or_default();
        let device_model = device
            .pointer(&self.model_pointer)
            .and_then(value_text)
            .unwrap_or_default();

        let raw = self
            .fields
            .iter()
            .filter_map(|(name, pointer)| {
                device
                    .pointer(pointer)
                    .and_then(value_text)
                    .map(|v| (name.clone(), v))
            })
            .collect();

        Some(DeviceRecord {
            device_id,
            device_name,
            device_model,
            raw,
            ..Default::default()
        })
    }
}

/// Text form of a JSON value: strings verbatim, containers as compact JSON
fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn chromebook() -> Value {
        json!({
            "deviceId": "dev-1",
            "serialNumber": "5CD123",
            "model": "HP Chromebook 14",
            "macAddress": "a1b2c3d4e5f6",
            "systemRamTotal": "8589934592",
            "cpuInfo": [{"model": "Intel(R) Celeron(R)", "architecture": "x86_64"}],
            "lastKnownNetwork": [{"ipAddress": "10.0.0.2", "wanIpAddress": "1.2.3.4"}],
            "annotatedUser": null
        })
    }

    #[test]
    fn test_maps_identity_and_fields() {
        let record = DefaultFieldMapper::default().map(&chromebook()).unwrap();
        assert_eq!(record.device_id, "dev-1");
        assert_eq!(record.device_name, "5CD123");
        assert_eq!(record.device_model, "HP Chromebook 14");
        assert_eq!(record.raw["MACAddress"], "a1b2c3d4e5f6");
        assert_eq!(record.raw["CPUModel"], "Intel(R) Celeron(R)");
        assert_eq!(record.raw["Architecture"], "x86_64");
        assert!(!record.raw.contains_key("AnnotatedUser"));
        assert!(!record.raw.contains_key("VolumeLevel(%)"));
    }

    #[test]
    fn test_arrays_are_kept_as_json_text() {
        let record = DefaultFieldMapper::default().map(&chromebook()).unwrap();
        let network: Value = serde_json::from_str(&record.raw["IPAddress"]).unwrap();
        assert_eq!(network[0]["wanIpAddress"], "1.2.3.4");
    }

    #[test]
    fn test_asset_id_preferred_for_name() {
        let mut device = chromebook();
        device["annotatedAssetId"] = json!("Room 12");
        let record = DefaultFieldMapper::default().map(&device).unwrap();
        assert_eq!(record.device_name, "Room 12");
    }

    #[test]
    fn test_missing_id_is_skipped() {
        assert!(DefaultFieldMapper::default().map(&json!({"model": "x"})).is_none());
        assert!(DefaultFieldMapper::default().map(&json!({"deviceId": ""})).is_none());
    }

    #[test]
    fn test_custom_fields() {
        let mapper = DefaultFieldMapper::with_fields(vec![("Serial".into(), "/serialNumber".into())]);
        assert_eq!(mapper.field_count(), 1);
        let record = mapper.map(&chromebook()).unwrap();
        assert_eq!(record.raw.len(), 1);
        assert_eq!(record.raw["Serial"], "5CD123");
    }
}
