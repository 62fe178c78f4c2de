// FleetWatch - ChromeOS fleet collector
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! In-memory device cache
//!
//! All access goes through one mutex. Readers get owned copies, never a
//! view into the live collection. Records are replaced whole on upsert and
//! only removed by [`DeviceCache::clear`].

use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::device::DeviceRecord;

/// Concurrency-safe device collection keyed by device id
#[derive(Debug, Default)]
pub struct DeviceCache {
    devices: Mutex<Vec<DeviceRecord>>,
}

impl DeviceCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn devices(&self) -> MutexGuard<'_, Vec<DeviceRecord>> {
        self.devices.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace any record with the same id by `record`
    pub fn upsert(&self, record: DeviceRecord) {
        let mut devices = self.devices();
        devices.retain(|d| d.device_id != record.device_id);
        devices.push(record);
    }

    /// Upsert a batch under a single lock acquisition
    pub fn upsert_all(&self, records: impl IntoIterator<Item = DeviceRecord>) -> usize {
        let mut devices = self.devices();
        let mut count = 0;
        for record in records {
            devices.retain(|d| d.device_id != record.device_id);
            devices.push(record);
            count += 1;
        }
        count
    }

    /// Copy of every cached record
    pub fn snapshot(&self) -> Vec<DeviceRecord> {
        self.devices().clone()
    }

    /// Copy of the records whose id is in `ids`
    pub fn snapshot_ids(&self, ids: &[String]) -> Vec<DeviceRecord> {
        self.devices()
            .iter()
            .filter(|d| ids.contains(&d.device_id))
            .cloned()
            .collect()
    }

    /// Copy of one record
    pub fn get(&self, id: &str) -> Option<DeviceRecord> {
        self.devices().iter().find(|d| d.device_id == id).cloned()
    }

    pub fn len(&self) -> usize {
        self.devices().len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices().is_empty()
    }

    /// Drop every record
    pub fn clear(&self) {
        self.devices().clear();
    }
}
