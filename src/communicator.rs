// FleetWatch - ChromeOS fleet collector
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Fleet communicator
//!
//! [`FleetCommunicator`] owns every piece of collector state: the token
//! manager and cursors (inside the [`Fetcher`]), the device cache, the
//! organizational unit list, the liveness controller and the scheduler.
//! Two actors share it:
//!
//! - the background scheduler, running one [`CollectionPipeline`] pass at
//!   a time;
//! - callers of [`FleetCommunicator::get_statistics`],
//!   [`FleetCommunicator::control_property`] and friends, serialized by a
//!   single async mutex.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use fleetwatch::{CollectorConfig, FleetCommunicator, HttpTransport};
//!
//! # async fn run() -> fleetwatch::Result<()> {
//! let config = CollectorConfig::with_credentials("client-id", "secret 1//refresh");
//! let transport = Arc::new(HttpTransport::from_config(&config)?);
//! let communicator = FleetCommunicator::new(config, transport);
//! communicator.start();
//!
//! let stats = communicator.get_statistics().await?;
//! println!("{:?}", stats.statistics);
//! let devices = communicator.retrieve_devices().await;
//! println!("{} devices", devices.len());
//!
//! communicator.destroy().await;
//! # Ok(())
//! # }
//! ```

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde_json::Value;

use crate::cache::DeviceCache;
use crate::config::CollectorConfig;
use crate::device::{DefaultFieldMapper, DeviceRecord, FieldMapper};
use crate::error::{FleetError, Result};
use crate::fetcher::{merge_telemetry, Fetcher};
use crate::liveness::{LivenessController, MonotonicClock};
use crate::org_unit::OrgUnit;
use crate::projection::ProjectionEngine;
use crate::scheduler::{Collect, CollectorStatus, Scheduler};
use crate::statistics::{
    build_summary, ControllableProperty, ExtendedStatistics, SummaryInput, ORG_UNIT_NAME_CONTROL,
};
use crate::transport::Transport;

/// State shared by the pass pipeline and the statistics path
#[derive(Debug, Default)]
struct Inventory {
    org_units: Vec<OrgUnit>,
    /// Raw device objects of the latest device page
    device_page: Vec<Value>,
}

/// State owned by the synchronous request path
#[derive(Debug, Default)]
struct ControlState {
    selected_org_unit: Option<String>,
    last_statistics: Option<ExtendedStatistics>,
}

// ============================================================================
// Collection pipeline
// ============================================================================

/// Fetch, merge, map, project and upsert for one scheduler pass
pub struct CollectionPipeline {
    config: CollectorConfig,
    fetcher: Fetcher,
    mapper: Box<dyn FieldMapper>,
    engine: ProjectionEngine,
    cache: DeviceCache,
    inventory: Mutex<Inventory>,
    scheduler: Arc<Scheduler>,
}

impl CollectionPipeline {
    fn inventory(&self) -> MutexGuard<'_, Inventory> {
        self.inventory.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drop org units and the device page, restarting the device stream
    fn reset_inventory(&self) {
        {
            let mut inventory = self.inventory();
            inventory.org_units.clear();
            inventory.device_page.clear();
        }
        self.scheduler.counters().record_fetch_reset();
    }

    /// Path of the filtered unit, or the filter as given if the unit is unknown
    fn org_unit_path_filter(&self) -> Option<String> {
        let filter = self.config.org_unit_filter_value()?;
        let inventory = self.inventory();
        let path = inventory
            .org_units
            .iter()
            .find(|u| u.name == filter)
            .and_then(|u| u.org_unit_path.clone());
        Some(path.unwrap_or_else(|| filter.to_string()))
    }

    async fn run_pass(&self) -> Result<usize> {
        self.fetcher.authorize().await?;

        let Some(customer_id) = self.fetcher.customer_id().await? else {
            log::warn!("Customer id unavailable, skipping collection pass");
            return Ok(0);
        };

        match self.fetcher.org_units(&customer_id).await {
            Ok(units) => self.inventory().org_units = units,
            Err(e) if e.is_fetch_error() => {
                log::warn!("Organizational unit fetch failed, restarting device stream: {}", e);
                self.fetcher.reset_devices();
                self.reset_inventory();
                return Ok(0);
            }
            Err(e) => return Err(e),
        }

        let path = self.org_unit_path_filter();
        let serial = self.config.serial_number_filter_value();
        let page = match self
            .fetcher
            .next_device_page(&customer_id, path.as_deref(), serial)
            .await
        {
            Ok(page) => page,
            Err(e) if e.is_fetch_error() => {
                log::warn!("Device page fetch failed, restarting device stream: {}", e);
                self.reset_inventory();
                return Ok(0);
            }
            Err(e) => return Err(e),
        };

        let telemetry = match self.fetcher.next_telemetry_page(&customer_id).await {
            Ok(page) => page.items,
            Err(e) if e.is_fetch_error() => {
                log::warn!("Telemetry page fetch failed, restarting telemetry stream: {}", e);
                self.scheduler.counters().record_fetch_reset();
                Vec::new()
            }
            Err(e) => return Err(e),
        };

        let mut devices = page.items;
        merge_telemetry(&mut devices, &telemetry);

        let records: Vec<DeviceRecord> = devices
            .iter()
            .filter_map(|d| self.mapper.map(d))
            .map(|mut record| {
                self.engine.apply(&mut record);
                record
            })
            .collect();
        let upserted = self.cache.upsert_all(records);

        self.inventory().device_page = devices;
        if page.next_page_token.is_none() {
            log::debug!("Device listing cycle complete");
        }
        Ok(upserted)
    }
}

#[async_trait]
impl Collect for CollectionPipeline {
    async fn collect(&self) -> Result<usize> {
        self.run_pass().await
    }
}

// ============================================================================
// Communicator
// ============================================================================

/// Background collector plus the console-facing operations
#[derive(Clone)]
pub struct FleetCommunicator {
    pipeline: Arc<CollectionPipeline>,
    scheduler: Arc<Scheduler>,
    liveness: Arc<LivenessController>,
    control: Arc<tokio::sync::Mutex<ControlState>>,
}

impl FleetCommunicator {
    /// Communicator using the built-in ChromeOS field mapper
    pub fn new(config: CollectorConfig, transport: Arc<dyn Transport>) -> Self {
        Self::with_mapper(config, transport, Box::new(DefaultFieldMapper::default()))
    }

    pub fn with_mapper(
        config: CollectorConfig,
        transport: Arc<dyn Transport>,
        mapper: Box<dyn FieldMapper>,
    ) -> Self {
        let clock = MonotonicClock::new();
        let liveness = Arc::new(LivenessController::new(clock, config.inactivity_timeout()));
        let scheduler = Arc::new(Scheduler::new(&config, clock, Arc::clone(&liveness)));
        let control = ControlState {
            selected_org_unit: config.current_org_unit.clone().filter(|n| !n.trim().is_empty()),
            last_statistics: None,
        };
        let pipeline = Arc::new(CollectionPipeline {
            fetcher: Fetcher::new(&config, transport),
            engine: ProjectionEngine::from_config(&config),
            mapper,
            cache: DeviceCache::new(),
            inventory: Mutex::new(Inventory::default()),
            scheduler: Arc::clone(&scheduler),
            config,
        });

        Self {
            pipeline,
            scheduler,
            liveness,
            control: Arc::new(tokio::sync::Mutex::new(control)),
        }
    }

    pub fn config(&self) -> &CollectorConfig {
        &self.pipeline.config
    }

    /// Start the background loop. Must be called within a tokio runtime.
    pub fn start(&self) -> bool {
        let collector: Arc<dyn Collect> = self.pipeline.clone();
        self.scheduler.start(collector)
    }

    /// Run one collection pass right now, outside the scheduler cadence
    pub async fn collect_now(&self) -> Result<usize> {
        self.pipeline.run_pass().await
    }

    /// Stop the loop and drop every cached value
    pub async fn destroy(&self) {
        self.scheduler.stop();
        self.scheduler.reset();
        self.pipeline.cache.clear();
        {
            let mut inventory = self.pipeline.inventory();
            inventory.org_units.clear();
            inventory.device_page.clear();
        }
        self.pipeline.fetcher.reset();

        let mut control = self.control.lock().await;
        control.last_statistics = None;
        log::info!("Collector destroyed");
    }

    /// Summary statistics of the account.
    ///
    /// Extends liveness whether or not the call succeeds.
    ///
    /// # Errors
    ///
    /// [`FleetError::NotConfigured`] without credentials, [`FleetError::Auth`]
    /// when the token exchange fails.
    pub async fn get_statistics(&self) -> Result<ExtendedStatistics> {
        self.liveness.touch();
        let mut control = self.control.lock().await;
        let fetcher = &self.pipeline.fetcher;

        fetcher.authorize().await?;
        let Some(customer_id) = fetcher.customer_id().await? else {
            let stats = ExtendedStatistics::unavailable();
            control.last_statistics = Some(stats.clone());
            return Ok(stats);
        };

        let org_units = match fetcher.org_units(&customer_id).await {
            Ok(units) => units,
            Err(e) if e.is_fetch_error() => {
                log::error!("Failed to list organizational units: {}", e);
                Vec::new()
            }
            Err(e) => return Err(e),
        };
        let device_page = {
            let mut inventory = self.pipeline.inventory();
            inventory.org_units = org_units.clone();
            inventory.device_page.clone()
        };

        let config = &self.pipeline.config;
        let input = SummaryInput {
            org_units: &org_units,
            device_page: &device_page,
            filter: config.org_unit_filter_value(),
            selected: control.selected_org_unit.as_deref(),
            default_position: config.default_org_unit_position,
        };
        let parent_id = input.current_unit().and_then(|u| u.parent_org_unit_id.clone());
        let parent_name = fetcher.parent_name(&customer_id, parent_id.as_deref()).await;
        let stats = build_summary(&input, parent_name);

        control.last_statistics = Some(stats.clone());
        Ok(stats)
    }

    /// Statistics of the last successful [`get_statistics`](Self::get_statistics) call
    pub async fn last_statistics(&self) -> Option<ExtendedStatistics> {
        self.control.lock().await.last_statistics.clone()
    }

    /// Apply one control. Unsupported names are logged and ignored.
    pub async fn control_property(&self, property: &ControllableProperty) {
        let mut control = self.control.lock().await;
        apply_control(&mut control, property);
    }

    /// Apply a batch of controls in order.
    ///
    /// # Errors
    ///
    /// [`FleetError::InvalidControl`] for an empty batch.
    pub async fn control_properties(&self, properties: &[ControllableProperty]) -> Result<()> {
        if properties.is_empty() {
            return Err(FleetError::InvalidControl(
                "controllable properties can not be empty".to_string(),
            ));
        }
        let mut control = self.control.lock().await;
        for property in properties {
            apply_control(&mut control, property);
        }
        Ok(())
    }

    /// Currently selected organizational unit, if one was set
    pub async fn selected_org_unit(&self) -> Option<String> {
        self.control.lock().await.selected_org_unit.clone()
    }

    /// Copy of every cached device.
    ///
    /// Extends liveness and makes the next pass due immediately.
    pub async fn retrieve_devices(&self) -> Vec<DeviceRecord> {
        self.on_retrieve();
        self.pipeline.cache.snapshot()
    }

    /// Copy of the cached devices whose id is in `ids`
    pub async fn retrieve_devices_by_id(&self, ids: &[String]) -> Vec<DeviceRecord> {
        self.on_retrieve();
        self.pipeline.cache.snapshot_ids(ids)
    }

    /// Copy of every cached device, leaving liveness and cadence alone
    pub fn cached_devices(&self) -> Vec<DeviceRecord> {
        self.pipeline.cache.snapshot()
    }

    fn on_retrieve(&self) {
        if self.pipeline.fetcher.tokens().is_configured() && !self.scheduler.is_running() {
            self.start();
        }
        self.scheduler.make_due();
        self.liveness.touch();
    }

    /// Counters and flags of the background collector
    pub fn status(&self) -> CollectorStatus {
        let counters = self.scheduler.counters();
        CollectorStatus {
            running: self.scheduler.is_running(),
            paused: self.liveness.is_paused(),
            in_progress: self.scheduler.is_in_progress(),
            passes_completed: counters.completed(),
            passes_failed: counters.failed(),
            fetch_resets: counters.fetch_resets(),
            last_pass_ms: counters.last_pass_ms(),
            next_due_ms: self.scheduler.next_due_ms(),
            cached_devices: self.pipeline.cache.len(),
            org_units: self.pipeline.inventory().org_units.len(),
        }
    }

    /// Current continuation tokens
    pub fn cursors(&self) -> crate::fetcher::Cursors {
        self.pipeline.fetcher.cursor_state()
    }

    pub fn is_paused(&self) -> bool {
        self.liveness.is_paused()
    }

    /// Liveness deadline in collector clock milliseconds
    pub fn liveness_deadline_ms(&self) -> u64 {
        self.liveness.deadline_ms()
    }
}

fn apply_control(control: &mut ControlState, property: &ControllableProperty) {
    match property.property.as_str() {
        ORG_UNIT_NAME_CONTROL => {
            log::info!("Selected organizational unit {}", property.value);
            control.selected_org_unit = Some(property.value.clone());
        }
        other => log::debug!("Property {} is not supported", other),
    }
}
