// FleetWatch - ChromeOS fleet collector
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Collection scheduler
//!
//! One background task per collector. It wakes on a fixed tick, stops as
//! soon as the running flag drops, skips the tick while the liveness
//! controller reports paused, and otherwise runs a collection pass once the
//! next-due deadline has passed. The deadline is pushed one collection
//! interval past the end of every pass.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;

use crate::config::CollectorConfig;
use crate::error::Result;
use crate::liveness::{LivenessController, MonotonicClock};

/// One collection pass
#[async_trait]
pub trait Collect: Send + Sync + 'static {
    /// Run a pass, returning the number of devices upserted
    async fn collect(&self) -> Result<usize>;
}

/// What a single tick did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Stopped,
    Paused,
    Waiting,
    InProgress,
    Collected,
}

/// Pass bookkeeping
#[derive(Debug, Default)]
pub struct PassCounters {
    completed: AtomicU64,
    failed: AtomicU64,
    fetch_resets: AtomicU64,
    last_pass_ms: AtomicU64,
}

impl PassCounters {
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn fetch_resets(&self) -> u64 {
        self.fetch_resets.load(Ordering::Relaxed)
    }

    /// Record that a fetch stream was restarted from its first page
    pub fn record_fetch_reset(&self) {
        self.fetch_resets.fetch_add(1, Ordering::Relaxed);
    }

    /// Clock time the last pass ended, `None` before the first one
    pub fn last_pass_ms(&self) -> Option<u64> {
        match self.last_pass_ms.load(Ordering::Relaxed) {
            0 => None,
            ms => Some(ms),
        }
    }
}

/// Point-in-time view of the collector
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollectorStatus {
    pub running: bool,
    pub paused: bool,
    pub in_progress: bool,
    pub passes_completed: u64,
    pub passes_failed: u64,
    pub fetch_resets: u64,
    pub last_pass_ms: Option<u64>,
    pub next_due_ms: u64,
    pub cached_devices: usize,
    pub org_units: usize,
}

/// Background loop driving collection passes
pub struct Scheduler {
    clock: MonotonicClock,
    tick: Duration,
    interval: Duration,
    liveness: Arc<LivenessController>,
    running: AtomicBool,
    in_progress: AtomicBool,
    /// Bumped on every start so a loop left over from a stop never resumes
    epoch: AtomicU64,
    next_due_ms: AtomicU64,
    shutdown: Notify,
    counters: PassCounters,
}

impl Scheduler {
    pub fn new(config: &CollectorConfig, clock: MonotonicClock, liveness: Arc<LivenessController>) -> Self {
        Self {
            clock,
            tick: config.tick_interval(),
            interval: config.collection_interval(),
            liveness,
            running: AtomicBool::new(false),
            in_progress: AtomicBool::new(false),
            epoch: AtomicU64::new(0),
            next_due_ms: AtomicU64::new(0),
            shutdown: Notify::new(),
            counters: PassCounters::default(),
        }
    }

    /// Spawn the loop on the current runtime. No-op if already running.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(self: &Arc<Self>, collector: Arc<dyn Collect>) -> bool {
        if self.running.swap(true, Ordering::SeqCst) {
            return false;
        }
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let scheduler = Arc::clone(self);
        tokio::spawn(async move { scheduler.run(epoch, collector).await });
        log::info!("Collection loop started (tick {:?}, interval {:?})", self.tick, self.interval);
        true
    }

    /// Ask the loop to stop. An in-flight pass is not interrupted.
    pub fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            self.shutdown.notify_one();
            log::info!("Collection loop stopping");
        }
    }

    /// Make the next pass due immediately
    pub fn make_due(&self) {
        self.next_due_ms.store(self.clock.now_ms(), Ordering::SeqCst);
    }

    /// Forget the collection deadline
    pub fn reset(&self) {
        self.next_due_ms.store(0, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn is_in_progress(&self) -> bool {
        self.in_progress.load(Ordering::SeqCst)
    }

    pub fn next_due_ms(&self) -> u64 {
        self.next_due_ms.load(Ordering::SeqCst)
    }

    pub fn counters(&self) -> &PassCounters {
        &self.counters
    }

    pub fn liveness(&self) -> &LivenessController {
        &self.liveness
    }

    async fn run(self: Arc<Self>, epoch: u64, collector: Arc<dyn Collect>) {
        let mut ticker = tokio::time::interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.shutdown.notified() => {}
            }
            if self.tick_once(epoch, collector.as_ref()).await == TickOutcome::Stopped {
                break;
            }
        }
        log::debug!("Collection loop exited");
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.is_running() && self.epoch.load(Ordering::SeqCst) == epoch
    }

    async fn tick_once(&self, epoch: u64, collector: &dyn Collect) -> TickOutcome {
        if !self.is_current(epoch) {
            return TickOutcome::Stopped;
        }
        if self.liveness.refresh() {
            return TickOutcome::Paused;
        }
        if self.clock.now_ms() < self.next_due_ms() {
            return TickOutcome::Waiting;
        }
        if self.in_progress.swap(true, Ordering::SeqCst) {
            return TickOutcome::InProgress;
        }

        match collector.collect().await {
            Ok(devices) => {
                self.counters.completed.fetch_add(1, Ordering::Relaxed);
                log::debug!("Collection pass upserted {} devices", devices);
            }
            Err(e) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                log::error!("Collection pass failed: {}", e);
            }
        }

        let now = self.clock.now_ms();
        self.counters.last_pass_ms.store(now.max(1), Ordering::Relaxed);
        self.next_due_ms
            .store(now + self.interval.as_millis() as u64, Ordering::SeqCst);
        self.in_progress.store(false, Ordering::SeqCst);
        TickOutcome::Collected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FleetError;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct CountingCollector {
        passes: AtomicUsize,
        fail: AtomicBool,
    }

    #[async_trait]
    impl Collect for CountingCollector {
        async fn collect(&self) -> Result<usize> {
            self.passes.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                Err(FleetError::Auth("rejected".into()))
            } else {
                Ok(1)
            }
        }
    }

    fn scheduler() -> Arc<Scheduler> {
        let config = CollectorConfig::default();
        let clock = MonotonicClock::new();
        let liveness = Arc::new(LivenessController::new(clock, config.inactivity_timeout()));
        Arc::new(Scheduler::new(&config, clock, liveness))
    }

    #[tokio::test(start_paused = true)]
    async fn test_paused_loop_never_collects() {
        let scheduler = scheduler();
        let collector = Arc::new(CountingCollector::default());
        assert!(scheduler.start(collector.clone()));

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(collector.passes.load(Ordering::SeqCst), 0);
        assert!(scheduler.liveness().is_paused());
        scheduler.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_passes_are_rate_limited() {
        let scheduler = scheduler();
        let collector = Arc::new(CountingCollector::default());
        scheduler.liveness().touch();
        scheduler.start(collector.clone());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(collector.passes.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(29)).await;
        assert_eq!(collector.passes.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(collector.passes.load(Ordering::SeqCst), 2);
        assert_eq!(scheduler.counters().completed(), 2);
        assert!(scheduler.counters().last_pass_ms().is_some());
        scheduler.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_make_due_triggers_next_tick() {
        let scheduler = scheduler();
        let collector = Arc::new(CountingCollector::default());
        scheduler.liveness().touch();
        scheduler.start(collector.clone());

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(collector.passes.load(Ordering::SeqCst), 1);
        scheduler.make_due();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(collector.passes.load(Ordering::SeqCst), 2);
        scheduler.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_pass_is_counted() {
        let scheduler = scheduler();
        let collector = Arc::new(CountingCollector::default());
        collector.fail.store(true, Ordering::SeqCst);
        scheduler.liveness().touch();
        scheduler.start(collector.clone());

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(scheduler.counters().failed(), 1);
        assert_eq!(scheduler.counters().completed(), 0);
        assert!(!scheduler.is_in_progress());
        scheduler.stop();
    }

    struct SlowCollector {
        passes: AtomicUsize,
    }

    #[async_trait]
    impl Collect for SlowCollector {
        async fn collect(&self) -> Result<usize> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            self.passes.fetch_add(1, Ordering::SeqCst);
            Ok(1)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_lets_in_flight_pass_finish() {
        let scheduler = scheduler();
        let collector = Arc::new(SlowCollector {
            passes: AtomicUsize::new(0),
        });
        scheduler.liveness().touch();
        scheduler.start(collector.clone());

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(scheduler.is_in_progress());
        scheduler.stop();

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(collector.passes.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.counters().completed(), 1);
        assert!(!scheduler.is_in_progress());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_halts_loop() {
        let scheduler = scheduler();
        let collector = Arc::new(CountingCollector::default());
        scheduler.liveness().touch();
        scheduler.start(collector.clone());
        tokio::time::sleep(Duration::from_secs(1)).await;

        scheduler.stop();
        assert!(!scheduler.is_running());
        scheduler.make_due();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(collector.passes.load(Ordering::SeqCst), 1);

        assert!(scheduler.start(collector.clone()));
        assert!(!scheduler.start(collector.clone()));
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(collector.passes.load(Ordering::SeqCst), 2);
        scheduler.stop();
    }
}
