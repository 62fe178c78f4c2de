// FleetWatch - ChromeOS fleet collector
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Inactivity pause controller
//!
//! Consumer requests push a deadline forward; the scheduler compares the
//! clock against it on every tick and skips remote work once it has passed.
//! Timestamps are milliseconds on a [`MonotonicClock`] shared with the
//! scheduler.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use tokio::time::Instant;

/// Milliseconds since the collector was created.
///
/// Built on `tokio::time::Instant` so tests can drive it with a paused
/// runtime clock.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    pub fn now_ms(&self) -> u64 {
        Instant::now()
            .saturating_duration_since(self.origin)
            .as_millis() as u64
    }
}

/// Whether polling is paused at `now` for the given deadline
pub fn is_paused(now_ms: u64, deadline_ms: u64) -> bool {
    now_ms >= deadline_ms
}

/// Liveness deadline plus the last computed paused flag
#[derive(Debug)]
pub struct LivenessController {
    clock: MonotonicClock,
    timeout: Duration,
    deadline_ms: AtomicU64,
    paused: AtomicBool,
}

impl LivenessController {
    /// Controller that starts paused
    pub fn new(clock: MonotonicClock, timeout: Duration) -> Self {
        Self {
            clock,
            timeout,
            deadline_ms: AtomicU64::new(0),
            paused: AtomicBool::new(true),
        }
    }

    /// Extend the deadline to `now + timeout`. Never moves it backwards.
    pub fn touch(&self) -> u64 {
        let deadline = self.clock.now_ms() + self.timeout.as_millis() as u64;
        let previous = self.deadline_ms.fetch_max(deadline, Ordering::SeqCst);
        self.refresh();
        previous.max(deadline)
    }

    /// Recompute the paused flag from the clock, returning it
    pub fn refresh(&self) -> bool {
        let paused = is_paused(self.clock.now_ms(), self.deadline_ms.load(Ordering::SeqCst));
        let was = self.paused.swap(paused, Ordering::SeqCst);
        if was != paused {
            if paused {
                log::info!("No statistics requests for {:?}, pausing collection", self.timeout);
            } else {
                log::info!("Collection resumed");
            }
        }
        paused
    }

    /// Paused flag as of the last refresh
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn deadline_ms(&self) -> u64 {
        self.deadline_ms.load(Ordering::SeqCst)
    }

    /// Back to the initial, paused state
    pub fn reset(&self) {
        self.deadline_ms.store(0, Ordering::SeqCst);
        self.paused.store(true, Ordering::SeqCst);
    }
}
