//! Worker lifecycle state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Key of the singleton lifecycle row.
pub const OUTBOUND_WORKER_ID: &str = "outbound";

/// Default number of consecutive empty ticks before the worker stops itself.
pub const DEFAULT_EMPTY_TICK_THRESHOLD: u32 = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerState {
    pub id: String,
    pub is_running: bool,
    pub empty_tick_count: u32,
    pub last_tick_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub stopped_at: Option<DateTime<Utc>>,
}

impl Default for WorkerState {
    fn default() -> Self {
        Self {
            id: OUTBOUND_WORKER_ID.to_string(),
            is_running: false,
            empty_tick_count: 0,
            last_tick_at: None,
            started_at: None,
            stopped_at: None,
        }
    }
}

impl WorkerState {
    /// Flip to running. Returns `false` (and changes nothing) if already running.
    pub fn start(&mut self, now: DateTime<Utc>) -> bool {
        if self.is_running {
            return false;
        }
        self.is_running = true;
        self.empty_tick_count = 0;
        self.started_at = Some(now);
        self.stopped_at = None;
        self.last_tick_at = None;
        true
    }

    /// Count an empty tick; stops the worker once `threshold` is reached.
    /// Returns whether this call stopped it.
    pub fn record_empty_tick(&mut self, threshold: u32, now: DateTime<Utc>) -> bool {
        self.empty_tick_count = self.empty_tick_count.saturating_add(1);
        self.last_tick_at = Some(now);
        if self.is_running && self.empty_tick_count >= threshold {
            self.is_running = false;
            self.stopped_at = Some(now);
            return true;
        }
        false
    }

    pub fn reset_empty(&mut self, now: DateTime<Utc>) {
        self.empty_tick_count = 0;
        self.last_tick_at = Some(now);
    }

    pub fn stop(&mut self, now: DateTime<Utc>) {
        if self.is_running {
            self.is_running = false;
            self.stopped_at = Some(now);
        }
    }
}
