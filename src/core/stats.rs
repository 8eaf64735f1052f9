//! Aggregation of cost and timing telemetry from scheduler events.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Serializable snapshot of aggregated telemetry.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct StatsSnapshot {
    /// Total retry transitions across all tasks.
    pub retries: u64,
    /// Tasks that reached `Done`.
    pub completed: u64,
    /// Tasks that reached `Rejected`.
    pub failed: u64,
    /// Total cost accrued across all rentals used.
    pub costs: f64,
    /// Summed wall time of task execution attempts, in milliseconds.
    pub duration_ms: u128,
}

/// Collects retries, outcomes, costs, and execution durations.
///
/// Fed directly by the scheduler; all recording is synchronous and cheap so
/// it can run inside transition listeners.
pub struct StatsService {
    retries: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    costs: Mutex<f64>,
    total_duration: Mutex<Duration>,
    started_at: Mutex<HashMap<String, Instant>>,
}

impl StatsService {
    /// Create an empty aggregator.
    pub fn new() -> Self {
        Self {
            retries: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            costs: Mutex::new(0.0),
            total_duration: Mutex::new(Duration::ZERO),
            started_at: Mutex::new(HashMap::new()),
        }
    }

    /// Record a retry transition.
    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    /// Record that a task attempt began executing.
    pub fn record_started(&self, task_id: &str) {
        self.started_at
            .lock()
            .insert(task_id.to_string(), Instant::now());
    }

    /// Record a terminal outcome for a task.
    pub fn record_finished(&self, task_id: &str, success: bool) {
        if success {
            self.completed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
        self.close_attempt(task_id);
    }

    /// Close the timing window of the current attempt, if one is open.
    /// Also called on retry so each attempt's duration is counted.
    pub fn close_attempt(&self, task_id: &str) {
        if let Some(started) = self.started_at.lock().remove(task_id) {
            *self.total_duration.lock() += started.elapsed();
        }
    }

    /// Record cost accrued by a rental the scheduler disposed of.
    pub fn record_cost(&self, cost: f64) {
        *self.costs.lock() += cost;
    }

    /// Aggregated totals so far.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            retries: self.retries.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            costs: *self.costs.lock(),
            duration_ms: self.total_duration.lock().as_millis(),
        }
    }
}

impl Default for StatsService {
    fn default() -> Self {
        Self::new()
    }
}
