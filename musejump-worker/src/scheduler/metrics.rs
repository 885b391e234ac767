//! Scheduler counters.
//!
//! Lock-free counters bumped from the hot paths and read as a
//! [`MetricsSnapshot`] for periodic log lines and status output.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use serde::Serialize;

#[derive(Debug)]
pub struct SchedulerMetrics {
    ticks: AtomicU64,
    routine_ticks: AtomicU64,
    transitions: AtomicU64,
    supersessions: AtomicU64,
    provider_errors: AtomicU64,
    store_errors: AtomicU64,
    jumps_scheduled: AtomicU64,
    jumps_canceled: AtomicU64,
    jumps_fired: AtomicU64,
    jumps_abandoned: AtomicU64,
    seek_failures: AtomicU64,
    reconcile_passes: AtomicU64,
    reconcile_failures: AtomicU64,
    started_at: Instant,
}

impl Default for SchedulerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

macro_rules! counter {
    ($record:ident, $field:ident) => {
        pub fn $record(&self) {
            self.$field.fetch_add(1, Ordering::Relaxed);
        }
    };
}

impl SchedulerMetrics {
    pub fn new() -> Self {
        Self {
            ticks: AtomicU64::new(0),
            routine_ticks: AtomicU64::new(0),
            transitions: AtomicU64::new(0),
            supersessions: AtomicU64::new(0),
            provider_errors: AtomicU64::new(0),
            store_errors: AtomicU64::new(0),
            jumps_scheduled: AtomicU64::new(0),
            jumps_canceled: AtomicU64::new(0),
            jumps_fired: AtomicU64::new(0),
            jumps_abandoned: AtomicU64::new(0),
            seek_failures: AtomicU64::new(0),
            reconcile_passes: AtomicU64::new(0),
            reconcile_failures: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    counter!(record_tick, ticks);
    counter!(record_routine_tick, routine_ticks);
    counter!(record_transition, transitions);
    counter!(record_supersession, supersessions);
    counter!(record_provider_error, provider_errors);
    counter!(record_store_error, store_errors);
    counter!(record_jump_scheduled, jumps_scheduled);
    counter!(record_jump_canceled, jumps_canceled);
    counter!(record_jump_fired, jumps_fired);
    counter!(record_jump_abandoned, jumps_abandoned);
    counter!(record_seek_failure, seek_failures);
    counter!(record_reconcile_pass, reconcile_passes);
    counter!(record_reconcile_failure, reconcile_failures);

    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        MetricsSnapshot {
            uptime_secs: self.started_at.elapsed().as_secs(),
            ticks: load(&self.ticks),
            routine_ticks: load(&self.routine_ticks),
            transitions: load(&self.transitions),
            supersessions: load(&self.supersessions),
            provider_errors: load(&self.provider_errors),
            store_errors: load(&self.store_errors),
            jumps_scheduled: load(&self.jumps_scheduled),
            jumps_canceled: load(&self.jumps_canceled),
            jumps_fired: load(&self.jumps_fired),
            jumps_abandoned: load(&self.jumps_abandoned),
            seek_failures: load(&self.seek_failures),
            reconcile_passes: load(&self.reconcile_passes),
            reconcile_failures: load(&self.reconcile_failures),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub ticks: u64,
    pub routine_ticks: u64,
    pub transitions: u64,
    pub supersessions: u64,
    pub provider_errors: u64,
    pub store_errors: u64,
    pub jumps_scheduled: u64,
    pub jumps_canceled: u64,
    pub jumps_fired: u64,
    pub jumps_abandoned: u64,
    pub seek_failures: u64,
    pub reconcile_passes: u64,
    pub reconcile_failures: u64,
}
