//! Process-wide counters, flushed to the log periodically.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Jobs run to completion (success or failure recorded).
pub static JOBS_EXECUTED_COUNT: AtomicU32 = AtomicU32::new(0);
/// Condition rules that routed to a next job.
pub static CONDITIONS_MATCHED_COUNT: AtomicU32 = AtomicU32::new(0);
/// Triggers picked up by executor workers.
pub static SCHEDULES_TRIGGERED_COUNT: AtomicU32 = AtomicU32::new(0);

const FLUSH_INTERVAL: Duration = Duration::from_secs(10);

/// Registers the counters and flushes them on a fixed cadence.
pub struct StatsCollector {
    store: HashMap<&'static str, &'static AtomicU32>,
    cancel: CancellationToken,
}

impl StatsCollector {
    pub fn new(cancel: CancellationToken) -> Self {
        // Any counter added above must be registered here so the
        // collector can flush it.
        let mut store: HashMap<&'static str, &'static AtomicU32> = HashMap::new();
        store.insert("jobs_executed_count", &JOBS_EXECUTED_COUNT);
        store.insert("conditions_matched_count", &CONDITIONS_MATCHED_COUNT);
        store.insert("schedules_triggered_count", &SCHEDULES_TRIGGERED_COUNT);
        Self { store, cancel }
    }

    /// Snapshot of every registered counter.
    pub fn snapshot(&self) -> Vec<(&'static str, u32)> {
        let mut stats: Vec<_> = self
            .store
            .iter()
            .map(|(name, value)| (*name, value.load(Ordering::Relaxed)))
            .collect();
        stats.sort_unstable_by_key(|(name, _)| *name);
        stats
    }

    /// Write the current counter values to the log.
    pub fn print_stats(&self) {
        for (name, value) in self.snapshot() {
            tracing::info!("📊 {name}={value}");
        }
    }

    /// Flush loop; returns when cancelled.
    pub async fn run(&self) {
        let mut interval = tokio::time::interval(FLUSH_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!("stats collector shutting down");
                    return;
                }
                _ = interval.tick() => self.print_stats(),
            }
        }
    }
}
