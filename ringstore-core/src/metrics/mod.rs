//! Metrics for the consolidation, migration and import engines
//!
//! Uses the `metrics` facade; installing a recorder is up to the binary.

use metrics::{counter, describe_counter, describe_histogram, histogram};
use std::time::Instant;

pub const CONSOLIDATE_RUNS: &str = "ringstore.consolidate.runs";
pub const CONSOLIDATE_FAILURES: &str = "ringstore.consolidate.failures";
pub const CONSOLIDATE_REJECTED: &str = "ringstore.consolidate.rejected";
pub const CONSOLIDATE_RECOVERIES: &str = "ringstore.consolidate.recoveries";
pub const CONSOLIDATE_DURATION: &str = "ringstore.consolidate.duration_ms";

pub const MIGRATE_ROWS: &str = "ringstore.migrate.rows";
pub const MIGRATE_DB_EXCEPTIONS: &str = "ringstore.migrate.db_exceptions";
pub const MIGRATE_FAILURES: &str = "ringstore.migrate.failures";
pub const MIGRATE_DURATION: &str = "ringstore.migrate.duration_ms";

pub const IMPORT_NEW: &str = "ringstore.import.new";
pub const IMPORT_UPDATED: &str = "ringstore.import.updated";
pub const IMPORT_BAD: &str = "ringstore.import.bad";
pub const IMPORT_DURATION: &str = "ringstore.import.duration_ms";

pub const CACHE_ENTRIES_WRITTEN: &str = "ringstore.cache.entries_written";

/// Register descriptions for every metric the crate emits
pub fn init_metrics() {
    describe_counter!(CONSOLIDATE_RUNS, "Consolidations started");
    describe_counter!(CONSOLIDATE_FAILURES, "Consolidations that ended in error");
    describe_counter!(CONSOLIDATE_REJECTED, "Consolidations refused because one was running");
    describe_counter!(CONSOLIDATE_RECOVERIES, "Interrupted consolidations resumed");
    describe_histogram!(CONSOLIDATE_DURATION, "Consolidation duration in milliseconds");

    describe_counter!(MIGRATE_ROWS, "Secret keyring rows rewritten");
    describe_counter!(MIGRATE_DB_EXCEPTIONS, "Rewrites that matched no row");
    describe_counter!(MIGRATE_FAILURES, "Migration batches aborted with an error");
    describe_histogram!(MIGRATE_DURATION, "Migration batch duration in milliseconds");

    describe_counter!(IMPORT_NEW, "Keyrings inserted by imports");
    describe_counter!(IMPORT_UPDATED, "Keyrings replaced by imports");
    describe_counter!(IMPORT_BAD, "Keyrings rejected by imports");
    describe_histogram!(IMPORT_DURATION, "Import batch duration in milliseconds");

    describe_counter!(CACHE_ENTRIES_WRITTEN, "Snapshot cache entries written");
}

/// Record a counter metric
pub fn record_counter(name: &'static str, value: u64) {
    counter!(name).increment(value);
}

/// Timer for measuring operation duration
pub struct Timer {
    name: &'static str,
    start: Instant,
}

impl Timer {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            start: Instant::now(),
        }
    }

    /// Stop the timer and record the duration
    pub fn stop(self) {
        let duration = self.start.elapsed();
        histogram!(self.name).record(duration.as_secs_f64() * 1000.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_init() {
        init_metrics();
        record_counter(MIGRATE_ROWS, 1);
    }

    #[test]
    fn test_timer() {
        let timer = Timer::new(IMPORT_DURATION);
        std::thread::sleep(std::time::Duration::from_millis(5));
        timer.stop();
    }
}
