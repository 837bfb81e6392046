use crate::reconcile::DropCounts;
use log::info;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// Global metrics instance
pub static METRICS: Lazy<Mutex<Metrics>> = Lazy::new(|| Mutex::new(Metrics::new()));

/// Pipeline run metrics
#[derive(Debug, Default)]
pub struct Metrics {
    pub rows_read: u64,
    pub rows_dropped_geolocation: u64,
    pub rows_dropped_source: u64,
    pub rows_dropped_transparency: u64,
    pub cells_imputed: u64,
    pub partitions_succeeded: u64,
    pub partitions_failed: u64,
    pub rows_scored: u64,
    pub processing_times: BTreeMap<String, Duration>,
    pub start_time: Option<Instant>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        }
    }

    pub fn record_rows_read(&mut self, rows: u64) {
        self.rows_read += rows;
    }

    pub fn record_drops(&mut self, drops: &DropCounts) {
        self.rows_dropped_geolocation += drops.missing_geolocation as u64;
        self.rows_dropped_source += drops.inconclusive_source as u64;
        self.rows_dropped_transparency += drops.undefined_transparency as u64;
    }

    pub fn record_partition(&mut self, succeeded: bool, cells_imputed: u64) {
        if succeeded {
            self.partitions_succeeded += 1;
            self.cells_imputed += cells_imputed;
        } else {
            self.partitions_failed += 1;
        }
    }

    pub fn record_scored(&mut self, rows: u64) {
        self.rows_scored += rows;
    }

    pub fn record_processing_time(&mut self, operation: String, duration: Duration) {
        self.processing_times.insert(operation, duration);
    }

    pub fn get_total_duration(&self) -> Duration {
        self.start_time
            .map(|start| start.elapsed())
            .unwrap_or_default()
    }

    pub fn log_summary(&self) {
        info!("========== Pipeline Metrics Summary ==========");
        info!("Total Duration: {:.2?}", self.get_total_duration());
        info!("Rows Read: {}", self.rows_read);
        info!(
            "Rows Dropped: geolocation={} source={} transparency={}",
            self.rows_dropped_geolocation, self.rows_dropped_source, self.rows_dropped_transparency
        );
        info!(
            "Partitions: {} imputed, {} failed ({} cells filled)",
            self.partitions_succeeded, self.partitions_failed, self.cells_imputed
        );
        info!("Rows Scored: {}", self.rows_scored);
        for (op, duration) in &self.processing_times {
            info!("  {}: {:.2?}", op, duration);
        }
    }
}

/// Helper macro to time an operation
#[macro_export]
macro_rules! time_operation {
    ($name:expr, $op:expr) => {{
        let start = std::time::Instant::now();
        let result = $op;
        let duration = start.elapsed();
        $crate::metrics::METRICS
            .lock()
            .record_processing_time($name.to_string(), duration);
        result
    }};
}
