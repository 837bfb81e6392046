use crate::data_models::Observation;
use crate::errors::ImputeError;
use crate::mice::MiceOutcome;
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info, warn};
use rayon::prelude::*;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub type PartitionOutcome = Result<(Vec<Observation>, MiceOutcome), ImputeError>;

/// Result of imputing a single water-body partition
#[derive(Debug)]
pub struct PartitionRun {
    pub partition: String,
    pub rows: usize,
    pub outcome: PartitionOutcome,
    pub processing_time: Duration,
}

/// Runs independent partitions on a rayon pool
pub struct ParallelProcessor {
    num_workers: usize,
    parallel: bool,
}

impl Default for ParallelProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl ParallelProcessor {
    pub fn new() -> Self {
        let num_workers = num_cpus::get();
        info!("Initializing ParallelProcessor with {} workers", num_workers);
        Self {
            num_workers,
            parallel: true,
        }
    }

    pub fn with_workers(num_workers: usize) -> Self {
        info!("Initializing ParallelProcessor with {} custom workers", num_workers);
        Self {
            num_workers: num_workers.max(1),
            parallel: true,
        }
    }

    /// Runs partitions one after another on the calling thread.
    pub fn sequential() -> Self {
        Self {
            num_workers: 1,
            parallel: false,
        }
    }

    pub fn num_workers(&self) -> usize {
        self.num_workers
    }

    /// Apply `impute` to every partition. Results come back in input order.
    pub fn process_partitions<F>(
        &self,
        partitions: Vec<(String, Vec<Observation>)>,
        impute: F,
    ) -> Vec<PartitionRun>
    where
        F: Fn(&str, Vec<Observation>) -> PartitionOutcome + Sync + Send,
    {
        let total = partitions.len();
        info!("Starting imputation of {} partitions", total);

        let progress = Arc::new(ProgressBar::new(total as u64));
        let template =
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}";
        match ProgressStyle::default_bar().template(template) {
            Ok(style) => progress.set_style(style.progress_chars("#>-")),
            Err(e) => warn!("Progress bar template rejected: {}", e),
        }

        let run_one = |(partition, observations): (String, Vec<Observation>)| {
            let start = Instant::now();
            let rows = observations.len();
            let outcome = impute(&partition, observations);
            let processing_time = start.elapsed();
            match &outcome {
                Ok((_, summary)) => info!(
                    "Imputed {} cells in partition '{}' ({} rows) in {}ms",
                    summary.cells_imputed,
                    partition,
                    rows,
                    processing_time.as_millis()
                ),
                Err(e) => error!("Partition '{}' ({} rows) failed: {}", partition, rows, e),
            }
            progress.inc(1);
            PartitionRun {
                partition,
                rows,
                outcome,
                processing_time,
            }
        };

        let results: Vec<PartitionRun> = if self.parallel {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(self.num_workers)
                .build();
            match pool {
                Ok(pool) => pool.install(|| partitions.into_par_iter().map(run_one).collect()),
                Err(e) => {
                    warn!("Falling back to the global rayon pool: {}", e);
                    partitions.into_par_iter().map(run_one).collect()
                }
            }
        } else {
            partitions.into_iter().map(run_one).collect()
        };

        progress.finish_with_message("Partition imputation completed");
        results
    }
}
