//! Stratified imputation: one chained-equations run per water-body type.

use crate::config::{FailurePolicy, ImputationConfig, PipelineConfig};
use crate::data_models::{
    Observation, MEASURED_ON, ROW_ID, SATURATION, SITE_ID, TRANSPARENCY, WATER_BODY_TYPE,
};
use crate::errors::{ImputeError, PipelineError};
use crate::metrics::METRICS;
use crate::mice::{self, MiceOutcome, PmmSettings};
use crate::parallel::ParallelProcessor;
use crate::table::FeatureTable;
use log::{info, warn};
use serde::Serialize;
use std::collections::BTreeMap;

/// Columns that are never imputed and never used as predictors.
pub const EXCLUDED_COLUMNS: [&str; 5] = [SITE_ID, ROW_ID, MEASURED_ON, TRANSPARENCY, SATURATION];

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum PartitionStatus {
    Ok,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PartitionReport {
    pub partition: String,
    pub rows: usize,
    pub cells_imputed: usize,
    pub columns_imputed: Vec<String>,
    /// Columns never observed in the partition, left missing.
    pub columns_unimputable: Vec<String>,
    pub status: PartitionStatus,
}

#[derive(Debug, Clone)]
pub struct ImputationResult {
    /// Imputed observations of every successful partition, ordered by row id.
    pub observations: Vec<Observation>,
    pub partitions: Vec<PartitionReport>,
}

impl ImputationResult {
    pub fn failed_partitions(&self) -> impl Iterator<Item = &PartitionReport> {
        self.partitions
            .iter()
            .filter(|p| matches!(p.status, PartitionStatus::Failed(_)))
    }

    pub fn rows_dropped(&self) -> usize {
        self.failed_partitions().map(|p| p.rows).sum()
    }
}

/// FNV-1a over the partition key, mixed into the run seed.
pub fn partition_seed(seed: u64, partition: &str) -> u64 {
    let hash = partition.bytes().fold(0xcbf2_9ce4_8422_2325_u64, |h, b| {
        (h ^ u64::from(b)).wrapping_mul(0x0000_0100_0000_01b3)
    });
    seed ^ hash
}

/// Groups observations by water-body type. Partition order is the sorted key order.
pub fn partition_by_water_body(
    observations: Vec<Observation>,
) -> BTreeMap<String, Vec<Observation>> {
    let mut partitions: BTreeMap<String, Vec<Observation>> = BTreeMap::new();
    for obs in observations {
        partitions
            .entry(obs.partition_key().to_string())
            .or_default()
            .push(obs);
    }
    partitions
}

/// Imputes one partition in isolation. The stratum column is constant inside a
/// partition, so it is left out along with the global exclusions.
pub fn impute_partition(
    partition: &str,
    mut observations: Vec<Observation>,
    config: &ImputationConfig,
    seed: u64,
) -> Result<(Vec<Observation>, MiceOutcome), ImputeError> {
    let mut table = FeatureTable::from_observations(&observations)?;
    let mut excluded = EXCLUDED_COLUMNS.to_vec();
    excluded.push(WATER_BODY_TYPE);

    let settings = PmmSettings {
        iterations: config.iterations,
        donors: config.donors,
        ridge: config.ridge,
        min_rows: config.min_partition_rows,
        seed: partition_seed(seed, partition),
    };
    let outcome = mice::impute_table(&mut table, &excluded, &settings)?;
    table.write_back(&mut observations)?;
    Ok((observations, outcome))
}

/// Partitions, imputes each partition independently and recombines by row id.
pub fn impute_stratified(
    observations: Vec<Observation>,
    config: &PipelineConfig,
) -> Result<ImputationResult, PipelineError> {
    let partitions: Vec<(String, Vec<Observation>)> =
        partition_by_water_body(observations).into_iter().collect();
    info!("Imputing {} water-body partitions", partitions.len());

    let processor = if config.imputation.parallel {
        ParallelProcessor::new()
    } else {
        ParallelProcessor::sequential()
    };
    let runs = processor.process_partitions(partitions, |key, obs| {
        impute_partition(key, obs, &config.imputation, config.seed)
    });

    let mut imputed = Vec::new();
    let mut reports = Vec::with_capacity(runs.len());
    for run in runs {
        METRICS.lock().record_processing_time(
            format!("impute:{}", run.partition),
            run.processing_time,
        );
        match run.outcome {
            Ok((observations, outcome)) => {
                METRICS
                    .lock()
                    .record_partition(true, outcome.cells_imputed as u64);
                reports.push(PartitionReport {
                    partition: run.partition,
                    rows: run.rows,
                    cells_imputed: outcome.cells_imputed,
                    columns_imputed: outcome.columns_imputed,
                    columns_unimputable: outcome.columns_unimputable,
                    status: PartitionStatus::Ok,
                });
                imputed.extend(observations);
            }
            Err(source) => {
                METRICS.lock().record_partition(false, 0);
                if config.imputation.failure_policy == FailurePolicy::AbortAll {
                    return Err(PipelineError::PartitionFailed {
                        partition: run.partition,
                        source,
                    });
                }
                warn!(
                    "Skipping partition '{}': {} rows dropped ({})",
                    run.partition, run.rows, source
                );
                reports.push(PartitionReport {
                    partition: run.partition,
                    rows: run.rows,
                    cells_imputed: 0,
                    columns_imputed: Vec::new(),
                    columns_unimputable: Vec::new(),
                    status: PartitionStatus::Failed(source.to_string()),
                });
            }
        }
    }

    imputed.sort_by_key(|o| o.row_id);
    Ok(ImputationResult {
        observations: imputed,
        partitions: reports,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_models::{Method, Variable};
    use crate::tests::test_helpers::{observation, synthetic_observations};

    #[test]
    fn partitions_fall_back_to_unknown() {
        let mut a = observation(0, "S1");
        a.water_body_type = None;
        let b = observation(1, "S2");
        let partitions = partition_by_water_body(vec![a, b]);
        let keys: Vec<&String> = partitions.keys().collect();
        assert_eq!(keys, ["lake", "unknown"]);
    }

    #[test]
    fn partition_seeds_differ_by_key() {
        assert_ne!(partition_seed(42, "lake"), partition_seed(42, "river"));
        assert_eq!(partition_seed(42, "lake"), partition_seed(42, "lake"));
    }

    #[test]
    fn imputation_fills_values_and_keeps_labels() {
        let observations = synthetic_observations(60, 7);
        let missing: Vec<usize> = observations
            .iter()
            .filter(|o| o.measurement(Variable::Ph).value.is_none())
            .map(|o| o.row_id)
            .collect();
        assert!(!missing.is_empty());

        let result = impute_stratified(observations, &PipelineConfig::default()).unwrap();
        assert!(result.partitions.iter().all(|p| p.status == PartitionStatus::Ok));
        for obs in &result.observations {
            let m = obs.measurement(Variable::Ph);
            assert!(m.value.is_some());
            if missing.contains(&obs.row_id) {
                assert_eq!(m.method, Method::Imputed);
            }
        }
        let ids: Vec<usize> = result.observations.iter().map(|o| o.row_id).collect();
        let mut sorted = ids.clone();
        sorted.sort_unstable();
        assert_eq!(ids, sorted);
    }

    #[test]
    fn abort_policy_surfaces_the_partition() {
        let mut observations = synthetic_observations(60, 3);
        // a three-row partition with a gap cannot be imputed
        for obs in observations.iter_mut().take(3) {
            obs.water_body_type = Some("ditch".into());
        }
        observations[0].measurement_mut(Variable::Nitrate).value = None;
        observations[0].measurement_mut(Variable::Nitrate).method = Method::Imputed;
        let mut config = PipelineConfig::default();
        config.imputation.failure_policy = FailurePolicy::AbortAll;
        let err = impute_stratified(observations, &config).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::PartitionFailed { partition, .. } if partition == "ditch"
        ));
    }

    #[test]
    fn unmeasured_variable_keeps_the_partition() {
        let mut observations = synthetic_observations(60, 7);
        let lakes: Vec<usize> = observations
            .iter()
            .filter(|o| o.partition_key() == "lake")
            .map(|o| o.row_id)
            .collect();
        for obs in observations.iter_mut().filter(|o| o.partition_key() == "lake") {
            let m = obs.measurement_mut(Variable::Salinity);
            m.value = None;
            m.method = Method::Imputed;
        }

        let result = impute_stratified(observations, &PipelineConfig::default()).unwrap();
        assert_eq!(result.rows_dropped(), 0);
        assert_eq!(result.observations.len(), 60);
        let lake = result
            .partitions
            .iter()
            .find(|p| p.partition == "lake")
            .unwrap();
        assert_eq!(lake.status, PartitionStatus::Ok);
        assert_eq!(lake.rows, lakes.len());
        assert_eq!(lake.columns_unimputable, vec![Variable::Salinity.name().to_string()]);
        assert!(lake.columns_imputed.contains(&Variable::Ph.name().to_string()));

        for obs in &result.observations {
            let salinity = obs.measurement(Variable::Salinity).value;
            if lakes.contains(&obs.row_id) {
                assert_eq!(salinity, None);
                assert!(obs.measurement(Variable::Ph).value.is_some());
            } else {
                assert!(salinity.is_some());
            }
        }
    }
}
