use crate::errors::ConfigError;
use log::debug;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

/// What to do when one water-body partition fails to impute.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Stop the run on the first failed partition.
    AbortAll,
    /// Drop the failed partition's rows and carry on.
    #[default]
    SkipFailed,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ImputationConfig {
    pub iterations: usize,
    pub donors: usize,
    pub ridge: f64,
    pub min_partition_rows: usize,
    pub failure_policy: FailurePolicy,
    pub parallel: bool,
}

impl Default for ImputationConfig {
    fn default() -> Self {
        Self {
            iterations: 5,
            donors: 5,
            ridge: 1e-3,
            min_partition_rows: 10,
            failure_policy: FailurePolicy::SkipFailed,
            parallel: true,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct CandidateConfig {
    pub min_observations: usize,
    pub max_distance_to_water_m: f64,
}

impl Default for CandidateConfig {
    fn default() -> Self {
        Self {
            min_observations: 10,
            max_distance_to_water_m: 1000.0,
        }
    }
}

/// Hyperparameter grid explored by cross-validation.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ForestGrid {
    /// Fraction of features tried at each split.
    pub max_features: Vec<f64>,
    pub min_samples_leaf: Vec<usize>,
}

impl Default for ForestGrid {
    fn default() -> Self {
        Self {
            max_features: vec![0.33, 0.66, 1.0],
            min_samples_leaf: vec![1, 5],
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ModelConfig {
    pub train_fraction: f64,
    pub cv_folds: usize,
    pub n_trees: usize,
    /// Trees per forest while cross-validating; the final fit uses `n_trees`.
    pub cv_trees: usize,
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub grid: ForestGrid,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            train_fraction: 0.8,
            cv_folds: 10,
            n_trees: 100,
            cv_trees: 30,
            max_depth: Some(32),
            min_samples_split: 2,
            grid: ForestGrid::default(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct PipelineConfig {
    /// Governs every random draw in the run.
    pub seed: u64,
    pub delimiter: String,
    pub habitat_delimiter: String,
    pub null_markers: Vec<String>,
    pub imputation: ImputationConfig,
    pub candidates: CandidateConfig,
    pub model: ModelConfig,
    pub histogram_bins: usize,
    pub output_dir: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            delimiter: ",".to_string(),
            habitat_delimiter: ";".to_string(),
            null_markers: ["", "na", "nan", "null", "-"]
                .iter()
                .map(|m| m.to_string())
                .collect(),
            imputation: ImputationConfig::default(),
            candidates: CandidateConfig::default(),
            model: ModelConfig::default(),
            histogram_bins: 30,
            output_dir: PathBuf::from("output"),
        }
    }
}

impl PipelineConfig {
    pub fn is_null_marker(&self, value: &str) -> bool {
        let trimmed = value.trim();
        self.null_markers
            .iter()
            .any(|m| m.eq_ignore_ascii_case(trimmed))
    }
}

/// Loads a pipeline configuration from a JSON file. Missing keys fall back to defaults.
pub fn load_config(path: &Path) -> Result<PipelineConfig, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound {
            path: path.to_path_buf(),
        });
    }

    let file = File::open(path).map_err(|e| ConfigError::IoError {
        path: path.to_path_buf(),
        source: e,
    })?;
    let reader = BufReader::new(file);

    let config: PipelineConfig =
        serde_json::from_reader(reader).map_err(|e| ConfigError::JsonParseError {
            path: path.to_path_buf(),
            source: e,
        })?;
    debug!("Loaded configuration from {}: {:?}", path.display(), config);

    Ok(config)
}
