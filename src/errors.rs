use polars::prelude::PolarsError;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error reading config file {path}: {source}")]
    IoError {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Failed to parse JSON configuration in {path}: {source}")]
    JsonParseError {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("Configuration file not found at {path}")]
    NotFound { path: PathBuf },
}

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Delimiter {delimiter:?} must be a single ASCII character")]
    InvalidDelimiter { delimiter: String },
    #[error("IO error reading data file {path}: {source}")]
    IoError {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Error reading CSV headers: {source}")]
    HeaderReadError {
        #[source]
        source: csv::Error,
    },
    #[error("Schema mismatch: missing columns {missing:?} (extra columns ignored: {extra:?})")]
    SchemaMismatch {
        missing: Vec<String>,
        extra: Vec<String>,
    },
    #[error("Malformed record at row {row}: {source}")]
    MalformedRecord {
        row: usize,
        #[source]
        source: csv::Error,
    },
    #[error("Required field '{column}' is empty at row {row}")]
    MissingField { row: usize, column: String },
    #[error("Invalid value '{value}' in column '{column}' at row {row}")]
    InvalidValue {
        row: usize,
        column: String,
        value: String,
    },
    #[error("Date parsing error at row {row} for value '{value}': {message}")]
    DateParseError {
        row: usize,
        value: String,
        message: String,
    },
}

/// Faults raised inside a single imputation partition.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ImputeError {
    #[error("partition has {rows} rows with missing cells, need at least {min}")]
    TooFewRows { rows: usize, min: usize },
    #[error("non-finite predictive mean for column '{column}' at iteration {iteration}")]
    NonFinite { column: String, iteration: usize },
    #[error("singular normal equations while fitting column '{column}'")]
    Singular { column: String },
    #[error("partition frame error: {0}")]
    Frame(String),
}

impl From<PolarsError> for ImputeError {
    fn from(e: PolarsError) -> Self {
        ImputeError::Frame(e.to_string())
    }
}

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("no rows available for {view}")]
    EmptyView { view: String },
    #[error("category '{value}' in column '{column}' is not in the shared dictionary")]
    UnknownCategory { column: String, value: String },
    #[error("feature vector has {found} features, model expects {expected}")]
    FeatureMismatch { expected: usize, found: usize },
    #[error("invalid model configuration: {0}")]
    InvalidConfig(String),
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Configuration parsing failed: {0}")]
    ConfigParse(#[from] ConfigError),
    #[error("Parsing failed: {0}")]
    Parse(#[from] ParseError),
    #[error("Imputation failed for partition '{partition}': {source}")]
    PartitionFailed {
        partition: String,
        #[source]
        source: ImputeError,
    },
    #[error("Modeling failed: {0}")]
    Model(#[from] ModelError),
    #[error("Failed to write {path}: {source}")]
    Output {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("CSV output error: {0}")]
    Csv(#[from] csv::Error),
    #[error("JSON output error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Frame error: {0}")]
    Frame(#[from] PolarsError),
}
