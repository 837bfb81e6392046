//! Stage composition: raw table -> reconciled -> imputed -> model and diagnostics.

use crate::candidates::{select_candidates, CandidateSet};
use crate::config::PipelineConfig;
use crate::data_models::{InputRecord, Observation};
use crate::diagnostics::{site_diagnostics, SiteDiagnostics};
use crate::errors::PipelineError;
use crate::impute::{impute_stratified, ImputationResult};
use crate::model::{train_and_evaluate, ModelOutcome};
use crate::parsers::csv_parser::parse_csv;
use crate::plot_data::{self, PlotData};
use crate::reconcile::{reconcile, DropCounts, ReconciledTable};
use crate::time_operation;
use log::info;
use std::path::Path;

#[derive(Debug, Clone)]
pub struct ModelStage {
    pub candidates: CandidateSet,
    pub model: ModelOutcome,
    pub diagnostics: Vec<SiteDiagnostics>,
    pub plot_data: PlotData,
}

#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub drops: DropCounts,
    pub habitat_phrases: Vec<String>,
    pub imputation: ImputationResult,
    pub candidates: CandidateSet,
    pub model: ModelOutcome,
    pub diagnostics: Vec<SiteDiagnostics>,
    pub plot_data: PlotData,
}

/// Raw records -> reconciled observations. Deterministic, no randomness involved.
pub fn reconcile_stage(records: Vec<InputRecord>, config: &PipelineConfig) -> ReconciledTable {
    time_operation!("reconcile", reconcile(records, config))
}

/// Reconciled observations -> imputed observations plus per-partition status.
pub fn impute_stage(
    observations: Vec<Observation>,
    config: &PipelineConfig,
) -> Result<ImputationResult, PipelineError> {
    time_operation!("impute", impute_stratified(observations, config))
}

/// Imputed observations -> candidate set, fitted model, evaluation and diagnostics.
pub fn model_stage(
    observations: &[Observation],
    config: &PipelineConfig,
) -> Result<ModelStage, PipelineError> {
    let candidates = time_operation!(
        "candidates",
        select_candidates(observations, &config.candidates)?
    );
    let model = time_operation!(
        "model",
        train_and_evaluate(observations, &candidates, config)?
    );
    let diagnostics = site_diagnostics(observations, &model.scored, &candidates)?;
    let plot_data = plot_data::build(&model, config.histogram_bins);
    Ok(ModelStage {
        candidates,
        model,
        diagnostics,
        plot_data,
    })
}

pub fn run_records(
    records: Vec<InputRecord>,
    config: &PipelineConfig,
) -> Result<PipelineOutput, PipelineError> {
    let reconciled = reconcile_stage(records, config);
    let imputation = impute_stage(reconciled.observations, config)?;
    info!(
        "Imputation finished: {} observations kept, {} rows dropped with failed partitions",
        imputation.observations.len(),
        imputation.rows_dropped()
    );
    let stage = model_stage(&imputation.observations, config)?;

    Ok(PipelineOutput {
        drops: reconciled.drops,
        habitat_phrases: reconciled.habitat_phrases,
        imputation,
        candidates: stage.candidates,
        model: stage.model,
        diagnostics: stage.diagnostics,
        plot_data: stage.plot_data,
    })
}

/// Reads `input` and runs every stage.
pub fn run(input: &Path, config: &PipelineConfig) -> Result<PipelineOutput, PipelineError> {
    info!("Reading {}", input.display());
    let records = time_operation!("parse", parse_csv(config, input)?);
    info!("Parsed {} records", records.len());
    run_records(records, config)
}
