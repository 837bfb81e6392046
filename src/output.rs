use crate::data_models::ROW_ID;
use crate::errors::PipelineError;
use crate::pipeline::PipelineOutput;
use crate::table::FeatureTable;
use log::info;
use polars::prelude::{CsvWriter, DataFrame, NamedFrom, SerWriter, Series};
use serde::Serialize;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

pub const SCORED_OBSERVATIONS: &str = "scored_observations.csv";
pub const SITE_DIAGNOSTICS: &str = "site_diagnostics.csv";
pub const CANDIDATE_SITES: &str = "candidate_sites.csv";
pub const EVALUATION: &str = "evaluation.json";
pub const PARTITIONS: &str = "partitions.json";
pub const PLOT_DATA: &str = "plot_data.json";

#[derive(Serialize)]
struct PartitionsReport<'a> {
    drops: &'a crate::reconcile::DropCounts,
    habitat_phrases: &'a [String],
    partitions: &'a [crate::impute::PartitionReport],
    rows_dropped_by_failed_partitions: usize,
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), PipelineError> {
    let file = File::create(path).map_err(|source| PipelineError::Output {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::to_writer_pretty(BufWriter::new(file), value)?;
    Ok(())
}

fn write_rows<T: Serialize>(path: &Path, rows: &[T]) -> Result<(), PipelineError> {
    let mut writer = csv::Writer::from_path(path)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush().map_err(|source| PipelineError::Output {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(())
}

/// Imputed table with the model's scores appended per row.
fn write_scored_table(path: &Path, output: &PipelineOutput) -> Result<(), PipelineError> {
    let table = FeatureTable::from_observations(&output.imputation.observations)?;
    let scored = &output.model.scored;

    let row_ids: Vec<u64> = table.row_ids.iter().map(|&r| r as u64).collect();
    let mut columns = vec![Series::new(ROW_ID, row_ids)];
    columns.extend(table.frame.get_columns().iter().cloned());
    columns.push(Series::new(
        "candidate",
        scored.iter().map(|s| s.candidate).collect::<Vec<_>>(),
    ));
    columns.push(Series::new(
        "prediction",
        scored.iter().map(|s| s.prediction).collect::<Vec<_>>(),
    ));
    columns.push(Series::new(
        "residual",
        scored.iter().map(|s| s.residual).collect::<Vec<_>>(),
    ));
    columns.push(Series::new(
        "adjusted_residual",
        scored.iter().map(|s| s.adjusted_residual).collect::<Vec<_>>(),
    ));
    let mut frame = DataFrame::new(columns)?;

    let file = File::create(path).map_err(|source| PipelineError::Output {
        path: path.to_path_buf(),
        source,
    })?;
    CsvWriter::new(BufWriter::new(file))
        .include_header(true)
        .finish(&mut frame)?;
    Ok(())
}

/// Writes every artifact of a run into `dir`, creating it if needed.
pub fn write_all(output: &PipelineOutput, dir: &Path) -> Result<Vec<PathBuf>, PipelineError> {
    fs::create_dir_all(dir).map_err(|source| PipelineError::Output {
        path: dir.to_path_buf(),
        source,
    })?;
    let path = |name: &str| dir.join(name);

    write_scored_table(&path(SCORED_OBSERVATIONS), output)?;
    write_rows(&path(SITE_DIAGNOSTICS), &output.diagnostics)?;
    write_rows(&path(CANDIDATE_SITES), &output.candidates.aggregates)?;
    write_json(&path(EVALUATION), &output.model.evaluation)?;
    write_json(
        &path(PARTITIONS),
        &PartitionsReport {
            drops: &output.drops,
            habitat_phrases: &output.habitat_phrases,
            partitions: &output.imputation.partitions,
            rows_dropped_by_failed_partitions: output.imputation.rows_dropped(),
        },
    )?;
    write_json(&path(PLOT_DATA), &output.plot_data)?;

    let written: Vec<PathBuf> = [
        SCORED_OBSERVATIONS,
        SITE_DIAGNOSTICS,
        CANDIDATE_SITES,
        EVALUATION,
        PARTITIONS,
        PLOT_DATA,
    ]
    .iter()
    .map(|name| path(name))
    .collect();
    info!("Wrote {} output files to {}", written.len(), dir.display());
    Ok(written)
}
