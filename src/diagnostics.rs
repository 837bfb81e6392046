//! Per-site residual and provenance summary.

use crate::candidates::{iqr_expr, CandidateSet};
use crate::data_models::{Observation, SITE_ID, TRANSPARENCY};
use crate::model::ScoredObservation;
use crate::table::FeatureTable;
use log::info;
use polars::prelude::*;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SiteDiagnostics {
    pub site_id: String,
    pub observations: usize,
    pub non_saturated: usize,
    pub mean_residual: Option<f64>,
    pub mean_adjusted_residual: Option<f64>,
    pub transparency_iqr: Option<f64>,
    /// Candidate membership, not split membership.
    pub used_in_training: bool,
    /// Cells equal to `Imputed` over all cells of the site's rows.
    pub imputation_ratio: f64,
}

/// `scored` must be aligned with `observations`.
pub fn site_diagnostics(
    observations: &[Observation],
    scored: &[ScoredObservation],
    candidates: &CandidateSet,
) -> PolarsResult<Vec<SiteDiagnostics>> {
    let table = FeatureTable::from_observations(observations)?;
    let width = table.width();
    let score = |f: fn(&ScoredObservation) -> Option<f64>| -> Vec<Option<f64>> {
        (0..observations.len())
            .map(|row| scored.get(row).and_then(f))
            .collect()
    };

    let frame = DataFrame::new(vec![
        Series::new(
            SITE_ID,
            observations.iter().map(|o| o.site_id.as_str()).collect::<Vec<_>>(),
        ),
        Series::new(
            "non_saturated",
            observations
                .iter()
                .map(|o| u64::from(!o.saturation.is_saturated()))
                .collect::<Vec<_>>(),
        ),
        Series::new(
            TRANSPARENCY,
            observations.iter().map(|o| o.transparency).collect::<Vec<_>>(),
        ),
        Series::new("residual", score(|s| s.residual)),
        Series::new("adjusted_residual", score(|s| s.adjusted_residual)),
        Series::new("imputed_cells", table.imputed_markers_per_row()?),
    ])?;

    let summary = frame
        .lazy()
        .group_by([col(SITE_ID)])
        .agg([
            col(TRANSPARENCY)
                .count()
                .cast(DataType::UInt64)
                .alias("observations"),
            col("non_saturated").sum(),
            col("residual").mean().alias("mean_residual"),
            col("adjusted_residual").mean().alias("mean_adjusted_residual"),
            iqr_expr(TRANSPARENCY).alias("transparency_iqr"),
            col("imputed_cells").sum(),
        ])
        .collect()?;

    let sites = summary.column(SITE_ID)?.str()?;
    let counts = summary.column("observations")?.u64()?;
    let non_saturated = summary.column("non_saturated")?.u64()?;
    let residuals = summary.column("mean_residual")?.f64()?;
    let adjusted = summary.column("mean_adjusted_residual")?.f64()?;
    let spreads = summary.column("transparency_iqr")?.f64()?;
    let imputed = summary.column("imputed_cells")?.u64()?;

    let mut diagnostics: Vec<SiteDiagnostics> = (0..summary.height())
        .filter_map(|i| {
            let site = sites.get(i)?;
            let count = counts.get(i)? as usize;
            let cells = (count * width) as f64;
            Some(SiteDiagnostics {
                site_id: site.to_string(),
                observations: count,
                non_saturated: non_saturated.get(i).unwrap_or(0) as usize,
                mean_residual: residuals.get(i),
                mean_adjusted_residual: adjusted.get(i),
                transparency_iqr: spreads.get(i),
                used_in_training: candidates.contains(site),
                imputation_ratio: if cells > 0.0 {
                    imputed.get(i).unwrap_or(0) as f64 / cells
                } else {
                    0.0
                },
            })
        })
        .collect();
    diagnostics.sort_by(|a, b| a.site_id.cmp(&b.site_id));
    info!("Summarised diagnostics for {} sites", diagnostics.len());
    Ok(diagnostics)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_models::{Method, Saturation, Variable};
    use crate::tests::test_helpers::observation;
    use approx::assert_relative_eq;

    fn scored(obs: &Observation, residual: f64, adjusted: f64) -> ScoredObservation {
        ScoredObservation {
            row_id: obs.row_id,
            site_id: obs.site_id.clone(),
            measured_on: obs.measured_on,
            transparency: obs.transparency,
            saturation: obs.saturation,
            candidate: false,
            prediction: Some(obs.transparency + residual),
            residual: Some(residual),
            adjusted_residual: Some(adjusted),
        }
    }

    #[test]
    fn sites_are_summarised() {
        let mut a = observation(0, "A");
        a.measurement_mut(Variable::Ph).method = Method::Imputed;
        a.measurement_mut(Variable::Salinity).method = Method::Imputed;
        let mut b = observation(1, "A");
        b.saturation = Saturation::Saturated;
        let c = observation(2, "B");
        let observations = vec![a, b, c];
        let scores = vec![
            scored(&observations[0], 0.2, 0.2),
            scored(&observations[1], 0.4, 0.0),
            scored(&observations[2], 0.1, 0.1),
        ];
        let mut candidates = CandidateSet::default();
        candidates.sites.insert("B".into());

        let diagnostics = site_diagnostics(&observations, &scores, &candidates).unwrap();
        assert_eq!(diagnostics.len(), 2);
        let site_a = &diagnostics[0];
        assert_eq!(site_a.site_id, "A");
        assert_eq!(site_a.observations, 2);
        assert_eq!(site_a.non_saturated, 1);
        assert_relative_eq!(site_a.mean_residual.unwrap(), 0.3);
        assert_relative_eq!(site_a.mean_adjusted_residual.unwrap(), 0.1);
        assert!(!site_a.used_in_training);

        let width = FeatureTable::from_observations(&observations)
            .unwrap()
            .width();
        assert_relative_eq!(site_a.imputation_ratio, 2.0 / (2 * width) as f64);
        assert!(diagnostics[1].used_in_training);
        assert_relative_eq!(diagnostics[1].imputation_ratio, 0.0);
    }

    #[test]
    fn unscored_sites_have_no_mean_residual() {
        let observations = vec![observation(0, "A"), observation(1, "B")];
        let scores = vec![scored(&observations[0], 0.2, 0.2)];
        let diagnostics =
            site_diagnostics(&observations, &scores, &CandidateSet::default()).unwrap();
        assert_eq!(diagnostics[1].site_id, "B");
        assert_eq!(diagnostics[1].mean_residual, None);
        assert_relative_eq!(diagnostics[1].transparency_iqr.unwrap(), 0.0);
    }
}
