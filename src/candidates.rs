//! Selection of training-candidate sites.

use crate::config::CandidateConfig;
use crate::data_models::{Observation, DISTANCE_TO_WATER, SITE_ID, TRANSPARENCY};
use log::info;
use polars::prelude::*;
use serde::Serialize;
use std::collections::BTreeSet;

const SATURATED: &str = "saturated";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SiteAggregate {
    pub site_id: String,
    pub count: usize,
    pub iqr: f64,
}

#[derive(Debug, Clone, Default)]
pub struct CandidateSet {
    pub sites: BTreeSet<String>,
    /// Qualifying sites, most observations first.
    pub aggregates: Vec<SiteAggregate>,
}

impl CandidateSet {
    pub fn contains(&self, site_id: &str) -> bool {
        self.sites.contains(site_id)
    }
}

/// Interquartile range of `name` within each group, linear interpolation between ranks.
pub fn iqr_expr(name: &str) -> Expr {
    col(name).quantile(lit(0.75), QuantileInterpolOptions::Linear)
        - col(name).quantile(lit(0.25), QuantileInterpolOptions::Linear)
}

fn site_frame(observations: &[Observation]) -> PolarsResult<DataFrame> {
    DataFrame::new(vec![
        Series::new(
            SITE_ID,
            observations.iter().map(|o| o.site_id.as_str()).collect::<Vec<_>>(),
        ),
        Series::new(
            TRANSPARENCY,
            observations.iter().map(|o| o.transparency).collect::<Vec<_>>(),
        ),
        Series::new(
            DISTANCE_TO_WATER,
            observations
                .iter()
                .map(|o| o.distance_to_water_m)
                .collect::<Vec<_>>(),
        ),
        Series::new(
            SATURATED,
            observations
                .iter()
                .map(|o| o.saturation.is_saturated())
                .collect::<Vec<_>>(),
        ),
    ])
}

/// Non-saturated observations within `max_distance_to_water_m`, grouped by site.
/// A site qualifies with at least `min_observations` rows and a non-zero
/// transparency spread.
pub fn select_candidates(
    observations: &[Observation],
    config: &CandidateConfig,
) -> PolarsResult<CandidateSet> {
    let grouped = site_frame(observations)?
        .lazy()
        .filter(
            col(DISTANCE_TO_WATER)
                .lt(lit(config.max_distance_to_water_m))
                .and(col(SATURATED).not()),
        )
        .group_by([col(SITE_ID)])
        .agg([
            col(TRANSPARENCY)
                .count()
                .cast(DataType::UInt64)
                .alias("count"),
            iqr_expr(TRANSPARENCY).alias("iqr"),
        ])
        .filter(
            col("count")
                .gt_eq(lit(config.min_observations as u64))
                .and(col("iqr").gt(lit(0.0))),
        )
        .collect()?;

    let sites = grouped.column(SITE_ID)?.str()?;
    let counts = grouped.column("count")?.u64()?;
    let spreads = grouped.column("iqr")?.f64()?;
    let mut aggregates: Vec<SiteAggregate> = sites
        .into_iter()
        .zip(counts.into_iter())
        .zip(spreads.into_iter())
        .filter_map(|((site, count), iqr)| {
            Some(SiteAggregate {
                site_id: site?.to_string(),
                count: count? as usize,
                iqr: iqr?,
            })
        })
        .collect();
    aggregates.sort_by(|a, b| {
        b.count
            .cmp(&a.count)
            .then_with(|| a.site_id.cmp(&b.site_id))
    });

    info!("Selected {} candidate sites", aggregates.len());
    Ok(CandidateSet {
        sites: aggregates.iter().map(|a| a.site_id.clone()).collect(),
        aggregates,
    })
}
