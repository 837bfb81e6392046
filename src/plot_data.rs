//! Data behind the diagnostic plots. Nothing here draws; a renderer consumes
//! the serialised [`PlotData`].

use crate::model::evaluate::{ModelOutcome, Prediction, ScoredObservation};
use crate::stats::{linear_fit, normal_quantile, LinearFit};
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistogramBin {
    pub lower: f64,
    pub upper: f64,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesPoint {
    pub measured_on: NaiveDate,
    pub actual: f64,
    pub predicted: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SiteSeries {
    pub site_id: String,
    pub points: Vec<SeriesPoint>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlotData {
    /// Test set, x = predicted, y = actual.
    pub predicted_vs_actual: Vec<Point>,
    pub calibration: Option<LinearFit>,
    /// Training set, x = predicted, y = signed residual.
    pub residual_vs_predicted: Vec<Point>,
    pub residual_histogram: Vec<HistogramBin>,
    /// x = theoretical normal quantile, y = sample quantile of the training residuals.
    pub residual_qq: Vec<Point>,
    pub site_series: Vec<SiteSeries>,
}

/// Equal-width bins spanning `[min, max]`; the last bin is closed on the right.
pub fn histogram(values: &[f64], bins: usize) -> Vec<HistogramBin> {
    let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.is_empty() || bins == 0 {
        return Vec::new();
    }
    let min = finite.iter().copied().fold(f64::INFINITY, f64::min);
    let max = finite.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if max == min {
        return vec![HistogramBin {
            lower: min,
            upper: max,
            count: finite.len(),
        }];
    }

    let width = (max - min) / bins as f64;
    let mut counts = vec![0usize; bins];
    for v in &finite {
        let bin = (((v - min) / width) as usize).min(bins - 1);
        counts[bin] += 1;
    }
    counts
        .into_iter()
        .enumerate()
        .map(|(i, count)| HistogramBin {
            lower: min + i as f64 * width,
            upper: if i + 1 == bins { max } else { min + (i + 1) as f64 * width },
            count,
        })
        .collect()
}

/// Plotting positions `(i - a) / (n + 1 - 2a)` with `a = 3/8` for ten or fewer points, else `1/2`.
pub fn plotting_positions(n: usize) -> Vec<f64> {
    let a = if n <= 10 { 3.0 / 8.0 } else { 0.5 };
    (1..=n)
        .map(|i| (i as f64 - a) / (n as f64 + 1.0 - 2.0 * a))
        .collect()
}

pub fn normal_qq(values: &[f64]) -> Vec<Point> {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    sorted.sort_by(|a, b| a.total_cmp(b));
    plotting_positions(sorted.len())
        .into_iter()
        .zip(sorted)
        .map(|(p, y)| Point {
            x: normal_quantile(p),
            y,
        })
        .collect()
}

/// Actual and predicted transparency over time for every site, dates ascending.
pub fn site_series(scored: &[ScoredObservation]) -> Vec<SiteSeries> {
    let mut sites: BTreeMap<&str, Vec<SeriesPoint>> = BTreeMap::new();
    for s in scored {
        sites.entry(s.site_id.as_str()).or_default().push(SeriesPoint {
            measured_on: s.measured_on,
            actual: s.transparency,
            predicted: s.prediction,
        });
    }
    sites
        .into_iter()
        .map(|(site, mut points)| {
            points.sort_by_key(|p| p.measured_on);
            SiteSeries {
                site_id: site.to_string(),
                points,
            }
        })
        .collect()
}

pub fn build(outcome: &ModelOutcome, bins: usize) -> PlotData {
    let predicted: Vec<f64> = outcome.test_predictions.iter().map(|p| p.predicted).collect();
    let actual: Vec<f64> = outcome.test_predictions.iter().map(|p| p.actual).collect();
    let residuals: Vec<f64> = outcome.train_predictions.iter().map(Prediction::residual).collect();

    PlotData {
        predicted_vs_actual: predicted
            .iter()
            .zip(&actual)
            .map(|(&x, &y)| Point { x, y })
            .collect(),
        calibration: linear_fit(&predicted, &actual),
        residual_vs_predicted: outcome
            .train_predictions
            .iter()
            .map(|p| Point {
                x: p.predicted,
                y: p.residual(),
            })
            .collect(),
        residual_histogram: histogram(&residuals, bins),
        residual_qq: normal_qq(&residuals),
        site_series: site_series(&outcome.scored),
    }
}
