//! Training, held-out evaluation and full-table scoring of the transparency model.

use crate::candidates::CandidateSet;
use crate::config::PipelineConfig;
use crate::data_models::{Observation, Saturation};
use crate::errors::ModelError;
use crate::metrics::METRICS;
use crate::model::cv::{tune, CvReport};
use crate::model::dataset::{
    sample_without_replacement, train_test_split, CategoryDictionary, ModelView,
};
use crate::model::forest::{ForestParams, RegressionForest};
use crate::stats::{self, LinearFit};
use chrono::NaiveDate;
use log::{info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use std::collections::BTreeSet;

/// Residual after accounting for saturation: a saturated reading is a lower bound,
/// so over-prediction against it is not an error.
pub fn adjusted_residual(prediction: f64, actual: f64, saturation: Saturation) -> f64 {
    if saturation.is_saturated() && prediction >= actual {
        0.0
    } else {
        (prediction - actual).abs()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ViewMetrics {
    pub view: String,
    pub rows: usize,
    pub rmse: f64,
    pub mae: f64,
    pub r2: f64,
    /// `actual ~ predicted`; absent when predictions are constant.
    pub calibration: Option<LinearFit>,
}

impl ViewMetrics {
    pub fn compute(view: &str, actual: &[f64], predicted: &[f64]) -> Option<Self> {
        if actual.is_empty() {
            return None;
        }
        Some(Self {
            view: view.to_string(),
            rows: actual.len(),
            rmse: stats::rmse(actual, predicted),
            mae: stats::mae(actual, predicted),
            r2: stats::r2(actual, predicted),
            calibration: stats::linear_fit(predicted, actual),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    pub row_id: usize,
    pub site_id: String,
    pub actual: f64,
    pub predicted: f64,
}

impl Prediction {
    /// Signed residual `predicted - actual`.
    pub fn residual(&self) -> f64 {
        self.predicted - self.actual
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SplitSummary {
    pub candidate_rows: usize,
    pub train_rows: usize,
    pub test_rows: usize,
    pub non_candidate_rows: usize,
    pub non_candidate_sample: usize,
    pub excluded_missing_features: usize,
    /// Sites with rows on both sides of the split.
    pub shared_sites: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct Evaluation {
    pub params: ForestParams,
    pub cross_validation: CvReport,
    pub split: SplitSummary,
    pub test: Option<ViewMetrics>,
    pub non_candidate: Option<ViewMetrics>,
    pub train: Option<ViewMetrics>,
    pub feature_names: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScoredObservation {
    pub row_id: usize,
    pub site_id: String,
    pub measured_on: NaiveDate,
    pub transparency: f64,
    pub saturation: Saturation,
    pub candidate: bool,
    pub prediction: Option<f64>,
    pub residual: Option<f64>,
    pub adjusted_residual: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct ModelOutcome {
    pub evaluation: Evaluation,
    pub train_predictions: Vec<Prediction>,
    pub test_predictions: Vec<Prediction>,
    pub non_candidate_predictions: Vec<Prediction>,
    pub scored: Vec<ScoredObservation>,
}

fn predict_view(
    forest: &RegressionForest,
    view: &ModelView,
) -> Result<Vec<Prediction>, ModelError> {
    view.features
        .iter()
        .enumerate()
        .map(|(i, features)| -> Result<Prediction, ModelError> {
            Ok(Prediction {
                row_id: view.row_ids[i],
                site_id: view.site_ids[i].clone(),
                actual: view.target[i],
                predicted: forest.predict(features)?,
            })
        })
        .collect()
}

fn metrics_for(view: &str, predictions: &[Prediction]) -> Option<ViewMetrics> {
    let actual: Vec<f64> = predictions.iter().map(|p| p.actual).collect();
    let predicted: Vec<f64> = predictions.iter().map(|p| p.predicted).collect();
    ViewMetrics::compute(view, &actual, &predicted)
}

/// Scores every observation; rows with a missing feature get no prediction.
pub fn score_observations(
    forest: &RegressionForest,
    dictionary: &CategoryDictionary,
    observations: &[Observation],
    candidates: &CandidateSet,
) -> Result<Vec<ScoredObservation>, ModelError> {
    observations
        .iter()
        .map(|obs| -> Result<ScoredObservation, ModelError> {
            let prediction = match dictionary.encode(obs)? {
                Some(features) => Some(forest.predict(&features)?),
                None => None,
            };
            Ok(ScoredObservation {
                row_id: obs.row_id,
                site_id: obs.site_id.clone(),
                measured_on: obs.measured_on,
                transparency: obs.transparency,
                saturation: obs.saturation,
                candidate: candidates.contains(&obs.site_id),
                prediction,
                residual: prediction.map(|p| (p - obs.transparency).abs()),
                adjusted_residual: prediction
                    .map(|p| adjusted_residual(p, obs.transparency, obs.saturation)),
            })
        })
        .collect()
}

/// Splits candidate rows, tunes and fits the forest, evaluates the held-out and
/// non-candidate views, then scores the full table.
pub fn train_and_evaluate(
    observations: &[Observation],
    candidates: &CandidateSet,
    config: &PipelineConfig,
) -> Result<ModelOutcome, ModelError> {
    let dictionary = CategoryDictionary::from_observations(observations);
    let candidate_view = ModelView::build(
        "candidate",
        observations.iter().filter(|o| candidates.contains(&o.site_id)),
        &dictionary,
    )?;
    let non_candidate_view = ModelView::build(
        "non-candidate",
        observations.iter().filter(|o| !candidates.contains(&o.site_id)),
        &dictionary,
    )?;
    if candidate_view.is_empty() {
        return Err(ModelError::EmptyView {
            view: candidate_view.name,
        });
    }
    let excluded = candidate_view.excluded_missing + non_candidate_view.excluded_missing;
    if excluded > 0 {
        warn!("{} model rows excluded for missing features", excluded);
    }

    let mut rng = StdRng::seed_from_u64(config.seed);
    let (train_idx, test_idx) =
        train_test_split(candidate_view.len(), config.model.train_fraction, &mut rng);
    let train = candidate_view.subset("train", &train_idx);
    let test = candidate_view.subset("test", &test_idx);
    if train.is_empty() {
        return Err(ModelError::EmptyView { view: train.name });
    }

    let train_sites: BTreeSet<&str> = train.site_ids.iter().map(String::as_str).collect();
    let shared_sites = test
        .site_ids
        .iter()
        .map(String::as_str)
        .filter(|s| train_sites.contains(s))
        .collect::<BTreeSet<_>>()
        .len();
    if shared_sites > 0 {
        warn!(
            "{} sites contribute rows to both train and test; \
             held-out metrics are not site-independent",
            shared_sites
        );
    }

    let sample_size = test.len().min(non_candidate_view.len());
    let sample_idx = sample_without_replacement(non_candidate_view.len(), sample_size, &mut rng);
    let non_candidate = non_candidate_view.subset("non-candidate sample", &sample_idx);
    info!(
        "Model split: {} train, {} test, {} non-candidate sample",
        train.len(),
        test.len(),
        non_candidate.len()
    );

    let cross_validation = crate::time_operation!(
        "cross_validation",
        tune(&train.features, &train.target, &config.model, config.seed)?
    );
    let params = cross_validation.best;
    let forest = crate::time_operation!(
        "forest_fit",
        RegressionForest::fit(&train.features, &train.target, params, config.seed)?
    );

    let train_predictions = predict_view(&forest, &train)?;
    let test_predictions = predict_view(&forest, &test)?;
    let non_candidate_predictions = predict_view(&forest, &non_candidate)?;

    let test_metrics = metrics_for("test", &test_predictions);
    if let Some(m) = &test_metrics {
        info!("Test RMSE={:.5} MAE={:.5} R2={:.3}", m.rmse, m.mae, m.r2);
    }

    let scored = score_observations(&forest, &dictionary, observations, candidates)?;
    METRICS
        .lock()
        .record_scored(scored.iter().filter(|s| s.prediction.is_some()).count() as u64);

    Ok(ModelOutcome {
        evaluation: Evaluation {
            params,
            cross_validation,
            split: SplitSummary {
                candidate_rows: candidate_view.len(),
                train_rows: train.len(),
                test_rows: test.len(),
                non_candidate_rows: non_candidate_view.len(),
                non_candidate_sample: non_candidate.len(),
                excluded_missing_features: excluded,
                shared_sites,
            },
            test: test_metrics,
            non_candidate: metrics_for("non-candidate", &non_candidate_predictions),
            train: metrics_for("train", &train_predictions),
            feature_names: dictionary.feature_names(),
        },
        train_predictions,
        test_predictions,
        non_candidate_predictions,
        scored,
    })
}
