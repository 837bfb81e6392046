//! K-fold cross-validated grid search over forest hyperparameters.

use crate::config::ModelConfig;
use crate::errors::ModelError;
use crate::model::forest::{ForestParams, RegressionForest};
use crate::stats::rmse;
use log::{debug, info};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct CvScore {
    pub max_features: f64,
    pub min_samples_leaf: usize,
    pub rmse: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CvReport {
    pub folds: usize,
    pub scores: Vec<CvScore>,
    pub best: ForestParams,
}

/// Shuffled fold membership: fold `f` holds every index at position `p` with `p % k == f`.
pub fn kfold_indices(n: usize, k: usize, rng: &mut StdRng) -> Vec<Vec<usize>> {
    let mut indices: Vec<usize> = (0..n).collect();
    indices.shuffle(rng);
    let mut folds = vec![Vec::new(); k];
    for (position, index) in indices.into_iter().enumerate() {
        folds[position % k].push(index);
    }
    folds
}

fn params_for(
    config: &ModelConfig,
    max_features: f64,
    min_samples_leaf: usize,
    n_trees: usize,
) -> ForestParams {
    ForestParams {
        n_trees,
        max_features,
        min_samples_leaf,
        min_samples_split: config.min_samples_split,
        max_depth: config.max_depth,
    }
}

/// Pooled out-of-fold RMSE for one parameter set.
fn score(
    x: &[Vec<f64>],
    y: &[f64],
    folds: &[Vec<usize>],
    params: ForestParams,
    seed: u64,
) -> Result<f64, ModelError> {
    let per_fold: Vec<(Vec<f64>, Vec<f64>)> = folds
        .par_iter()
        .enumerate()
        .map(|(f, held_out)| -> Result<(Vec<f64>, Vec<f64>), ModelError> {
            let train: Vec<usize> = folds
                .iter()
                .enumerate()
                .filter(|(g, _)| *g != f)
                .flat_map(|(_, rows)| rows.iter().copied())
                .collect();
            let xs: Vec<Vec<f64>> = train.iter().map(|&r| x[r].clone()).collect();
            let ys: Vec<f64> = train.iter().map(|&r| y[r]).collect();
            let fold_seed = seed.wrapping_add(f as u64 * 1_000);
            let forest = RegressionForest::fit(&xs, &ys, params, fold_seed)?;
            let predicted = held_out
                .iter()
                .map(|&r| forest.predict(&x[r]))
                .collect::<Result<Vec<_>, _>>()?;
            let actual: Vec<f64> = held_out.iter().map(|&r| y[r]).collect();
            Ok((actual, predicted))
        })
        .collect::<Result<_, ModelError>>()?;

    let (actual, predicted): (Vec<f64>, Vec<f64>) = per_fold
        .into_iter()
        .flat_map(|(a, p)| a.into_iter().zip(p))
        .unzip();
    Ok(rmse(&actual, &predicted))
}

/// Scores every grid point and returns the lowest-RMSE parameters, refit size included.
/// Grid ties keep the earlier point. With fewer than two rows the first grid point wins unscored.
pub fn tune(
    x: &[Vec<f64>],
    y: &[f64],
    config: &ModelConfig,
    seed: u64,
) -> Result<CvReport, ModelError> {
    let grid = &config.grid;
    let (Some(&first_mf), Some(&first_leaf)) =
        (grid.max_features.first(), grid.min_samples_leaf.first())
    else {
        return Err(ModelError::InvalidConfig("hyperparameter grid is empty".to_string()));
    };
    if config.cv_folds < 2 {
        return Err(ModelError::InvalidConfig(format!(
            "cv_folds must be at least 2, got {}",
            config.cv_folds
        )));
    }

    let k = config.cv_folds.min(x.len());
    if k < 2 {
        return Ok(CvReport {
            folds: 0,
            scores: Vec::new(),
            best: params_for(config, first_mf, first_leaf, config.n_trees),
        });
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let folds = kfold_indices(x.len(), k, &mut rng);
    info!(
        "Cross-validating {} parameter sets over {} folds",
        grid.max_features.len() * grid.min_samples_leaf.len(),
        k
    );

    let mut scores = Vec::new();
    for &max_features in &grid.max_features {
        for &min_samples_leaf in &grid.min_samples_leaf {
            let cv_trees = config.cv_trees.max(1);
            let params = params_for(config, max_features, min_samples_leaf, cv_trees);
            let rmse = score(x, y, &folds, params, seed)?;
            debug!(
                "max_features={} min_samples_leaf={} rmse={:.6}",
                max_features, min_samples_leaf, rmse
            );
            scores.push(CvScore {
                max_features,
                min_samples_leaf,
                rmse,
            });
        }
    }

    let best = scores
        .iter()
        .fold(None::<&CvScore>, |best, s| match best {
            Some(b) if b.rmse <= s.rmse => Some(b),
            _ => Some(s),
        })
        .map(|s| params_for(config, s.max_features, s.min_samples_leaf, config.n_trees))
        .unwrap_or_else(|| params_for(config, first_mf, first_leaf, config.n_trees));
    info!(
        "Best parameters: max_features={} min_samples_leaf={}",
        best.max_features, best.min_samples_leaf
    );

    Ok(CvReport {
        folds: k,
        scores,
        best,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ForestGrid;

    #[test]
    fn folds_partition_the_indices() {
        let mut rng = StdRng::seed_from_u64(4);
        let folds = kfold_indices(23, 5, &mut rng);
        assert_eq!(folds.len(), 5);
        let mut all: Vec<usize> = folds.iter().flatten().copied().collect();
        all.sort_unstable();
        assert_eq!(all, (0..23).collect::<Vec<_>>());
        assert!(folds.iter().all(|f| f.len() == 4 || f.len() == 5));
    }

    #[test]
    fn tune_picks_from_the_grid() {
        let x: Vec<Vec<f64>> = (0..30).map(|i| vec![i as f64, ((i * 7) % 5) as f64]).collect();
        let y: Vec<f64> = (0..30).map(|i| (i as f64 / 3.0).floor()).collect();
        let config = ModelConfig {
            cv_folds: 3,
            cv_trees: 5,
            n_trees: 12,
            grid: ForestGrid {
                max_features: vec![0.5, 1.0],
                min_samples_leaf: vec![1, 10],
            },
            ..ModelConfig::default()
        };
        let report = tune(&x, &y, &config, 8).unwrap();
        assert_eq!(report.scores.len(), 4);
        assert_eq!(report.folds, 3);
        assert_eq!(report.best.n_trees, 12);
        let best_rmse = report.scores.iter().map(|s| s.rmse).fold(f64::INFINITY, f64::min);
        let chosen = report
            .scores
            .iter()
            .find(|s| {
                s.max_features == report.best.max_features
                    && s.min_samples_leaf == report.best.min_samples_leaf
            })
            .unwrap();
        assert_eq!(chosen.rmse, best_rmse);
    }

    #[test]
    fn empty_grid_is_rejected() {
        let mut config = ModelConfig::default();
        config.grid.max_features.clear();
        assert!(matches!(
            tune(&[vec![1.0]], &[1.0], &config, 0),
            Err(ModelError::InvalidConfig(_))
        ));
    }
}
