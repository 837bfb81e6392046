//! Chained-equations imputation with predictive mean matching.
//!
//! Each target column is regressed on every eligible predictor column with a
//! ridge-stabilised linear model. A missing cell receives the observed value of
//! a donor drawn at random among the `donors` observed rows whose predicted
//! means are closest to its own. Categorical targets are predicted as one
//! indicator per level and matched on the full predicted vector.
//!
//! Only masked cells are ever written. Observed cells, and every cell of an
//! excluded column, leave the engine untouched.

use crate::errors::ImputeError;
use crate::table::FeatureTable;
use log::{debug, warn};
use ndarray::{Array2, Axis};
use polars::prelude::*;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::BTreeSet;

#[derive(Debug, Clone)]
pub struct PmmSettings {
    pub iterations: usize,
    pub donors: usize,
    pub ridge: f64,
    pub min_rows: usize,
    pub seed: u64,
}

/// Cells to impute: `(column index, null rows)` for every eligible column with gaps.
#[derive(Debug, Clone, PartialEq)]
pub struct MissingnessMask {
    pub targets: Vec<(usize, Vec<usize>)>,
}

impl MissingnessMask {
    pub fn build(frame: &DataFrame, excluded: &[&str]) -> Self {
        let targets = frame
            .get_columns()
            .iter()
            .enumerate()
            .filter(|(_, s)| !excluded.contains(&s.name()))
            .map(|(i, s)| {
                let nulls: Vec<usize> = s
                    .is_null()
                    .into_iter()
                    .enumerate()
                    .filter_map(|(row, null)| null.unwrap_or(false).then_some(row))
                    .collect();
                (i, nulls)
            })
            .filter(|(_, rows)| !rows.is_empty())
            .collect();
        Self { targets }
    }

    /// Moves targets without a single observed row out of the mask and returns their indices.
    pub fn take_unimputable(&mut self, height: usize) -> Vec<usize> {
        let (empty, kept): (Vec<_>, Vec<_>) = self
            .targets
            .drain(..)
            .partition(|(_, rows)| rows.len() >= height);
        self.targets = kept;
        empty.into_iter().map(|(c, _)| c).collect()
    }

    pub fn cell_count(&self) -> usize {
        self.targets.iter().map(|(_, rows)| rows.len()).sum()
    }

    pub fn contains(&self, column: usize, row: usize) -> bool {
        self.targets
            .iter()
            .any(|(c, rows)| *c == column && rows.binary_search(&row).is_ok())
    }
}

/// Which columns may predict which. Excluded columns neither predict nor get predicted.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictorMatrix {
    eligible: Vec<bool>,
}

impl PredictorMatrix {
    pub fn build(frame: &DataFrame, excluded: &[&str]) -> Self {
        Self {
            eligible: frame
                .get_columns()
                .iter()
                .map(|s| !excluded.contains(&s.name()))
                .collect(),
        }
    }

    pub fn exclude(&mut self, column: usize) {
        if let Some(slot) = self.eligible.get_mut(column) {
            *slot = false;
        }
    }

    pub fn is_predictor(&self, target: usize, predictor: usize) -> bool {
        target != predictor && self.eligible[target] && self.eligible[predictor]
    }

    pub fn predictors_for(&self, target: usize) -> Vec<usize> {
        (0..self.eligible.len())
            .filter(|&p| self.is_predictor(target, p))
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MiceOutcome {
    pub cells_imputed: usize,
    pub columns_imputed: Vec<String>,
    /// Columns with no observed value in the table; their cells stay null.
    pub columns_unimputable: Vec<String>,
}

/// Working copy of one frame column while the chained passes run.
#[derive(Debug, Clone)]
enum Cells {
    Numeric(Vec<Option<f64>>),
    Text(Vec<Option<String>>),
}

impl Cells {
    fn load(series: &Series) -> PolarsResult<Self> {
        if series.dtype() == &DataType::String {
            let values = series.str()?.into_iter().map(|v| v.map(str::to_string));
            return Ok(Cells::Text(values.collect()));
        }
        let values = series.cast(&DataType::Float64)?;
        let values = values.f64()?.into_iter().collect();
        Ok(Cells::Numeric(values))
    }

    fn into_series(self, name: &str) -> Series {
        match self {
            Cells::Numeric(values) => Series::new(name, values),
            Cells::Text(values) => Series::new(name, values),
        }
    }
}

/// Fills the masked cells of `table` in place.
pub fn impute_table(
    table: &mut FeatureTable,
    excluded: &[&str],
    settings: &PmmSettings,
) -> Result<MiceOutcome, ImputeError> {
    let names: Vec<String> = table
        .frame
        .get_column_names()
        .iter()
        .map(|n| n.to_string())
        .collect();
    let mut mask = MissingnessMask::build(&table.frame, excluded);
    let unimputable = mask.take_unimputable(table.height());
    let columns_unimputable: Vec<String> =
        unimputable.iter().map(|&c| names[c].clone()).collect();
    if !columns_unimputable.is_empty() {
        warn!(
            "No observed values for {:?}; their cells stay missing",
            columns_unimputable
        );
    }
    if mask.targets.is_empty() {
        return Ok(MiceOutcome {
            columns_unimputable,
            ..MiceOutcome::default()
        });
    }
    if table.height() < settings.min_rows {
        return Err(ImputeError::TooFewRows {
            rows: table.height(),
            min: settings.min_rows,
        });
    }

    let mut predictors = PredictorMatrix::build(&table.frame, excluded);
    for &column in &unimputable {
        predictors.exclude(column);
    }
    let mut cells = table
        .frame
        .get_columns()
        .iter()
        .map(Cells::load)
        .collect::<PolarsResult<Vec<_>>>()?;
    let mut rng = StdRng::seed_from_u64(settings.seed);

    // Observed rows per target are fixed by the original mask.
    let observed: Vec<Vec<usize>> = mask
        .targets
        .iter()
        .map(|(_, missing)| {
            (0..table.height())
                .filter(|r| missing.binary_search(r).is_err())
                .collect()
        })
        .collect();

    // Start from random draws of observed values.
    for ((col, missing), obs_rows) in mask.targets.iter().zip(&observed) {
        let draws: Vec<usize> = missing
            .iter()
            .map(|_| *obs_rows.choose(&mut rng).unwrap_or(&obs_rows[0]))
            .collect();
        copy_cells(&mut cells[*col], missing, &draws);
    }

    for iteration in 1..=settings.iterations {
        for ((col, missing), obs_rows) in mask.targets.iter().zip(&observed) {
            let design = design_matrix(&cells, &predictors.predictors_for(*col), table.height());
            let response = response_matrix(&cells[*col], obs_rows);

            let x_obs = design.select(Axis(0), obs_rows);
            let beta = ridge_solve(&x_obs, &response, settings.ridge).ok_or_else(|| {
                ImputeError::Singular {
                    column: names[*col].clone(),
                }
            })?;
            let fitted = design.dot(&beta);
            if fitted.iter().any(|v| !v.is_finite()) {
                return Err(ImputeError::NonFinite {
                    column: names[*col].clone(),
                    iteration,
                });
            }

            let donors = match_donors(&fitted, obs_rows, missing, settings.donors, &mut rng);
            copy_cells(&mut cells[*col], missing, &donors);
        }
        debug!(
            "Chained-equations pass {}/{} complete",
            iteration, settings.iterations
        );
    }

    for (col, _) in &mask.targets {
        let filled = std::mem::replace(&mut cells[*col], Cells::Numeric(Vec::new()));
        table
            .frame
            .replace(&names[*col], filled.into_series(&names[*col]))?;
    }

    Ok(MiceOutcome {
        cells_imputed: mask.cell_count(),
        columns_imputed: mask.targets.iter().map(|(c, _)| names[*c].clone()).collect(),
        columns_unimputable,
    })
}

/// `cells[missing[i]] = cells[donors[i]]`
fn copy_cells(cells: &mut Cells, missing: &[usize], donors: &[usize]) {
    match cells {
        Cells::Numeric(values) => {
            for (&row, &donor) in missing.iter().zip(donors) {
                values[row] = values[donor];
            }
        }
        Cells::Text(values) => {
            for (&row, &donor) in missing.iter().zip(donors) {
                values[row] = values[donor].clone();
            }
        }
    }
}

/// Intercept plus standardised numeric predictors and drop-first one-hot categoricals.
/// Constant predictors carry no information and are skipped.
fn design_matrix(cells: &[Cells], predictors: &[usize], n: usize) -> Array2<f64> {
    let mut blocks: Vec<Vec<f64>> = vec![vec![1.0; n]];

    for &p in predictors {
        match &cells[p] {
            Cells::Numeric(values) => {
                let present: Vec<f64> = values.iter().flatten().copied().collect();
                if present.is_empty() {
                    continue;
                }
                let mean = present.iter().sum::<f64>() / present.len() as f64;
                let var = present.iter().map(|v| (v - mean).powi(2)).sum::<f64>()
                    / present.len() as f64;
                let sd = var.sqrt();
                if !sd.is_finite() || sd < 1e-12 {
                    continue;
                }
                blocks.push(
                    values
                        .iter()
                        .map(|v| v.map_or(0.0, |x| (x - mean) / sd))
                        .collect(),
                );
            }
            Cells::Text(values) => {
                let levels: BTreeSet<&str> = values.iter().flatten().map(String::as_str).collect();
                for level in levels.iter().skip(1) {
                    blocks.push(
                        values
                            .iter()
                            .map(|v| if v.as_deref() == Some(*level) { 1.0 } else { 0.0 })
                            .collect(),
                    );
                }
            }
        }
    }

    let mut design = Array2::<f64>::zeros((n, blocks.len()));
    for (j, block) in blocks.iter().enumerate() {
        for (i, v) in block.iter().enumerate() {
            design[[i, j]] = *v;
        }
    }
    design
}

/// Observed-row responses: the value itself, or one indicator per observed level.
fn response_matrix(cells: &Cells, obs_rows: &[usize]) -> Array2<f64> {
    match cells {
        Cells::Numeric(values) => {
            let mut y = Array2::<f64>::zeros((obs_rows.len(), 1));
            for (i, &r) in obs_rows.iter().enumerate() {
                y[[i, 0]] = values[r].unwrap_or(0.0);
            }
            y
        }
        Cells::Text(values) => {
            let levels: Vec<&str> = obs_rows
                .iter()
                .filter_map(|&r| values[r].as_deref())
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect();
            let mut y = Array2::<f64>::zeros((obs_rows.len(), levels.len().max(1)));
            for (i, &r) in obs_rows.iter().enumerate() {
                let level = values[r]
                    .as_deref()
                    .and_then(|v| levels.iter().position(|l| *l == v));
                if let Some(pos) = level {
                    y[[i, pos]] = 1.0;
                }
            }
            y
        }
    }
}

/// Solves `(XᵀX + λI) B = XᵀY`, leaving the intercept (column 0) unpenalised.
pub fn ridge_solve(x: &Array2<f64>, y: &Array2<f64>, lambda: f64) -> Option<Array2<f64>> {
    let mut gram = x.t().dot(x);
    for j in 1..gram.nrows() {
        gram[[j, j]] += lambda;
    }
    let rhs = x.t().dot(y);
    cholesky_solve(&gram, &rhs)
}

fn cholesky_solve(a: &Array2<f64>, b: &Array2<f64>) -> Option<Array2<f64>> {
    let n = a.nrows();
    let mut l = Array2::<f64>::zeros((n, n));
    for i in 0..n {
        for j in 0..=i {
            let mut sum = a[[i, j]];
            for k in 0..j {
                sum -= l[[i, k]] * l[[j, k]];
            }
            if i == j {
                if !sum.is_finite() || sum <= 0.0 {
                    return None;
                }
                l[[i, i]] = sum.sqrt();
            } else {
                l[[i, j]] = sum / l[[j, j]];
            }
        }
    }

    let mut solution = Array2::<f64>::zeros((n, b.ncols()));
    let mut z = vec![0.0; n];
    for c in 0..b.ncols() {
        for i in 0..n {
            let mut s = b[[i, c]];
            for k in 0..i {
                s -= l[[i, k]] * z[k];
            }
            z[i] = s / l[[i, i]];
        }
        for i in (0..n).rev() {
            let mut s = z[i];
            for k in (i + 1)..n {
                s -= l[[k, i]] * solution[[k, c]];
            }
            solution[[i, c]] = s / l[[i, i]];
        }
    }
    Some(solution)
}

/// Picks one donor per missing row among the `k` observed rows with the closest fitted means.
fn match_donors(
    fitted: &Array2<f64>,
    obs_rows: &[usize],
    missing: &[usize],
    k: usize,
    rng: &mut StdRng,
) -> Vec<usize> {
    let k = k.max(1).min(obs_rows.len());

    if fitted.ncols() == 1 {
        let mut sorted: Vec<(f64, usize)> = obs_rows.iter().map(|&r| (fitted[[r, 0]], r)).collect();
        sorted.sort_by(|a, b| a.0.total_cmp(&b.0));
        return missing
            .iter()
            .map(|&row| {
                let target = fitted[[row, 0]];
                let pos = sorted.partition_point(|(v, _)| *v < target);
                let (mut lo, mut hi) = (pos, pos);
                let mut pool = Vec::with_capacity(k);
                while pool.len() < k {
                    let take_low = match (lo > 0, hi < sorted.len()) {
                        (true, true) => target - sorted[lo - 1].0 <= sorted[hi].0 - target,
                        (true, false) => true,
                        (false, true) => false,
                        (false, false) => break,
                    };
                    if take_low {
                        lo -= 1;
                        pool.push(sorted[lo].1);
                    } else {
                        pool.push(sorted[hi].1);
                        hi += 1;
                    }
                }
                *pool.choose(rng).unwrap_or(&obs_rows[0])
            })
            .collect();
    }

    missing
        .iter()
        .map(|&row| {
            let target = fitted.row(row);
            let mut distances: Vec<(f64, usize)> = obs_rows
                .iter()
                .map(|&r| {
                    let d = fitted
                        .row(r)
                        .iter()
                        .zip(target.iter())
                        .map(|(a, b)| (a - b).powi(2))
                        .sum::<f64>();
                    (d, r)
                })
                .collect();
            if distances.len() > k {
                distances.select_nth_unstable_by(k - 1, |a, b| a.0.total_cmp(&b.0));
                distances.truncate(k);
            }
            distances.choose(rng).map_or(obs_rows[0], |(_, r)| *r)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    fn settings() -> PmmSettings {
        PmmSettings {
            iterations: 3,
            donors: 3,
            ridge: 1e-3,
            min_rows: 4,
            seed: 11,
        }
    }

    fn table() -> FeatureTable {
        let n = 20;
        let x: Vec<Option<f64>> = (0..n).map(|i| Some(i as f64)).collect();
        let y: Vec<Option<f64>> = (0..n)
            .map(|i| if i % 5 == 0 { None } else { Some(2.0 * i as f64 + 1.0) })
            .collect();
        let kind: Vec<Option<&str>> = (0..n)
            .map(|i| match i {
                7 => None,
                i if i < 10 => Some("low"),
                _ => Some("high"),
            })
            .collect();
        let id: Vec<Option<String>> = (0..n)
            .map(|i| if i == 3 { None } else { Some(format!("S{i}")) })
            .collect();
        let frame = DataFrame::new(vec![
            Series::new("site_id", id),
            Series::new("x", x),
            Series::new("y", y),
            Series::new("kind", kind),
        ])
        .unwrap();
        FeatureTable {
            row_ids: (100..100 + n).collect(),
            frame,
        }
    }

    fn rows(t: &FeatureTable, offset: usize, len: usize) -> FeatureTable {
        FeatureTable {
            row_ids: t.row_ids[offset..offset + len].to_vec(),
            frame: t.frame.slice(offset as i64, len),
        }
    }

    fn is_null(table: &FeatureTable, column: usize, row: usize) -> bool {
        table.frame.get_columns()[column].is_null().get(row) == Some(true)
    }

    #[test]
    fn ridge_recovers_linear_coefficients() {
        let x = array![[1.0, 0.0], [1.0, 1.0], [1.0, 2.0], [1.0, 3.0]];
        let y = array![[1.0], [3.0], [5.0], [7.0]];
        let beta = ridge_solve(&x, &y, 0.0).unwrap();
        assert_relative_eq!(beta[[0, 0]], 1.0, epsilon = 1e-9);
        assert_relative_eq!(beta[[1, 0]], 2.0, epsilon = 1e-9);
    }

    #[test]
    fn masks_skip_excluded_columns() {
        let t = table();
        let mask = MissingnessMask::build(&t.frame, &["site_id"]);
        assert_eq!(mask.targets.len(), 2);
        assert_eq!(mask.cell_count(), 4 + 1);
        assert!(mask.contains(2, 5));
        assert!(!mask.contains(0, 3));

        let predictors = PredictorMatrix::build(&t.frame, &["site_id"]);
        assert_eq!(predictors.predictors_for(2), vec![1, 3]);
        assert!(!predictors.is_predictor(1, 0));
    }

    #[test]
    fn only_masked_cells_change() {
        let original = table();
        let mut imputed = original.clone();
        let outcome = impute_table(&mut imputed, &["site_id"], &settings()).unwrap();
        assert_eq!(outcome.cells_imputed, 5);
        let mask = MissingnessMask::build(&original.frame, &["site_id"]);

        let before = original.frame.get_columns();
        let after = imputed.frame.get_columns();
        for c in 0..before.len() {
            for row in 0..original.height() {
                if mask.contains(c, row) {
                    assert!(!is_null(&imputed, c, row), "{} row {row} left empty", after[c].name());
                } else {
                    assert_eq!(
                        before[c].get(row).unwrap(),
                        after[c].get(row).unwrap(),
                        "{} row {row} changed",
                        after[c].name()
                    );
                }
            }
        }
        // excluded column keeps its gap
        assert!(is_null(&imputed, 0, 3));
        assert_eq!(imputed.row_ids, original.row_ids);
    }

    #[test]
    fn imputed_values_come_from_observed_donors() {
        let original = table();
        let mut imputed = original.clone();
        impute_table(&mut imputed, &["site_id"], &settings()).unwrap();
        let before: Vec<Option<f64>> = original
            .frame
            .column("y")
            .unwrap()
            .f64()
            .unwrap()
            .into_iter()
            .collect();
        let after = imputed.frame.column("y").unwrap().f64().unwrap().clone();
        for row in [0, 5, 10, 15] {
            let v = after.get(row).unwrap();
            assert!(before.contains(&Some(v)));
        }
    }

    #[test]
    fn same_seed_same_draws() {
        let mut a = table();
        let mut b = table();
        impute_table(&mut a, &["site_id"], &settings()).unwrap();
        impute_table(&mut b, &["site_id"], &settings()).unwrap();
        assert!(a.frame.equals_missing(&b.frame));
    }

    #[test]
    fn too_few_rows_is_a_fault() {
        let t = table();
        let mut small = rows(&t, 0, 3);
        let err = impute_table(&mut small, &["site_id"], &settings()).unwrap_err();
        assert_eq!(err, ImputeError::TooFewRows { rows: 3, min: 4 });
    }

    #[test]
    fn never_observed_column_stays_missing() {
        let mut t = table();
        t.frame
            .with_column(Series::new("empty", vec![None::<f64>; 20]))
            .unwrap();
        let outcome = impute_table(&mut t, &["site_id"], &settings()).unwrap();
        assert_eq!(outcome.columns_unimputable, vec!["empty".to_string()]);
        assert_eq!(outcome.columns_imputed, vec!["y".to_string(), "kind".to_string()]);
        assert_eq!(outcome.cells_imputed, 5);
        assert_eq!(t.frame.column("empty").unwrap().null_count(), 20);
        assert_eq!(t.frame.column("y").unwrap().null_count(), 0);
    }

    #[test]
    fn only_unimputable_columns_skip_the_row_check() {
        let t = table();
        let mut small = rows(&t, 1, 2);
        small
            .frame
            .with_column(Series::new("empty", vec![None::<f64>; 2]))
            .unwrap();
        let outcome = impute_table(&mut small, &["site_id"], &settings()).unwrap();
        assert_eq!(outcome.cells_imputed, 0);
        assert_eq!(outcome.columns_unimputable, vec!["empty".to_string()]);
    }

    #[test]
    fn complete_table_is_untouched() {
        let t = table();
        let mut complete = rows(&t, 1, 4);
        let before = complete.clone();
        let outcome = impute_table(&mut complete, &["site_id"], &settings()).unwrap();
        assert_eq!(outcome, MiceOutcome::default());
        assert!(complete.frame.equals_missing(&before.frame));
    }
}
