//! Feature encoding and train/test partitioning for the transparency model.

use crate::data_models::{
    Observation, Variable, BANK_MATERIAL, BEDROCK, DISTANCE_TO_WATER, ELEVATION, LATITUDE, SEASON,
    WATER_BODY_SOURCE, WATER_BODY_TYPE,
};
use crate::errors::ModelError;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use std::collections::{BTreeMap, BTreeSet};

const NUMERIC_DESCRIPTORS: [&str; 3] = [LATITUDE, ELEVATION, DISTANCE_TO_WATER];
const CATEGORICAL_DESCRIPTORS: [&str; 5] =
    [SEASON, WATER_BODY_TYPE, BANK_MATERIAL, BEDROCK, WATER_BODY_SOURCE];

fn numeric_value(obs: &Observation, column: &str) -> Option<f64> {
    match column {
        LATITUDE => Some(obs.latitude),
        ELEVATION => Some(obs.elevation),
        DISTANCE_TO_WATER => obs.distance_to_water_m,
        name => Variable::ALL
            .iter()
            .find(|v| v.name() == name)
            .and_then(|v| obs.measurement(*v).value),
    }
}

fn categorical_value<'a>(obs: &'a Observation, column: &str) -> Option<&'a str> {
    match column {
        SEASON => Some(obs.season.as_str()),
        WATER_BODY_TYPE => obs.water_body_type.as_deref(),
        BANK_MATERIAL => obs.bank_material.as_deref(),
        BEDROCK => obs.bedrock.as_deref(),
        WATER_BODY_SOURCE => obs.water_body_source.as_deref(),
        name => match Variable::ALL.iter().find(|v| v.method_column() == name) {
            Some(var) => Some(obs.measurement(*var).method.as_str()),
            None => obs.habitats.get(name).map(|f| f.as_str()),
        },
    }
}

/// Category levels shared by every view, so one value always maps to the same indicator.
#[derive(Debug, Clone, PartialEq)]
pub struct CategoryDictionary {
    levels: BTreeMap<String, Vec<String>>,
    /// Categorical columns in encoding order.
    order: Vec<String>,
}

impl CategoryDictionary {
    pub fn from_observations(observations: &[Observation]) -> Self {
        let habitat_columns: BTreeSet<&String> =
            observations.iter().flat_map(|o| o.habitats.keys()).collect();
        let order: Vec<String> = CATEGORICAL_DESCRIPTORS
            .iter()
            .map(|c| c.to_string())
            .chain(Variable::ALL.iter().map(|v| v.method_column()))
            .chain(habitat_columns.into_iter().cloned())
            .collect();

        let levels = order
            .iter()
            .map(|column| {
                let values: BTreeSet<&str> = observations
                    .iter()
                    .filter_map(|o| categorical_value(o, column))
                    .collect();
                (column.clone(), values.into_iter().map(str::to_string).collect())
            })
            .collect();
        Self { levels, order }
    }

    pub fn levels(&self, column: &str) -> Option<&[String]> {
        self.levels.get(column).map(Vec::as_slice)
    }

    pub fn numeric_columns() -> Vec<&'static str> {
        NUMERIC_DESCRIPTORS
            .iter()
            .copied()
            .chain(Variable::ALL.iter().map(|v| v.name()))
            .collect()
    }

    /// Names of the encoded feature vector, `column=level` for indicators.
    pub fn feature_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Self::numeric_columns()
            .iter()
            .map(|c| c.to_string())
            .collect();
        for column in &self.order {
            for level in &self.levels[column] {
                names.push(format!("{column}={level}"));
            }
        }
        names
    }

    pub fn n_features(&self) -> usize {
        Self::numeric_columns().len() + self.levels.values().map(Vec::len).sum::<usize>()
    }

    /// Encodes one observation. `Ok(None)` when any feature is missing.
    pub fn encode(&self, obs: &Observation) -> Result<Option<Vec<f64>>, ModelError> {
        let mut features = Vec::with_capacity(self.n_features());
        for column in Self::numeric_columns() {
            match numeric_value(obs, column) {
                Some(v) if v.is_finite() => features.push(v),
                _ => return Ok(None),
            }
        }
        for column in &self.order {
            let Some(value) = categorical_value(obs, column) else {
                return Ok(None);
            };
            let levels = &self.levels[column];
            let position = levels
                .iter()
                .position(|l| l == value)
                .ok_or_else(|| ModelError::UnknownCategory {
                    column: column.clone(),
                    value: value.to_string(),
                })?;
            features.extend((0..levels.len()).map(|i| if i == position { 1.0 } else { 0.0 }));
        }
        Ok(Some(features))
    }
}

/// Encoded rows eligible for fitting: non-saturated, positive finite transparency.
#[derive(Debug, Clone, Default)]
pub struct ModelView {
    pub name: String,
    pub row_ids: Vec<usize>,
    pub site_ids: Vec<String>,
    pub features: Vec<Vec<f64>>,
    pub target: Vec<f64>,
    /// Rows that qualified but carried a missing feature.
    pub excluded_missing: usize,
}

impl ModelView {
    pub fn build<'a>(
        name: &str,
        observations: impl IntoIterator<Item = &'a Observation>,
        dictionary: &CategoryDictionary,
    ) -> Result<Self, ModelError> {
        let mut view = ModelView {
            name: name.to_string(),
            ..Default::default()
        };
        for obs in observations {
            let usable_target = obs.transparency.is_finite() && obs.transparency > 0.0;
            if obs.saturation.is_saturated() || !usable_target {
                continue;
            }
            match dictionary.encode(obs)? {
                Some(features) => {
                    view.row_ids.push(obs.row_id);
                    view.site_ids.push(obs.site_id.clone());
                    view.features.push(features);
                    view.target.push(obs.transparency);
                }
                None => view.excluded_missing += 1,
            }
        }
        Ok(view)
    }

    pub fn len(&self) -> usize {
        self.row_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.row_ids.is_empty()
    }

    pub fn subset(&self, name: &str, rows: &[usize]) -> ModelView {
        ModelView {
            name: name.to_string(),
            row_ids: rows.iter().map(|&r| self.row_ids[r]).collect(),
            site_ids: rows.iter().map(|&r| self.site_ids[r].clone()).collect(),
            features: rows.iter().map(|&r| self.features[r].clone()).collect(),
            target: rows.iter().map(|&r| self.target[r]).collect(),
            excluded_missing: 0,
        }
    }
}

/// Shuffled split of `0..n`: the first `floor(fraction * n)` indices train.
pub fn train_test_split(n: usize, fraction: f64, rng: &mut StdRng) -> (Vec<usize>, Vec<usize>) {
    let mut indices: Vec<usize> = (0..n).collect();
    indices.shuffle(rng);
    let n_train = ((fraction.clamp(0.0, 1.0) * n as f64).floor() as usize).min(n);
    let test = indices.split_off(n_train);
    (indices, test)
}

/// `size` distinct indices from `0..n`, uniformly at random.
pub fn sample_without_replacement(n: usize, size: usize, rng: &mut StdRng) -> Vec<usize> {
    rand::seq::index::sample(rng, n, size.min(n)).into_vec()
}
