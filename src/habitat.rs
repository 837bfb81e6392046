//! Expansion of the two free-text habitat lists into one flag column per phrase.

use crate::data_models::{HabitatFlag, Observation};
use std::collections::{BTreeMap, BTreeSet};

pub fn flag_column(phrase: &str) -> String {
    format!("has_{}", phrase)
}

/// Three-valued flag for `phrase` given a record's two lists.
pub fn habitat_flag(phrase: &str, freshwater: &[String], saltwater: &[String]) -> HabitatFlag {
    if freshwater.is_empty() && saltwater.is_empty() {
        HabitatFlag::Unknown
    } else if freshwater.iter().chain(saltwater).any(|p| p == phrase) {
        HabitatFlag::Yes
    } else {
        HabitatFlag::No
    }
}

/// Union of every phrase across the dataset, sorted.
pub fn collect_phrases(observations: &[Observation]) -> BTreeSet<String> {
    observations
        .iter()
        .flat_map(|o| o.freshwater_habitats.iter().chain(&o.saltwater_habitats))
        .cloned()
        .collect()
}

/// Folds every observation into a copy carrying one flag per distinct phrase.
/// The phrase set is sorted, so output does not depend on input order.
pub fn expand(observations: Vec<Observation>) -> (Vec<Observation>, Vec<String>) {
    let phrases = collect_phrases(&observations);
    let expanded = observations
        .into_iter()
        .map(|obs| {
            let habitats: BTreeMap<String, HabitatFlag> = phrases
                .iter()
                .map(|p| {
                    (
                        flag_column(p),
                        habitat_flag(p, &obs.freshwater_habitats, &obs.saltwater_habitats),
                    )
                })
                .collect();
            Observation { habitats, ..obs }
        })
        .collect();
    (expanded, phrases.into_iter().collect())
}
