//! Hemisphere-aware season labels.

use chrono::{Datelike, NaiveDate};
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Season {
    Spring,
    Summer,
    Fall,
    Winter,
}

impl Season {
    pub fn as_str(&self) -> &'static str {
        match self {
            Season::Spring => "spring",
            Season::Summer => "summer",
            Season::Fall => "fall",
            Season::Winter => "winter",
        }
    }

    fn opposite(self) -> Self {
        match self {
            Season::Spring => Season::Fall,
            Season::Summer => Season::Winter,
            Season::Fall => Season::Spring,
            Season::Winter => Season::Summer,
        }
    }
}

impl fmt::Display for Season {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Northern-hemisphere season for a calendar date, split at the equinoxes and
/// solstices (Mar 20, Jun 21, Sep 22, Dec 21).
fn northern_season(date: NaiveDate) -> Season {
    match (date.month(), date.day()) {
        (3, d) if d >= 20 => Season::Spring,
        (4..=5, _) => Season::Spring,
        (6, d) if d < 21 => Season::Spring,
        (6, _) | (7..=8, _) => Season::Summer,
        (9, d) if d < 22 => Season::Summer,
        (9, _) | (10..=11, _) => Season::Fall,
        (12, d) if d < 21 => Season::Fall,
        _ => Season::Winter,
    }
}

/// Season at `date` for a site at signed `latitude`. Latitude `>= 0` is northern.
pub fn season_for(date: NaiveDate, latitude: f64) -> Season {
    let northern = northern_season(date);
    if latitude >= 0.0 {
        northern
    } else {
        northern.opposite()
    }
}
