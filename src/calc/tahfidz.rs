use serde::{Deserialize, Serialize};

use super::score_set::clamp_score;

/// Tahfidz score for a santri with no memorized unit yet ("not started").
pub const EMPTY_TAHFIDZ_SCORE: f64 = 10.0;

/// One memorized unit (a surah or juz).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TahfidzEntry {
    pub unit: String,
    /// Reading fluency.
    pub reading: f64,
    /// Memorization fluency.
    pub memorization: f64,
}

impl TahfidzEntry {
    pub fn unit_average(&self) -> f64 {
        (clamp_score(self.reading) + clamp_score(self.memorization)) / 2.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TahfidzUnitAverage {
    pub unit: String,
    pub average: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TahfidzSummary {
    pub units: Vec<TahfidzUnitAverage>,
    pub score: f64,
}

pub fn summarize_tahfidz(entries: &[TahfidzEntry]) -> TahfidzSummary {
    let units: Vec<TahfidzUnitAverage> = entries
        .iter()
        .map(|e| TahfidzUnitAverage {
            unit: e.unit.clone(),
            average: e.unit_average(),
        })
        .collect();
    let score = if units.is_empty() {
        EMPTY_TAHFIDZ_SCORE
    } else {
        units.iter().map(|u| u.average).sum::<f64>() / (units.len() as f64)
    };
    TahfidzSummary { units, score }
}
