use serde::{Deserialize, Serialize};

/// Category weights as percentages. Expected to total 100; never checked here.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryWeights {
    pub akhlak: f64,
    pub kedisiplinan: f64,
    pub kognitif: f64,
}

impl Default for CategoryWeights {
    fn default() -> Self {
        Self {
            akhlak: 30.0,
            kedisiplinan: 30.0,
            kognitif: 40.0,
        }
    }
}

impl CategoryWeights {
    pub fn total(&self) -> f64 {
        self.akhlak + self.kedisiplinan + self.kognitif
    }

    pub fn is_balanced(&self) -> bool {
        (self.total() - 100.0).abs() < 1e-9
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KognitifInputs {
    pub tahfidz: f64,
    pub tahsin: f64,
    pub uas_written: Option<f64>,
    pub uas_oral: Option<f64>,
}

/// Mean of Tahfidz, Tahsin, UAS written and UAS oral. With the oral exam
/// disabled it is left out of both sum and divisor (3 instead of 4). A missing
/// exam score counts as 0.
pub fn kognitif_average(inputs: &KognitifInputs, uas_oral_enabled: bool) -> f64 {
    let mut sum = inputs.tahfidz + inputs.tahsin + inputs.uas_written.unwrap_or(0.0);
    let mut divisor = 3.0;
    if uas_oral_enabled {
        sum += inputs.uas_oral.unwrap_or(0.0);
        divisor += 1.0;
    }
    sum / divisor
}

pub fn final_score(
    akhlak: f64,
    kedisiplinan: f64,
    kognitif: f64,
    weights: &CategoryWeights,
) -> f64 {
    (akhlak * weights.akhlak + kedisiplinan * weights.kedisiplinan + kognitif * weights.kognitif)
        / 100.0
}
