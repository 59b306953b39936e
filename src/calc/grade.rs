use serde::{Deserialize, Serialize};

use super::score_set::SCORE_MAX;

/// Letter returned when no band qualifies (or the scale is empty).
pub const DEFAULT_LOWEST_LETTER: &str = "D";
/// Gap between a band's upper bound and the next band's minimum.
pub const GRADE_PRECISION: f64 = 0.01;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeBand {
    pub letter: String,
    /// Inclusive lower bound.
    pub min: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeRange {
    pub letter: String,
    pub min: f64,
    pub max: f64,
}

/// Letter grades ("predikat"), kept sorted by minimum, highest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<GradeBand>", into = "Vec<GradeBand>")]
pub struct GradeScale {
    bands: Vec<GradeBand>,
}

impl Default for GradeScale {
    fn default() -> Self {
        Self::new(vec![
            GradeBand {
                letter: "A".to_string(),
                min: 90.0,
            },
            GradeBand {
                letter: "B".to_string(),
                min: 80.0,
            },
            GradeBand {
                letter: "C".to_string(),
                min: 70.0,
            },
            GradeBand {
                letter: "D".to_string(),
                min: 0.0,
            },
        ])
    }
}

impl From<Vec<GradeBand>> for GradeScale {
    fn from(bands: Vec<GradeBand>) -> Self {
        Self::new(bands)
    }
}

impl From<GradeScale> for Vec<GradeBand> {
    fn from(scale: GradeScale) -> Self {
        scale.bands
    }
}

impl GradeScale {
    pub fn new(mut bands: Vec<GradeBand>) -> Self {
        // Stable: equal minimums keep their given order, the first one wins.
        bands.sort_by(|a, b| b.min.total_cmp(&a.min));
        Self { bands }
    }

    pub fn bands(&self) -> &[GradeBand] {
        &self.bands
    }

    /// First letter whose minimum is at or below `score`.
    pub fn band(&self, score: f64) -> &str {
        self.bands
            .iter()
            .find(|b| b.min <= score)
            .map(|b| b.letter.as_str())
            .unwrap_or(DEFAULT_LOWEST_LETTER)
    }

    /// Each letter with its effective range, for printing a legend. The top
    /// letter runs to the top of the scale.
    pub fn ranges(&self) -> Vec<GradeRange> {
        let mut out = Vec::with_capacity(self.bands.len());
        let mut upper = SCORE_MAX;
        for b in &self.bands {
            out.push(GradeRange {
                letter: b.letter.clone(),
                min: b.min,
                max: upper.max(b.min),
            });
            upper = b.min - GRADE_PRECISION;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn band(letter: &str, min: f64) -> GradeBand {
        GradeBand {
            letter: letter.to_string(),
            min,
        }
    }

    #[test]
    fn boundary_is_inclusive() {
        let scale = GradeScale::default();
        assert_eq!(scale.band(79.99), "C");
        assert_eq!(scale.band(80.00), "B");
        assert_eq!(scale.band(90.0), "A");
        assert_eq!(scale.band(0.0), "D");
    }

    #[test]
    fn unsorted_input_is_sorted_descending() {
        let scale = GradeScale::new(vec![band("C", 60.0), band("A", 85.0), band("B", 75.0)]);
        let letters: Vec<&str> = scale.bands().iter().map(|b| b.letter.as_str()).collect();
        assert_eq!(letters, vec!["A", "B", "C"]);
        assert_eq!(scale.band(75.0), "B");
    }

    #[test]
    fn falls_back_to_lowest_letter() {
        let scale = GradeScale::new(vec![band("A", 90.0), band("B", 75.0)]);
        assert_eq!(scale.band(40.0), DEFAULT_LOWEST_LETTER);
        assert_eq!(GradeScale::new(Vec::new()).band(99.0), DEFAULT_LOWEST_LETTER);
    }

    #[test]
    fn ranges_close_each_band_below_the_next() {
        let ranges = GradeScale::default().ranges();
        assert_eq!(ranges[0].max, 100.0);
        assert!((ranges[1].max - 89.99).abs() < 1e-9);
        assert_eq!(ranges[3].min, 0.0);
        assert!((ranges[3].max - 69.99).abs() < 1e-9);
    }

    #[test]
    fn deserializes_from_plain_list() {
        let scale: GradeScale = serde_json::from_value(serde_json::json!([
            { "letter": "B", "min": 80 },
            { "letter": "A", "min": 90 }
        ]))
        .expect("parse scale");
        assert_eq!(scale.bands()[0].letter, "A");
    }

    proptest! {
        #[test]
        fn band_is_monotonic(
            mins in prop::collection::vec(0.0f64..100.0, 0..6),
            a in 0.0f64..110.0,
            b in 0.0f64..110.0,
        ) {
            let bands: Vec<GradeBand> = mins
                .iter()
                .enumerate()
                .map(|(i, m)| band(&format!("L{}", i), *m))
                .collect();
            let scale = GradeScale::new(bands);
            let rank = |score: f64| {
                let letter = scale.band(score);
                scale
                    .bands()
                    .iter()
                    .position(|b| b.letter == letter)
                    .unwrap_or(scale.bands().len())
            };
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            // Lower rank index means a higher letter.
            prop_assert!(rank(lo) >= rank(hi));
        }
    }
}
