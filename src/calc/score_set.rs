use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Lowest score a criterion can hold.
pub const SCORE_MIN: f64 = 10.0;
/// Highest score a criterion can hold.
pub const SCORE_MAX: f64 = 100.0;

/// Value returned when averaging a set with no entries.
pub const EMPTY_AVERAGE: f64 = 0.0;

pub fn clamp_score(v: f64) -> f64 {
    v.clamp(SCORE_MIN, SCORE_MAX)
}

/// Half-up rounding to two decimals, used for everything shown on a report.
pub fn round_off_2_decimals(x: f64) -> f64 {
    ((100.0 * x) + 0.5).floor() / 100.0
}

/// Criterion name -> score, in insertion order.
///
/// Values are clamped into `[SCORE_MIN, SCORE_MAX]` on insert. Callers are
/// expected to have rejected non-finite input already.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScoreSet(IndexMap<String, f64>);

impl ScoreSet {
    pub fn new() -> Self {
        Self(IndexMap::new())
    }

    pub fn insert(&mut self, name: impl Into<String>, value: f64) -> Option<f64> {
        self.0.insert(name.into(), clamp_score(value))
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.0.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn names(&self) -> Vec<String> {
        self.0.keys().cloned().collect()
    }

    /// Arithmetic mean of every value, or [`EMPTY_AVERAGE`] when empty.
    pub fn average(&self) -> f64 {
        self.average_or(EMPTY_AVERAGE)
    }

    pub fn average_or(&self, empty: f64) -> f64 {
        if self.0.is_empty() {
            return empty;
        }
        let sum: f64 = self.0.values().sum();
        sum / (self.0.len() as f64)
    }
}

impl<S: Into<String>> FromIterator<(S, f64)> for ScoreSet {
    fn from_iter<I: IntoIterator<Item = (S, f64)>>(iter: I) -> Self {
        let mut out = ScoreSet::new();
        for (k, v) in iter {
            out.insert(k, v);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn empty_set_averages_to_zero() {
        let s = ScoreSet::new();
        assert_eq!(s.average(), 0.0);
        assert!(!s.average().is_nan());
    }

    #[test]
    fn insert_clamps_into_scale() {
        let mut s = ScoreSet::new();
        s.insert("Adab", 120.0);
        s.insert("Kejujuran", 2.0);
        assert_eq!(s.get("Adab"), Some(100.0));
        assert_eq!(s.get("Kejujuran"), Some(10.0));
    }

    #[test]
    fn keeps_insertion_order() {
        let s: ScoreSet = [("Zuhud", 80.0), ("Adab", 70.0), ("Makharij", 90.0)]
            .into_iter()
            .collect();
        assert_eq!(s.names(), vec!["Zuhud", "Adab", "Makharij"]);
    }

    #[test]
    fn serializes_as_plain_object() {
        let s: ScoreSet = [("Adab", 80.0)].into_iter().collect();
        let v = serde_json::to_value(&s).expect("serialize");
        assert_eq!(v, serde_json::json!({ "Adab": 80.0 }));
        let back: ScoreSet = serde_json::from_value(v).expect("deserialize");
        assert_eq!(back, s);
    }

    #[test]
    fn round_off_is_half_up() {
        assert_eq!(round_off_2_decimals(79.0), 79.0);
        assert_eq!(round_off_2_decimals(79.994), 79.99);
        assert_eq!(round_off_2_decimals(79.996), 80.0);
    }

    proptest! {
        #[test]
        fn average_is_arithmetic_mean(values in prop::collection::vec(10.0f64..=100.0, 1..40)) {
            let s: ScoreSet = values
                .iter()
                .enumerate()
                .map(|(i, v)| (format!("k{}", i), *v))
                .collect();
            let expected = values.iter().sum::<f64>() / values.len() as f64;
            prop_assert!((s.average() - expected).abs() < 1e-9);
            prop_assert!(s.average() >= SCORE_MIN - 1e-9 && s.average() <= SCORE_MAX + 1e-9);
        }
    }
}
