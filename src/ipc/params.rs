//! Request parameter parsing shared by the handlers. Everything numeric is
//! validated here so the grading core never sees NaN or negative counters.

use serde_json::{json, Value};

use super::error::HandlerErr;
use crate::calc::{
    AttendanceCounters, Category, CategoryScores, ScoreSet, SubmitterRole, TahfidzEntry,
};

pub fn required_str(params: &Value, key: &str) -> Result<String, HandlerErr> {
    match params.get(key).and_then(|v| v.as_str()).map(str::trim) {
        Some(s) if !s.is_empty() => Ok(s.to_string()),
        _ => Err(HandlerErr::bad_params(format!("missing {}", key))),
    }
}

pub fn optional_str(params: &Value, key: &str) -> Result<Option<String>, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => {
            let s = s.trim();
            Ok((!s.is_empty()).then(|| s.to_string()))
        }
        Some(_) => Err(HandlerErr::bad_params(format!("{} must be a string", key))),
    }
}

pub fn optional_bool(params: &Value, key: &str) -> Result<Option<bool>, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(_) => Err(HandlerErr::bad_params(format!("{} must be boolean", key))),
    }
}

pub fn category(params: &Value) -> Result<Category, HandlerErr> {
    let raw = required_str(params, "category")?;
    Category::parse(&raw).ok_or_else(|| {
        HandlerErr::bad_params("unknown category")
            .with_details(json!({ "category": raw, "expected": ["akhlak", "kedisiplinan", "tahsin"] }))
    })
}

pub fn score(v: &Value, field: &str) -> Result<f64, HandlerErr> {
    match v.as_f64() {
        Some(n) if n.is_finite() => Ok(n),
        _ => Err(HandlerErr::bad_params(format!("{} must be a finite number", field))
            .with_details(json!({ "field": field, "value": v }))),
    }
}

/// A category weight: a percentage in `0..=100`.
pub fn weight(v: &Value, field: &str) -> Result<f64, HandlerErr> {
    let w = score(v, field)?;
    if !(0.0..=100.0).contains(&w) {
        return Err(
            HandlerErr::bad_params(format!("{} must be between 0 and 100", field))
                .with_details(json!({ "field": field, "value": v })),
        );
    }
    Ok(w)
}

pub fn optional_score(params: &Value, key: &str) -> Result<Option<f64>, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => score(v, key).map(Some),
    }
}

/// `{ "<criterion>": <number>, ... }`. Key order is kept.
pub fn score_set(v: &Value, field: &str) -> Result<ScoreSet, HandlerErr> {
    let Some(obj) = v.as_object() else {
        return Err(HandlerErr::bad_params(format!("{} must be an object", field)));
    };
    let mut out = ScoreSet::new();
    for (name, raw) in obj {
        let name = name.trim();
        if name.is_empty() {
            return Err(HandlerErr::bad_params(format!(
                "{} has an empty criterion name",
                field
            )));
        }
        out.insert(name, score(raw, &format!("{}.{}", field, name))?);
    }
    Ok(out)
}

/// `{ "akhlak": {..}, "kedisiplinan": {..}, "tahsin": {..} }`, all optional.
pub fn category_scores(params: &Value, key: &str) -> Result<CategoryScores, HandlerErr> {
    let mut out = CategoryScores::default();
    let Some(v) = params.get(key).filter(|v| !v.is_null()) else {
        return Ok(out);
    };
    let Some(obj) = v.as_object() else {
        return Err(HandlerErr::bad_params(format!("{} must be an object", key)));
    };
    for (name, raw) in obj {
        let field = format!("{}.{}", key, name);
        match Category::parse(name) {
            Some(Category::Akhlak) => out.akhlak = score_set(raw, &field)?,
            Some(Category::Kedisiplinan) => out.kedisiplinan = score_set(raw, &field)?,
            Some(Category::Tahsin) => out.tahsin = score_set(raw, &field)?,
            None => {
                return Err(HandlerErr::bad_params(format!("unknown category in {}", key))
                    .with_details(json!({ "category": name })))
            }
        }
    }
    Ok(out)
}

pub fn tahfidz(params: &Value, key: &str) -> Result<Option<Vec<TahfidzEntry>>, HandlerErr> {
    let Some(v) = params.get(key).filter(|v| !v.is_null()) else {
        return Ok(None);
    };
    let Some(items) = v.as_array() else {
        return Err(HandlerErr::bad_params(format!("{} must be an array", key)));
    };
    let mut out = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        let field = format!("{}[{}]", key, i);
        let unit = item
            .get("unit")
            .and_then(|u| u.as_str())
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .ok_or_else(|| HandlerErr::bad_params(format!("{}.unit is required", field)))?;
        let reading = score(
            item.get("reading").unwrap_or(&Value::Null),
            &format!("{}.reading", field),
        )?;
        let memorization = score(
            item.get("memorization").unwrap_or(&Value::Null),
            &format!("{}.memorization", field),
        )?;
        out.push(TahfidzEntry {
            unit: unit.to_string(),
            reading,
            memorization,
        });
    }
    Ok(Some(out))
}

fn counter(obj: &serde_json::Map<String, Value>, key: &str, field: &str) -> Result<u32, HandlerErr> {
    match obj.get(key) {
        None | Some(Value::Null) => Ok(0),
        Some(v) => v
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .ok_or_else(|| {
                HandlerErr::bad_params(format!("{}.{} must be a non-negative integer", field, key))
                    .with_details(json!({ "value": v }))
            }),
    }
}

pub fn attendance(params: &Value, key: &str) -> Result<Option<AttendanceCounters>, HandlerErr> {
    let Some(v) = params.get(key).filter(|v| !v.is_null()) else {
        return Ok(None);
    };
    let Some(obj) = v.as_object() else {
        return Err(HandlerErr::bad_params(format!("{} must be an object", key)));
    };
    Ok(Some(AttendanceCounters {
        sick: counter(obj, "sick", key)?,
        excused: counter(obj, "excused", key)?,
        unexcused: counter(obj, "unexcused", key)?,
        effective_days: counter(obj, "effectiveDays", key)?,
    }))
}

pub fn role(params: &Value) -> Result<SubmitterRole, HandlerErr> {
    match params.get("role").and_then(|v| v.as_str()) {
        None => Ok(SubmitterRole::Teacher),
        Some("teacher") => Ok(SubmitterRole::Teacher),
        Some("admin") => Ok(SubmitterRole::Admin),
        Some(other) => Err(HandlerErr::bad_params("role must be teacher or admin")
            .with_details(json!({ "role": other }))),
    }
}

pub fn string_list(params: &Value, key: &str) -> Result<Vec<String>, HandlerErr> {
    let Some(items) = params.get(key).and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params(format!("{} must be an array", key)));
    };
    items
        .iter()
        .map(|v| {
            v.as_str()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .ok_or_else(|| {
                    HandlerErr::bad_params(format!("{} must contain non-empty strings", key))
                })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_numeric_scores() {
        let e = category_scores(&json!({ "scores": { "akhlak": { "Adab": "90" } } }), "scores")
            .expect_err("string score");
        assert_eq!(e.code, "bad_params");
        assert!(e.message.contains("scores.akhlak.Adab"));
    }

    #[test]
    fn weights_stay_within_percent_range() {
        assert_eq!(weight(&json!(40), "w").expect("in range"), 40.0);
        assert_eq!(weight(&json!(0), "w").expect("zero"), 0.0);
        assert_eq!(weight(&json!(-10), "w").expect_err("negative").code, "bad_params");
        assert_eq!(weight(&json!(100.5), "w").expect_err("over").code, "bad_params");
    }

    #[test]
    fn rejects_negative_counters() {
        let e = attendance(&json!({ "attendance": { "sick": -1 } }), "attendance")
            .expect_err("negative");
        assert_eq!(e.code, "bad_params");
        let ok = attendance(&json!({ "attendance": { "sick": 2 } }), "attendance")
            .expect("valid")
            .expect("present");
        assert_eq!(ok.sick, 2);
        assert_eq!(ok.effective_days, 0);
    }

    #[test]
    fn keeps_score_order_and_parses_tahfidz() {
        let scores = score_set(&json!({ "Sifat": 80, "Makharij": 70 }), "tahsin").expect("scores");
        assert_eq!(scores.names(), vec!["Sifat".to_string(), "Makharij".to_string()]);

        let entries = tahfidz(
            &json!({ "tahfidz": [{ "unit": "An-Naba", "reading": 80, "memorization": 90 }] }),
            "tahfidz",
        )
        .expect("tahfidz")
        .expect("present");
        assert_eq!(entries[0].unit, "An-Naba");
        assert!(tahfidz(&json!({ "tahfidz": [{ "reading": 80 }] }), "tahfidz").is_err());
    }

    #[test]
    fn unknown_role_and_category_are_bad_params() {
        assert!(role(&json!({ "role": "parent" })).is_err());
        assert_eq!(role(&json!({})).expect("default"), SubmitterRole::Teacher);
        assert!(category(&json!({ "category": "fiqh" })).is_err());
    }
}
