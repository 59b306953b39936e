use rusqlite::Connection;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::warn;

use crate::calc::{CategoryWeights, GradeBand, GradeScale, GradingConfig, DEFAULT_DAY_SHIFT};
use crate::db;
use crate::legacy::LegacyNames;

#[derive(Debug, Error)]
pub enum SetupError {
    #[error("unknown section: {0}")]
    UnknownSection(String),

    #[error("unknown {section} field: {field}")]
    UnknownField { section: &'static str, field: String },

    #[error("{0} must be boolean")]
    NotBool(String),

    #[error("{key} must be an integer in {min}..={max}")]
    IntOutOfRange { key: String, min: i64, max: i64 },

    #[error("{key} must be a number in {min}..={max}")]
    NumberOutOfRange { key: String, min: f64, max: f64 },

    #[error("{key} must be a non-empty string of at most {max_len} characters")]
    BadString { key: String, max_len: usize },

    #[error("{0}")]
    Invalid(String),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl SetupError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Storage(_) => "db_query_failed",
            _ => "bad_params",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SetupSection {
    Grading,
    GradeScale,
    Attendance,
    Curriculum,
}

impl SetupSection {
    pub const ALL: [SetupSection; 4] = [
        SetupSection::Grading,
        SetupSection::GradeScale,
        SetupSection::Attendance,
        SetupSection::Curriculum,
    ];

    pub fn parse(s: &str) -> Result<Self, SetupError> {
        match s {
            "grading" => Ok(Self::Grading),
            "gradeScale" => Ok(Self::GradeScale),
            "attendance" => Ok(Self::Attendance),
            "curriculum" => Ok(Self::Curriculum),
            other => Err(SetupError::UnknownSection(other.to_string())),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Grading => "grading",
            Self::GradeScale => "gradeScale",
            Self::Attendance => "attendance",
            Self::Curriculum => "curriculum",
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Grading => "setup.grading",
            Self::GradeScale => "setup.gradeScale",
            Self::Attendance => "setup.attendance",
            Self::Curriculum => "setup.curriculum",
        }
    }
}

pub fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Grading => json!({
            "weights": CategoryWeights::default(),
            "uasOralEnabled": true
        }),
        SetupSection::GradeScale => json!({
            "bands": GradeScale::default()
        }),
        SetupSection::Attendance => json!({
            "effectiveDays": 0
        }),
        SetupSection::Curriculum => json!({
            "dayShift": DEFAULT_DAY_SHIFT,
            "extraRenames": {},
            "extraRetired": []
        }),
    }
}

fn parse_bool(v: &Value, key: &str) -> Result<bool, SetupError> {
    v.as_bool().ok_or_else(|| SetupError::NotBool(key.to_string()))
}

fn parse_i64_range(v: &Value, key: &str, min: i64, max: i64) -> Result<i64, SetupError> {
    match v.as_i64() {
        Some(n) if (min..=max).contains(&n) => Ok(n),
        _ => Err(SetupError::IntOutOfRange {
            key: key.to_string(),
            min,
            max,
        }),
    }
}

fn parse_f64_range(v: &Value, key: &str, min: f64, max: f64) -> Result<f64, SetupError> {
    match v.as_f64() {
        Some(n) if n.is_finite() && n >= min && n <= max => Ok(n),
        _ => Err(SetupError::NumberOutOfRange {
            key: key.to_string(),
            min,
            max,
        }),
    }
}

fn parse_name(v: &Value, key: &str, max_len: usize) -> Result<String, SetupError> {
    let bad = || SetupError::BadString {
        key: key.to_string(),
        max_len,
    };
    let s = v.as_str().ok_or_else(bad)?.trim();
    if s.is_empty() || s.chars().count() > max_len {
        return Err(bad());
    }
    Ok(s.to_string())
}

fn merge_weights(current: &mut Value, patch: &Value) -> Result<(), SetupError> {
    let Some(patch) = patch.as_object() else {
        return Err(SetupError::Invalid("weights must be an object".into()));
    };
    if !current.is_object() {
        *current = json!(CategoryWeights::default());
    }
    let Some(obj) = current.as_object_mut() else {
        return Err(SetupError::Invalid("weights must be an object".into()));
    };
    for (k, v) in patch {
        match k.as_str() {
            "akhlak" | "kedisiplinan" | "kognitif" => {
                let w = parse_f64_range(v, &format!("weights.{}", k), 0.0, 100.0)?;
                obj.insert(k.clone(), Value::from(w));
            }
            _ => {
                return Err(SetupError::UnknownField {
                    section: "grading.weights",
                    field: k.clone(),
                })
            }
        }
    }
    Ok(())
}

fn parse_bands(v: &Value) -> Result<Value, SetupError> {
    let Some(items) = v.as_array() else {
        return Err(SetupError::Invalid("bands must be an array".into()));
    };
    let mut bands: Vec<GradeBand> = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        let letter = parse_name(
            item.get("letter").unwrap_or(&Value::Null),
            &format!("bands[{}].letter", i),
            8,
        )?;
        let min = parse_f64_range(
            item.get("min").unwrap_or(&Value::Null),
            &format!("bands[{}].min", i),
            0.0,
            100.0,
        )?;
        if bands.iter().any(|b| b.letter == letter) {
            return Err(SetupError::Invalid(format!("duplicate grade letter: {}", letter)));
        }
        bands.push(GradeBand { letter, min });
    }
    Ok(json!(GradeScale::new(bands)))
}

fn parse_renames(v: &Value) -> Result<Value, SetupError> {
    let Some(obj) = v.as_object() else {
        return Err(SetupError::Invalid("extraRenames must be an object".into()));
    };
    let mut out = Map::new();
    for (old, new) in obj {
        let old = parse_name(&Value::String(old.clone()), "extraRenames key", 120)?;
        let new = parse_name(new, &format!("extraRenames.{}", old), 120)?;
        out.insert(old, Value::String(new));
    }
    Ok(Value::Object(out))
}

fn parse_retired(v: &Value) -> Result<Value, SetupError> {
    let Some(items) = v.as_array() else {
        return Err(SetupError::Invalid("extraRetired must be an array".into()));
    };
    let mut out: Vec<String> = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        let name = parse_name(item, &format!("extraRetired[{}]", i), 120)?;
        if !out.contains(&name) {
            out.push(name);
        }
    }
    Ok(json!(out))
}

pub fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), SetupError> {
    if !current.is_object() {
        *current = default_section(section);
    }
    let Some(obj) = current.as_object_mut() else {
        return Err(SetupError::Invalid(
            "internal setup object must be a JSON object".into(),
        ));
    };
    for (k, v) in patch {
        match section {
            SetupSection::Grading => match k.as_str() {
                "weights" => {
                    let entry = obj.entry(k.clone()).or_insert(Value::Null);
                    merge_weights(entry, v)?;
                }
                "uasOralEnabled" => {
                    obj.insert(k.clone(), Value::Bool(parse_bool(v, k)?));
                }
                _ => {
                    return Err(SetupError::UnknownField {
                        section: "grading",
                        field: k.clone(),
                    })
                }
            },
            SetupSection::GradeScale => match k.as_str() {
                "bands" => {
                    obj.insert(k.clone(), parse_bands(v)?);
                }
                _ => {
                    return Err(SetupError::UnknownField {
                        section: "gradeScale",
                        field: k.clone(),
                    })
                }
            },
            SetupSection::Attendance => match k.as_str() {
                "effectiveDays" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 0, 366)?));
                }
                _ => {
                    return Err(SetupError::UnknownField {
                        section: "attendance",
                        field: k.clone(),
                    })
                }
            },
            SetupSection::Curriculum => match k.as_str() {
                "dayShift" => {
                    obj.insert(k.clone(), Value::String(parse_name(v, k, 32)?));
                }
                "extraRenames" => {
                    obj.insert(k.clone(), parse_renames(v)?);
                }
                "extraRetired" => {
                    obj.insert(k.clone(), parse_retired(v)?);
                }
                _ => {
                    return Err(SetupError::UnknownField {
                        section: "curriculum",
                        field: k.clone(),
                    })
                }
            },
        }
    }
    Ok(())
}

pub fn load_section(conn: &Connection, section: SetupSection) -> Result<Value, SetupError> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            // Malformed historical values must not block report generation.
            if let Err(e) = merge_section_patch(section, &mut current, saved_obj) {
                warn!(section = section.name(), error = %e, "ignoring malformed saved settings");
                current = default_section(section);
            }
        }
    }
    Ok(current)
}

pub fn update_section(
    conn: &Connection,
    section: SetupSection,
    patch: &Map<String, Value>,
) -> Result<Value, SetupError> {
    let mut current = load_section(conn, section)?;
    merge_section_patch(section, &mut current, patch)?;
    db::settings_set_json(conn, section.key(), &current)?;
    Ok(current)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GradingSection {
    weights: CategoryWeights,
    uas_oral_enabled: bool,
}

#[derive(Deserialize)]
struct GradeScaleSection {
    bands: GradeScale,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AttendanceSection {
    effective_days: u32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CurriculumSection {
    day_shift: String,
    #[serde(default)]
    extra_renames: BTreeMap<String, String>,
    #[serde(default)]
    extra_retired: Vec<String>,
}

fn section_as<T: serde::de::DeserializeOwned>(
    conn: &Connection,
    section: SetupSection,
) -> Result<T, SetupError> {
    let value = load_section(conn, section)?;
    serde_json::from_value(value)
        .map_err(|e| SetupError::Invalid(format!("{} settings: {}", section.name(), e)))
}

/// Typed grading configuration for the open workspace.
pub fn load_grading_config(conn: &Connection) -> Result<GradingConfig, SetupError> {
    let grading: GradingSection = section_as(conn, SetupSection::Grading)?;
    let scale: GradeScaleSection = section_as(conn, SetupSection::GradeScale)?;
    let attendance: AttendanceSection = section_as(conn, SetupSection::Attendance)?;
    let curriculum: CurriculumSection = section_as(conn, SetupSection::Curriculum)?;

    let legacy = LegacyNames::builtin().with_extra(
        curriculum
            .extra_renames
            .iter()
            .map(|(old, new)| (old.as_str(), new.as_str())),
        curriculum.extra_retired.iter().map(String::as_str),
    );

    Ok(GradingConfig {
        weights: grading.weights,
        grade_scale: scale.bands,
        uas_oral_enabled: grading.uas_oral_enabled,
        day_shift: curriculum.day_shift,
        effective_days: attendance.effective_days,
        legacy,
    })
}
