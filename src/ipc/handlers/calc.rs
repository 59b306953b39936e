use serde_json::{json, Value};

use crate::calc::{
    compute_report, round_off_2_decimals, CategoryWeights, Curriculum, GradeBand, GradeScale,
    GradingConfig, ReportInput, StudentContext,
};
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::params;
use crate::ipc::types::{AppState, Request};

/// Inline overrides on top of the workspace (or default) grading settings.
fn apply_overrides(config: &mut GradingConfig, request: &Value) -> Result<(), HandlerErr> {
    let Some(overrides) = request.get("config").filter(|v| !v.is_null()) else {
        return Ok(());
    };
    if !overrides.is_object() {
        return Err(HandlerErr::bad_params("config must be an object"));
    }
    if let Some(w) = overrides.get("weights").filter(|v| !v.is_null()) {
        let pick = |key: &str, current: f64| -> Result<f64, HandlerErr> {
            match w.get(key) {
                None | Some(Value::Null) => Ok(current),
                Some(v) => params::weight(v, &format!("config.weights.{}", key)),
            }
        };
        config.weights = CategoryWeights {
            akhlak: pick("akhlak", config.weights.akhlak)?,
            kedisiplinan: pick("kedisiplinan", config.weights.kedisiplinan)?,
            kognitif: pick("kognitif", config.weights.kognitif)?,
        };
    }
    if let Some(enabled) = params::optional_bool(overrides, "uasOralEnabled")? {
        config.uas_oral_enabled = enabled;
    }
    if let Some(bands) = overrides.get("gradeScale").filter(|v| !v.is_null()) {
        let bands: Vec<GradeBand> = serde_json::from_value(bands.clone()).map_err(|e| {
            HandlerErr::bad_params(format!("config.gradeScale: {}", e))
        })?;
        config.grade_scale = GradeScale::new(bands);
    }
    if let Some(shift) = params::optional_str(overrides, "dayShift")? {
        config.day_shift = shift;
    }
    Ok(())
}

/// Runs the full pipeline over inline inputs. Nothing is read from or written
/// to report cards.
fn handle_calc_preview(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let mut config = state.grading_config()?;
    apply_overrides(&mut config, &req.params)?;

    let curriculum: Curriculum = match req.params.get("curriculum").filter(|v| !v.is_null()) {
        Some(v) => serde_json::from_value(v.clone())
            .map_err(|e| HandlerErr::bad_params(format!("curriculum: {}", e)))?,
        None => Curriculum::default(),
    };
    let mut attendance = params::attendance(&req.params, "attendance")?;
    if let Some(a) = attendance.as_mut() {
        if a.effective_days == 0 {
            a.effective_days = config.effective_days;
        }
    }

    let input = ReportInput {
        student: StudentContext {
            santri_id: params::optional_str(&req.params, "santriId")?.unwrap_or_default(),
            halaqah_id: params::optional_str(&req.params, "halaqahId")?,
            shift: params::optional_str(&req.params, "shift")?,
        },
        curriculum,
        submitted: params::category_scores(&req.params, "scores")?,
        persisted: params::category_scores(&req.params, "persistedScores")?,
        tahfidz: params::tahfidz(&req.params, "tahfidz")?.unwrap_or_default(),
        uas_written: params::optional_score(&req.params, "uasWritten")?,
        uas_oral: params::optional_score(&req.params, "uasOral")?,
        attendance,
        persisted_attendance: params::attendance(&req.params, "persistedAttendance")?,
        role: params::role(&req.params)?,
    };
    let outcome = compute_report(&input, &config);
    serde_json::to_value(outcome).map_err(|e| HandlerErr::new("internal", e.to_string()))
}

fn handle_calc_band(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let config = state.grading_config()?;
    let Some(raw) = req.params.get("score") else {
        return Err(HandlerErr::bad_params("missing score"));
    };
    let score = round_off_2_decimals(params::score(raw, "score")?);
    Ok(json!({
        "score": score,
        "predikat": config.grade_scale.band(score),
        "ranges": config.grade_scale.ranges()
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "calc.preview" => handle_calc_preview(state, req),
        "calc.band" => handle_calc_band(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
