use serde_json::{json, Value};

use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::params;
use crate::ipc::types::{AppState, Request};
use crate::report::{self, ReportContext, ReportSubmission};

fn submission(p: &Value) -> Result<ReportSubmission, HandlerErr> {
    Ok(ReportSubmission {
        scores: params::category_scores(p, "scores")?,
        tahfidz: params::tahfidz(p, "tahfidz")?,
        uas_written: params::optional_score(p, "uasWritten")?,
        uas_oral: params::optional_score(p, "uasOral")?,
        attendance: params::attendance(p, "attendance")?,
        teacher_notes: params::optional_str(p, "teacherNotes")?,
        role: params::role(p)?,
    })
}

fn handle_reports_save(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let config = state.grading_config()?;
    let conn = state.conn()?;
    let santri_id = params::required_str(&req.params, "santriId")?;
    let term_id = params::required_str(&req.params, "termId")?;
    let submission = submission(&req.params)?;

    let saved = ReportContext::new(conn, &santri_id, &term_id).compute_and_save(submission, &config)?;
    serde_json::to_value(saved).map_err(|e| HandlerErr::new("internal", e.to_string()))
}

fn handle_reports_get(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let config = state.grading_config()?;
    let conn = state.conn()?;
    let santri_id = params::required_str(&req.params, "santriId")?;
    let term_id = params::required_str(&req.params, "termId")?;

    let Some(card) = ReportContext::new(conn, &santri_id, &term_id).load_report_card(&config.legacy)?
    else {
        return Err(HandlerErr::new("not_found", "report card not found")
            .with_details(json!({ "santriId": santri_id, "termId": term_id })));
    };
    Ok(json!({ "report": card }))
}

fn handle_reports_delete(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let santri_id = params::required_str(&req.params, "santriId")?;
    let term_id = params::required_str(&req.params, "termId")?;
    ReportContext::new(conn, &santri_id, &term_id).delete_report_card()?;
    Ok(json!({ "ok": true }))
}

fn handle_reports_list(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let Some(conn) = state.db.as_ref() else {
        return Ok(json!({ "reports": [] }));
    };
    let term_id = params::optional_str(&req.params, "termId")?;
    let halaqah_id = params::optional_str(&req.params, "halaqahId")?;
    let rows = report::list_report_cards(conn, term_id.as_deref(), halaqah_id.as_deref())?;
    Ok(json!({ "reports": rows }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "reports.save" => handle_reports_save(state, req),
        "reports.get" => handle_reports_get(state, req),
        "reports.delete" => handle_reports_delete(state, req),
        "reports.list" => handle_reports_list(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
