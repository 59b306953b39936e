use serde_json::{json, Map, Value};
use tracing::{info, warn};

use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::setup::{self, SetupSection};

fn handle_setup_get(state: &mut AppState, _req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let mut out = Map::new();
    for section in SetupSection::ALL {
        out.insert(
            section.name().to_string(),
            setup::load_section(conn, section)?,
        );
    }
    Ok(Value::Object(out))
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let Some(section_raw) = req.params.get("section").and_then(|v| v.as_str()) else {
        return Err(HandlerErr::bad_params("missing section"));
    };
    let section = SetupSection::parse(section_raw)?;
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return Err(HandlerErr::bad_params("patch must be an object"));
    };

    let updated = setup::update_section(conn, section, patch).map_err(|e| match e {
        setup::SetupError::Storage(inner) => HandlerErr::new("db_update_failed", inner.to_string()),
        other => HandlerErr::from(other),
    })?;
    info!(section = section.name(), "settings updated");

    let mut result = json!({ "ok": true, "section": section.name(), "value": updated });
    if section == SetupSection::Grading {
        let weights = setup::load_grading_config(conn)?.weights;
        if !weights.is_balanced() {
            warn!(
                total = weights.total(),
                "category weights do not add up to 100"
            );
        }
        result["weightsTotal"] = json!(weights.total());
        result["weightsBalanced"] = json!(weights.is_balanced());
    }
    Ok(result)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.get" => Some(respond(&req.id, handle_setup_get(state, req))),
        "setup.update" => Some(respond(&req.id, handle_setup_update(state, req))),
        _ => None,
    }
}
