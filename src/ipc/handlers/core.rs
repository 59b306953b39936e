use serde_json::{json, Value};
use std::path::PathBuf;
use tracing::{info, warn};

use crate::db;
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::params;
use crate::ipc::types::{AppState, Request};

fn handle_health(state: &mut AppState, _req: &Request) -> Result<Value, HandlerErr> {
    Ok(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().into_owned())
    }))
}

/// Opens (creating if needed) the workspace folder and makes it current.
fn handle_workspace_select(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let path = PathBuf::from(params::required_str(&req.params, "path")?);
    let conn = db::open_db(&path).map_err(|e| {
        warn!(workspace = %path.display(), error = %e, "failed to open workspace");
        HandlerErr::new("db_open_failed", format!("{:#}", e))
    })?;
    info!(workspace = %path.display(), "workspace selected");
    state.workspace = Some(path.clone());
    state.db = Some(conn);
    Ok(json!({ "workspacePath": path.to_string_lossy() }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "health" => handle_health(state, req),
        "workspace.select" => handle_workspace_select(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
