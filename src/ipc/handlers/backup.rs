use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::backup;
use crate::db;
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::params;
use crate::ipc::types::{AppState, Request};

fn io_failed(e: anyhow::Error, path: &Path) -> HandlerErr {
    HandlerErr::new("io_failed", format!("{:#}", e))
        .with_details(json!({ "path": path.to_string_lossy() }))
}

fn handle_export_bundle(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let out_path = PathBuf::from(params::required_str(&req.params, "outPath")?);
    let Some(workspace) = state.workspace.clone() else {
        return Err(HandlerErr::new("no_workspace", "select a workspace first"));
    };
    // Flush WAL pages so the copied file is complete.
    if let Some(conn) = state.db.as_ref() {
        if let Err(e) = conn.execute_batch("PRAGMA wal_checkpoint(FULL)") {
            warn!(error = %e, "wal checkpoint before export failed");
        }
    }

    let summary =
        backup::export_workspace_bundle(&workspace, &out_path).map_err(|e| io_failed(e, &out_path))?;
    Ok(json!({
        "path": out_path.to_string_lossy(),
        "bundleFormat": summary.bundle_format,
        "entryCount": summary.entry_count,
        "dbSha256": summary.db_sha256
    }))
}

fn handle_import_bundle(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let in_path = PathBuf::from(params::required_str(&req.params, "inPath")?);
    let target = match params::optional_str(&req.params, "workspacePath")? {
        Some(p) => PathBuf::from(p),
        None => state
            .workspace
            .clone()
            .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))?,
    };
    if !in_path.is_file() {
        return Err(HandlerErr::new("not_found", "bundle file not found")
            .with_details(json!({ "path": in_path.to_string_lossy() })));
    }

    // The open connection must be released before its file is replaced.
    let replaces_open = state.workspace.as_deref() == Some(target.as_path());
    if replaces_open {
        state.db = None;
    }

    let summary = match backup::import_workspace_bundle(&in_path, &target) {
        Ok(v) => v,
        Err(e) => {
            if replaces_open {
                match db::open_db(&target) {
                    Ok(conn) => state.db = Some(conn),
                    Err(reopen) => {
                        warn!(error = %reopen, "could not reopen workspace after failed import")
                    }
                }
            }
            return Err(io_failed(e, &in_path));
        }
    };

    let conn = db::open_db(&target)
        .map_err(|e| HandlerErr::new("db_open_failed", format!("{:#}", e)))?;
    state.workspace = Some(target.clone());
    state.db = Some(conn);
    Ok(json!({
        "workspacePath": target.to_string_lossy(),
        "bundleFormatDetected": summary.bundle_format_detected,
        "dbSha256": summary.db_sha256
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "backup.exportWorkspaceBundle" => handle_export_bundle(state, req),
        "backup.importWorkspaceBundle" => handle_import_bundle(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
