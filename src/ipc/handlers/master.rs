use rusqlite::OptionalExtension;
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::params;
use crate::ipc::types::{AppState, Request};

fn update_failed(table: &str, e: rusqlite::Error) -> HandlerErr {
    HandlerErr::new("db_update_failed", e.to_string()).with_details(json!({ "table": table }))
}

fn halaqah_exists(conn: &rusqlite::Connection, id: &str) -> Result<bool, HandlerErr> {
    let found: Option<i64> = conn
        .query_row("SELECT 1 FROM halaqah WHERE id = ?", [id], |r| r.get(0))
        .optional()?;
    Ok(found.is_some())
}

fn handle_halaqah_upsert(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let name = params::required_str(&req.params, "name")?;
    let shift = params::optional_str(&req.params, "shift")?;
    let teacher_name = params::optional_str(&req.params, "teacherName")?;
    let (id, created) = match params::optional_str(&req.params, "id")? {
        Some(id) => (id, false),
        None => (Uuid::new_v4().to_string(), true),
    };

    conn.execute(
        "INSERT INTO halaqah(id, name, shift, teacher_name) VALUES(?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
            name = excluded.name,
            shift = excluded.shift,
            teacher_name = excluded.teacher_name",
        (&id, &name, &shift, &teacher_name),
    )
    .map_err(|e| update_failed("halaqah", e))?;
    info!(halaqah = %id, created, "halaqah saved");

    Ok(json!({ "halaqahId": id, "name": name, "shift": shift }))
}

fn handle_halaqah_list(state: &mut AppState, _req: &Request) -> Result<Value, HandlerErr> {
    let Some(conn) = state.db.as_ref() else {
        return Ok(json!({ "halaqah": [] }));
    };
    let mut stmt = conn.prepare(
        "SELECT
           h.id,
           h.name,
           h.shift,
           h.teacher_name,
           (SELECT COUNT(*) FROM santri s WHERE s.halaqah_id = h.id AND s.active = 1)
         FROM halaqah h
         ORDER BY h.name, h.id",
    )?;
    let rows = stmt
        .query_map([], |r| {
            let id: String = r.get(0)?;
            let name: String = r.get(1)?;
            let shift: Option<String> = r.get(2)?;
            let teacher_name: Option<String> = r.get(3)?;
            let santri_count: i64 = r.get(4)?;
            Ok(json!({
                "id": id,
                "name": name,
                "shift": shift,
                "teacherName": teacher_name,
                "santriCount": santri_count
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;
    Ok(json!({ "halaqah": rows }))
}

fn handle_santri_upsert(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let name = params::required_str(&req.params, "name")?;
    let nis = params::optional_str(&req.params, "nis")?;
    let halaqah_id = params::optional_str(&req.params, "halaqahId")?;
    // Empty string clears the override; the halaqah shift applies again.
    let shift = params::optional_str(&req.params, "shift")?;
    let active = params::optional_bool(&req.params, "active")?.unwrap_or(true);

    if let Some(h) = halaqah_id.as_deref() {
        if !halaqah_exists(conn, h)? {
            return Err(HandlerErr::new("not_found", "halaqah not found")
                .with_details(json!({ "halaqahId": h })));
        }
    }

    let (id, created) = match params::optional_str(&req.params, "id")? {
        Some(id) => (id, false),
        None => (Uuid::new_v4().to_string(), true),
    };
    conn.execute(
        "INSERT INTO santri(id, name, nis, halaqah_id, shift, active) VALUES(?, ?, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
            name = excluded.name,
            nis = excluded.nis,
            halaqah_id = excluded.halaqah_id,
            shift = excluded.shift,
            active = excluded.active",
        (&id, &name, &nis, &halaqah_id, &shift, i64::from(active)),
    )
    .map_err(|e| update_failed("santri", e))?;
    info!(santri = %id, created, "santri saved");

    Ok(json!({ "santriId": id, "name": name }))
}

fn handle_santri_list(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let Some(conn) = state.db.as_ref() else {
        return Ok(json!({ "santri": [] }));
    };
    let halaqah_id = params::optional_str(&req.params, "halaqahId")?;
    let mut stmt = conn.prepare(
        "SELECT s.id, s.name, s.nis, s.halaqah_id, s.shift, h.shift, s.active
         FROM santri s
         LEFT JOIN halaqah h ON h.id = s.halaqah_id
         WHERE (?1 IS NULL OR s.halaqah_id = ?1)
         ORDER BY s.name, s.id",
    )?;
    let rows = stmt
        .query_map([&halaqah_id], |r| {
            let id: String = r.get(0)?;
            let name: String = r.get(1)?;
            let nis: Option<String> = r.get(2)?;
            let halaqah_id: Option<String> = r.get(3)?;
            let own_shift: Option<String> = r.get(4)?;
            let group_shift: Option<String> = r.get(5)?;
            let active: i64 = r.get(6)?;
            let effective_shift = own_shift.clone().or(group_shift);
            Ok(json!({
                "id": id,
                "name": name,
                "nis": nis,
                "halaqahId": halaqah_id,
                "shift": own_shift,
                "effectiveShift": effective_shift,
                "active": active != 0
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;
    Ok(json!({ "santri": rows }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "halaqah.upsert" => handle_halaqah_upsert(state, req),
        "halaqah.list" => handle_halaqah_list(state, req),
        "santri.upsert" => handle_santri_upsert(state, req),
        "santri.list" => handle_santri_list(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
