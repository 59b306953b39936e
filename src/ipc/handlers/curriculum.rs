use chrono::Utc;
use rusqlite::OptionalExtension;
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use crate::calc::{kedisiplinan_criteria, Category, CriteriaCatalog, ScoreSet};
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::params;
use crate::ipc::types::{AppState, Request};
use crate::legacy::LegacyNames;
use crate::report::{self, ReportContext};

fn handle_criteria_list(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let Some(conn) = state.db.as_ref() else {
        return Ok(json!({ "criteria": [] }));
    };
    let category = match req.params.get("category") {
        None | Some(Value::Null) => None,
        Some(_) => Some(params::category(&req.params)?),
    };
    let halaqah_id = params::optional_str(&req.params, "halaqahId")?;
    let include_inactive = params::optional_bool(&req.params, "includeInactive")?.unwrap_or(true);

    let criteria: Vec<_> = report::load_criteria(conn)?
        .into_iter()
        .filter(|c| category.map(|cat| c.category == cat).unwrap_or(true))
        .filter(|c| include_inactive || c.active)
        .filter(|c| match (c.halaqah_id.as_deref(), halaqah_id.as_deref()) {
            (None, _) => true,
            (Some(owner), Some(h)) => owner == h,
            (Some(_), None) => false,
        })
        .collect();
    Ok(json!({ "criteria": criteria }))
}

/// An active row in `category` whose canonical name equals `name` and that a
/// santri could see alongside a row scoped to `halaqah_id`. Global rows overlap
/// every scope.
fn visible_name_conflict(
    conn: &rusqlite::Connection,
    legacy: &LegacyNames,
    category: Category,
    name: &str,
    halaqah_id: Option<&str>,
    own_id: &str,
) -> Result<Option<String>, HandlerErr> {
    let conflict = report::load_criteria(conn)?
        .into_iter()
        .filter(|c| c.active && c.category == category && c.id != own_id)
        .filter(|c| match (halaqah_id, c.halaqah_id.as_deref()) {
            (None, _) | (_, None) => true,
            (Some(mine), Some(theirs)) => mine == theirs,
        })
        .find(|c| legacy.canonical(&c.name) == name)
        .map(|c| c.id);
    Ok(conflict)
}

fn name_taken(name: &str, conflicting_id: String) -> HandlerErr {
    HandlerErr::bad_params("criterion name already visible in this scope")
        .with_details(json!({ "name": name, "conflictingId": conflicting_id }))
}

fn handle_criteria_upsert(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let config = state.grading_config()?;
    let conn = state.conn()?;
    let category = params::category(&req.params)?;
    let raw_name = params::required_str(&req.params, "name")?;
    let name = config.legacy.canonical(&raw_name).into_owned();
    if config.legacy.is_retired(&name) {
        return Err(HandlerErr::bad_params("criterion name is retired")
            .with_details(json!({ "name": name })));
    }
    let halaqah_id = params::optional_str(&req.params, "halaqahId")?;
    let active = params::optional_bool(&req.params, "active")?.unwrap_or(true);
    let sort_order = match req.params.get("sortOrder") {
        None | Some(Value::Null) => None,
        Some(v) => Some(
            v.as_i64()
                .ok_or_else(|| HandlerErr::bad_params("sortOrder must be an integer"))?,
        ),
    };
    let sort_order = match sort_order {
        Some(n) => n,
        None => conn.query_row(
            "SELECT COALESCE(MAX(sort_order) + 1, 0) FROM criteria WHERE category = ?",
            [category.as_str()],
            |r| r.get::<_, i64>(0),
        )?,
    };

    let (id, created) = match params::optional_str(&req.params, "id")? {
        Some(id) => (id, false),
        None => (Uuid::new_v4().to_string(), true),
    };
    if active {
        if let Some(other) = visible_name_conflict(
            conn,
            &config.legacy,
            category,
            &name,
            halaqah_id.as_deref(),
            &id,
        )? {
            return Err(name_taken(&name, other));
        }
    }
    conn.execute(
        "INSERT INTO criteria(id, category, name, sort_order, active, halaqah_id)
         VALUES(?, ?, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
            category = excluded.category,
            name = excluded.name,
            sort_order = excluded.sort_order,
            active = excluded.active,
            halaqah_id = excluded.halaqah_id",
        (
            &id,
            category.as_str(),
            &name,
            sort_order,
            i64::from(active),
            &halaqah_id,
        ),
    )
    .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    info!(criterion = %id, category = %category, name = %name, created, "criterion saved");

    Ok(json!({ "criterionId": id, "name": name, "sortOrder": sort_order }))
}

fn handle_criteria_set_active(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let id = params::required_str(&req.params, "id")?;
    let Some(active) = params::optional_bool(&req.params, "active")? else {
        return Err(HandlerErr::bad_params("missing active"));
    };
    if active {
        let config = state.grading_config()?;
        let row: Option<(String, String, Option<String>)> = conn
            .query_row(
                "SELECT category, name, halaqah_id FROM criteria WHERE id = ?",
                [&id],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .optional()?;
        let Some((category, name, halaqah_id)) = row else {
            return Err(HandlerErr::new("not_found", "criterion not found"));
        };
        if let Some(category) = Category::parse(&category) {
            let name = config.legacy.canonical(&name).into_owned();
            if let Some(other) = visible_name_conflict(
                conn,
                &config.legacy,
                category,
                &name,
                halaqah_id.as_deref(),
                &id,
            )? {
                return Err(name_taken(&name, other));
            }
        }
    }
    let n = conn
        .execute(
            "UPDATE criteria SET active = ? WHERE id = ?",
            (i64::from(active), &id),
        )
        .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    if n == 0 {
        return Err(HandlerErr::new("not_found", "criterion not found"));
    }
    Ok(json!({ "ok": true }))
}

fn handle_curriculum_get(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let config = state.grading_config()?;
    let conn = state.conn()?;
    let halaqah_id = params::required_str(&req.params, "halaqahId")?;
    let category = params::category(&req.params)?;

    let stored = report::load_group_config(conn, &halaqah_id, category)?;
    let criteria = report::load_criteria(conn)?;
    let global_active =
        CriteriaCatalog::new(&criteria, &config.legacy).active_names(category, Some(&halaqah_id));
    Ok(json!({
        "configured": stored.is_some(),
        "names": stored.unwrap_or_default(),
        "globalActive": global_active
    }))
}

fn handle_curriculum_set(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let config = state.grading_config()?;
    let conn = state.conn()?;
    let halaqah_id = params::required_str(&req.params, "halaqahId")?;
    let category = params::category(&req.params)?;
    let names = params::string_list(&req.params, "names")?;

    let exists: Option<i64> = conn
        .query_row("SELECT 1 FROM halaqah WHERE id = ?", [&halaqah_id], |r| r.get(0))
        .optional()?;
    if exists.is_none() {
        return Err(HandlerErr::new("not_found", "halaqah not found"));
    }

    // An empty list drops the group config so the global list applies.
    if names.is_empty() {
        conn.execute(
            "DELETE FROM halaqah_curriculum WHERE halaqah_id = ? AND category = ?",
            (&halaqah_id, category.as_str()),
        )
        .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
        info!(halaqah = %halaqah_id, category = %category, "group curriculum cleared");
        return Ok(json!({ "names": [] }));
    }

    let migrated: Vec<String> = config
        .legacy
        .migrate_names(&names)
        .into_iter()
        .filter(|n| !config.legacy.is_retired(n))
        .collect();
    let names_json =
        serde_json::to_string(&migrated).map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    conn.execute(
        "INSERT INTO halaqah_curriculum(halaqah_id, category, names_json, updated_at)
         VALUES(?, ?, ?, ?)
         ON CONFLICT(halaqah_id, category) DO UPDATE SET
            names_json = excluded.names_json,
            updated_at = excluded.updated_at",
        (
            &halaqah_id,
            category.as_str(),
            &names_json,
            Utc::now().to_rfc3339(),
        ),
    )
    .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    info!(halaqah = %halaqah_id, category = %category, count = migrated.len(), "group curriculum saved");

    Ok(json!({ "names": migrated }))
}

/// The criteria a santri is graded on for one category, shift rule included.
fn handle_curriculum_resolve(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let config = state.grading_config()?;
    let conn = state.conn()?;
    let santri_id = params::required_str(&req.params, "santriId")?;
    let term_id = params::optional_str(&req.params, "termId")?;
    let category = params::category(&req.params)?;

    let term = term_id.as_deref().unwrap_or("");
    let ctx = ReportContext::new(conn, &santri_id, term);
    let student = ctx.load_student_context()?;
    let curriculum = ctx.load_curriculum(&student, &config.legacy)?;
    let stored: ScoreSet = if term_id.is_some() {
        ctx.load_report_card(&config.legacy)?
            .map(|card| card.scores.get(category).clone())
            .unwrap_or_default()
    } else {
        ScoreSet::new()
    };

    let resolver = config.resolver();
    let sources = curriculum.get(category);
    let shift = student.shift.as_deref();
    // Same Kedisiplinan list a save would report, Kehadiran included.
    let names = if category == Category::Kedisiplinan {
        let base = resolver.resolve(category, &sources.group_config, &sources.global_active, &stored);
        kedisiplinan_criteria(&resolver, base, shift, &stored)
    } else {
        resolver.resolve_for_shift(category, sources, &stored, shift)
    };
    let day_shift = category == Category::Kedisiplinan && resolver.is_day_shift(shift);
    Ok(json!({
        "santriId": santri_id,
        "category": category,
        "shift": student.shift,
        "dayShift": day_shift,
        "criteria": names
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "criteria.list" => handle_criteria_list(state, req),
        "criteria.upsert" => handle_criteria_upsert(state, req),
        "criteria.setActive" => handle_criteria_set_active(state, req),
        "curriculum.get" => handle_curriculum_get(state, req),
        "curriculum.set" => handle_curriculum_set(state, req),
        "curriculum.resolve" => handle_curriculum_resolve(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
