use rusqlite::{Connection, OptionalExtension};
use std::path::Path;
use tracing::{debug, info};

use crate::legacy::LegacyNames;

pub const DB_FILE_NAME: &str = "raport.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(&db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;
    debug!(path = %db_path.display(), "opened workspace database");

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS halaqah(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            shift TEXT,
            teacher_name TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS santri(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            nis TEXT,
            halaqah_id TEXT,
            shift TEXT,
            active INTEGER NOT NULL DEFAULT 1,
            FOREIGN KEY(halaqah_id) REFERENCES halaqah(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_santri_halaqah ON santri(halaqah_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS criteria(
            id TEXT PRIMARY KEY,
            category TEXT NOT NULL,
            name TEXT NOT NULL,
            sort_order INTEGER NOT NULL,
            active INTEGER NOT NULL DEFAULT 1,
            halaqah_id TEXT,
            FOREIGN KEY(halaqah_id) REFERENCES halaqah(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_criteria_category ON criteria(category, sort_order)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS halaqah_curriculum(
            halaqah_id TEXT NOT NULL,
            category TEXT NOT NULL,
            names_json TEXT NOT NULL,
            updated_at TEXT,
            PRIMARY KEY(halaqah_id, category),
            FOREIGN KEY(halaqah_id) REFERENCES halaqah(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS report_cards(
            id TEXT PRIMARY KEY,
            santri_id TEXT NOT NULL,
            term_id TEXT NOT NULL,
            akhlak_json TEXT NOT NULL DEFAULT '{}',
            kedisiplinan_json TEXT NOT NULL DEFAULT '{}',
            tahsin_json TEXT NOT NULL DEFAULT '{}',
            tahfidz_json TEXT NOT NULL DEFAULT '[]',
            uas_written REAL,
            uas_oral REAL,
            sick INTEGER,
            excused INTEGER,
            unexcused INTEGER,
            effective_days INTEGER,
            akhlak_avg REAL NOT NULL DEFAULT 0,
            kedisiplinan_avg REAL NOT NULL DEFAULT 0,
            tahsin_avg REAL NOT NULL DEFAULT 0,
            tahfidz_avg REAL NOT NULL DEFAULT 0,
            kognitif_avg REAL NOT NULL DEFAULT 0,
            final_score REAL NOT NULL DEFAULT 0,
            predikat TEXT NOT NULL DEFAULT '',
            created_at TEXT,
            updated_at TEXT,
            FOREIGN KEY(santri_id) REFERENCES santri(id),
            UNIQUE(santri_id, term_id)
        )",
        [],
    )?;
    ensure_report_cards_notes(&conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_report_cards_term ON report_cards(term_id)",
        [],
    )?;

    migrate_legacy_criterion_names(&conn, &LegacyNames::builtin())?;

    Ok(conn)
}

fn ensure_report_cards_notes(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "report_cards", "teacher_notes")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE report_cards ADD COLUMN teacher_notes TEXT", [])?;
    Ok(())
}

/// Rewrites renamed criterion names in curriculum tables. Stored report card
/// scores are left alone: they are migrated whenever they are read.
pub fn migrate_legacy_criterion_names(
    conn: &Connection,
    legacy: &LegacyNames,
) -> anyhow::Result<()> {
    let mut renamed = 0usize;

    let mut stmt = conn.prepare("SELECT id, name FROM criteria")?;
    let rows = stmt
        .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    for (id, name) in rows {
        let canonical = legacy.canonical(&name);
        if canonical != name.as_str() {
            conn.execute(
                "UPDATE criteria SET name = ? WHERE id = ?",
                (canonical.as_ref(), &id),
            )?;
            renamed += 1;
        }
    }

    let mut stmt = conn.prepare("SELECT halaqah_id, category, names_json FROM halaqah_curriculum")?;
    let rows = stmt
        .query_map([], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    for (halaqah_id, category, names_json) in rows {
        let names: Vec<String> = serde_json::from_str(&names_json).unwrap_or_default();
        let migrated = legacy.migrate_names(&names);
        if migrated != names {
            conn.execute(
                "UPDATE halaqah_curriculum SET names_json = ? WHERE halaqah_id = ? AND category = ?",
                (serde_json::to_string(&migrated)?, &halaqah_id, &category),
            )?;
            renamed += 1;
        }
    }

    if renamed > 0 {
        info!(
            renamed,
            legacy_version = legacy.version(),
            "migrated legacy criterion names"
        );
    }
    Ok(())
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        None => Ok(None),
        Some(s) => Ok(Some(serde_json::from_str(&s)?)),
    }
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}

pub fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_dir(prefix: &str) -> PathBuf {
        let p = std::env::temp_dir().join(format!(
            "{}-{}",
            prefix,
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .expect("clock")
                .as_nanos()
        ));
        std::fs::create_dir_all(&p).expect("create temp dir");
        p
    }

    #[test]
    fn open_is_idempotent_and_settings_roundtrip() {
        let ws = temp_dir("raportd-db-open");
        {
            let conn = open_db(&ws).expect("open");
            assert!(table_has_column(&conn, "report_cards", "teacher_notes").expect("pragma"));
            assert_eq!(settings_get_json(&conn, "x").expect("get"), None);
            settings_set_json(&conn, "x", &serde_json::json!({ "a": 1 })).expect("set");
            settings_set_json(&conn, "x", &serde_json::json!({ "a": 2 })).expect("set again");
        }
        let conn = open_db(&ws).expect("reopen");
        assert_eq!(
            settings_get_json(&conn, "x").expect("get"),
            Some(serde_json::json!({ "a": 2 }))
        );
        let _ = std::fs::remove_dir_all(ws);
    }

    #[test]
    fn legacy_names_are_rewritten_on_open() {
        let ws = temp_dir("raportd-db-legacy");
        {
            let conn = open_db(&ws).expect("open");
            conn.execute("INSERT INTO halaqah(id, name) VALUES('h1', 'Umar')", [])
                .expect("halaqah");
            conn.execute(
                "INSERT INTO criteria(id, category, name, sort_order, active, halaqah_id)
                 VALUES('c1', 'tahsin', 'Tilawah Mandiri', 0, 1, NULL)",
                [],
            )
            .expect("criterion");
            conn.execute(
                "INSERT INTO halaqah_curriculum(halaqah_id, category, names_json)
                 VALUES('h1', 'tahsin', '[\"Tilawah Mandiri\",\"Makharij\"]')",
                [],
            )
            .expect("curriculum");
        }
        let conn = open_db(&ws).expect("reopen");
        let name: String = conn
            .query_row("SELECT name FROM criteria WHERE id = 'c1'", [], |r| r.get(0))
            .expect("name");
        assert_eq!(name, "Tilawah & Hafalan Mandiri");
        let names_json: String = conn
            .query_row(
                "SELECT names_json FROM halaqah_curriculum WHERE halaqah_id = 'h1'",
                [],
                |r| r.get(0),
            )
            .expect("names");
        let names: Vec<String> = serde_json::from_str(&names_json).expect("json");
        assert_eq!(names, vec!["Tilawah & Hafalan Mandiri", "Makharij"]);
        let _ = std::fs::remove_dir_all(ws);
    }
}
