use std::path::Path;

use rusqlite::{Connection, OptionalExtension};

use crate::calc::{GradeConfig, ScoreSet};

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("gradebook.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classes(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subjects(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            name TEXT NOT NULL,
            sort_order INTEGER NOT NULL,
            FOREIGN KEY(class_id) REFERENCES classes(id),
            UNIQUE(class_id, name)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_subjects_class ON subjects(class_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            last_name TEXT NOT NULL,
            first_name TEXT NOT NULL,
            active INTEGER NOT NULL,
            sort_order INTEGER NOT NULL,
            updated_at TEXT,
            FOREIGN KEY(class_id) REFERENCES classes(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_class_sort ON students(class_id, sort_order)",
        [],
    )?;

    // Raw scores only. Derived grades (means, statuses) are recomputed on
    // every read and never written back here.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS score_sets(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            quarter1 REAL,
            quarter2 REAL,
            quarter3 REAL,
            quarter4 REAL,
            recovery_score REAL,
            updated_at TEXT,
            FOREIGN KEY(class_id) REFERENCES classes(id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id),
            FOREIGN KEY(student_id) REFERENCES students(id),
            UNIQUE(class_id, subject_id, student_id)
        )",
        [],
    )?;
    ensure_score_sets_recovery_score(&conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_score_sets_offering ON score_sets(class_id, subject_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_score_sets_student ON score_sets(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    Ok(conn)
}

fn ensure_score_sets_recovery_score(conn: &Connection) -> anyhow::Result<()> {
    // Early workspaces predate the recovery exam and lack the column.
    if table_has_column(conn, "score_sets", "recovery_score")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE score_sets ADD COLUMN recovery_score REAL", [])?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
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

/// Maps a wire field name to its column. Doubles as the whitelist that makes
/// interpolating the column name into SQL safe.
pub fn score_field_column(field: &str) -> Option<&'static str> {
    match field {
        "quarter1" => Some("quarter1"),
        "quarter2" => Some("quarter2"),
        "quarter3" => Some("quarter3"),
        "quarter4" => Some("quarter4"),
        "recoveryScore" => Some("recovery_score"),
        _ => None,
    }
}

#[derive(Debug, Clone)]
pub struct ScoreSetRow {
    pub student_id: String,
    pub display_name: String,
    pub active: bool,
    pub set: ScoreSet,
}

/// One row per enrolled student, ungraded fields left absent. A student with
/// no score_sets row at all is returned with an empty ScoreSet.
pub fn load_score_sets(
    conn: &Connection,
    class_id: &str,
    subject_id: &str,
) -> anyhow::Result<Vec<ScoreSetRow>> {
    let mut stmt = conn.prepare(
        "SELECT s.id, s.last_name, s.first_name, s.active,
                ss.quarter1, ss.quarter2, ss.quarter3, ss.quarter4, ss.recovery_score
         FROM students s
         LEFT JOIN score_sets ss
           ON ss.student_id = s.id AND ss.class_id = s.class_id AND ss.subject_id = ?1
         WHERE s.class_id = ?2
         ORDER BY s.sort_order",
    )?;
    let rows = stmt
        .query_map((subject_id, class_id), |r| {
            let last: String = r.get(1)?;
            let first: String = r.get(2)?;
            Ok(ScoreSetRow {
                student_id: r.get(0)?,
                display_name: format!("{}, {}", last, first),
                active: r.get::<_, i64>(3)? != 0,
                set: ScoreSet {
                    quarters: [r.get(4)?, r.get(5)?, r.get(6)?, r.get(7)?],
                    recovery_score: r.get(8)?,
                },
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn load_score_set(
    conn: &Connection,
    class_id: &str,
    subject_id: &str,
    student_id: &str,
) -> anyhow::Result<ScoreSet> {
    let set = conn
        .query_row(
            "SELECT quarter1, quarter2, quarter3, quarter4, recovery_score
             FROM score_sets
             WHERE class_id = ? AND subject_id = ? AND student_id = ?",
            (class_id, subject_id, student_id),
            |r| {
                Ok(ScoreSet {
                    quarters: [r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?],
                    recovery_score: r.get(4)?,
                })
            },
        )
        .optional()?;
    Ok(set.unwrap_or_default())
}

/// Single-field upsert keyed by (class, subject, student). Two concurrent
/// edits to different fields of the same row both survive.
pub fn apply_field_update(
    conn: &Connection,
    class_id: &str,
    subject_id: &str,
    student_id: &str,
    column: &'static str,
    value: Option<f64>,
) -> anyhow::Result<()> {
    let id = uuid::Uuid::new_v4().to_string();
    let now = chrono::Utc::now().to_rfc3339();
    let sql = format!(
        "INSERT INTO score_sets(id, class_id, subject_id, student_id, {col}, updated_at)
         VALUES(?, ?, ?, ?, ?, ?)
         ON CONFLICT(class_id, subject_id, student_id) DO UPDATE SET
           {col} = excluded.{col},
           updated_at = excluded.updated_at",
        col = column
    );
    conn.execute(&sql, (&id, class_id, subject_id, student_id, value, &now))?;
    Ok(())
}

/// All-or-nothing bulk save: every entry lands inside one transaction, so a
/// failure on any row leaves the whole offering untouched.
pub fn apply_bulk_update(
    conn: &mut Connection,
    class_id: &str,
    subject_id: &str,
    entries: &[(String, ScoreSet)],
) -> anyhow::Result<()> {
    let tx = conn.transaction()?;
    let now = chrono::Utc::now().to_rfc3339();
    for (student_id, set) in entries {
        let id = uuid::Uuid::new_v4().to_string();
        tx.execute(
            "INSERT INTO score_sets(id, class_id, subject_id, student_id,
                                    quarter1, quarter2, quarter3, quarter4,
                                    recovery_score, updated_at)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(class_id, subject_id, student_id) DO UPDATE SET
               quarter1 = excluded.quarter1,
               quarter2 = excluded.quarter2,
               quarter3 = excluded.quarter3,
               quarter4 = excluded.quarter4,
               recovery_score = excluded.recovery_score,
               updated_at = excluded.updated_at",
            (
                &id,
                class_id,
                subject_id,
                student_id,
                set.quarters[0],
                set.quarters[1],
                set.quarters[2],
                set.quarters[3],
                set.recovery_score,
                &now,
            ),
        )?;
    }
    tx.commit()?;
    Ok(())
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, value.to_string()),
    )?;
    Ok(())
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row("SELECT value_json FROM settings WHERE key = ?", [key], |r| {
            r.get(0)
        })
        .optional()?;
    match raw {
        None => Ok(None),
        Some(text) => Ok(Some(serde_json::from_str(&text)?)),
    }
}

pub const GRADING_CONFIG_KEY: &str = "grading.config";

/// Stored thresholds merged over the defaults. A missing or partial setting
/// falls back field by field.
pub fn load_grade_config(conn: &Connection) -> anyhow::Result<GradeConfig> {
    let mut config = GradeConfig::default();
    let Some(value) = settings_get_json(conn, GRADING_CONFIG_KEY)? else {
        return Ok(config);
    };
    if let Some(v) = value.get("pass").and_then(|v| v.as_f64()) {
        config.pass = v;
    }
    if let Some(v) = value.get("recoveryFloor").and_then(|v| v.as_f64()) {
        config.recovery_floor = v;
    }
    if let Some(v) = value.get("finalPass").and_then(|v| v.as_f64()) {
        config.final_pass = v;
    }
    Ok(config)
}
