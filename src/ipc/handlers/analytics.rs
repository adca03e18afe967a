use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

use crate::analytics::aggregate;
use crate::calc::{recalculate, ComputedRecord, GradeConfig};
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};

/// Optional per-request threshold override, merged over the stored config.
/// Lets a reviewer preview both legacy final-pass rules without touching
/// workspace settings.
fn parse_config_override(
    raw: Option<&serde_json::Value>,
    base: GradeConfig,
) -> Result<GradeConfig, String> {
    let Some(raw) = raw else {
        return Ok(base);
    };
    if raw.is_null() {
        return Ok(base);
    }
    let Some(obj) = raw.as_object() else {
        return Err("config must be an object".to_string());
    };

    let mut config = base;
    for (key, slot) in [
        ("pass", &mut config.pass),
        ("recoveryFloor", &mut config.recovery_floor),
        ("finalPass", &mut config.final_pass),
    ] {
        match obj.get(key) {
            None => {}
            Some(v) if v.is_null() => {}
            Some(v) => {
                let Some(n) = v.as_f64() else {
                    return Err(format!("config.{} must be a number", key));
                };
                if !n.is_finite() || n <= 0.0 || n > 10.0 {
                    return Err(format!("config.{} must be in (0, 10]", key));
                }
                *slot = n;
            }
        }
    }
    Ok(config)
}

fn class_name(conn: &Connection, class_id: &str) -> Result<Option<String>, rusqlite::Error> {
    conn.query_row("SELECT name FROM classes WHERE id = ?", [class_id], |r| {
        r.get(0)
    })
    .optional()
}

fn subject_name(
    conn: &Connection,
    class_id: &str,
    subject_id: &str,
) -> Result<Option<String>, rusqlite::Error> {
    conn.query_row(
        "SELECT name FROM subjects WHERE id = ? AND class_id = ?",
        (subject_id, class_id),
        |r| r.get(0),
    )
    .optional()
}

fn handle_class_summary(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let class_id = match req.params.get("classId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing classId", None),
    };
    let subject_id = match req.params.get("subjectId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing subjectId", None),
    };

    let class_name = match class_name(conn, &class_id) {
        Ok(Some(v)) => v,
        Ok(None) => return err(&req.id, "not_found", "class not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let subject_name = match subject_name(conn, &class_id, &subject_id) {
        Ok(Some(v)) => v,
        Ok(None) => return err(&req.id, "not_found", "subject not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let stored = match db::load_grade_config(conn) {
        Ok(c) => c,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let config = match parse_config_override(req.params.get("config"), stored) {
        Ok(c) => c,
        Err(message) => return err(&req.id, "bad_params", message, None),
    };

    let rows = match db::load_score_sets(conn, &class_id, &subject_id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut students: Vec<serde_json::Value> = Vec::with_capacity(rows.len());
    let mut active_records: Vec<ComputedRecord> = Vec::new();
    for row in &rows {
        let record = recalculate(&row.set, &config);
        // Withdrawn students stay visible in the roster but are kept out of
        // the class statistics.
        if row.active {
            active_records.push(record);
        }
        students.push(json!({
            "studentId": row.student_id,
            "displayName": row.display_name,
            "active": row.active,
            "computed": record,
        }));
    }

    let analytics = aggregate(&active_records);

    ok(
        &req.id,
        json!({
            "class": { "classId": class_id, "name": class_name },
            "subject": { "subjectId": subject_id, "name": subject_name },
            "config": config,
            "students": students,
            "analytics": analytics,
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "analytics.classSummary" => Some(handle_class_summary(state, req)),
        _ => None,
    }
}
