use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

use crate::calc::{
    self, consolidated_grade, parse_score_input, recovery_eligible, validate_score_value,
    GradeConfig, ScoreSet,
};
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};

struct HandlerErr {
    code: &'static str,
    message: String,
    details: Option<serde_json::Value>,
}

impl HandlerErr {
    fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

/// Boundary gate for one score value off the wire. Accepts a number, a
/// numeric string (what a grade cell sends), or null/missing to clear the
/// field.
fn parse_score_param(value: Option<&serde_json::Value>) -> Result<Option<f64>, HandlerErr> {
    let Some(value) = value else {
        return Ok(None);
    };
    if value.is_null() {
        return Ok(None);
    }
    let parsed = if let Some(n) = value.as_f64() {
        validate_score_value(n)
    } else if let Some(s) = value.as_str() {
        parse_score_input(s)
    } else {
        return Err(HandlerErr {
            code: "bad_params",
            message: "score must be a number, numeric string, or null".to_string(),
            details: Some(json!({ "value": value })),
        });
    };
    match parsed {
        Ok(v) => Ok(Some(v)),
        Err(e) => Err(HandlerErr {
            code: "validation_failed",
            message: e.message().to_string(),
            details: Some(json!({ "value": value })),
        }),
    }
}

fn require_subject(
    conn: &Connection,
    class_id: &str,
    subject_id: &str,
) -> Result<(), HandlerErr> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM subjects WHERE id = ? AND class_id = ?",
            (subject_id, class_id),
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| HandlerErr {
            code: "db_query_failed",
            message: e.to_string(),
            details: None,
        })?;
    if found.is_none() {
        return Err(HandlerErr {
            code: "not_found",
            message: "subject not found".to_string(),
            details: Some(json!({ "subjectId": subject_id })),
        });
    }
    Ok(())
}

fn require_student(
    conn: &Connection,
    class_id: &str,
    student_id: &str,
) -> Result<(), HandlerErr> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM students WHERE id = ? AND class_id = ?",
            (student_id, class_id),
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| HandlerErr {
            code: "db_query_failed",
            message: e.to_string(),
            details: None,
        })?;
    if found.is_none() {
        return Err(HandlerErr {
            code: "not_found",
            message: "student not found".to_string(),
            details: Some(json!({ "studentId": student_id })),
        });
    }
    Ok(())
}

fn offering_params(req: &Request) -> Result<(String, String), serde_json::Value> {
    let class_id = match req.params.get("classId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return Err(err(&req.id, "bad_params", "missing classId", None)),
    };
    let subject_id = match req.params.get("subjectId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return Err(err(&req.id, "bad_params", "missing subjectId", None)),
    };
    Ok((class_id, subject_id))
}

fn student_row_json(row: &db::ScoreSetRow, config: &GradeConfig) -> serde_json::Value {
    let record = calc::recalculate(&row.set, config);
    json!({
        "studentId": row.student_id,
        "displayName": row.display_name,
        "active": row.active,
        "computed": record,
    })
}

fn handle_scores_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let (class_id, subject_id) = match offering_params(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    if let Err(e) = require_subject(conn, &class_id, &subject_id) {
        return e.response(&req.id);
    }

    let config = match db::load_grade_config(conn) {
        Ok(c) => c,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = match db::load_score_sets(conn, &class_id, &subject_id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let students: Vec<serde_json::Value> = rows
        .iter()
        .map(|row| student_row_json(row, &config))
        .collect();
    ok(&req.id, json!({ "students": students }))
}

fn handle_scores_update_field(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let (class_id, subject_id) = match offering_params(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let student_id = match req.params.get("studentId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing studentId", None),
    };
    let field = match req.params.get("field").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing field", None),
    };
    let Some(column) = db::score_field_column(&field) else {
        return err(
            &req.id,
            "bad_params",
            "field must be one of: quarter1..quarter4, recoveryScore",
            Some(json!({ "field": field })),
        );
    };

    let value = match parse_score_param(req.params.get("value")) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    if let Err(e) = require_subject(conn, &class_id, &subject_id) {
        return e.response(&req.id);
    }
    if let Err(e) = require_student(conn, &class_id, &student_id) {
        return e.response(&req.id);
    }

    let config = match db::load_grade_config(conn) {
        Ok(c) => c,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    // A recovery score is only accepted while the consolidated grade sits in
    // the recovery band. Clearing it is always allowed.
    if field == "recoveryScore" && value.is_some() {
        let current = match db::load_score_set(conn, &class_id, &subject_id, &student_id) {
            Ok(s) => s,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        let eligible = consolidated_grade(&current)
            .map(|c| recovery_eligible(c, &config))
            .unwrap_or(false);
        if !eligible {
            return err(
                &req.id,
                "validation_failed",
                "student is not eligible for the recovery exam",
                Some(json!({ "studentId": student_id })),
            );
        }
    }

    if let Err(e) = db::apply_field_update(conn, &class_id, &subject_id, &student_id, column, value)
    {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "score_sets" })),
        );
    }

    let set = match db::load_score_set(conn, &class_id, &subject_id, &student_id) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let record = calc::recalculate(&set, &config);
    ok(&req.id, json!({ "studentId": student_id, "computed": record }))
}

fn parse_bulk_entry(
    index: usize,
    entry: &serde_json::Value,
    config: &GradeConfig,
) -> Result<(String, ScoreSet), HandlerErr> {
    let Some(obj) = entry.as_object() else {
        return Err(HandlerErr {
            code: "bad_params",
            message: format!("entry at index {} must be an object", index),
            details: None,
        });
    };
    let Some(student_id) = obj.get("studentId").and_then(|v| v.as_str()) else {
        return Err(HandlerErr {
            code: "bad_params",
            message: format!("entry at index {} missing studentId", index),
            details: None,
        });
    };

    let mut set = ScoreSet::default();
    let fields = ["quarter1", "quarter2", "quarter3", "quarter4"];
    for (q, field) in fields.iter().enumerate() {
        set.quarters[q] = parse_score_param(obj.get(*field)).map_err(|e| HandlerErr {
            details: Some(json!({ "studentId": student_id, "field": field, "index": index })),
            ..e
        })?;
    }
    set.recovery_score = parse_score_param(obj.get("recoveryScore")).map_err(|e| HandlerErr {
        details: Some(json!({ "studentId": student_id, "field": "recoveryScore", "index": index })),
        ..e
    })?;

    if set.recovery_score.is_some() {
        let eligible = consolidated_grade(&set)
            .map(|c| recovery_eligible(c, config))
            .unwrap_or(false);
        if !eligible {
            return Err(HandlerErr {
                code: "validation_failed",
                message: "student is not eligible for the recovery exam".to_string(),
                details: Some(json!({ "studentId": student_id, "index": index })),
            });
        }
    }

    Ok((student_id.to_string(), set))
}

fn handle_scores_bulk_save(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_mut() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let (class_id, subject_id) = match offering_params(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(entries_arr) = req.params.get("entries").and_then(|v| v.as_array()) else {
        return err(&req.id, "bad_params", "missing entries[]", None);
    };

    if let Err(e) = require_subject(conn, &class_id, &subject_id) {
        return e.response(&req.id);
    }
    let config = match db::load_grade_config(conn) {
        Ok(c) => c,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    // Validate the whole payload before touching the database: one bad
    // entry rejects the save and nothing is written.
    let mut entries: Vec<(String, ScoreSet)> = Vec::with_capacity(entries_arr.len());
    for (i, raw) in entries_arr.iter().enumerate() {
        match parse_bulk_entry(i, raw, &config) {
            Ok(parsed) => entries.push(parsed),
            Err(e) => return e.response(&req.id),
        }
    }
    for (student_id, _) in &entries {
        if let Err(e) = require_student(conn, &class_id, student_id) {
            return e.response(&req.id);
        }
    }

    if let Err(e) = db::apply_bulk_update(conn, &class_id, &subject_id, &entries) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "score_sets" })),
        );
    }

    ok(&req.id, json!({ "ok": true, "updated": entries.len() }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "scores.get" => Some(handle_scores_get(state, req)),
        "scores.updateField" => Some(handle_scores_update_field(state, req)),
        "scores.bulkSave" => Some(handle_scores_bulk_save(state, req)),
        _ => None,
    }
}
