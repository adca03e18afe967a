use std::path::PathBuf;

use serde_json::json;

use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string())
        }),
    )
}

fn handle_workspace_select(state: &mut AppState, req: &Request) -> serde_json::Value {
    let p = req
        .params
        .get("path")
        .and_then(|v| v.as_str())
        .map(PathBuf::from);
    let Some(path) = p else {
        return err(&req.id, "bad_params", "missing params.path", None);
    };

    match db::open_db(&path) {
        Ok(conn) => {
            state.workspace = Some(path.clone());
            state.db = Some(conn);
            ok(&req.id, json!({ "workspacePath": path.to_string_lossy() }))
        }
        Err(e) => err(&req.id, "db_open_failed", format!("{e:?}"), None),
    }
}

fn handle_grading_get_config(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match db::load_grade_config(conn) {
        Ok(config) => ok(&req.id, json!({ "config": config })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn threshold_param(
    req: &Request,
    key: &str,
) -> Result<Option<f64>, (String, Option<serde_json::Value>)> {
    match req.params.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => {
            let Some(n) = v.as_f64() else {
                return Err((format!("{} must be a number", key), None));
            };
            if !n.is_finite() || n <= 0.0 || n > 10.0 {
                return Err((
                    format!("{} must be in (0, 10]", key),
                    Some(json!({ "value": n })),
                ));
            }
            Ok(Some(n))
        }
    }
}

fn handle_grading_set_config(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let mut config = match db::load_grade_config(conn) {
        Ok(c) => c,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    match threshold_param(req, "pass") {
        Ok(Some(v)) => config.pass = v,
        Ok(None) => {}
        Err((message, details)) => return err(&req.id, "bad_params", message, details),
    }
    match threshold_param(req, "recoveryFloor") {
        Ok(Some(v)) => config.recovery_floor = v,
        Ok(None) => {}
        Err((message, details)) => return err(&req.id, "bad_params", message, details),
    }
    match threshold_param(req, "finalPass") {
        Ok(Some(v)) => config.final_pass = v,
        Ok(None) => {}
        Err((message, details)) => return err(&req.id, "bad_params", message, details),
    }

    if config.recovery_floor > config.pass {
        return err(
            &req.id,
            "bad_params",
            "recoveryFloor must not exceed pass",
            Some(json!({ "pass": config.pass, "recoveryFloor": config.recovery_floor })),
        );
    }

    let value = json!({
        "pass": config.pass,
        "recoveryFloor": config.recovery_floor,
        "finalPass": config.final_pass,
    });
    if let Err(e) = db::settings_set_json(conn, db::GRADING_CONFIG_KEY, &value) {
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "config": config }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "workspace.select" => Some(handle_workspace_select(state, req)),
        "grading.getConfig" => Some(handle_grading_get_config(state, req)),
        "grading.setConfig" => Some(handle_grading_set_config(state, req)),
        _ => None,
    }
}
