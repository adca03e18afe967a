use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
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

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_gradebookd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn gradebookd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({ "id": id, "method": method, "params": params });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn result_of(value: serde_json::Value, method: &str) -> serde_json::Value {
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

#[test]
fn router_dispatch_smoke_covers_handler_families() {
    let workspace = temp_dir("gradebook-router-smoke");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let health = result_of(
        request(&mut stdin, &mut reader, "1", "health", json!({})),
        "health",
    );
    assert!(health.get("version").and_then(|v| v.as_str()).is_some());

    let _ = result_of(
        request(
            &mut stdin,
            &mut reader,
            "2",
            "workspace.select",
            json!({ "path": workspace.to_string_lossy() }),
        ),
        "workspace.select",
    );

    let created = result_of(
        request(
            &mut stdin,
            &mut reader,
            "3",
            "classes.create",
            json!({ "name": "Smoke Class" }),
        ),
        "classes.create",
    );
    let class_id = created
        .get("classId")
        .and_then(|v| v.as_str())
        .expect("classId")
        .to_string();

    let listed = result_of(
        request(&mut stdin, &mut reader, "4", "classes.list", json!({})),
        "classes.list",
    );
    assert_eq!(
        listed
            .get("classes")
            .and_then(|v| v.as_array())
            .map(|a| a.len()),
        Some(1)
    );

    let subject = result_of(
        request(
            &mut stdin,
            &mut reader,
            "5",
            "subjects.create",
            json!({ "classId": class_id, "name": "Mathematics" }),
        ),
        "subjects.create",
    );
    let subject_id = subject
        .get("subjectId")
        .and_then(|v| v.as_str())
        .expect("subjectId")
        .to_string();
    let _ = result_of(
        request(
            &mut stdin,
            &mut reader,
            "6",
            "subjects.list",
            json!({ "classId": class_id }),
        ),
        "subjects.list",
    );

    let student = result_of(
        request(
            &mut stdin,
            &mut reader,
            "7",
            "students.create",
            json!({ "classId": class_id, "lastName": "Silva", "firstName": "Ana" }),
        ),
        "students.create",
    );
    let student_id = student
        .get("studentId")
        .and_then(|v| v.as_str())
        .expect("studentId")
        .to_string();
    let _ = result_of(
        request(
            &mut stdin,
            &mut reader,
            "8",
            "students.list",
            json!({ "classId": class_id }),
        ),
        "students.list",
    );
    let _ = result_of(
        request(
            &mut stdin,
            &mut reader,
            "9",
            "students.setActive",
            json!({ "studentId": student_id, "active": true }),
        ),
        "students.setActive",
    );

    let _ = result_of(
        request(
            &mut stdin,
            &mut reader,
            "10",
            "scores.updateField",
            json!({
                "classId": class_id,
                "subjectId": subject_id,
                "studentId": student_id,
                "field": "quarter1",
                "value": 7.5
            }),
        ),
        "scores.updateField",
    );
    let _ = result_of(
        request(
            &mut stdin,
            &mut reader,
            "11",
            "scores.get",
            json!({ "classId": class_id, "subjectId": subject_id }),
        ),
        "scores.get",
    );
    let _ = result_of(
        request(
            &mut stdin,
            &mut reader,
            "12",
            "scores.bulkSave",
            json!({
                "classId": class_id,
                "subjectId": subject_id,
                "entries": [{ "studentId": student_id, "quarter1": 8.0, "quarter2": 6.0 }]
            }),
        ),
        "scores.bulkSave",
    );

    let summary = result_of(
        request(
            &mut stdin,
            &mut reader,
            "13",
            "analytics.classSummary",
            json!({ "classId": class_id, "subjectId": subject_id }),
        ),
        "analytics.classSummary",
    );
    assert!(summary.get("analytics").is_some());

    let _ = result_of(
        request(&mut stdin, &mut reader, "14", "grading.getConfig", json!({})),
        "grading.getConfig",
    );
    let _ = result_of(
        request(
            &mut stdin,
            &mut reader,
            "15",
            "grading.setConfig",
            json!({ "finalPass": 6.0 }),
        ),
        "grading.setConfig",
    );

    let unknown = request(&mut stdin, &mut reader, "16", "no.suchMethod", json!({}));
    assert_eq!(unknown.get("ok").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(
        unknown
            .get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str()),
        Some("not_implemented")
    );

    drop(stdin);
    let _ = child.wait();
}
