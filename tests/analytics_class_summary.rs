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

fn request_ok(
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
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

#[test]
fn class_summary_statistics_over_a_seeded_class() {
    let workspace = temp_dir("gradebook-class-summary");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let class = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "classes.create",
        json!({ "name": "7th Grade C" }),
    );
    let class_id = class["classId"].as_str().expect("classId").to_string();
    let subject = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "subjects.create",
        json!({ "classId": class_id, "name": "Portuguese" }),
    );
    let subject_id = subject["subjectId"].as_str().expect("subjectId").to_string();

    let names = [
        ("Almeida", "Gabriela"),
        ("Barbosa", "Hugo"),
        ("Cardoso", "Iris"),
        ("Dias", "Joao"),
        ("Esteves", "Kaua"),
        ("Farias", "Livia"),
    ];
    let mut student_ids = Vec::new();
    for (i, (last, first)) in names.iter().enumerate() {
        let created = request_ok(
            &mut stdin,
            &mut reader,
            &format!("4-{}", i),
            "students.create",
            json!({ "classId": class_id, "lastName": last, "firstName": first }),
        );
        student_ids.push(created["studentId"].as_str().expect("studentId").to_string());
    }

    // One approved at the high-performer boundary, one clear high performer,
    // one pending recovery, one recovered, one failed, one ungraded.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "scores.bulkSave",
        json!({
            "classId": class_id,
            "subjectId": subject_id,
            "entries": [
                { "studentId": student_ids[0],
                  "quarter1": 8.0, "quarter2": 8.0, "quarter3": 8.0, "quarter4": 8.0 },
                { "studentId": student_ids[1],
                  "quarter1": 9.0, "quarter2": 10.0, "quarter3": 9.0, "quarter4": 10.0 },
                { "studentId": student_ids[2],
                  "quarter1": 5.0, "quarter2": 4.0, "quarter3": 5.0, "quarter4": 4.0 },
                { "studentId": student_ids[3],
                  "quarter1": 5.0, "quarter2": 5.0, "quarter3": 5.0, "quarter4": 5.0,
                  "recoveryScore": 9.0 },
                { "studentId": student_ids[4],
                  "quarter1": 2.0, "quarter2": 1.0, "quarter3": 3.0, "quarter4": 2.0 }
            ]
        }),
    );

    let summary = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "analytics.classSummary",
        json!({ "classId": class_id, "subjectId": subject_id }),
    );

    assert_eq!(summary["class"]["name"], json!("7th Grade C"));
    assert_eq!(summary["subject"]["name"], json!("Portuguese"));
    assert_eq!(
        summary["students"].as_array().map(|a| a.len()),
        Some(names.len())
    );

    let a = &summary["analytics"];
    // Grades: 8.0, 9.5, 4.5, 5.0, 2.0 (ungraded student excluded).
    assert_eq!(a["validRecordCount"], json!(5));
    assert_eq!(a["classAverage"], json!(5.8));
    assert_eq!(a["median"], json!(5.0));
    assert_eq!(a["perQuarterAverages"][0], json!(5.8));
    assert_eq!(a["perQuarterAverages"][1], json!(5.6));
    // approved: 8.0, 9.5, and the recovered 7.0 final.
    assert_eq!(a["approvedCount"], json!(3));
    assert_eq!(a["failedCount"], json!(1));
    assert_eq!(a["recoveryCount"], json!(1));
    // 8.0 exactly is not a high performer.
    assert_eq!(a["highPerformerCount"], json!(1));
    assert_eq!(a["approvalRatePercent"], json!(60.0));

    // The ungraded student shows up with every derived field absent.
    let ungraded = summary["students"]
        .as_array()
        .expect("students")
        .iter()
        .find(|s| s["studentId"] == json!(student_ids[5]))
        .expect("ungraded student present");
    assert_eq!(ungraded["computed"]["consolidatedGrade"], json!(null));
    assert_eq!(ungraded["computed"]["status"], json!(null));

    // Withdrawing a student removes them from the statistics but not the roster.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "students.setActive",
        json!({ "studentId": student_ids[4], "active": false }),
    );
    let summary = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "analytics.classSummary",
        json!({ "classId": class_id, "subjectId": subject_id }),
    );
    let a = &summary["analytics"];
    assert_eq!(a["validRecordCount"], json!(4));
    assert_eq!(a["failedCount"], json!(0));
    // (8.0 + 9.5 + 4.5 + 5.0) / 4
    assert_eq!(a["classAverage"], json!(6.75));
    assert_eq!(
        summary["students"].as_array().map(|a| a.len()),
        Some(names.len())
    );

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn empty_offering_yields_all_zero_analytics() {
    let workspace = temp_dir("gradebook-empty-analytics");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let class = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "classes.create",
        json!({ "name": "Empty Class" }),
    );
    let class_id = class["classId"].as_str().expect("classId").to_string();
    let subject = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "subjects.create",
        json!({ "classId": class_id, "name": "Arts" }),
    );
    let subject_id = subject["subjectId"].as_str().expect("subjectId").to_string();

    let summary = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "analytics.classSummary",
        json!({ "classId": class_id, "subjectId": subject_id }),
    );
    let a = &summary["analytics"];
    assert_eq!(a["validRecordCount"], json!(0));
    assert_eq!(a["classAverage"], json!(0.0));
    assert_eq!(a["median"], json!(0.0));
    assert_eq!(a["approvalRatePercent"], json!(0.0));
    assert_eq!(a["approvedCount"], json!(0));
    assert_eq!(a["recoveryCount"], json!(0));

    drop(stdin);
    let _ = child.wait();
}
