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
    let exe = env!("CARGO_BIN_EXE_madrassahd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn madrassahd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request_raw(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request_raw(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn request_err_code(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> String {
    let value = request_raw(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(false),
        "{} unexpectedly succeeded: {}",
        method,
        value
    );
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string()
}

#[test]
fn waitlist_admission_creates_student_and_notifies() {
    let workspace = temp_dir("madrassah-waitlist");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let added = request_ok(
        &mut stdin,
        &mut reader,
        "w1",
        "waitlist.add",
        json!({
            "firstName": "Hassan",
            "lastName": "Ali",
            "gender": "Junge",
            "birthDate": "2015-06-01",
            "courseType": "ANFAENGER",
            "whatsapp": "+4915700000000",
            "guardian": "Omar Ali",
            "address": "Musterweg 1, Hamburg",
            "lessonTimes": "Sa 10-14",
        }),
    );
    let wid = added.get("id").and_then(|v| v.as_str()).expect("waitlist id");

    let listed = request_ok(&mut stdin, &mut reader, "w2", "waitlist.list", json!({}));
    assert_eq!(
        listed.get("entries").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(1)
    );

    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "w3",
        "waitlist.add",
        json!({ "firstName": "X", "lastName": "Y", "courseType": "UNKNOWN" }),
    );
    assert_eq!(code, "bad_params");

    let admitted = request_ok(
        &mut stdin,
        &mut reader,
        "w4",
        "waitlist.admit",
        json!({ "id": wid, "className": "K1" }),
    );
    let sid = admitted
        .get("studentId")
        .and_then(|v| v.as_str())
        .expect("student id")
        .to_string();

    let listed = request_ok(&mut stdin, &mut reader, "w5", "waitlist.list", json!({}));
    assert_eq!(
        listed.get("entries").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(0)
    );

    let students = request_ok(
        &mut stdin,
        &mut reader,
        "w6",
        "students.list",
        json!({ "scope": "active", "className": "K1" }),
    );
    let arr = students
        .get("students")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();
    assert_eq!(arr.len(), 1);
    assert_eq!(arr[0].get("id").and_then(|v| v.as_str()), Some(sid.as_str()));
    assert_eq!(
        arr[0].get("firstName").and_then(|v| v.as_str()),
        Some("Hassan")
    );

    let notifs = request_ok(
        &mut stdin,
        &mut reader,
        "w7",
        "notifications.list",
        json!({ "userId": "admin-1" }),
    );
    let arr = notifs
        .get("notifications")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();
    assert_eq!(arr.len(), 1);
    assert_eq!(
        arr[0].get("title").and_then(|v| v.as_str()),
        Some("Schüler aufgenommen")
    );

    let _ = child.kill();
    let _ = child.wait();
}

#[test]
fn student_update_delete_and_restore_rules() {
    let workspace = temp_dir("madrassah-students");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let reg = request_ok(
        &mut stdin,
        &mut reader,
        "reg",
        "students.register",
        json!({ "firstName": "Amina", "lastName": "Yilmaz", "className": "K1" }),
    );
    let sid = reg
        .get("student")
        .and_then(|s| s.get("id"))
        .and_then(|v| v.as_str())
        .expect("student id")
        .to_string();

    let updated = request_ok(
        &mut stdin,
        &mut reader,
        "up",
        "students.update",
        json!({ "id": sid, "className": "K2", "guardian": "Fatima Yilmaz" }),
    );
    let student = updated.get("student").cloned().unwrap_or_default();
    assert_eq!(student.get("className").and_then(|v| v.as_str()), Some("K2"));
    assert_eq!(
        student.get("guardian").and_then(|v| v.as_str()),
        Some("Fatima Yilmaz")
    );
    assert_eq!(
        student.get("status").and_then(|v| v.as_str()),
        Some("active")
    );

    // Restore only applies to dismissed students.
    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "rs",
        "students.restore",
        json!({ "id": sid }),
    );
    assert_eq!(code, "conflict");

    // Removal also drops dependent rows, so a re-used workspace stays clean.
    request_ok(
        &mut stdin,
        &mut reader,
        "att",
        "attendance.setDay",
        json!({ "studentId": sid, "date": "2026-05-04", "isPresent": true, "today": "2026-05-04" }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "del",
        "students.delete",
        json!({ "id": sid }),
    );
    let students = request_ok(&mut stdin, &mut reader, "sl", "students.list", json!({}));
    assert_eq!(
        students.get("students").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(0)
    );
    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "up2",
        "students.update",
        json!({ "id": sid, "className": "K3" }),
    );
    assert_eq!(code, "not_found");

    let _ = child.kill();
    let _ = child.wait();
}

#[test]
fn duplicate_subject_is_a_conflict() {
    let workspace = temp_dir("madrassah-subjects");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "s1",
        "subjects.add",
        json!({ "name": "Akhlaq" }),
    );
    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "s2",
        "subjects.add",
        json!({ "name": "Akhlaq" }),
    );
    assert_eq!(code, "conflict");

    request_ok(
        &mut stdin,
        &mut reader,
        "s3",
        "subjects.remove",
        json!({ "name": "Akhlaq" }),
    );
    let subjects = request_ok(&mut stdin, &mut reader, "s4", "subjects.list", json!({}));
    assert_eq!(
        subjects.get("subjects").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(0)
    );

    let _ = child.kill();
    let _ = child.wait();
}

#[test]
fn notification_sink_is_capped() {
    let workspace = temp_dir("madrassah-notif-cap");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    // Every admission appends one broadcast notification.
    for i in 0..55 {
        let added = request_ok(
            &mut stdin,
            &mut reader,
            &format!("w{}", i),
            "waitlist.add",
            json!({
                "firstName": format!("Kind{}", i),
                "lastName": "Test",
                "courseType": "ANFAENGER",
            }),
        );
        let wid = added
            .get("id")
            .and_then(|v| v.as_str())
            .expect("waitlist id")
            .to_string();
        request_ok(
            &mut stdin,
            &mut reader,
            &format!("a{}", i),
            "waitlist.admit",
            json!({ "id": wid, "className": "K1" }),
        );
    }

    let notifs = request_ok(
        &mut stdin,
        &mut reader,
        "nl",
        "notifications.list",
        json!({ "userId": "admin-1" }),
    );
    let arr = notifs
        .get("notifications")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();
    assert_eq!(arr.len(), 50, "oldest entries are evicted past the cap");
    // Newest first; the earliest admissions are gone.
    let first_msg = arr[0].get("message").and_then(|v| v.as_str()).unwrap_or("");
    assert!(first_msg.contains("Kind54"), "got: {}", first_msg);

    let _ = child.kill();
    let _ = child.wait();
}
