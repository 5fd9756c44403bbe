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

fn request_ok(
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
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

#[test]
fn bundle_roundtrip_carries_the_whole_workspace() {
    let workspace_a = temp_dir("madrassah-bundle-a");
    let workspace_b = temp_dir("madrassah-bundle-b");
    let bundle = temp_dir("madrassah-bundle-out").join("export.madrassah.zip");

    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace_a.to_string_lossy() }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "subjects.add",
        json!({ "name": "Hifz" }),
    );
    let reg = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "students.register",
        json!({ "firstName": "Bilal", "lastName": "Osman", "className": "K3" }),
    );
    let sid = reg
        .get("student")
        .and_then(|s| s.get("id"))
        .and_then(|v| v.as_str())
        .expect("student id")
        .to_string();
    request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "grades.upsert",
        json!({ "studentId": sid, "subject": "Hifz", "term": "Halbjahr", "points": 17 }),
    );

    let exported = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "backup.export",
        json!({ "outPath": bundle.to_string_lossy() }),
    );
    let sha = exported
        .get("dbSha256")
        .and_then(|v| v.as_str())
        .expect("checksum")
        .to_string();
    assert_eq!(sha.len(), 64);

    // Import into a fresh workspace and verify the data followed.
    request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "workspace.select",
        json!({ "path": workspace_b.to_string_lossy() }),
    );
    let empty = request_ok(&mut stdin, &mut reader, "7", "students.list", json!({}));
    assert_eq!(
        empty.get("students").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(0)
    );

    let imported = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "backup.import",
        json!({ "inPath": bundle.to_string_lossy() }),
    );
    assert_eq!(
        imported.get("dbSha256").and_then(|v| v.as_str()),
        Some(sha.as_str())
    );

    let students = request_ok(&mut stdin, &mut reader, "9", "students.list", json!({}));
    let arr = students
        .get("students")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();
    assert_eq!(arr.len(), 1);
    assert_eq!(
        arr[0].get("firstName").and_then(|v| v.as_str()),
        Some("Bilal")
    );

    let grades = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "grades.list",
        json!({ "studentId": sid }),
    );
    assert_eq!(
        grades.get("grades").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(1)
    );
    let subjects = request_ok(&mut stdin, &mut reader, "11", "subjects.list", json!({}));
    assert_eq!(
        subjects.get("subjects").and_then(|v| v.as_array()),
        Some(&vec![json!("Hifz")])
    );

    let _ = child.kill();
    let _ = child.wait();
}
