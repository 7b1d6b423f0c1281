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
    let exe = env!("CARGO_BIN_EXE_observd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn observd");
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

fn next_monday() -> String {
    use chrono::{Datelike, Duration};
    let today = chrono::Local::now().date_naive();
    let offset = (7 - today.weekday().num_days_from_monday() as i64) % 7;
    let offset = if offset == 0 { 7 } else { offset };
    (today + Duration::days(offset))
        .format("%Y-%m-%d")
        .to_string()
}

#[test]
fn bundle_round_trip_preserves_bookings() {
    let workspace = temp_dir("observd-bundle-src");
    let restore_workspace = temp_dir("observd-bundle-dst");
    let bundle = workspace.join("observd-backup.zip");

    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "teachers.create",
        json!({
            "email": "principal@school.test",
            "name": "Pat Principal",
            "grades": ["7"],
            "role": "admin"
        }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "teachers.create",
        json!({
            "actorEmail": "principal@school.test",
            "email": "alice@school.test",
            "name": "Alice",
            "grades": ["7"]
        }),
    );
    let created = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "teachers.create",
        json!({
            "actorEmail": "principal@school.test",
            "email": "bob@school.test",
            "name": "Bob",
            "grades": ["7"]
        }),
    );
    let bob = created
        .get("teacherId")
        .and_then(|v| v.as_str())
        .expect("teacherId")
        .to_string();

    let booked = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "observations.create",
        json!({
            "actorEmail": "alice@school.test",
            "teacherId": bob,
            "date": next_monday(),
            "periods": [3]
        }),
    );
    let observation_id = booked
        .get("observationId")
        .and_then(|v| v.as_str())
        .expect("observationId")
        .to_string();

    let exported = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "backup.exportWorkspaceBundle",
        json!({
            "workspacePath": workspace.to_string_lossy(),
            "outPath": bundle.to_string_lossy()
        }),
    );
    assert_eq!(
        exported.get("bundleFormat").and_then(|v| v.as_str()),
        Some("observd-workspace-v1")
    );

    // Restore into a fresh workspace and confirm the booking came along.
    let imported = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "backup.importWorkspaceBundle",
        json!({
            "workspacePath": restore_workspace.to_string_lossy(),
            "inPath": bundle.to_string_lossy()
        }),
    );
    assert_eq!(
        imported
            .get("bundleFormatDetected")
            .and_then(|v| v.as_str()),
        Some("observd-workspace-v1")
    );

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "observations.list",
        json!({}),
    );
    let found = listed
        .get("observations")
        .and_then(|v| v.as_array())
        .map(|rows| {
            rows.iter()
                .any(|r| r.get("id").and_then(|v| v.as_str()) == Some(observation_id.as_str()))
        })
        .unwrap_or(false);
    assert!(found, "imported workspace should contain the booking");
}
