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

fn request(
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
    let value = request(stdin, reader, id, method, params);
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
fn roster_creation_is_admin_gated_after_bootstrap() {
    let workspace = temp_dir("observd-roster-gate");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    // Bootstrap admin: allowed with an empty roster.
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

    // Once an admin exists, anonymous and non-admin creation both fail.
    let resp = request(
        &mut stdin,
        &mut reader,
        "4",
        "teachers.create",
        json!({ "email": "rogue@school.test", "name": "Rogue", "grades": ["7"] }),
    );
    assert_eq!(resp.get("ok").and_then(|v| v.as_bool()), Some(false));

    let resp = request(
        &mut stdin,
        &mut reader,
        "5",
        "teachers.create",
        json!({
            "actorEmail": "alice@school.test",
            "email": "rogue@school.test",
            "name": "Rogue",
            "grades": ["7"]
        }),
    );
    assert_eq!(
        resp.pointer("/error/code").and_then(|v| v.as_str()),
        Some("unauthorized")
    );

    // Duplicate email is a validation error, not a constraint blowup.
    let resp = request(
        &mut stdin,
        &mut reader,
        "6",
        "teachers.create",
        json!({
            "actorEmail": "principal@school.test",
            "email": "Alice@School.Test",
            "name": "Alice Again",
            "grades": ["7"]
        }),
    );
    assert_eq!(
        resp.pointer("/error/code").and_then(|v| v.as_str()),
        Some("validation_failed")
    );
}

#[test]
fn deactivated_teachers_cannot_act_or_be_booked() {
    let workspace = temp_dir("observd-deactivate");
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

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "teachers.setActive",
        json!({
            "actorEmail": "principal@school.test",
            "teacherId": bob,
            "active": false
        }),
    );

    // Booking a deactivated teacher fails validation.
    let resp = request(
        &mut stdin,
        &mut reader,
        "6",
        "observations.create",
        json!({
            "actorEmail": "alice@school.test",
            "teacherId": bob,
            "date": next_monday(),
            "periods": [3]
        }),
    );
    assert_eq!(
        resp.pointer("/error/code").and_then(|v| v.as_str()),
        Some("validation_failed")
    );

    // A deactivated caller is rejected outright.
    let resp = request(
        &mut stdin,
        &mut reader,
        "7",
        "observations.create",
        json!({
            "actorEmail": "bob@school.test",
            "teacherId": bob,
            "date": next_monday(),
            "periods": [3]
        }),
    );
    assert_eq!(
        resp.pointer("/error/code").and_then(|v| v.as_str()),
        Some("unauthorized")
    );

    // Reactivation restores booking.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "teachers.setActive",
        json!({
            "actorEmail": "principal@school.test",
            "teacherId": bob,
            "active": true
        }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "observations.create",
        json!({
            "actorEmail": "alice@school.test",
            "teacherId": bob,
            "date": next_monday(),
            "periods": [3]
        }),
    );
}

#[test]
fn access_request_approval_adds_a_roster_row() {
    let workspace = temp_dir("observd-access");
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

    let submitted = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "access.submit",
        json!({ "email": "newbie@school.test", "name": "New Teacher" }),
    );
    let request_id = submitted
        .get("requestId")
        .and_then(|v| v.as_str())
        .expect("requestId")
        .to_string();

    // Duplicate submission for the same email is rejected while pending.
    let resp = request(
        &mut stdin,
        &mut reader,
        "4",
        "access.submit",
        json!({ "email": "newbie@school.test", "name": "New Teacher" }),
    );
    assert_eq!(resp.get("ok").and_then(|v| v.as_bool()), Some(false));

    let approved = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "access.approve",
        json!({ "actorEmail": "principal@school.test", "requestId": request_id }),
    );
    let teacher_id = approved
        .get("teacherId")
        .and_then(|v| v.as_str())
        .expect("teacherId")
        .to_string();
    assert!(!teacher_id.is_empty());

    // Approval is terminal.
    let resp = request(
        &mut stdin,
        &mut reader,
        "6",
        "access.approve",
        json!({ "actorEmail": "principal@school.test", "requestId": request_id }),
    );
    assert_eq!(resp.get("ok").and_then(|v| v.as_bool()), Some(false));

    // The new account can immediately read the roster-facing surfaces.
    let teachers = request_ok(&mut stdin, &mut reader, "7", "teachers.list", json!({}));
    let found = teachers
        .get("teachers")
        .and_then(|v| v.as_array())
        .map(|rows| {
            rows.iter()
                .any(|r| r.get("email").and_then(|v| v.as_str()) == Some("newbie@school.test"))
        })
        .unwrap_or(false);
    assert!(found, "approved teacher should be on the roster");
}
