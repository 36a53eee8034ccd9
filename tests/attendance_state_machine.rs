use serde_json::{json, Value};
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
    let exe = env!("CARGO_BIN_EXE_examhalld");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn examhalld");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: Value,
) -> Value {
    let payload = json!({ "id": id, "method": method, "params": params });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    serde_json::from_str(line.trim()).expect("parse response json")
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: Value,
) -> Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn request_err(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: Value,
) -> String {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(false),
        "{} unexpectedly succeeded: {}",
        method,
        value
    );
    value["error"]["code"].as_str().expect("error code").to_string()
}

const SEAT: &str = "BITS1234_A23CS0042";

fn setup(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>, workspace: &PathBuf) {
    let _ = request_ok(
        stdin,
        reader,
        "setup-ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        stdin,
        reader,
        "setup-exam",
        "exam.create",
        json!({ "examId": "BITS1234", "subject": "Software Engineering" }),
    );
    let _ = request_ok(
        stdin,
        reader,
        "setup-student",
        "student.upsert",
        json!({ "matricNo": "A23CS0042", "name": "Amir", "program": "CS" }),
    );
    let _ = request_ok(
        stdin,
        reader,
        "setup-roster",
        "roster.assignStudents",
        json!({ "examId": "BITS1234", "matricNos": ["A23CS0042"] }),
    );
}

fn seat_row(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>, id: &str) -> Value {
    let grid = request_ok(
        stdin,
        reader,
        id,
        "roster.seating",
        json!({ "examId": "BITS1234" }),
    );
    grid["seats"].as_array().expect("seats array")[0].clone()
}

#[test]
fn present_stamps_and_pending_clears_the_scan_timestamp() {
    let workspace = temp_dir("examhall-stamp");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    setup(&mut stdin, &mut reader, &workspace);

    let row = seat_row(&mut stdin, &mut reader, "1");
    assert_eq!(row["status"], json!("Pending"));
    assert_eq!(row["timestamp"], Value::Null);

    let result = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "attendance.setStatus",
        json!({ "attendanceId": SEAT, "status": "Present" }),
    );
    assert_eq!(result["previousStatus"], json!("Pending"));
    let row = seat_row(&mut stdin, &mut reader, "3");
    assert_eq!(row["status"], json!("Present"));
    assert!(row["timestamp"].is_string(), "scan must stamp: {}", row);

    // Absent keeps whatever stamp exists.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "attendance.setStatus",
        json!({ "attendanceId": SEAT, "status": "Absent" }),
    );
    let row = seat_row(&mut stdin, &mut reader, "5");
    assert_eq!(row["status"], json!("Absent"));
    assert!(row["timestamp"].is_string());

    // Back to Pending wipes it.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "attendance.setStatus",
        json!({ "attendanceId": SEAT, "status": "Pending" }),
    );
    let row = seat_row(&mut stdin, &mut reader, "7");
    assert_eq!(row["timestamp"], Value::Null);

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn out_is_only_reachable_through_mark_out() {
    let workspace = temp_dir("examhall-out");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    setup(&mut stdin, &mut reader, &workspace);

    let code = request_err(
        &mut stdin,
        &mut reader,
        "1",
        "attendance.setStatus",
        json!({ "attendanceId": SEAT, "status": "Out" }),
    );
    assert_eq!(code, "illegal_transition");

    // markOut needs a seated student.
    let code = request_err(
        &mut stdin,
        &mut reader,
        "2",
        "attendance.markOut",
        json!({ "attendanceId": SEAT }),
    );
    assert_eq!(code, "illegal_transition");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "attendance.setStatus",
        json!({ "attendanceId": SEAT, "status": "Present" }),
    );
    let result = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "attendance.markOut",
        json!({ "attendanceId": SEAT }),
    );
    assert_eq!(result["logId"], json!("BITS1234_A23CS0042_1"));

    let row = seat_row(&mut stdin, &mut reader, "5");
    assert_eq!(row["status"], json!("Out"));
    assert_eq!(row["isOut"], json!(true));

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn an_out_seat_is_locked_until_mark_in() {
    let workspace = temp_dir("examhall-locked");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    setup(&mut stdin, &mut reader, &workspace);
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "attendance.setStatus",
        json!({ "attendanceId": SEAT, "status": "Present" }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "attendance.markOut",
        json!({ "attendanceId": SEAT }),
    );

    for (id, status) in [("3", "Absent"), ("4", "Pending"), ("5", "Present")] {
        let code = request_err(
            &mut stdin,
            &mut reader,
            id,
            "attendance.setStatus",
            json!({ "attendanceId": SEAT, "status": status }),
        );
        assert_eq!(code, "seat_locked", "status {} while out", status);
    }
    let code = request_err(
        &mut stdin,
        &mut reader,
        "6",
        "attendance.markOut",
        json!({ "attendanceId": SEAT }),
    );
    assert_eq!(code, "seat_locked");

    let result = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "attendance.markIn",
        json!({ "attendanceId": SEAT }),
    );
    assert_eq!(result["closed"], json!(1));
    let row = seat_row(&mut stdin, &mut reader, "8");
    assert_eq!(row["status"], json!("Present"));
    assert_eq!(row["isOut"], json!(false));

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn mark_in_closes_the_log_and_visits_keep_counting() {
    let workspace = temp_dir("examhall-visits");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    setup(&mut stdin, &mut reader, &workspace);
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "attendance.setStatus",
        json!({ "attendanceId": SEAT, "status": "Present" }),
    );

    let code = request_err(
        &mut stdin,
        &mut reader,
        "2",
        "attendance.markIn",
        json!({ "attendanceId": SEAT }),
    );
    assert_eq!(code, "not_out");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "attendance.markOut",
        json!({ "attendanceId": SEAT }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "attendance.markIn",
        json!({ "attendanceId": SEAT }),
    );
    let result = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "attendance.markOut",
        json!({ "attendanceId": SEAT }),
    );
    assert_eq!(result["logId"], json!("BITS1234_A23CS0042_2"));
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "attendance.markIn",
        json!({ "attendanceId": SEAT }),
    );

    let history = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "bathroom.history",
        json!({ "examId": "BITS1234" }),
    );
    let entries = history["entries"].as_array().expect("entries array");
    assert_eq!(entries.len(), 2);
    for entry in entries {
        assert_eq!(entry["status"], json!("RETURNED"));
        assert!(entry["entryTime"].is_string(), "closed entry: {}", entry);
    }

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn unknown_seats_and_statuses_are_rejected() {
    let workspace = temp_dir("examhall-unknown");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    setup(&mut stdin, &mut reader, &workspace);

    let code = request_err(
        &mut stdin,
        &mut reader,
        "1",
        "attendance.setStatus",
        json!({ "attendanceId": "BITS1234_NOSUCH", "status": "Present" }),
    );
    assert_eq!(code, "not_found");

    let code = request_err(
        &mut stdin,
        &mut reader,
        "2",
        "attendance.setStatus",
        json!({ "attendanceId": SEAT, "status": "Vanished" }),
    );
    assert_eq!(code, "bad_params");

    drop(stdin);
    let _ = child.wait();
}
