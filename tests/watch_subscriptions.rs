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

fn poll_events(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    watch_id: &str,
) -> Vec<Value> {
    let result = request_ok(stdin, reader, id, "watch.poll", json!({ "watchId": watch_id }));
    result["events"].as_array().expect("events array").clone()
}

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
    for (matric, name) in [("A23CS0042", "Amir"), ("A23CS0077", "Lee")] {
        let _ = request_ok(
            stdin,
            reader,
            &format!("setup-{matric}"),
            "student.upsert",
            json!({ "matricNo": matric, "name": name, "program": "CS" }),
        );
    }
}

#[test]
fn seat_watcher_tracks_assignment_scan_and_replace() {
    let workspace = temp_dir("examhall-watch-seats");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    setup(&mut stdin, &mut reader, &workspace);

    let sub = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "watch.subscribe",
        json!({ "collection": "ATTENDANCE", "where": { "exam_id": "BITS1234" } }),
    );
    let watch_id = sub["watchId"].as_str().expect("watchId").to_string();

    // Nothing assigned yet.
    assert!(poll_events(&mut stdin, &mut reader, "2", &watch_id).is_empty());

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "roster.assignStudents",
        json!({ "examId": "BITS1234", "matricNos": ["A23CS0042", "A23CS0077"] }),
    );
    let events = poll_events(&mut stdin, &mut reader, "4", &watch_id);
    assert_eq!(events.len(), 2);
    assert!(events.iter().all(|e| e["type"] == json!("added")));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "attendance.setStatus",
        json!({ "attendanceId": "BITS1234_A23CS0042", "status": "Present" }),
    );
    let events = poll_events(&mut stdin, &mut reader, "6", &watch_id);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["type"], json!("modified"));
    assert_eq!(events[0]["id"], json!("BITS1234_A23CS0042"));
    assert_eq!(events[0]["doc"]["status"], json!("Present"));

    // Clearing the roster removes both seats in one commit.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "roster.assignStudents",
        json!({ "examId": "BITS1234", "matricNos": [] }),
    );
    let events = poll_events(&mut stdin, &mut reader, "8", &watch_id);
    assert_eq!(events.len(), 2);
    assert!(events.iter().all(|e| e["type"] == json!("removed")));

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn subscribing_after_writes_seeds_the_snapshot_as_added() {
    let workspace = temp_dir("examhall-watch-snapshot");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    setup(&mut stdin, &mut reader, &workspace);
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "roster.assignStudents",
        json!({ "examId": "BITS1234", "matricNos": ["A23CS0042", "A23CS0077"] }),
    );

    let sub = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "watch.subscribe",
        json!({ "collection": "ATTENDANCE", "where": { "exam_id": "BITS1234" } }),
    );
    let watch_id = sub["watchId"].as_str().expect("watchId").to_string();
    let events = poll_events(&mut stdin, &mut reader, "3", &watch_id);
    assert_eq!(events.len(), 2);
    assert!(events.iter().all(|e| e["type"] == json!("added")));

    // Drained means drained.
    assert!(poll_events(&mut stdin, &mut reader, "4", &watch_id).is_empty());

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn mark_out_emits_the_log_and_seat_changes_together_or_not_at_all() {
    let workspace = temp_dir("examhall-watch-atomic");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    setup(&mut stdin, &mut reader, &workspace);
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "roster.assignStudents",
        json!({ "examId": "BITS1234", "matricNos": ["A23CS0042"] }),
    );

    let seat_sub = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "watch.subscribe",
        json!({ "collection": "ATTENDANCE", "where": { "exam_id": "BITS1234" } }),
    );
    let seat_watch = seat_sub["watchId"].as_str().expect("watchId").to_string();
    let log_sub = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "watch.subscribe",
        json!({ "collection": "BATHROOM_LOG" }),
    );
    let log_watch = log_sub["watchId"].as_str().expect("watchId").to_string();
    // Drain the seat snapshot.
    let _ = poll_events(&mut stdin, &mut reader, "4", &seat_watch);

    // A refused markOut (student not seated) writes nothing anywhere.
    let refused = request(
        &mut stdin,
        &mut reader,
        "5",
        "attendance.markOut",
        json!({ "attendanceId": "BITS1234_A23CS0042" }),
    );
    assert_eq!(refused["ok"], json!(false));
    assert!(poll_events(&mut stdin, &mut reader, "6", &seat_watch).is_empty());
    assert!(poll_events(&mut stdin, &mut reader, "7", &log_watch).is_empty());

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "attendance.setStatus",
        json!({ "attendanceId": "BITS1234_A23CS0042", "status": "Present" }),
    );
    let _ = poll_events(&mut stdin, &mut reader, "9", &seat_watch);
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "attendance.markOut",
        json!({ "attendanceId": "BITS1234_A23CS0042" }),
    );

    let seat_events = poll_events(&mut stdin, &mut reader, "11", &seat_watch);
    assert_eq!(seat_events.len(), 1);
    assert_eq!(seat_events[0]["doc"]["status"], json!("Out"));
    let log_events = poll_events(&mut stdin, &mut reader, "12", &log_watch);
    assert_eq!(log_events.len(), 1);
    assert_eq!(log_events[0]["type"], json!("added"));
    assert_eq!(log_events[0]["id"], json!("BITS1234_A23CS0042_1"));

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn unsubscribe_invalidates_the_handle() {
    let workspace = temp_dir("examhall-watch-unsub");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let sub = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "watch.subscribe",
        json!({ "collection": "EXAM" }),
    );
    let watch_id = sub["watchId"].as_str().expect("watchId").to_string();

    let removed = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "watch.unsubscribe",
        json!({ "watchId": watch_id }),
    );
    assert_eq!(removed["removed"], json!(true));

    let value = request(
        &mut stdin,
        &mut reader,
        "4",
        "watch.poll",
        json!({ "watchId": watch_id }),
    );
    assert_eq!(value["ok"], json!(false));
    assert_eq!(value["error"]["code"], json!("not_found"));

    drop(stdin);
    let _ = child.wait();
}
