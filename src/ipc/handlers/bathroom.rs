use serde_json::json;

use crate::ipc::error::ok;
use crate::ipc::helpers::{get_now, get_required_str, require_store, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::keys::SeatKey;
use crate::model::{self, BathroomLog, LogStatus};
use crate::store::Store;

fn logs_for_exam(
    store: &Store,
    exam_id: &str,
    only_open: bool,
) -> Result<Vec<BathroomLog>, HandlerErr> {
    let filters = if only_open {
        vec![("status".to_string(), json!("OUT"))]
    } else {
        Vec::new()
    };
    let docs = store
        .query(model::BATHROOM_LOGS, &filters)
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;

    let mut logs = Vec::new();
    for doc in docs {
        let log: BathroomLog = serde_json::from_value(doc)
            .map_err(|e| HandlerErr::db("db_query_failed", e.into()))?;
        // The log collection spans all exams; the seat key prefix scopes it.
        match SeatKey::parse(&log.attendance_id) {
            Ok(key) if key.exam_id == exam_id => logs.push(log),
            _ => {}
        }
    }
    Ok(logs)
}

// The fallback values are for orphaned logs whose seat was removed; a store
// failure is still an error.
fn seat_join(store: &Store, attendance_id: &str) -> Result<(String, String), HandlerErr> {
    let seat = store
        .get(model::ATTENDANCE, attendance_id)
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let name = seat
        .as_ref()
        .and_then(|s| s.get("student_name").and_then(|v| v.as_str()))
        .unwrap_or("Unknown")
        .to_string();
    let table = seat
        .as_ref()
        .and_then(|s| s.get("table_no").and_then(|v| v.as_str()))
        .unwrap_or("-")
        .to_string();
    Ok((name, table))
}

/// Students currently outside for this exam, longest out first.
fn active_log(store: &Store, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let exam_id = get_required_str(params, "examId")?;
    let now = get_now(params)?;
    let logs = logs_for_exam(store, &exam_id, true)?;

    let mut rows = Vec::with_capacity(logs.len());
    for log in &logs {
        let (name, table_no) = seat_join(store, &log.attendance_id)?;
        let minutes_out = (now - log.exit_time).num_minutes().max(0);
        rows.push(json!({
            "logId": log.log_id,
            "attendanceId": log.attendance_id,
            "name": name,
            "tableNo": table_no,
            "exitTime": log.exit_time,
            "minutesOut": minutes_out,
        }));
    }
    rows.sort_by(|a, b| {
        b["minutesOut"]
            .as_i64()
            .cmp(&a["minutesOut"].as_i64())
            .then_with(|| a["logId"].as_str().cmp(&b["logId"].as_str()))
    });
    Ok(json!({ "examId": exam_id, "entries": rows }))
}

/// Every break taken during this exam, open entries first, newest exit first.
fn history(store: &Store, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let exam_id = get_required_str(params, "examId")?;
    let mut logs = logs_for_exam(store, &exam_id, false)?;
    logs.sort_by(|a, b| {
        let open_a = a.status == LogStatus::Out;
        let open_b = b.status == LogStatus::Out;
        open_b
            .cmp(&open_a)
            .then_with(|| b.exit_time.cmp(&a.exit_time))
            .then_with(|| a.log_id.cmp(&b.log_id))
    });

    let mut rows = Vec::with_capacity(logs.len());
    for log in &logs {
        let (name, table_no) = seat_join(store, &log.attendance_id)?;
        rows.push(json!({
            "logId": log.log_id,
            "attendanceId": log.attendance_id,
            "name": name,
            "tableNo": table_no,
            "exitTime": log.exit_time,
            "entryTime": log.entry_time,
            "status": log.status,
        }));
    }
    Ok(json!({ "examId": exam_id, "entries": rows }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "bathroom.activeLog" => require_store(state).and_then(|s| active_log(s, &req.params)),
        "bathroom.history" => require_store(state).and_then(|s| history(s, &req.params)),
        _ => return None,
    };
    Some(match result {
        Ok(value) => ok(&req.id, value),
        Err(error) => error.response(&req.id),
    })
}
