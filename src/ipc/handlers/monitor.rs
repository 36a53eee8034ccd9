use serde_json::json;

use crate::engine::{self, MonitorSession};
use crate::ipc::error::ok;
use crate::ipc::helpers::{get_minutes, get_now, get_required_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::keys::SeatKey;
use crate::model::{self, BathroomLog, Exam};
use crate::store::Store;

const DEFAULT_LIMIT_MINUTES: i64 = 15;
const DEFAULT_GRACE_MINUTES: i64 = 15;

/// Opens (or replaces) the breach-monitoring session. Switching exams starts
/// from a clean alerted set, so nothing carries over between sessions.
fn start(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let exam_id = get_required_str(params, "examId")?;
    let limit_minutes = get_minutes(params, "limitMinutes", DEFAULT_LIMIT_MINUTES)?;
    let grace_minutes = get_minutes(params, "graceMinutes", DEFAULT_GRACE_MINUTES)?;

    let store = state
        .store
        .as_ref()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))?;
    store
        .get(model::EXAMS, &exam_id)
        .map_err(|e| HandlerErr::db("db_query_failed", e))?
        .ok_or_else(|| HandlerErr::not_found("exam not found"))?;

    state.monitor = Some(MonitorSession::new(
        exam_id.clone(),
        limit_minutes,
        grace_minutes,
    ));
    Ok(json!({
        "examId": exam_id,
        "limitMinutes": limit_minutes,
        "graceMinutes": grace_minutes,
    }))
}

fn open_logs_for_exam(store: &Store, exam_id: &str) -> Result<Vec<BathroomLog>, HandlerErr> {
    let docs = store
        .query(model::BATHROOM_LOGS, &[("status".to_string(), json!("OUT"))])
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let mut logs = Vec::new();
    for doc in docs {
        let log: BathroomLog = serde_json::from_value(doc)
            .map_err(|e| HandlerErr::db("db_query_failed", e.into()))?;
        match SeatKey::parse(&log.attendance_id) {
            Ok(key) if key.exam_id == exam_id => logs.push(log),
            _ => {}
        }
    }
    Ok(logs)
}

/// One breach scan against the live snapshot. Returns only the entries that
/// crossed the limit on this tick; an entry already alerted in this session
/// stays silent until the student returns and goes out again.
fn tick(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let now = get_now(params)?;
    let Some(store) = state.store.as_ref() else {
        return Err(HandlerErr::new("no_workspace", "select a workspace first"));
    };
    let Some(session) = state.monitor.as_mut() else {
        return Err(HandlerErr::new("no_monitor", "start a monitor session first"));
    };

    let logs = open_logs_for_exam(store, &session.exam_id)?;
    let open: Vec<(String, chrono::DateTime<chrono::Utc>)> = logs
        .iter()
        .map(|l| (l.log_id.clone(), l.exit_time))
        .collect();
    let fresh = session.tick(&open, now);

    let mut breaches = Vec::with_capacity(fresh.len());
    for log_id in &fresh {
        let Some(log) = logs.iter().find(|l| &l.log_id == log_id) else {
            continue;
        };
        let seat = store
            .get(model::ATTENDANCE, &log.attendance_id)
            .map_err(|e| HandlerErr::db("db_query_failed", e))?;
        breaches.push(json!({
            "logId": log.log_id,
            "attendanceId": log.attendance_id,
            "name": seat
                .as_ref()
                .and_then(|s| s.get("student_name").and_then(|v| v.as_str()))
                .unwrap_or("Unknown"),
            "tableNo": seat
                .as_ref()
                .and_then(|s| s.get("table_no").and_then(|v| v.as_str()))
                .unwrap_or("-"),
            "exitTime": log.exit_time,
            "minutesOut": (now - log.exit_time).num_minutes().max(0),
        }));
    }

    let exam_doc = store
        .get(model::EXAMS, &session.exam_id)
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let ended = match exam_doc {
        Some(doc) => {
            let exam: Exam = serde_json::from_value(doc)
                .map_err(|e| HandlerErr::db("db_query_failed", e.into()))?;
            // Schedule strings are hall-local wall time, so the tick instant
            // is compared in the daemon's local frame, not UTC.
            engine::exam_ended(
                exam.date.as_deref(),
                exam.end_time.as_deref(),
                session.grace_minutes,
                now.with_timezone(&chrono::Local).naive_local(),
            )
        }
        // Exam deleted mid-session: nothing left to monitor.
        None => true,
    };

    Ok(json!({
        "examId": session.exam_id,
        "breaches": breaches,
        "openCount": open.len(),
        "examEnded": ended,
    }))
}

fn stop(state: &mut AppState) -> Result<serde_json::Value, HandlerErr> {
    let stopped = state.monitor.take().is_some();
    Ok(json!({ "stopped": stopped }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "monitor.start" => start(state, &req.params),
        "monitor.tick" => tick(state, &req.params),
        "monitor.stop" => stop(state),
        _ => return None,
    };
    Some(match result {
        Ok(value) => ok(&req.id, value),
        Err(error) => error.response(&req.id),
    })
}
