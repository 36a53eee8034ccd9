use chrono::Utc;
use serde_json::json;

use crate::engine::{self, TimestampEffect};
use crate::ipc::error::ok;
use crate::ipc::helpers::{get_required_str, load_seat, open_logs, require_store, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::keys::{LogKey, SeatKey};
use crate::model::{self, BathroomLog, LogStatus, SeatStatus};
use crate::store::{Store, WriteOp};

/// Generic status change: `Present`, `Absent` or `Pending`. Refused while
/// the student is out, so the bathroom log can never desynchronize from the
/// seat status.
fn set_status(store: &mut Store, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let attendance_id = get_required_str(params, "attendanceId")?;
    let status_raw = get_required_str(params, "status")?;
    let Some(requested) = SeatStatus::parse(&status_raw) else {
        return Err(HandlerErr::bad_params(format!(
            "unknown status {:?}",
            status_raw
        )));
    };

    let seat = load_seat(store, &attendance_id)?;
    let open = open_logs(store, &attendance_id)?;
    engine::check_set_status(requested, !open.is_empty()).map_err(HandlerErr::rule)?;

    let patch = match engine::timestamp_effect(requested) {
        TimestampEffect::Stamp => json!({ "status": requested, "timestamp": Utc::now() }),
        TimestampEffect::Clear => json!({ "status": requested, "timestamp": null }),
        TimestampEffect::Keep => json!({ "status": requested }),
    };
    store
        .update(model::ATTENDANCE, &attendance_id, patch)
        .map_err(|e| HandlerErr::db("db_update_failed", e))?;
    Ok(json!({
        "attendanceId": attendance_id,
        "status": requested,
        "previousStatus": seat.status,
    }))
}

/// Opens a bathroom break: appends the next log entry for this seat and
/// flips the seat to `Out` in one commit.
fn mark_out(store: &mut Store, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let attendance_id = get_required_str(params, "attendanceId")?;
    let seat_key = SeatKey::parse(&attendance_id)
        .map_err(|_| HandlerErr::bad_params("attendanceId is not a valid seat key"))?;

    let seat = load_seat(store, &attendance_id)?;
    let open = open_logs(store, &attendance_id)?;
    engine::check_mark_out(seat.status, !open.is_empty()).map_err(HandlerErr::rule)?;

    let visit_count = store
        .query(
            model::BATHROOM_LOGS,
            &[("attendance_id".to_string(), json!(attendance_id))],
        )
        .map_err(|e| HandlerErr::db("db_query_failed", e))?
        .len() as u32;
    let log_key = LogKey::new(seat_key, visit_count + 1)
        .map_err(|e| HandlerErr::bad_params(e.to_string()))?;

    let entry = BathroomLog {
        log_id: log_key.to_string(),
        attendance_id: attendance_id.clone(),
        exit_time: Utc::now(),
        entry_time: None,
        status: LogStatus::Out,
    };
    let body =
        serde_json::to_value(&entry).map_err(|e| HandlerErr::db("db_update_failed", e.into()))?;
    store
        .atomic_batch(vec![
            WriteOp::Put {
                collection: model::BATHROOM_LOGS.to_string(),
                id: entry.log_id.clone(),
                body,
            },
            WriteOp::Update {
                collection: model::ATTENDANCE.to_string(),
                id: attendance_id.clone(),
                patch: json!({ "status": SeatStatus::Out }),
            },
        ])
        .map_err(|e| HandlerErr::db("db_tx_failed", e))?;
    Ok(json!({
        "attendanceId": attendance_id,
        "logId": entry.log_id,
        "exitTime": entry.exit_time,
    }))
}

/// Closes the break: stamps the return on every open entry (exactly one by
/// invariant, tolerated if more) and restores `Present`, in one commit. The
/// original `Present` stamp from scan-in is left untouched.
fn mark_in(store: &mut Store, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let attendance_id = get_required_str(params, "attendanceId")?;
    load_seat(store, &attendance_id)?;
    let open = open_logs(store, &attendance_id)?;
    engine::check_mark_in(!open.is_empty()).map_err(HandlerErr::rule)?;

    let now = Utc::now();
    let mut ops: Vec<WriteOp> = open
        .iter()
        .map(|log| WriteOp::Update {
            collection: model::BATHROOM_LOGS.to_string(),
            id: log.log_id.clone(),
            patch: json!({ "entry_time": now, "status": LogStatus::Returned }),
        })
        .collect();
    ops.push(WriteOp::Update {
        collection: model::ATTENDANCE.to_string(),
        id: attendance_id.clone(),
        patch: json!({ "status": SeatStatus::Present }),
    });
    store
        .atomic_batch(ops)
        .map_err(|e| HandlerErr::db("db_tx_failed", e))?;
    Ok(json!({
        "attendanceId": attendance_id,
        "closed": open.len(),
        "entryTime": now,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "attendance.setStatus" => require_store(state).and_then(|s| set_status(s, &req.params)),
        "attendance.markOut" => require_store(state).and_then(|s| mark_out(s, &req.params)),
        "attendance.markIn" => require_store(state).and_then(|s| mark_in(s, &req.params)),
        _ => return None,
    };
    Some(match result {
        Ok(value) => ok(&req.id, value),
        Err(error) => error.response(&req.id),
    })
}
