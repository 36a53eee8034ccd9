use chrono::{DateTime, Utc};
use serde_json::json;

use crate::engine::RuleViolation;
use crate::ipc::error::err;
use crate::ipc::types::AppState;
use crate::model::{self, BathroomLog, SeatAssignment};
use crate::store::Store;

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        HandlerErr {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        Self::new("bad_params", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new("not_found", message)
    }

    pub fn db(code: &'static str, e: anyhow::Error) -> Self {
        Self::new(code, e.to_string())
    }

    pub fn rule(v: RuleViolation) -> Self {
        Self::new(v.code(), v.message())
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

pub fn require_store(state: &mut AppState) -> Result<&mut Store, HandlerErr> {
    state
        .store
        .as_mut()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

pub fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn get_str_array(params: &serde_json::Value, key: &str) -> Result<Vec<String>, HandlerErr> {
    let Some(items) = params.get(key).and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params(format!("missing {}", key)));
    };
    items
        .iter()
        .map(|v| {
            v.as_str()
                .map(|s| s.to_string())
                .ok_or_else(|| HandlerErr::bad_params(format!("{} must contain strings", key)))
        })
        .collect()
}

pub fn get_minutes(
    params: &serde_json::Value,
    key: &str,
    default: i64,
) -> Result<i64, HandlerErr> {
    match params.get(key) {
        None | Some(serde_json::Value::Null) => Ok(default),
        Some(v) => {
            let n = v
                .as_i64()
                .ok_or_else(|| HandlerErr::bad_params(format!("{} must be a number", key)))?;
            if n < 1 {
                return Err(HandlerErr::bad_params(format!("{} must be at least 1", key)));
            }
            Ok(n)
        }
    }
}

/// Optional `now` override (RFC 3339); defaults to the daemon clock. Clients
/// that render against their own tick pass the instant they computed with.
pub fn get_now(params: &serde_json::Value) -> Result<DateTime<Utc>, HandlerErr> {
    match params.get("now").and_then(|v| v.as_str()) {
        None => Ok(Utc::now()),
        Some(raw) => DateTime::parse_from_rfc3339(raw)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|_| HandlerErr::bad_params("now must be an RFC 3339 timestamp")),
    }
}

pub fn load_seat(store: &Store, attendance_id: &str) -> Result<SeatAssignment, HandlerErr> {
    let doc = store
        .get(model::ATTENDANCE, attendance_id)
        .map_err(|e| HandlerErr::db("db_query_failed", e))?
        .ok_or_else(|| HandlerErr::not_found("seat assignment not found"))?;
    serde_json::from_value(doc).map_err(|e| HandlerErr::db("db_query_failed", e.into()))
}

/// The outstanding (`OUT`) bathroom log entries for one seat assignment.
/// By invariant at most one exists, but callers stay safe if more are found.
pub fn open_logs(store: &Store, attendance_id: &str) -> Result<Vec<BathroomLog>, HandlerErr> {
    let docs = store
        .query(
            model::BATHROOM_LOGS,
            &[
                ("attendance_id".to_string(), json!(attendance_id)),
                ("status".to_string(), json!("OUT")),
            ],
        )
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    docs.into_iter()
        .map(|d| serde_json::from_value(d).map_err(|e| HandlerErr::db("db_query_failed", e.into())))
        .collect()
}
