use std::collections::HashSet;

use chrono::Utc;
use serde_json::json;

use crate::engine;
use crate::ipc::error::ok;
use crate::ipc::helpers::{get_required_str, get_str_array, require_store, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::keys::{InvigilationKey, SeatKey};
use crate::model::{self, InvigilationAssignment, SeatAssignment, SeatStatus};
use crate::store::{Store, WriteOp};

fn require_exam(store: &Store, exam_id: &str) -> Result<(), HandlerErr> {
    store
        .get(model::EXAMS, exam_id)
        .map_err(|e| HandlerErr::db("db_query_failed", e))?
        .map(|_| ())
        .ok_or_else(|| HandlerErr::not_found("exam not found"))
}

fn existing_ids(store: &Store, collection: &str, exam_id: &str) -> Result<Vec<String>, HandlerErr> {
    let docs = store
        .query(collection, &[("exam_id".to_string(), json!(exam_id))])
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    Ok(docs
        .into_iter()
        .filter_map(|d| {
            d.get("attendance_id")
                .or_else(|| d.get("invigilation_id"))
                .and_then(|v| v.as_str())
                .map(|s| s.to_string())
        })
        .collect())
}

fn dedupe(ids: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    ids.into_iter().filter(|id| seen.insert(id.clone())).collect()
}

/// Full replace of the exam's seat assignments: every existing seat is
/// deleted and the new selection gets table numbers 1..N by name order, all
/// in one commit. Bathroom logs of removed seats are deliberately left
/// behind (non-cascading, matching the upstream system).
fn assign_students(store: &mut Store, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let exam_id = get_required_str(params, "examId")?;
    let matric_nos = dedupe(get_str_array(params, "matricNos")?);
    require_exam(store, &exam_id)?;

    let mut roster = Vec::with_capacity(matric_nos.len());
    for matric_no in &matric_nos {
        SeatKey::new(&exam_id, matric_no).map_err(|e| HandlerErr::bad_params(e.to_string()))?;
        let name = store
            .get(model::STUDENTS, matric_no)
            .map_err(|e| HandlerErr::db("db_query_failed", e))?
            .and_then(|doc| doc.get("name").and_then(|v| v.as_str()).map(str::to_string))
            .unwrap_or_else(|| "Unknown".to_string());
        roster.push((matric_no.clone(), name));
    }
    let numbered = engine::assign_seat_numbers(roster);

    let mut ops: Vec<WriteOp> = existing_ids(store, model::ATTENDANCE, &exam_id)?
        .into_iter()
        .map(|id| WriteOp::Delete {
            collection: model::ATTENDANCE.to_string(),
            id,
        })
        .collect();
    for (matric_no, student_name, table_no) in &numbered {
        let key = SeatKey::new(&exam_id, matric_no)
            .map_err(|e| HandlerErr::bad_params(e.to_string()))?;
        let seat = SeatAssignment {
            attendance_id: key.to_string(),
            exam_id: exam_id.clone(),
            matric_no: matric_no.clone(),
            student_name: student_name.clone(),
            table_no: table_no.to_string(),
            status: SeatStatus::Pending,
            timestamp: None,
        };
        let body = serde_json::to_value(&seat)
            .map_err(|e| HandlerErr::db("db_update_failed", e.into()))?;
        ops.push(WriteOp::Put {
            collection: model::ATTENDANCE.to_string(),
            id: seat.attendance_id.clone(),
            body,
        });
    }
    store
        .atomic_batch(ops)
        .map_err(|e| HandlerErr::db("db_tx_failed", e))?;
    Ok(json!({ "examId": exam_id, "assigned": numbered.len() }))
}

/// Full replace of the exam's invigilator set in one commit.
fn assign_invigilators(
    store: &mut Store,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let exam_id = get_required_str(params, "examId")?;
    let lecturer_ids = dedupe(get_str_array(params, "lecturerIds")?);
    require_exam(store, &exam_id)?;

    let now = Utc::now();
    let mut ops: Vec<WriteOp> = existing_ids(store, model::INVIGILATIONS, &exam_id)?
        .into_iter()
        .map(|id| WriteOp::Delete {
            collection: model::INVIGILATIONS.to_string(),
            id,
        })
        .collect();
    for lecturer_id in &lecturer_ids {
        let key = InvigilationKey::new(&exam_id, lecturer_id)
            .map_err(|e| HandlerErr::bad_params(e.to_string()))?;
        let assignment = InvigilationAssignment {
            invigilation_id: key.to_string(),
            exam_id: exam_id.clone(),
            lecturer_id: lecturer_id.clone(),
            timestamp: now,
        };
        let body = serde_json::to_value(&assignment)
            .map_err(|e| HandlerErr::db("db_update_failed", e.into()))?;
        ops.push(WriteOp::Put {
            collection: model::INVIGILATIONS.to_string(),
            id: assignment.invigilation_id.clone(),
            body,
        });
    }
    store
        .atomic_batch(ops)
        .map_err(|e| HandlerErr::db("db_tx_failed", e))?;
    Ok(json!({ "examId": exam_id, "assigned": lecturer_ids.len() }))
}

fn invigilators(store: &Store, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let exam_id = get_required_str(params, "examId")?;
    require_exam(store, &exam_id)?;
    let docs = store
        .query(
            model::INVIGILATIONS,
            &[("exam_id".to_string(), json!(exam_id))],
        )
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;

    let mut rows = Vec::new();
    for doc in docs {
        let Some(lecturer_id) = doc.get("lecturer_id").and_then(|v| v.as_str()) else {
            continue;
        };
        let profile = store
            .get(model::LECTURERS, lecturer_id)
            .map_err(|e| HandlerErr::db("db_query_failed", e))?;
        rows.push(json!({
            "lecturerId": lecturer_id,
            "name": profile
                .as_ref()
                .and_then(|p| p.get("name").and_then(|v| v.as_str()))
                .unwrap_or("Unknown"),
            "department": profile
                .as_ref()
                .and_then(|p| p.get("department").and_then(|v| v.as_str()))
                .unwrap_or(""),
        }));
    }
    rows.sort_by(|a, b| {
        let key_a = (a["name"].as_str().unwrap_or("").to_string(), a["lecturerId"].as_str().unwrap_or("").to_string());
        let key_b = (b["name"].as_str().unwrap_or("").to_string(), b["lecturerId"].as_str().unwrap_or("").to_string());
        key_a.cmp(&key_b)
    });
    Ok(json!({ "invigilators": rows }))
}

fn table_sort_key(table_no: &str) -> (u32, String) {
    (
        table_no.parse::<u32>().unwrap_or(u32::MAX),
        table_no.to_string(),
    )
}

/// The live seat grid: every assignment joined with the student profile,
/// plus `isOut` from the bathroom log. Status and open-log presence are two
/// distinct facts and both are reported.
fn seating(store: &Store, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let exam_id = get_required_str(params, "examId")?;
    require_exam(store, &exam_id)?;
    let docs = store
        .query(model::ATTENDANCE, &[("exam_id".to_string(), json!(exam_id))])
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let out_docs = store
        .query(model::BATHROOM_LOGS, &[("status".to_string(), json!("OUT"))])
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let out_ids: HashSet<String> = out_docs
        .into_iter()
        .filter_map(|d| {
            d.get("attendance_id")
                .and_then(|v| v.as_str())
                .map(str::to_string)
        })
        .collect();

    let mut seats: Vec<SeatAssignment> = docs
        .into_iter()
        .map(|d| serde_json::from_value(d).map_err(|e| HandlerErr::db("db_query_failed", e.into())))
        .collect::<Result<_, _>>()?;
    seats.sort_by(|a, b| table_sort_key(&a.table_no).cmp(&table_sort_key(&b.table_no)));

    let mut rows = Vec::with_capacity(seats.len());
    for seat in &seats {
        let profile = store
            .get(model::STUDENTS, &seat.matric_no)
            .map_err(|e| HandlerErr::db("db_query_failed", e))?;
        rows.push(json!({
            "attendanceId": seat.attendance_id,
            "matricNo": seat.matric_no,
            "name": profile
                .as_ref()
                .and_then(|p| p.get("name").and_then(|v| v.as_str()))
                .unwrap_or(&seat.student_name),
            "program": profile
                .as_ref()
                .and_then(|p| p.get("program").and_then(|v| v.as_str()))
                .unwrap_or(""),
            "tableNo": seat.table_no,
            "status": seat.status,
            "timestamp": seat.timestamp,
            "isOut": out_ids.contains(&seat.attendance_id),
        }));
    }
    Ok(json!({ "examId": exam_id, "seats": rows }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "roster.assignStudents" => {
            require_store(state).and_then(|s| assign_students(s, &req.params))
        }
        "roster.assignInvigilators" => {
            require_store(state).and_then(|s| assign_invigilators(s, &req.params))
        }
        "roster.invigilators" => require_store(state).and_then(|s| invigilators(s, &req.params)),
        "roster.seating" => require_store(state).and_then(|s| seating(s, &req.params)),
        _ => return None,
    };
    Some(match result {
        Ok(value) => ok(&req.id, value),
        Err(error) => error.response(&req.id),
    })
}
