use serde_json::json;

use crate::ipc::error::ok;
use crate::ipc::helpers::{get_required_str, require_store, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::model::{self, LecturerProfile, StudentProfile};
use crate::store::Store;

fn student_upsert(store: &mut Store, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let profile = StudentProfile {
        matric_no: get_required_str(params, "matricNo")?,
        name: get_required_str(params, "name")?,
        program: get_required_str(params, "program")?,
    };
    if profile.matric_no.is_empty() || profile.name.is_empty() {
        return Err(HandlerErr::bad_params("matricNo and name are required"));
    }
    let body =
        serde_json::to_value(&profile).map_err(|e| HandlerErr::db("db_update_failed", e.into()))?;
    store
        .put(model::STUDENTS, &profile.matric_no, body)
        .map_err(|e| HandlerErr::db("db_update_failed", e))?;
    Ok(json!({ "matricNo": profile.matric_no }))
}

fn lecturer_upsert(
    store: &mut Store,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let profile = LecturerProfile {
        lecturer_id: get_required_str(params, "lecturerId")?,
        name: get_required_str(params, "name")?,
        email: get_required_str(params, "email")?,
        department: get_required_str(params, "department")?,
    };
    if profile.lecturer_id.is_empty() || profile.name.is_empty() {
        return Err(HandlerErr::bad_params("lecturerId and name are required"));
    }
    let body =
        serde_json::to_value(&profile).map_err(|e| HandlerErr::db("db_update_failed", e.into()))?;
    store
        .put(model::LECTURERS, &profile.lecturer_id, body)
        .map_err(|e| HandlerErr::db("db_update_failed", e))?;
    Ok(json!({ "lecturerId": profile.lecturer_id }))
}

fn student_list(store: &Store) -> Result<serde_json::Value, HandlerErr> {
    let docs = store
        .query(model::STUDENTS, &[])
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let mut students: Vec<StudentProfile> = docs
        .into_iter()
        .map(|d| serde_json::from_value(d).map_err(|e| HandlerErr::db("db_query_failed", e.into())))
        .collect::<Result<_, _>>()?;
    students.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.matric_no.cmp(&b.matric_no)));
    let rows: Vec<_> = students
        .iter()
        .map(|s| {
            json!({
                "matricNo": s.matric_no,
                "name": s.name,
                "program": s.program,
            })
        })
        .collect();
    Ok(json!({ "students": rows }))
}

fn lecturer_list(store: &Store) -> Result<serde_json::Value, HandlerErr> {
    let docs = store
        .query(model::LECTURERS, &[])
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let mut lecturers: Vec<LecturerProfile> = docs
        .into_iter()
        .map(|d| serde_json::from_value(d).map_err(|e| HandlerErr::db("db_query_failed", e.into())))
        .collect::<Result<_, _>>()?;
    lecturers.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.lecturer_id.cmp(&b.lecturer_id)));
    let rows: Vec<_> = lecturers
        .iter()
        .map(|l| {
            json!({
                "lecturerId": l.lecturer_id,
                "name": l.name,
                "email": l.email,
                "department": l.department,
            })
        })
        .collect();
    Ok(json!({ "lecturers": rows }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "student.upsert" => require_store(state).and_then(|s| student_upsert(s, &req.params)),
        "student.list" => require_store(state).and_then(|s| student_list(s)),
        "lecturer.upsert" => require_store(state).and_then(|s| lecturer_upsert(s, &req.params)),
        "lecturer.list" => require_store(state).and_then(|s| lecturer_list(s)),
        _ => return None,
    };
    Some(match result {
        Ok(value) => ok(&req.id, value),
        Err(error) => error.response(&req.id),
    })
}
