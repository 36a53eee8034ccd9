use chrono::Utc;
use serde_json::json;

use crate::ipc::error::ok;
use crate::ipc::helpers::{get_required_str, require_store, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::keys::DELIM;
use crate::model::{self, Exam};
use crate::store::Store;

fn exam_row(exam: &Exam) -> serde_json::Value {
    json!({
        "examId": exam.exam_id,
        "subject": exam.subject,
        "date": exam.date,
        "startTime": exam.start_time,
        "endTime": exam.end_time,
        "location": exam.location,
        "isComplete": exam.is_complete(),
        "createdAt": exam.created_at,
    })
}

fn load_exam(store: &Store, exam_id: &str) -> Result<Exam, HandlerErr> {
    let doc = store
        .get(model::EXAMS, exam_id)
        .map_err(|e| HandlerErr::db("db_query_failed", e))?
        .ok_or_else(|| HandlerErr::not_found("exam not found"))?;
    serde_json::from_value(doc).map_err(|e| HandlerErr::db("db_query_failed", e.into()))
}

fn all_exams(store: &Store) -> Result<Vec<Exam>, HandlerErr> {
    let docs = store
        .query(model::EXAMS, &[])
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    docs.into_iter()
        .map(|d| serde_json::from_value(d).map_err(|e| HandlerErr::db("db_query_failed", e.into())))
        .collect()
}

fn exam_create(store: &mut Store, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let exam_id = get_required_str(params, "examId")?;
    let subject = get_required_str(params, "subject")?;
    if exam_id.is_empty() || subject.is_empty() {
        return Err(HandlerErr::bad_params("examId and subject are required"));
    }
    // Exam ids lead every composite key, so the delimiter is reserved.
    if exam_id.contains(DELIM) {
        return Err(HandlerErr::bad_params(format!(
            "examId must not contain {DELIM:?}"
        )));
    }
    let existing = store
        .get(model::EXAMS, &exam_id)
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    if existing.is_some() {
        return Err(HandlerErr::new("duplicate", "exam already exists"));
    }

    let exam = Exam {
        exam_id: exam_id.clone(),
        subject,
        date: None,
        start_time: None,
        end_time: None,
        location: None,
        created_at: Utc::now(),
    };
    let body = serde_json::to_value(&exam).map_err(|e| HandlerErr::db("db_update_failed", e.into()))?;
    store
        .put(model::EXAMS, &exam_id, body)
        .map_err(|e| HandlerErr::db("db_update_failed", e))?;
    Ok(exam_row(&exam))
}

fn exam_update_details(
    store: &mut Store,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let exam_id = get_required_str(params, "examId")?;
    load_exam(store, &exam_id)?;

    let mut patch = serde_json::Map::new();
    for (param, field) in [
        ("date", "date"),
        ("startTime", "start_time"),
        ("endTime", "end_time"),
        ("location", "location"),
    ] {
        match params.get(param) {
            None => {}
            Some(serde_json::Value::Null) => {
                patch.insert(field.to_string(), serde_json::Value::Null);
            }
            Some(serde_json::Value::String(s)) => {
                patch.insert(field.to_string(), json!(s));
            }
            Some(_) => {
                return Err(HandlerErr::bad_params(format!(
                    "{} must be a string or null",
                    param
                )))
            }
        }
    }
    if patch.is_empty() {
        return Err(HandlerErr::bad_params("no schedule fields to update"));
    }

    store
        .update(model::EXAMS, &exam_id, serde_json::Value::Object(patch))
        .map_err(|e| HandlerErr::db("db_update_failed", e))?;
    let exam = load_exam(store, &exam_id)?;
    Ok(exam_row(&exam))
}

fn exam_delete(store: &mut Store, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let exam_id = get_required_str(params, "examId")?;
    load_exam(store, &exam_id)?;
    // Seat assignments and bathroom logs are intentionally left in place;
    // removal is scoped to the exam record itself.
    store
        .delete(model::EXAMS, &exam_id)
        .map_err(|e| HandlerErr::db("db_update_failed", e))?;
    Ok(json!({ "deleted": exam_id }))
}

fn exam_list(store: &Store) -> Result<serde_json::Value, HandlerErr> {
    let mut exams = all_exams(store)?;
    // Incomplete exams first so staff sees what still needs scheduling.
    exams.sort_by(|a, b| {
        a.is_complete()
            .cmp(&b.is_complete())
            .then_with(|| a.exam_id.cmp(&b.exam_id))
    });
    Ok(json!({ "exams": exams.iter().map(exam_row).collect::<Vec<_>>() }))
}

fn by_date_then_id(a: &Exam, b: &Exam) -> std::cmp::Ordering {
    match (&a.date, &b.date) {
        (Some(da), Some(db)) => da.cmp(db).then_with(|| a.exam_id.cmp(&b.exam_id)),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => a.exam_id.cmp(&b.exam_id),
    }
}

fn exam_list_for_lecturer(
    store: &Store,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let lecturer_id = get_required_str(params, "lecturerId")?;
    let assignments = store
        .query(
            model::INVIGILATIONS,
            &[("lecturer_id".to_string(), json!(lecturer_id))],
        )
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;

    let mut exams = Vec::new();
    for doc in assignments {
        let Some(exam_id) = doc.get("exam_id").and_then(|v| v.as_str()) else {
            continue;
        };
        // Assignments pointing at a deleted exam are skipped, not errors.
        if let Some(exam_doc) = store
            .get(model::EXAMS, exam_id)
            .map_err(|e| HandlerErr::db("db_query_failed", e))?
        {
            let exam: Exam = serde_json::from_value(exam_doc)
                .map_err(|e| HandlerErr::db("db_query_failed", e.into()))?;
            exams.push(exam);
        }
    }
    exams.sort_by(by_date_then_id);
    Ok(json!({ "exams": exams.iter().map(exam_row).collect::<Vec<_>>() }))
}

fn exam_list_for_student(
    store: &Store,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let matric_no = get_required_str(params, "matricNo")?;
    let seats = store
        .query(
            model::ATTENDANCE,
            &[("matric_no".to_string(), json!(matric_no))],
        )
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;

    let mut rows = Vec::new();
    for seat in seats {
        let Some(exam_id) = seat.get("exam_id").and_then(|v| v.as_str()) else {
            continue;
        };
        if let Some(exam_doc) = store
            .get(model::EXAMS, exam_id)
            .map_err(|e| HandlerErr::db("db_query_failed", e))?
        {
            let exam: Exam = serde_json::from_value(exam_doc)
                .map_err(|e| HandlerErr::db("db_query_failed", e.into()))?;
            let mut row = exam_row(&exam);
            row["tableNo"] = seat.get("table_no").cloned().unwrap_or(serde_json::Value::Null);
            rows.push((exam, row));
        }
    }
    rows.sort_by(|(a, _), (b, _)| by_date_then_id(a, b));
    Ok(json!({ "exams": rows.into_iter().map(|(_, row)| row).collect::<Vec<_>>() }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "exam.create" => require_store(state).and_then(|s| exam_create(s, &req.params)),
        "exam.updateDetails" => require_store(state).and_then(|s| exam_update_details(s, &req.params)),
        "exam.delete" => require_store(state).and_then(|s| exam_delete(s, &req.params)),
        "exam.list" => require_store(state).and_then(|s| exam_list(s)),
        "exam.listForLecturer" => {
            require_store(state).and_then(|s| exam_list_for_lecturer(s, &req.params))
        }
        "exam.listForStudent" => {
            require_store(state).and_then(|s| exam_list_for_student(s, &req.params))
        }
        _ => return None,
    };
    Some(match result {
        Ok(value) => ok(&req.id, value),
        Err(error) => error.response(&req.id),
    })
}
