use serde_json::json;

use crate::ipc::error::ok;
use crate::ipc::helpers::{get_required_str, require_store, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::store::Store;

/// Registers a live query on a collection, optionally narrowed by field
/// equality filters (`where`: flat object). The first poll delivers the
/// current snapshot as `added` events.
fn subscribe(store: &mut Store, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let collection = get_required_str(params, "collection")?;
    let filters = match params.get("where") {
        None | Some(serde_json::Value::Null) => Vec::new(),
        Some(serde_json::Value::Object(map)) => map
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
        Some(_) => return Err(HandlerErr::bad_params("where must be an object")),
    };
    let watch_id = store
        .subscribe(&collection, filters)
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    Ok(json!({ "watchId": watch_id }))
}

fn poll(store: &mut Store, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let watch_id = get_required_str(params, "watchId")?;
    match store.poll(&watch_id) {
        Some(events) => Ok(json!({ "events": events })),
        None => Err(HandlerErr::not_found("unknown watchId")),
    }
}

fn unsubscribe(store: &mut Store, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let watch_id = get_required_str(params, "watchId")?;
    Ok(json!({ "removed": store.unsubscribe(&watch_id) }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "watch.subscribe" => require_store(state).and_then(|s| subscribe(s, &req.params)),
        "watch.poll" => require_store(state).and_then(|s| poll(s, &req.params)),
        "watch.unsubscribe" => require_store(state).and_then(|s| unsubscribe(s, &req.params)),
        _ => return None,
    };
    Some(match result {
        Ok(value) => ok(&req.id, value),
        Err(error) => error.response(&req.id),
    })
}
