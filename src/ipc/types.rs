use std::path::PathBuf;

use serde::Deserialize;

use crate::engine::MonitorSession;
use crate::store::Store;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub store: Option<Store>,
    pub monitor: Option<MonitorSession>,
}

impl AppState {
    pub fn new() -> Self {
        AppState {
            workspace: None,
            store: None,
            monitor: None,
        }
    }
}
