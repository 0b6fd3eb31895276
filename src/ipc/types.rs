use std::path::PathBuf;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// A running stopwatch. Elapsed time is derived from `started_at` whenever
/// asked, so there is no ticking task to cancel; stop/cancel just clear this.
pub struct ActiveSession {
    pub semester_id: String,
    pub subject: String,
    pub started_at: DateTime<Utc>,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    pub active_session: Option<ActiveSession>,
}
