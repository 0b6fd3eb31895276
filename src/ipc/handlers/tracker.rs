use crate::calc;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{ActiveSession, AppState, Request};
use chrono::{SecondsFormat, Utc};
use rusqlite::OptionalExtension;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

fn handle_tracker_start(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    if state.active_session.is_some() {
        return err(
            &req.id,
            "already_studying",
            "a study session is already running",
            None,
        );
    }

    let semester_id = match req.params.get("semesterId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing semesterId", None),
    };
    let subject = match req.params.get("subject").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing subject", None),
    };
    if subject.is_empty() {
        return err(&req.id, "bad_params", "subject must not be empty", None);
    }

    let semester: Option<i64> = match conn
        .query_row(
            "SELECT 1 FROM semesters WHERE id = ?",
            [&semester_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if semester.is_none() {
        return err(&req.id, "not_found", "semester not found", None);
    }

    let started_at = Utc::now();
    info!(subject = %subject, "stopwatch started");
    state.active_session = Some(ActiveSession {
        semester_id,
        subject,
        started_at,
    });

    ok(
        &req.id,
        json!({ "startedAt": started_at.to_rfc3339_opts(SecondsFormat::Millis, true) }),
    )
}

fn handle_tracker_elapsed(state: &mut AppState, req: &Request) -> serde_json::Value {
    // Elapsed time is derived, not ticked: the shell polls this instead of
    // running its own repeating timer, so nothing can outlive the stopwatch.
    let Some(active) = state.active_session.as_ref() else {
        return ok(&req.id, json!({ "studying": false }));
    };

    let elapsed_seconds = (Utc::now() - active.started_at).num_seconds().max(0);
    ok(
        &req.id,
        json!({
            "studying": true,
            "subject": active.subject,
            "elapsedSeconds": elapsed_seconds,
            "elapsedDisplay": calc::format_hms(elapsed_seconds)
        }),
    )
}

fn handle_tracker_stop(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(active) = state.active_session.as_ref() else {
        return err(&req.id, "not_studying", "no study session is running", None);
    };
    let semester_id = active.semester_id.clone();
    let subject = active.subject.clone();
    let started_at = active.started_at;

    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let ended_at = Utc::now();
    let duration_seconds = (ended_at.timestamp_millis() - started_at.timestamp_millis())
        .div_euclid(1000)
        .max(0);

    let start_time = started_at.to_rfc3339_opts(SecondsFormat::Millis, true);
    let end_time = ended_at.to_rfc3339_opts(SecondsFormat::Millis, true);

    let session_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO sessions(id, semester_id, subject, start_time, end_time, duration_seconds)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &session_id,
            &semester_id,
            &subject,
            &start_time,
            &end_time,
            duration_seconds,
        ),
    ) {
        // The stopwatch keeps running so the time is not lost; the shell can
        // retry the stop.
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "sessions" })),
        );
    }

    info!(subject = %subject, duration_seconds, "stopwatch stopped");
    state.active_session = None;

    ok(
        &req.id,
        json!({
            "sessionId": session_id,
            "subject": subject,
            "startTime": start_time,
            "endTime": end_time,
            "durationSeconds": duration_seconds
        }),
    )
}

fn handle_tracker_cancel(state: &mut AppState, req: &Request) -> serde_json::Value {
    let was_studying = state.active_session.take().is_some();
    ok(&req.id, json!({ "cancelled": was_studying }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "tracker.start" => Some(handle_tracker_start(state, req)),
        "tracker.elapsed" => Some(handle_tracker_elapsed(state, req)),
        "tracker.stop" => Some(handle_tracker_stop(state, req)),
        "tracker.cancel" => Some(handle_tracker_cancel(state, req)),
        _ => None,
    }
}
