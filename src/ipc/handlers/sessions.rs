use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn session_row_json(
    id: String,
    subject: String,
    start_time: String,
    end_time: String,
    duration_seconds: i64,
) -> serde_json::Value {
    json!({
        "id": id,
        "subject": subject,
        "startTime": start_time,
        "endTime": end_time,
        "durationSeconds": duration_seconds,
        "durationDisplay": crate::calc::format_hms(duration_seconds)
    })
}

fn handle_sessions_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "sessions": [] }));
    };

    let semester_id = match req.params.get("semesterId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing semesterId", None),
    };

    // Most recent first, matching the shell's history table.
    let mut stmt = match conn.prepare(
        "SELECT id, subject, start_time, end_time, duration_seconds
         FROM sessions
         WHERE semester_id = ?
         ORDER BY start_time DESC, rowid DESC",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([&semester_id], |row| {
            Ok(session_row_json(
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                row.get(3)?,
                row.get(4)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(sessions) => ok(&req.id, json!({ "sessions": sessions })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

struct SessionInput {
    subject: String,
    start_time: String,
    end_time: String,
    duration_seconds: i64,
}

fn parse_session_input(params: &serde_json::Value) -> Result<SessionInput, String> {
    let subject = params
        .get("subject")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .ok_or("missing subject")?;
    if subject.is_empty() {
        return Err("subject must not be empty".to_string());
    }

    let start_time = params
        .get("startTime")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or("missing startTime")?;
    let end_time = params
        .get("endTime")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or("missing endTime")?;

    if chrono::DateTime::parse_from_rfc3339(&start_time).is_err() {
        return Err("startTime must be an RFC 3339 timestamp".to_string());
    }
    if chrono::DateTime::parse_from_rfc3339(&end_time).is_err() {
        return Err("endTime must be an RFC 3339 timestamp".to_string());
    }

    // Duration is always re-derived from the bounds; callers never supply it.
    let duration_seconds = db::duration_seconds_between(&start_time, &end_time)
        .ok_or("endTime must be after startTime")?;

    Ok(SessionInput {
        subject,
        start_time,
        end_time,
        duration_seconds,
    })
}

fn handle_sessions_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let semester_id = match req.params.get("semesterId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing semesterId", None),
    };
    let input = match parse_session_input(&req.params) {
        Ok(v) => v,
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    };

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

    let session_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO sessions(id, semester_id, subject, start_time, end_time, duration_seconds)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &session_id,
            &semester_id,
            &input.subject,
            &input.start_time,
            &input.end_time,
            input.duration_seconds,
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "sessions" })),
        );
    }

    ok(
        &req.id,
        json!({
            "sessionId": session_id,
            "durationSeconds": input.duration_seconds
        }),
    )
}

fn handle_sessions_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let session_id = match req.params.get("sessionId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing sessionId", None),
    };
    let input = match parse_session_input(&req.params) {
        Ok(v) => v,
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    };

    let changed = match conn.execute(
        "UPDATE sessions
         SET subject = ?, start_time = ?, end_time = ?, duration_seconds = ?
         WHERE id = ?",
        (
            &input.subject,
            &input.start_time,
            &input.end_time,
            input.duration_seconds,
            &session_id,
        ),
    ) {
        Ok(v) => v,
        Err(e) => {
            return err(
                &req.id,
                "db_update_failed",
                e.to_string(),
                Some(json!({ "table": "sessions" })),
            )
        }
    };
    if changed == 0 {
        return err(&req.id, "not_found", "session not found", None);
    }

    ok(
        &req.id,
        json!({ "ok": true, "durationSeconds": input.duration_seconds }),
    )
}

fn handle_sessions_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let session_id = match req.params.get("sessionId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing sessionId", None),
    };

    let changed = match conn.execute("DELETE FROM sessions WHERE id = ?", [&session_id]) {
        Ok(v) => v,
        Err(e) => {
            return err(
                &req.id,
                "db_delete_failed",
                e.to_string(),
                Some(json!({ "table": "sessions" })),
            )
        }
    };
    if changed == 0 {
        return err(&req.id, "not_found", "session not found", None);
    }

    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "sessions.list" => Some(handle_sessions_list(state, req)),
        "sessions.create" => Some(handle_sessions_create(state, req)),
        "sessions.update" => Some(handle_sessions_update(state, req)),
        "sessions.delete" => Some(handle_sessions_delete(state, req)),
        _ => None,
    }
}
