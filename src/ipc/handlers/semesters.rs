use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn handle_semesters_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "semesters": [] }));
    };

    let include_archived = req
        .params
        .get("includeArchived")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    let sql = if include_archived {
        "SELECT id, name, archived FROM semesters ORDER BY rowid"
    } else {
        "SELECT id, name, archived FROM semesters WHERE archived = 0 ORDER BY rowid"
    };

    let mut stmt = match conn.prepare(sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            let archived: i64 = row.get(2)?;
            Ok(json!({
                "id": id,
                "name": name,
                "archived": archived != 0
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(semesters) => ok(&req.id, json!({ "semesters": semesters })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_semesters_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let name = match req.params.get("name").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing name", None),
    };
    if name.is_empty() {
        return err(&req.id, "bad_params", "name must not be empty", None);
    }

    let semester_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO semesters(id, name, archived) VALUES(?, ?, 0)",
        (&semester_id, &name),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "semesters" })),
        );
    }

    ok(&req.id, json!({ "semesterId": semester_id, "name": name }))
}

fn handle_semesters_rename(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let semester_id = match req.params.get("semesterId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing semesterId", None),
    };
    let name = match req.params.get("name").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing name", None),
    };
    if name.is_empty() {
        return err(&req.id, "bad_params", "name must not be empty", None);
    }

    let changed = match conn.execute(
        "UPDATE semesters SET name = ? WHERE id = ?",
        (&name, &semester_id),
    ) {
        Ok(v) => v,
        Err(e) => {
            return err(
                &req.id,
                "db_update_failed",
                e.to_string(),
                Some(json!({ "table": "semesters" })),
            )
        }
    };
    if changed == 0 {
        return err(&req.id, "not_found", "semester not found", None);
    }

    ok(&req.id, json!({ "ok": true }))
}

fn handle_semesters_set_archived(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let semester_id = match req.params.get("semesterId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing semesterId", None),
    };
    let archived = match req.params.get("archived").and_then(|v| v.as_bool()) {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "missing archived", None),
    };

    let changed = match conn.execute(
        "UPDATE semesters SET archived = ? WHERE id = ?",
        (archived as i64, &semester_id),
    ) {
        Ok(v) => v,
        Err(e) => {
            return err(
                &req.id,
                "db_update_failed",
                e.to_string(),
                Some(json!({ "table": "semesters" })),
            )
        }
    };
    if changed == 0 {
        return err(&req.id, "not_found", "semester not found", None);
    }

    ok(&req.id, json!({ "ok": true }))
}

fn handle_semesters_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let semester_id = match req.params.get("semesterId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing semesterId", None),
    };

    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM semesters WHERE id = ?", [&semester_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "semester not found", None);
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    // Explicitly delete in dependency order (no ON DELETE CASCADE).
    if let Err(e) = tx.execute(
        "DELETE FROM assessments
         WHERE subject_id IN (SELECT id FROM subjects WHERE semester_id = ?)",
        [&semester_id],
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "assessments" })),
        );
    }

    if let Err(e) = tx.execute(
        "DELETE FROM grade_entries
         WHERE subject_id IN (SELECT id FROM subjects WHERE semester_id = ?)",
        [&semester_id],
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "grade_entries" })),
        );
    }

    if let Err(e) = tx.execute(
        "DELETE FROM categories
         WHERE subject_id IN (SELECT id FROM subjects WHERE semester_id = ?)",
        [&semester_id],
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "categories" })),
        );
    }

    if let Err(e) = tx.execute("DELETE FROM sessions WHERE semester_id = ?", [&semester_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "sessions" })),
        );
    }

    if let Err(e) = tx.execute("DELETE FROM subjects WHERE semester_id = ?", [&semester_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "subjects" })),
        );
    }

    if let Err(e) = tx.execute("DELETE FROM semesters WHERE id = ?", [&semester_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "semesters" })),
        );
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    // Drop a stopwatch that was running against the deleted semester.
    if state
        .active_session
        .as_ref()
        .map(|s| s.semester_id == semester_id)
        .unwrap_or(false)
    {
        state.active_session = None;
    }

    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "semesters.list" => Some(handle_semesters_list(state, req)),
        "semesters.create" => Some(handle_semesters_create(state, req)),
        "semesters.rename" => Some(handle_semesters_rename(state, req)),
        "semesters.setArchived" => Some(handle_semesters_set_archived(state, req)),
        "semesters.delete" => Some(handle_semesters_delete(state, req)),
        _ => None,
    }
}
