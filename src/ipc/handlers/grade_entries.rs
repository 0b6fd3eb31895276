use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn category_exists(
    conn: &Connection,
    subject_id: &str,
    name: &str,
) -> Result<bool, rusqlite::Error> {
    conn.query_row(
        "SELECT 1 FROM categories WHERE subject_id = ? AND name = ?",
        (subject_id, name),
        |r| r.get::<_, i64>(0),
    )
    .optional()
    .map(|v| v.is_some())
}

fn handle_grade_entries_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "gradeEntries": [] }));
    };

    let subject_id = match req.params.get("subjectId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing subjectId", None),
    };

    let mut stmt = match conn.prepare(
        "SELECT id, name, score, total_points, category
         FROM grade_entries
         WHERE subject_id = ?
         ORDER BY rowid",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([&subject_id], |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            let score: f64 = row.get(2)?;
            let total_points: f64 = row.get(3)?;
            let category: String = row.get(4)?;
            Ok(json!({
                "id": id,
                "name": name,
                "score": score,
                "totalPoints": total_points,
                "category": category
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(entries) => ok(&req.id, json!({ "gradeEntries": entries })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_grade_entries_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let subject_id = match req.params.get("subjectId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing subjectId", None),
    };
    let name = match req.params.get("name").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing name", None),
    };
    if name.is_empty() {
        return err(&req.id, "bad_params", "name must not be empty", None);
    }
    let score = match req.params.get("score").and_then(|v| v.as_f64()) {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "missing score", None),
    };
    let total_points = match req.params.get("totalPoints").and_then(|v| v.as_f64()) {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "missing totalPoints", None),
    };
    if total_points <= 0.0 {
        return err(&req.id, "bad_params", "totalPoints must be positive", None);
    }
    let category = match req.params.get("category").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing category", None),
    };

    match category_exists(conn, &subject_id, &category) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "category not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let entry_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO grade_entries(id, subject_id, name, score, total_points, category)
         VALUES(?, ?, ?, ?, ?, ?)",
        (&entry_id, &subject_id, &name, score, total_points, &category),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "grade_entries" })),
        );
    }

    ok(&req.id, json!({ "gradeEntryId": entry_id }))
}

fn handle_grade_entries_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let entry_id = match req.params.get("gradeEntryId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing gradeEntryId", None),
    };
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "missing/invalid patch", None);
    };

    let subject_id: Option<String> = match conn
        .query_row(
            "SELECT subject_id FROM grade_entries WHERE id = ?",
            [&entry_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(subject_id) = subject_id else {
        return err(&req.id, "not_found", "grade entry not found", None);
    };

    let mut set_parts: Vec<String> = Vec::new();
    let mut bind_values: Vec<Value> = Vec::new();

    if let Some(v) = patch.get("name") {
        let Some(s) = v.as_str() else {
            return err(&req.id, "bad_params", "patch.name must be a string", None);
        };
        let s = s.trim().to_string();
        if s.is_empty() {
            return err(&req.id, "bad_params", "name must not be empty", None);
        }
        set_parts.push("name = ?".into());
        bind_values.push(Value::Text(s));
    }
    if let Some(v) = patch.get("score") {
        let Some(n) = v.as_f64() else {
            return err(&req.id, "bad_params", "patch.score must be a number", None);
        };
        set_parts.push("score = ?".into());
        bind_values.push(Value::Real(n));
    }
    if let Some(v) = patch.get("totalPoints") {
        let Some(n) = v.as_f64() else {
            return err(
                &req.id,
                "bad_params",
                "patch.totalPoints must be a number",
                None,
            );
        };
        if n <= 0.0 {
            return err(&req.id, "bad_params", "totalPoints must be positive", None);
        }
        set_parts.push("total_points = ?".into());
        bind_values.push(Value::Real(n));
    }
    if let Some(v) = patch.get("category") {
        let Some(s) = v.as_str() else {
            return err(&req.id, "bad_params", "patch.category must be a string", None);
        };
        match category_exists(conn, &subject_id, s) {
            Ok(true) => {}
            Ok(false) => return err(&req.id, "not_found", "category not found", None),
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
        set_parts.push("category = ?".into());
        bind_values.push(Value::Text(s.to_string()));
    }

    if set_parts.is_empty() {
        return err(
            &req.id,
            "bad_params",
            "patch must include at least one field",
            None,
        );
    }

    let sql = format!(
        "UPDATE grade_entries SET {} WHERE id = ?",
        set_parts.join(", ")
    );
    bind_values.push(Value::Text(entry_id.clone()));

    let changed = match conn.execute(&sql, params_from_iter(bind_values)) {
        Ok(v) => v,
        Err(e) => {
            return err(
                &req.id,
                "db_update_failed",
                e.to_string(),
                Some(json!({ "table": "grade_entries" })),
            )
        }
    };
    if changed == 0 {
        return err(&req.id, "not_found", "grade entry not found", None);
    }

    ok(&req.id, json!({ "ok": true }))
}

fn handle_grade_entries_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let entry_id = match req.params.get("gradeEntryId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing gradeEntryId", None),
    };

    let changed = match conn.execute("DELETE FROM grade_entries WHERE id = ?", [&entry_id]) {
        Ok(v) => v,
        Err(e) => {
            return err(
                &req.id,
                "db_delete_failed",
                e.to_string(),
                Some(json!({ "table": "grade_entries" })),
            )
        }
    };
    if changed == 0 {
        return err(&req.id, "not_found", "grade entry not found", None);
    }

    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "gradeEntries.list" => Some(handle_grade_entries_list(state, req)),
        "gradeEntries.create" => Some(handle_grade_entries_create(state, req)),
        "gradeEntries.update" => Some(handle_grade_entries_update(state, req)),
        "gradeEntries.delete" => Some(handle_grade_entries_delete(state, req)),
        _ => None,
    }
}
