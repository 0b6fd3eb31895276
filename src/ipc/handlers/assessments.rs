use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use chrono::{NaiveDate, Utc};
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

fn valid_date(s: &str) -> bool {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()
}

/// Grades arrive as numbers or numeric strings and are stored as a
/// one-decimal percentage string; anything unparsable becomes `"0.0"`.
fn normalize_grade(raw: Option<&serde_json::Value>) -> String {
    let parsed = match raw {
        Some(v) if v.is_null() => None,
        Some(v) => v
            .as_f64()
            .or_else(|| v.as_str().and_then(|s| s.trim().parse::<f64>().ok())),
        None => None,
    };
    match parsed {
        Some(n) => format!("{:.1}", n),
        None => "0.0".to_string(),
    }
}

fn handle_assessments_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "assessments": [] }));
    };

    let subject_id = match req.params.get("subjectId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing subjectId", None),
    };

    let mut stmt = match conn.prepare(
        "SELECT id, name, category_name, date, grade
         FROM assessments
         WHERE subject_id = ?
         ORDER BY date, rowid",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([&subject_id], |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            let category: String = row.get(2)?;
            let date: String = row.get(3)?;
            let grade: String = row.get(4)?;
            Ok(json!({
                "id": id,
                "name": name,
                "category": category,
                "date": date,
                "grade": grade
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(assessments) => ok(&req.id, json!({ "assessments": assessments })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_assessments_create(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let category = match req.params.get("category").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing category", None),
    };
    let date = match req.params.get("date").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing date", None),
    };
    if !valid_date(&date) {
        return err(&req.id, "bad_params", "date must be YYYY-MM-DD", None);
    }

    match category_exists(conn, &subject_id, &category) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "category not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let grade = normalize_grade(req.params.get("grade"));

    let assessment_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO assessments(id, subject_id, name, category_name, date, grade)
         VALUES(?, ?, ?, ?, ?, ?)",
        (&assessment_id, &subject_id, &name, &category, &date, &grade),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "assessments" })),
        );
    }

    ok(
        &req.id,
        json!({ "assessmentId": assessment_id, "grade": grade }),
    )
}

/// Quick-add from a raw score/total pair: the grade becomes a percentage and
/// the date becomes today, so the entry shows up in analytics immediately.
fn handle_assessments_create_from_points(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let category = match req.params.get("category").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing category", None),
    };
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

    match category_exists(conn, &subject_id, &category) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "category not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let grade = format!("{:.1}", (score / total_points) * 100.0);
    let date = Utc::now().date_naive().format("%Y-%m-%d").to_string();

    let assessment_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO assessments(id, subject_id, name, category_name, date, grade)
         VALUES(?, ?, ?, ?, ?, ?)",
        (&assessment_id, &subject_id, &name, &category, &date, &grade),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "assessments" })),
        );
    }

    ok(
        &req.id,
        json!({ "assessmentId": assessment_id, "date": date, "grade": grade }),
    )
}

fn handle_assessments_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let assessment_id = match req.params.get("assessmentId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing assessmentId", None),
    };
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "missing/invalid patch", None);
    };

    let subject_id: Option<String> = match conn
        .query_row(
            "SELECT subject_id FROM assessments WHERE id = ?",
            [&assessment_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(subject_id) = subject_id else {
        return err(&req.id, "not_found", "assessment not found", None);
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
    if let Some(v) = patch.get("category") {
        let Some(s) = v.as_str() else {
            return err(&req.id, "bad_params", "patch.category must be a string", None);
        };
        match category_exists(conn, &subject_id, s) {
            Ok(true) => {}
            Ok(false) => return err(&req.id, "not_found", "category not found", None),
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
        set_parts.push("category_name = ?".into());
        bind_values.push(Value::Text(s.to_string()));
    }
    if let Some(v) = patch.get("date") {
        let Some(s) = v.as_str() else {
            return err(&req.id, "bad_params", "patch.date must be a string", None);
        };
        if !valid_date(s) {
            return err(&req.id, "bad_params", "date must be YYYY-MM-DD", None);
        }
        set_parts.push("date = ?".into());
        bind_values.push(Value::Text(s.to_string()));
    }
    if let Some(v) = patch.get("grade") {
        set_parts.push("grade = ?".into());
        bind_values.push(Value::Text(normalize_grade(Some(v))));
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
        "UPDATE assessments SET {} WHERE id = ?",
        set_parts.join(", ")
    );
    bind_values.push(Value::Text(assessment_id.clone()));

    let changed = match conn.execute(&sql, params_from_iter(bind_values)) {
        Ok(v) => v,
        Err(e) => {
            return err(
                &req.id,
                "db_update_failed",
                e.to_string(),
                Some(json!({ "table": "assessments" })),
            )
        }
    };
    if changed == 0 {
        return err(&req.id, "not_found", "assessment not found", None);
    }

    ok(&req.id, json!({ "ok": true }))
}

fn handle_assessments_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let assessment_id = match req.params.get("assessmentId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing assessmentId", None),
    };

    let changed = match conn.execute("DELETE FROM assessments WHERE id = ?", [&assessment_id]) {
        Ok(v) => v,
        Err(e) => {
            return err(
                &req.id,
                "db_delete_failed",
                e.to_string(),
                Some(json!({ "table": "assessments" })),
            )
        }
    };
    if changed == 0 {
        return err(&req.id, "not_found", "assessment not found", None);
    }

    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "assessments.list" => Some(handle_assessments_list(state, req)),
        "assessments.create" => Some(handle_assessments_create(state, req)),
        "assessments.createFromPoints" => Some(handle_assessments_create_from_points(state, req)),
        "assessments.update" => Some(handle_assessments_update(state, req)),
        "assessments.delete" => Some(handle_assessments_delete(state, req)),
        _ => None,
    }
}
