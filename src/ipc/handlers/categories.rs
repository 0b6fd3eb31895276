use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn subject_exists(conn: &Connection, subject_id: &str) -> Result<bool, rusqlite::Error> {
    conn.query_row("SELECT 1 FROM subjects WHERE id = ?", [subject_id], |r| {
        r.get::<_, i64>(0)
    })
    .optional()
    .map(|v| v.is_some())
}

fn handle_categories_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "categories": [] }));
    };

    let subject_id = match req.params.get("subjectId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing subjectId", None),
    };

    let mut stmt = match conn.prepare(
        "SELECT id, name, COALESCE(weight, 0), sort_order
         FROM categories
         WHERE subject_id = ?
         ORDER BY sort_order",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([&subject_id], |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            let weight: f64 = row.get(2)?;
            let sort_order: i64 = row.get(3)?;
            Ok(json!({
                "id": id,
                "name": name,
                "weight": weight,
                "sortOrder": sort_order
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(categories) => ok(&req.id, json!({ "categories": categories })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_categories_create(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let weight = match req.params.get("weight") {
        None => 0.0,
        Some(v) if v.is_null() => 0.0,
        Some(v) => match v.as_f64() {
            Some(n) => n,
            None => return err(&req.id, "bad_params", "weight must be a number", None),
        },
    };

    match subject_exists(conn, &subject_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "subject not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let duplicate: Option<i64> = match conn
        .query_row(
            "SELECT 1 FROM categories WHERE subject_id = ? AND name = ?",
            (&subject_id, &name),
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if duplicate.is_some() {
        return err(
            &req.id,
            "duplicate_name",
            format!("category \"{}\" already exists", name),
            None,
        );
    }

    let next_sort: i64 = match conn.query_row(
        "SELECT COALESCE(MAX(sort_order) + 1, 0) FROM categories WHERE subject_id = ?",
        [&subject_id],
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let category_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO categories(id, subject_id, name, weight, sort_order) VALUES(?, ?, ?, ?, ?)",
        (&category_id, &subject_id, &name, weight, next_sort),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "categories" })),
        );
    }

    ok(
        &req.id,
        json!({ "categoryId": category_id, "name": name, "weight": weight, "sortOrder": next_sort }),
    )
}

fn handle_categories_set_weight(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let subject_id = match req.params.get("subjectId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing subjectId", None),
    };
    let category_id = match req.params.get("categoryId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing categoryId", None),
    };
    let weight = match req.params.get("weight") {
        Some(v) if v.is_null() => 0.0,
        Some(v) => match v.as_f64() {
            Some(n) => n,
            None => return err(&req.id, "bad_params", "weight must be a number or null", None),
        },
        None => return err(&req.id, "bad_params", "missing weight", None),
    };

    let changed = match conn.execute(
        "UPDATE categories SET weight = ? WHERE id = ? AND subject_id = ?",
        (weight, &category_id, &subject_id),
    ) {
        Ok(v) => v,
        Err(e) => {
            return err(
                &req.id,
                "db_update_failed",
                e.to_string(),
                Some(json!({ "table": "categories" })),
            )
        }
    };
    if changed == 0 {
        return err(&req.id, "not_found", "category not found", None);
    }

    ok(&req.id, json!({ "ok": true }))
}

fn handle_categories_rename(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let subject_id = match req.params.get("subjectId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing subjectId", None),
    };
    let category_id = match req.params.get("categoryId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing categoryId", None),
    };
    let new_name = match req.params.get("name").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing name", None),
    };
    if new_name.is_empty() {
        return err(&req.id, "bad_params", "name must not be empty", None);
    }

    let old_name: Option<String> = match conn
        .query_row(
            "SELECT name FROM categories WHERE id = ? AND subject_id = ?",
            (&category_id, &subject_id),
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(old_name) = old_name else {
        return err(&req.id, "not_found", "category not found", None);
    };
    if old_name == new_name {
        return ok(&req.id, json!({ "ok": true, "renamed": 0 }));
    }

    let collision: Option<i64> = match conn
        .query_row(
            "SELECT 1 FROM categories WHERE subject_id = ? AND name = ? AND id != ?",
            (&subject_id, &new_name, &category_id),
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if collision.is_some() {
        return err(
            &req.id,
            "duplicate_name",
            format!("category \"{}\" already exists", new_name),
            None,
        );
    }

    // The category row, its assessments, and its manual entries must agree on
    // the name; apply all three writes in one transaction.
    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    if let Err(e) = tx.execute(
        "UPDATE categories SET name = ? WHERE id = ? AND subject_id = ?",
        (&new_name, &category_id, &subject_id),
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "categories" })),
        );
    }

    let assessments_changed = match tx.execute(
        "UPDATE assessments SET category_name = ? WHERE subject_id = ? AND category_name = ?",
        (&new_name, &subject_id, &old_name),
    ) {
        Ok(v) => v,
        Err(e) => {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_update_failed",
                e.to_string(),
                Some(json!({ "table": "assessments" })),
            );
        }
    };

    let entries_changed = match tx.execute(
        "UPDATE grade_entries SET category = ? WHERE subject_id = ? AND category = ?",
        (&new_name, &subject_id, &old_name),
    ) {
        Ok(v) => v,
        Err(e) => {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_update_failed",
                e.to_string(),
                Some(json!({ "table": "grade_entries" })),
            );
        }
    };

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({
            "ok": true,
            "assessmentsRenamed": assessments_changed,
            "gradeEntriesRenamed": entries_changed
        }),
    )
}

fn handle_categories_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let subject_id = match req.params.get("subjectId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing subjectId", None),
    };
    let category_id = match req.params.get("categoryId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing categoryId", None),
    };

    let row: Option<(String, i64)> = match conn
        .query_row(
            "SELECT name, sort_order FROM categories WHERE id = ? AND subject_id = ?",
            (&category_id, &subject_id),
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some((name, sort_order)) = row else {
        return err(&req.id, "not_found", "category not found", None);
    };

    // Deleting a category takes its assessments and manual entries with it;
    // the category list is the authoritative set of valid buckets.
    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    if let Err(e) = tx.execute(
        "DELETE FROM assessments WHERE subject_id = ? AND category_name = ?",
        (&subject_id, &name),
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
        "DELETE FROM grade_entries WHERE subject_id = ? AND category = ?",
        (&subject_id, &name),
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
        "DELETE FROM categories WHERE id = ? AND subject_id = ?",
        (&category_id, &subject_id),
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "categories" })),
        );
    }

    // Keep sort_order contiguous.
    if let Err(e) = tx.execute(
        "UPDATE categories
         SET sort_order = sort_order - 1
         WHERE subject_id = ? AND sort_order > ?",
        (&subject_id, sort_order),
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "categories" })),
        );
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "categories.list" => Some(handle_categories_list(state, req)),
        "categories.create" => Some(handle_categories_create(state, req)),
        "categories.setWeight" => Some(handle_categories_set_weight(state, req)),
        "categories.rename" => Some(handle_categories_rename(state, req)),
        "categories.delete" => Some(handle_categories_delete(state, req)),
        _ => None,
    }
}
