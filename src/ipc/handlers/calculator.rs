use crate::calc;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers;
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn handle_calculator_open(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let semester_id = match req.params.get("semesterId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing semesterId", None),
    };
    let subject_id = match req.params.get("subjectId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing subjectId", None),
    };
    let target_grade = match req.params.get("targetGrade") {
        None => 90.0,
        Some(v) if v.is_null() => 90.0,
        Some(v) => match v.as_f64() {
            Some(n) => n,
            None => return err(&req.id, "bad_params", "targetGrade must be a number", None),
        },
    };

    let subject_name = match helpers::load_subject_name(conn, &subject_id) {
        Ok(Some(v)) => v,
        Ok(None) => return err(&req.id, "not_found", "subject not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let categories = match helpers::load_categories(conn, &subject_id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let entries = match helpers::load_grade_entries(conn, &subject_id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let assessments = match helpers::load_assessments(conn, &subject_id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let sessions = match helpers::load_sessions(conn, &semester_id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    // The time prediction rides on the same attribution + fit the analytics
    // view shows; both always use the unfiltered assessment set.
    let subject_sessions: Vec<_> = sessions
        .iter()
        .filter(|s| s.subject == subject_name)
        .cloned()
        .collect();
    let stats = calc::annotate_assessments(&categories, &assessments, &subject_sessions);
    let regression = calc::fit_regression(&stats);

    let report =
        calc::weighted_grade_report(&categories, &entries, &assessments, target_grade, regression);

    ok(
        &req.id,
        json!({
            "subject": { "id": subject_id, "name": subject_name },
            "targetGrade": target_grade,
            "result": report.map(|r| r.display()),
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "calculator.open" => Some(handle_calculator_open(state, req)),
        _ => None,
    }
}
