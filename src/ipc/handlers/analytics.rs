use crate::calc;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers;
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::collections::HashSet;

fn handle_semester_open(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let semester_id = match req.params.get("semesterId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing semesterId", None),
    };

    let sessions = match helpers::load_sessions(conn, &semester_id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let totals = calc::subject_summaries(&sessions);
    let semester_total = calc::semester_total_seconds(&sessions);

    let summaries: Vec<serde_json::Value> = totals
        .iter()
        .map(|t| {
            json!({
                "name": t.name,
                "totalSeconds": t.total_seconds,
                "totalDisplay": calc::format_hms(t.total_seconds)
            })
        })
        .collect();

    ok(
        &req.id,
        json!({
            "subjectSummaries": summaries,
            "semesterTotalSeconds": semester_total,
            "semesterTotalDisplay": calc::format_hms(semester_total)
        }),
    )
}

fn handle_subject_open(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let visible: Option<HashSet<String>> = match req.params.get("visibleCategories") {
        None => None,
        Some(v) if v.is_null() => None,
        Some(v) => match v.as_array() {
            Some(items) => {
                let mut set = HashSet::new();
                for item in items {
                    let Some(s) = item.as_str() else {
                        return err(
                            &req.id,
                            "bad_params",
                            "visibleCategories must be an array of strings",
                            None,
                        );
                    };
                    set.insert(s.to_string());
                }
                Some(set)
            }
            None => {
                return err(
                    &req.id,
                    "bad_params",
                    "visibleCategories must be an array of strings",
                    None,
                )
            }
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
    let assessments = match helpers::load_assessments(conn, &subject_id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let sessions = match helpers::load_sessions(conn, &semester_id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    // Attribution sees only this subject's sessions; other classes must not
    // contribute time.
    let subject_sessions: Vec<_> = sessions
        .iter()
        .filter(|s| s.subject == subject_name)
        .cloned()
        .collect();

    let stats = calc::annotate_assessments(&categories, &assessments, &subject_sessions);
    let regression = calc::fit_regression(&stats);
    let avg_efficiency = calc::average_efficiency(&stats);

    // The visibility filter shapes the displayed list only; the regression
    // and the series above always see the full set.
    let displayed: Vec<&calc::AnnotatedAssessment> = match &visible {
        Some(set) => stats.iter().filter(|a| set.contains(&a.category)).collect(),
        None => stats.iter().collect(),
    };

    let scatter: Vec<serde_json::Value> = stats
        .iter()
        .filter(|a| a.grade > 0.0)
        .map(|a| {
            json!({
                "x": a.hours,
                "y": a.grade,
                "name": format!("{} ({})", a.name, a.category)
            })
        })
        .collect();

    let efficiency_series: Vec<serde_json::Value> = stats
        .iter()
        .filter(|a| a.grade > 0.0)
        .map(|a| json!({ "name": a.name, "efficiency": a.efficiency }))
        .collect();

    let annotated: Vec<serde_json::Value> = displayed
        .iter()
        .map(|a| {
            json!({
                "assessmentId": a.assessment_id,
                "name": a.name,
                "category": a.category,
                "date": a.date,
                "grade": a.grade,
                "calculatedTime": a.calculated_time,
                "studiedDisplay": calc::format_hms(a.calculated_time),
                "hours": format!("{:.1}", a.hours),
                "efficiency": format!("{:.1}", a.efficiency)
            })
        })
        .collect();

    ok(
        &req.id,
        json!({
            "subject": { "id": subject_id, "name": subject_name },
            "assessments": annotated,
            "hiddenCount": stats.len() - displayed.len(),
            "scatter": scatter,
            "efficiencySeries": efficiency_series,
            "averageEfficiency": format!("{:.1}", avg_efficiency),
            "regression": regression.map(|r| json!({
                "slope": r.slope,
                "intercept": r.intercept
            })),
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "analytics.semesterOpen" => Some(handle_semester_open(state, req)),
        "analytics.subjectOpen" => Some(handle_subject_open(state, req)),
        _ => None,
    }
}
