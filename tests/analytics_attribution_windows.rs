use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_studytrackd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn studytrackd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

struct Fixture {
    semester_id: String,
    subject_id: String,
}

fn setup_subject(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    workspace: &PathBuf,
    subject_name: &str,
) -> Fixture {
    let _ = request_ok(
        stdin,
        reader,
        "f1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let semester = request_ok(
        stdin,
        reader,
        "f2",
        "semesters.create",
        json!({ "name": "Fall 2025" }),
    );
    let semester_id = semester
        .get("semesterId")
        .and_then(|v| v.as_str())
        .expect("semesterId")
        .to_string();
    let subject = request_ok(
        stdin,
        reader,
        "f3",
        "subjects.create",
        json!({ "semesterId": semester_id, "name": subject_name }),
    );
    let subject_id = subject
        .get("subjectId")
        .and_then(|v| v.as_str())
        .expect("subjectId")
        .to_string();
    let _ = request_ok(
        stdin,
        reader,
        "f4",
        "categories.create",
        json!({ "subjectId": subject_id, "name": "Quiz", "weight": 100 }),
    );
    Fixture {
        semester_id,
        subject_id,
    }
}

fn add_session(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    fx: &Fixture,
    subject: &str,
    start: &str,
    end: &str,
) {
    let _ = request_ok(
        stdin,
        reader,
        id,
        "sessions.create",
        json!({
            "semesterId": fx.semester_id,
            "subject": subject,
            "startTime": start,
            "endTime": end
        }),
    );
}

fn add_assessment(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    fx: &Fixture,
    name: &str,
    date: &str,
    grade: f64,
) {
    let _ = request_ok(
        stdin,
        reader,
        id,
        "assessments.create",
        json!({
            "subjectId": fx.subject_id,
            "name": name,
            "category": "Quiz",
            "date": date,
            "grade": grade
        }),
    );
}

fn open_subject(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    fx: &Fixture,
    visible: Option<serde_json::Value>,
) -> serde_json::Value {
    let mut params = json!({
        "semesterId": fx.semester_id,
        "subjectId": fx.subject_id
    });
    if let Some(v) = visible {
        params["visibleCategories"] = v;
    }
    request_ok(stdin, reader, id, "analytics.subjectOpen", params)
}

fn studied_seconds(open_result: &serde_json::Value, name: &str) -> i64 {
    open_result
        .get("assessments")
        .and_then(|v| v.as_array())
        .expect("assessments")
        .iter()
        .find(|a| a.get("name").and_then(|v| v.as_str()) == Some(name))
        .and_then(|a| a.get("calculatedTime"))
        .and_then(|v| v.as_i64())
        .unwrap_or_else(|| panic!("no calculatedTime for {}", name))
}

#[test]
fn session_between_assessments_lands_in_the_later_window() {
    let workspace = temp_dir("studytrack-attr-window");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let fx = setup_subject(&mut stdin, &mut reader, &workspace, "Math");

    add_assessment(&mut stdin, &mut reader, "a1", &fx, "Quiz 1", "2025-03-10", 80.0);
    add_assessment(&mut stdin, &mut reader, "a2", &fx, "Quiz 2", "2025-03-20", 90.0);

    // Day after Quiz 1: belongs to Quiz 2's window, entirely.
    add_session(
        &mut stdin,
        &mut reader,
        "s1",
        &fx,
        "Math",
        "2025-03-11T09:00:00Z",
        "2025-03-11T11:00:00Z",
    );

    let opened = open_subject(&mut stdin, &mut reader, "o1", &fx, None);
    assert_eq!(studied_seconds(&opened, "Quiz 1"), 0);
    assert_eq!(studied_seconds(&opened, "Quiz 2"), 7200);
}

#[test]
fn earliest_assessment_collects_all_prior_history() {
    let workspace = temp_dir("studytrack-attr-first-window");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let fx = setup_subject(&mut stdin, &mut reader, &workspace, "Math");

    add_assessment(&mut stdin, &mut reader, "a1", &fx, "Quiz 1", "2025-03-10", 80.0);

    // Months before the first assessment: still its window.
    add_session(
        &mut stdin,
        &mut reader,
        "s1",
        &fx,
        "Math",
        "2024-11-01T09:00:00Z",
        "2024-11-01T10:00:00Z",
    );

    let opened = open_subject(&mut stdin, &mut reader, "o1", &fx, None);
    assert_eq!(studied_seconds(&opened, "Quiz 1"), 3600);
}

#[test]
fn other_subjects_sessions_never_contribute() {
    let workspace = temp_dir("studytrack-attr-subject-scope");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let fx = setup_subject(&mut stdin, &mut reader, &workspace, "Math");

    add_assessment(&mut stdin, &mut reader, "a1", &fx, "Quiz 1", "2025-03-10", 80.0);

    add_session(
        &mut stdin,
        &mut reader,
        "s1",
        &fx,
        "Math",
        "2025-03-09T09:00:00Z",
        "2025-03-09T10:00:00Z",
    );
    add_session(
        &mut stdin,
        &mut reader,
        "s2",
        &fx,
        "History",
        "2025-03-09T12:00:00Z",
        "2025-03-09T14:00:00Z",
    );

    let opened = open_subject(&mut stdin, &mut reader, "o1", &fx, None);
    assert_eq!(studied_seconds(&opened, "Quiz 1"), 3600);

    // The history session still shows up in the semester totals.
    let semester = request_ok(
        &mut stdin,
        &mut reader,
        "o2",
        "analytics.semesterOpen",
        json!({ "semesterId": fx.semester_id }),
    );
    assert_eq!(
        semester
            .get("semesterTotalSeconds")
            .and_then(|v| v.as_i64()),
        Some(3600 + 7200)
    );
    let summaries = semester
        .get("subjectSummaries")
        .and_then(|v| v.as_array())
        .expect("subjectSummaries");
    assert_eq!(
        summaries[0].get("name").and_then(|v| v.as_str()),
        Some("History")
    );
    assert_eq!(
        summaries[0].get("totalSeconds").and_then(|v| v.as_i64()),
        Some(7200)
    );
}

#[test]
fn visibility_filter_hides_display_but_not_series() {
    let workspace = temp_dir("studytrack-attr-filter");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let fx = setup_subject(&mut stdin, &mut reader, &workspace, "Math");

    add_assessment(&mut stdin, &mut reader, "a1", &fx, "Quiz 1", "2025-03-10", 80.0);
    add_session(
        &mut stdin,
        &mut reader,
        "s1",
        &fx,
        "Math",
        "2025-03-09T09:00:00Z",
        "2025-03-09T10:00:00Z",
    );

    let opened = open_subject(&mut stdin, &mut reader, "o1", &fx, Some(json!([])));
    assert_eq!(
        opened
            .get("assessments")
            .and_then(|v| v.as_array())
            .map(|v| v.len()),
        Some(0)
    );
    assert_eq!(opened.get("hiddenCount").and_then(|v| v.as_i64()), Some(1));
    // The scatter series ignores visibility.
    assert_eq!(
        opened
            .get("scatter")
            .and_then(|v| v.as_array())
            .map(|v| v.len()),
        Some(1)
    );
}
