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
        json!({ "semesterId": semester_id, "name": "Chemistry" }),
    );
    let subject_id = subject
        .get("subjectId")
        .and_then(|v| v.as_str())
        .expect("subjectId")
        .to_string();
    Fixture {
        semester_id,
        subject_id,
    }
}

fn open_calculator(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    fx: &Fixture,
    target: f64,
) -> serde_json::Value {
    let opened = request_ok(
        stdin,
        reader,
        id,
        "calculator.open",
        json!({
            "semesterId": fx.semester_id,
            "subjectId": fx.subject_id,
            "targetGrade": target
        }),
    );
    opened.get("result").cloned().expect("result field")
}

#[test]
fn fully_weighted_grades_normalize_to_the_same_absolute() {
    let workspace = temp_dir("studytrack-calc-full-weight");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let fx = setup_subject(&mut stdin, &mut reader, &workspace);

    for (i, (name, weight)) in [("Homework", 50), ("Exams", 50)].iter().enumerate() {
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            &format!("c{}", i),
            "categories.create",
            json!({ "subjectId": fx.subject_id, "name": name, "weight": weight }),
        );
    }
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "g1",
        "gradeEntries.create",
        json!({
            "subjectId": fx.subject_id,
            "name": "HW Set 1",
            "score": 80,
            "totalPoints": 100,
            "category": "Homework"
        }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "g2",
        "gradeEntries.create",
        json!({
            "subjectId": fx.subject_id,
            "name": "Midterm",
            "score": 90,
            "totalPoints": 100,
            "category": "Exams"
        }),
    );

    let result = open_calculator(&mut stdin, &mut reader, "o1", &fx, 90.0);
    assert_eq!(
        result.get("currentGrade").and_then(|v| v.as_str()),
        Some("85.00")
    );
    assert_eq!(
        result.get("absoluteAverage").and_then(|v| v.as_str()),
        Some("85.00")
    );
    assert_eq!(
        result.get("remainingWeight").and_then(|v| v.as_str()),
        Some("0")
    );
    assert_eq!(
        result.get("hasRegression").and_then(|v| v.as_bool()),
        Some(false)
    );
    assert_eq!(
        result.get("predictedHours").and_then(|v| v.as_str()),
        Some("0")
    );
}

#[test]
fn partially_graded_weights_split_normalized_from_absolute() {
    let workspace = temp_dir("studytrack-calc-partial-weight");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let fx = setup_subject(&mut stdin, &mut reader, &workspace);

    for (i, (name, weight)) in [("Homework", 30), ("Final", 70)].iter().enumerate() {
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            &format!("c{}", i),
            "categories.create",
            json!({ "subjectId": fx.subject_id, "name": name, "weight": weight }),
        );
    }
    // Only Homework is graded (average 0.8); Final has no items and must be
    // skipped, not treated as zero.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "g1",
        "gradeEntries.create",
        json!({
            "subjectId": fx.subject_id,
            "name": "HW Set 1",
            "score": 80,
            "totalPoints": 100,
            "category": "Homework"
        }),
    );

    let result = open_calculator(&mut stdin, &mut reader, "o1", &fx, 90.0);
    assert_eq!(
        result.get("currentGrade").and_then(|v| v.as_str()),
        Some("80.00")
    );
    assert_eq!(
        result.get("absoluteAverage").and_then(|v| v.as_str()),
        Some("24.00")
    );
    assert_eq!(
        result.get("remainingWeight").and_then(|v| v.as_str()),
        Some("70")
    );
    // (90 - 24) / 0.7
    assert_eq!(
        result.get("requiredScore").and_then(|v| v.as_str()),
        Some("94.29")
    );
}

#[test]
fn tracked_assessments_and_manual_entries_share_a_category() {
    let workspace = temp_dir("studytrack-calc-mixed-items");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let fx = setup_subject(&mut stdin, &mut reader, &workspace);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "c1",
        "categories.create",
        json!({ "subjectId": fx.subject_id, "name": "Quiz", "weight": 100 }),
    );
    // A tracked 70% assessment and a manual 9/10 both land in Quiz:
    // average = (0.7 + 0.9) / 2 = 0.8.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "a1",
        "assessments.create",
        json!({
            "subjectId": fx.subject_id,
            "name": "Quiz 1",
            "category": "Quiz",
            "date": "2025-03-10",
            "grade": 70
        }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "g1",
        "gradeEntries.create",
        json!({
            "subjectId": fx.subject_id,
            "name": "Quiz 2",
            "score": 9,
            "totalPoints": 10,
            "category": "Quiz"
        }),
    );

    let result = open_calculator(&mut stdin, &mut reader, "o1", &fx, 90.0);
    assert_eq!(
        result.get("currentGrade").and_then(|v| v.as_str()),
        Some("80.00")
    );
    assert_eq!(
        result.get("absoluteAverage").and_then(|v| v.as_str()),
        Some("80.00")
    );
}

#[test]
fn calculator_reports_absence_for_a_bare_subject() {
    let workspace = temp_dir("studytrack-calc-empty");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let fx = setup_subject(&mut stdin, &mut reader, &workspace);

    let opened = request_ok(
        &mut stdin,
        &mut reader,
        "o1",
        "calculator.open",
        json!({
            "semesterId": fx.semester_id,
            "subjectId": fx.subject_id,
            "targetGrade": 90
        }),
    );
    assert!(opened.get("result").map(|v| v.is_null()).unwrap_or(false));
}
