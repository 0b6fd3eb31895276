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

fn request(
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
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn request_err_code(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> String {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(false),
        "{} unexpectedly succeeded: {}",
        method,
        value
    );
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .expect("error code")
        .to_string()
}

struct SubjectFixture {
    subject_id: String,
    quiz_category_id: String,
}

fn setup_subject(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    workspace: &PathBuf,
) -> SubjectFixture {
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
        json!({ "semesterId": semester_id, "name": "Biology" }),
    );
    let subject_id = subject
        .get("subjectId")
        .and_then(|v| v.as_str())
        .expect("subjectId")
        .to_string();
    let quiz = request_ok(
        stdin,
        reader,
        "f4",
        "categories.create",
        json!({ "subjectId": subject_id, "name": "Quiz", "weight": 25 }),
    );
    let quiz_category_id = quiz
        .get("categoryId")
        .and_then(|v| v.as_str())
        .expect("categoryId")
        .to_string();
    SubjectFixture {
        subject_id,
        quiz_category_id,
    }
}

#[test]
fn rename_cascades_to_assessments_entries_and_weight_together() {
    let workspace = temp_dir("studytrack-rename-cascade");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let fx = setup_subject(&mut stdin, &mut reader, &workspace);

    for (i, name) in ["Cells Quiz", "Genetics Quiz"].iter().enumerate() {
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            &format!("a{}", i),
            "assessments.create",
            json!({
                "subjectId": fx.subject_id,
                "name": name,
                "category": "Quiz",
                "date": "2025-03-10",
                "grade": 85
            }),
        );
    }
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "g1",
        "gradeEntries.create",
        json!({
            "subjectId": fx.subject_id,
            "name": "Pop Quiz",
            "score": 9,
            "totalPoints": 10,
            "category": "Quiz"
        }),
    );

    let renamed = request_ok(
        &mut stdin,
        &mut reader,
        "r1",
        "categories.rename",
        json!({
            "subjectId": fx.subject_id,
            "categoryId": fx.quiz_category_id,
            "name": "Quizzes"
        }),
    );
    assert_eq!(
        renamed.get("assessmentsRenamed").and_then(|v| v.as_i64()),
        Some(2)
    );
    assert_eq!(
        renamed.get("gradeEntriesRenamed").and_then(|v| v.as_i64()),
        Some(1)
    );

    // Verify all three collections together: everything says "Quizzes",
    // nothing says "Quiz".
    let categories = request_ok(
        &mut stdin,
        &mut reader,
        "v1",
        "categories.list",
        json!({ "subjectId": fx.subject_id }),
    );
    let cats = categories
        .get("categories")
        .and_then(|v| v.as_array())
        .expect("categories");
    assert_eq!(cats.len(), 1);
    assert_eq!(cats[0].get("name").and_then(|v| v.as_str()), Some("Quizzes"));
    assert_eq!(cats[0].get("weight").and_then(|v| v.as_f64()), Some(25.0));

    let assessments = request_ok(
        &mut stdin,
        &mut reader,
        "v2",
        "assessments.list",
        json!({ "subjectId": fx.subject_id }),
    );
    let rows = assessments
        .get("assessments")
        .and_then(|v| v.as_array())
        .expect("assessments");
    assert_eq!(rows.len(), 2);
    for row in rows {
        assert_eq!(
            row.get("category").and_then(|v| v.as_str()),
            Some("Quizzes")
        );
    }

    let entries = request_ok(
        &mut stdin,
        &mut reader,
        "v3",
        "gradeEntries.list",
        json!({ "subjectId": fx.subject_id }),
    );
    let rows = entries
        .get("gradeEntries")
        .and_then(|v| v.as_array())
        .expect("gradeEntries");
    assert_eq!(rows.len(), 1);
    assert_eq!(
        rows[0].get("category").and_then(|v| v.as_str()),
        Some("Quizzes")
    );
}

#[test]
fn rename_and_create_reject_duplicate_names() {
    let workspace = temp_dir("studytrack-rename-duplicate");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let fx = setup_subject(&mut stdin, &mut reader, &workspace);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "c1",
        "categories.create",
        json!({ "subjectId": fx.subject_id, "name": "Exam", "weight": 75 }),
    );

    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "c2",
        "categories.create",
        json!({ "subjectId": fx.subject_id, "name": "Exam" }),
    );
    assert_eq!(code, "duplicate_name");

    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "c3",
        "categories.rename",
        json!({
            "subjectId": fx.subject_id,
            "categoryId": fx.quiz_category_id,
            "name": "Exam"
        }),
    );
    assert_eq!(code, "duplicate_name");
}

#[test]
fn delete_cascades_to_assessments_and_entries() {
    let workspace = temp_dir("studytrack-category-delete");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let fx = setup_subject(&mut stdin, &mut reader, &workspace);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "c1",
        "categories.create",
        json!({ "subjectId": fx.subject_id, "name": "Exam", "weight": 75 }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "a1",
        "assessments.create",
        json!({
            "subjectId": fx.subject_id,
            "name": "Cells Quiz",
            "category": "Quiz",
            "date": "2025-03-10",
            "grade": 85
        }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "a2",
        "assessments.create",
        json!({
            "subjectId": fx.subject_id,
            "name": "Midterm",
            "category": "Exam",
            "date": "2025-03-20",
            "grade": 78
        }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "g1",
        "gradeEntries.create",
        json!({
            "subjectId": fx.subject_id,
            "name": "Pop Quiz",
            "score": 9,
            "totalPoints": 10,
            "category": "Quiz"
        }),
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "d1",
        "categories.delete",
        json!({ "subjectId": fx.subject_id, "categoryId": fx.quiz_category_id }),
    );

    // Quiz items are gone with the category; the Exam assessment survives.
    let assessments = request_ok(
        &mut stdin,
        &mut reader,
        "v1",
        "assessments.list",
        json!({ "subjectId": fx.subject_id }),
    );
    let rows = assessments
        .get("assessments")
        .and_then(|v| v.as_array())
        .expect("assessments");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("name").and_then(|v| v.as_str()), Some("Midterm"));

    let entries = request_ok(
        &mut stdin,
        &mut reader,
        "v2",
        "gradeEntries.list",
        json!({ "subjectId": fx.subject_id }),
    );
    assert_eq!(
        entries
            .get("gradeEntries")
            .and_then(|v| v.as_array())
            .map(|v| v.len()),
        Some(0)
    );

    // The remaining category keeps a contiguous sort order.
    let categories = request_ok(
        &mut stdin,
        &mut reader,
        "v3",
        "categories.list",
        json!({ "subjectId": fx.subject_id }),
    );
    let cats = categories
        .get("categories")
        .and_then(|v| v.as_array())
        .expect("categories");
    assert_eq!(cats.len(), 1);
    assert_eq!(cats[0].get("name").and_then(|v| v.as_str()), Some("Exam"));
    assert_eq!(cats[0].get("sortOrder").and_then(|v| v.as_i64()), Some(0));
}
