use crate::calc::{AssessmentSnapshot, CategorySnapshot, GradeEntrySnapshot, SessionSnapshot};
use rusqlite::{Connection, OptionalExtension};

/// Snapshot loaders shared by the analytics and calculator handlers. Each
/// returns plain engine inputs; all filtering beyond the keyed lookup happens
/// in the engine or the caller.

pub fn load_subject_name(
    conn: &Connection,
    subject_id: &str,
) -> Result<Option<String>, rusqlite::Error> {
    conn.query_row("SELECT name FROM subjects WHERE id = ?", [subject_id], |r| {
        r.get(0)
    })
    .optional()
}

pub fn load_categories(
    conn: &Connection,
    subject_id: &str,
) -> Result<Vec<CategorySnapshot>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT name, COALESCE(weight, 0)
         FROM categories
         WHERE subject_id = ?
         ORDER BY sort_order",
    )?;
    stmt.query_map([subject_id], |row| {
        Ok(CategorySnapshot {
            name: row.get(0)?,
            weight: row.get(1)?,
        })
    })
    .and_then(|it| it.collect())
}

pub fn load_assessments(
    conn: &Connection,
    subject_id: &str,
) -> Result<Vec<AssessmentSnapshot>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT id, name, category_name, date, grade
         FROM assessments
         WHERE subject_id = ?
         ORDER BY rowid",
    )?;
    stmt.query_map([subject_id], |row| {
        let grade_text: String = row.get(4)?;
        Ok(AssessmentSnapshot {
            id: row.get(0)?,
            name: row.get(1)?,
            category: row.get(2)?,
            date: row.get(3)?,
            grade: grade_text.trim().parse::<f64>().unwrap_or(0.0),
        })
    })
    .and_then(|it| it.collect())
}

pub fn load_grade_entries(
    conn: &Connection,
    subject_id: &str,
) -> Result<Vec<GradeEntrySnapshot>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT score, total_points, category
         FROM grade_entries
         WHERE subject_id = ?
         ORDER BY rowid",
    )?;
    stmt.query_map([subject_id], |row| {
        Ok(GradeEntrySnapshot {
            score: row.get(0)?,
            total_points: row.get(1)?,
            category: row.get(2)?,
        })
    })
    .and_then(|it| it.collect())
}

pub fn load_sessions(
    conn: &Connection,
    semester_id: &str,
) -> Result<Vec<SessionSnapshot>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT subject, start_time, duration_seconds
         FROM sessions
         WHERE semester_id = ?
         ORDER BY start_time DESC, rowid DESC",
    )?;
    stmt.query_map([semester_id], |row| {
        Ok(SessionSnapshot {
            subject: row.get(0)?,
            start_time: row.get(1)?,
            duration_seconds: row.get(2)?,
        })
    })
    .and_then(|it| it.collect())
}
