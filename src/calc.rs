use chrono::{DateTime, NaiveDate, NaiveTime};
use serde::Serialize;
use std::collections::HashMap;

/// Snapshot types the engine computes over. The IPC layer loads these from
/// the store; the engine never touches the database and holds no state, so
/// every function here is callable on hand-built inputs in tests.

#[derive(Debug, Clone)]
pub struct CategorySnapshot {
    pub name: String,
    pub weight: f64,
}

#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub subject: String,
    /// RFC 3339 instant. Unparsable values contribute nothing.
    pub start_time: String,
    pub duration_seconds: i64,
}

#[derive(Debug, Clone)]
pub struct AssessmentSnapshot {
    pub id: String,
    pub name: String,
    pub category: String,
    /// `YYYY-MM-DD`.
    pub date: String,
    /// Percentage, already parsed; blank or malformed grades come in as 0.
    pub grade: f64,
}

#[derive(Debug, Clone)]
pub struct GradeEntrySnapshot {
    pub score: f64,
    pub total_points: f64,
    pub category: String,
}

/// One-decimal rounding, half away from zero. All hours and efficiency
/// figures pass through this so stored and displayed values agree.
pub fn round1(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnotatedAssessment {
    pub assessment_id: String,
    pub name: String,
    pub category: String,
    pub date: String,
    pub grade: f64,
    /// Seconds of study attributed to this assessment's window.
    pub calculated_time: i64,
    pub hours: f64,
    pub efficiency: f64,
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()
}

/// 23:59:59.999 of `date`, as UTC epoch milliseconds.
fn end_of_day_millis(date: NaiveDate) -> i64 {
    let next_midnight = date.succ_opt().unwrap_or(date).and_time(NaiveTime::MIN);
    next_midnight.and_utc().timestamp_millis() - 1
}

fn start_millis(session: &SessionSnapshot) -> Option<i64> {
    DateTime::parse_from_rfc3339(&session.start_time)
        .ok()
        .map(|t| t.timestamp_millis())
}

/// Partitions study time into per-assessment windows.
///
/// Within each category, assessments are ordered by date (stable; same-date
/// ties keep their incoming order) and assessment `i` owns the window from
/// just after the end of day `i-1` through the end of its own day. The first
/// window opens at time zero. A session lands entirely in the window holding
/// its start instant; durations are never split.
///
/// `sessions` must already be narrowed to the subject under analysis —
/// attribution itself does not filter by subject.
pub fn annotate_assessments(
    categories: &[CategorySnapshot],
    assessments: &[AssessmentSnapshot],
    sessions: &[SessionSnapshot],
) -> Vec<AnnotatedAssessment> {
    let mut out: Vec<AnnotatedAssessment> = Vec::new();

    for cat in categories {
        let mut in_category: Vec<&AssessmentSnapshot> = assessments
            .iter()
            .filter(|a| a.category == cat.name)
            .collect();
        in_category.sort_by_key(|a| parse_date(&a.date));

        let mut prev_bound: i64 = 0;
        for a in &in_category {
            let cutoff = parse_date(&a.date)
                .map(end_of_day_millis)
                .unwrap_or(prev_bound);

            let attributed: i64 = sessions
                .iter()
                .filter_map(|s| {
                    let t = start_millis(s)?;
                    (t > prev_bound && t <= cutoff).then_some(s.duration_seconds)
                })
                .sum();

            let hours = round1(attributed as f64 / 3600.0);
            let efficiency = if hours > 0.0 {
                round1(a.grade / hours)
            } else {
                0.0
            };

            out.push(AnnotatedAssessment {
                assessment_id: a.id.clone(),
                name: a.name.clone(),
                category: a.category.clone(),
                date: a.date.clone(),
                grade: a.grade,
                calculated_time: attributed,
                hours,
                efficiency,
            });

            prev_bound = cutoff;
        }
    }

    out.sort_by_key(|a| parse_date(&a.date));
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Regression {
    pub slope: f64,
    pub intercept: f64,
}

/// Least-squares line over (hours, grade). Only assessments with positive
/// grade and positive attributed hours qualify; fewer than two such points,
/// or all points at identical hours (zero denominator), yield no fit.
pub fn fit_regression(stats: &[AnnotatedAssessment]) -> Option<Regression> {
    let points: Vec<(f64, f64)> = stats
        .iter()
        .filter(|a| a.grade > 0.0 && a.hours > 0.0)
        .map(|a| (a.hours, a.grade))
        .collect();
    if points.len() < 2 {
        return None;
    }

    let n = points.len() as f64;
    let mut sum_x = 0.0;
    let mut sum_y = 0.0;
    let mut sum_xy = 0.0;
    let mut sum_xx = 0.0;
    for (x, y) in &points {
        sum_x += x;
        sum_y += y;
        sum_xy += x * y;
        sum_xx += x * x;
    }

    let denominator = n * sum_xx - sum_x * sum_x;
    if denominator == 0.0 {
        return None;
    }

    let slope = (n * sum_xy - sum_x * sum_y) / denominator;
    let intercept = (sum_y - slope * sum_x) / n;
    Some(Regression { slope, intercept })
}

/// Mean efficiency over graded assessments, one decimal. Hour-less graded
/// assessments count with efficiency 0.
pub fn average_efficiency(stats: &[AnnotatedAssessment]) -> f64 {
    let graded: Vec<&AnnotatedAssessment> = stats.iter().filter(|a| a.grade > 0.0).collect();
    if graded.is_empty() {
        return 0.0;
    }
    let total: f64 = graded.iter().map(|a| a.efficiency).sum();
    round1(total / graded.len() as f64)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeightedGradeReport {
    pub current_grade: f64,
    pub absolute_average: f64,
    pub required_score: f64,
    pub remaining_weight: f64,
    pub predicted_hours: f64,
    pub has_regression: bool,
}

/// Weighted-grade accounting across categories.
///
/// A category contributes only when it has at least one graded item (manual
/// entries as score/total, tracked assessments as grade/100); empty
/// categories are skipped outright, not averaged in as zero. `current_grade`
/// re-bases the graded weight to 100% while `absolute_average` keeps the raw
/// locked-in points, so the two diverge whenever ungraded weight remains.
/// `required_score` is deliberately unclamped: above 100 means the target is
/// out of reach, below 0 means it is already secured.
pub fn weighted_grade_report(
    categories: &[CategorySnapshot],
    entries: &[GradeEntrySnapshot],
    assessments: &[AssessmentSnapshot],
    target_grade: f64,
    regression: Option<Regression>,
) -> Option<WeightedGradeReport> {
    if categories.is_empty() && entries.is_empty() && assessments.is_empty() {
        return None;
    }

    let mut points_locked_in = 0.0_f64;
    let mut total_weight_used = 0.0_f64;

    for cat in categories {
        let mut sum_fractions = 0.0_f64;
        let mut item_count = 0usize;

        for e in entries.iter().filter(|e| e.category == cat.name) {
            sum_fractions += e.score / e.total_points;
            item_count += 1;
        }
        for a in assessments.iter().filter(|a| a.category == cat.name) {
            sum_fractions += a.grade / 100.0;
            item_count += 1;
        }

        if item_count == 0 {
            continue;
        }

        let average = sum_fractions / item_count as f64;
        points_locked_in += average * cat.weight;
        total_weight_used += cat.weight;
    }

    let current_grade = if total_weight_used > 0.0 {
        (points_locked_in / total_weight_used) * 100.0
    } else {
        0.0
    };

    let remaining_weight = 100.0 - total_weight_used;
    let required_score = if remaining_weight > 0.0 {
        (target_grade - points_locked_in) / (remaining_weight / 100.0)
    } else {
        0.0
    };

    let predicted_hours = match regression {
        Some(r) if r.slope != 0.0 => (required_score - r.intercept) / r.slope,
        _ => 0.0,
    };

    Some(WeightedGradeReport {
        current_grade,
        absolute_average: points_locked_in,
        required_score,
        remaining_weight,
        predicted_hours,
        has_regression: regression.is_some(),
    })
}

/// Protocol form of a [`WeightedGradeReport`]: fixed-decimal strings so every
/// consumer rounds identically.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WeightedGradeDisplay {
    pub current_grade: String,
    pub absolute_average: String,
    pub required_score: String,
    pub remaining_weight: String,
    pub predicted_hours: String,
    pub has_regression: bool,
}

impl WeightedGradeReport {
    pub fn display(&self) -> WeightedGradeDisplay {
        WeightedGradeDisplay {
            current_grade: format!("{:.2}", self.current_grade),
            absolute_average: format!("{:.2}", self.absolute_average),
            required_score: format!("{:.2}", self.required_score),
            remaining_weight: format!("{:.0}", self.remaining_weight),
            predicted_hours: if self.predicted_hours > 0.0 {
                format!("{:.1}", self.predicted_hours)
            } else {
                "0".to_string()
            },
            has_regression: self.has_regression,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectTotal {
    pub name: String,
    pub total_seconds: i64,
}

/// Per-subject study totals, descending. Sessions group by subject name;
/// names tied on total keep first-seen order.
pub fn subject_summaries(sessions: &[SessionSnapshot]) -> Vec<SubjectTotal> {
    let mut order: HashMap<String, usize> = HashMap::new();
    let mut totals: Vec<SubjectTotal> = Vec::new();

    for s in sessions {
        match order.get(s.subject.as_str()) {
            Some(&i) => totals[i].total_seconds += s.duration_seconds,
            None => {
                order.insert(s.subject.clone(), totals.len());
                totals.push(SubjectTotal {
                    name: s.subject.clone(),
                    total_seconds: s.duration_seconds,
                });
            }
        }
    }

    totals.sort_by(|a, b| b.total_seconds.cmp(&a.total_seconds));
    totals
}

pub fn semester_total_seconds(sessions: &[SessionSnapshot]) -> i64 {
    sessions.iter().map(|s| s.duration_seconds).sum()
}

/// `"2h 5m 9s"` display form used everywhere durations are shown.
pub fn format_hms(seconds: i64) -> String {
    let seconds = seconds.max(0);
    let h = seconds / 3600;
    let m = (seconds % 3600) / 60;
    let s = seconds % 60;
    format!("{}h {}m {}s", h, m, s)
}
