use serde::Serialize;
use std::collections::HashSet;

use crate::model::{Grade, Student, Term};

/// Grade coverage of one (student, term) against the subject catalog.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionStats {
    pub graded: usize,
    pub total: usize,
    pub is_complete: bool,
    pub percentage: f64,
}

pub fn completion(
    grades: &[Grade],
    catalog_len: usize,
    student_id: &str,
    term: Term,
) -> CompletionStats {
    let graded: HashSet<&str> = grades
        .iter()
        .filter(|g| g.student_id == student_id && g.term == term)
        .map(|g| g.subject.as_str())
        .collect();
    let graded = graded.len();

    // An empty catalog is never complete; it is not an error.
    let is_complete = catalog_len > 0 && graded >= catalog_len;
    let percentage = if catalog_len > 0 {
        (graded as f64 / catalog_len as f64) * 100.0
    } else {
        0.0
    };

    CompletionStats {
        graded,
        total: catalog_len,
        is_complete,
        percentage,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseError {
    /// Release was requested for a term whose grade coverage is incomplete.
    /// The flag stays unchanged; the caller surfaces the reason.
    NotComplete,
}

/// Locked -> Released only when complete; Released -> Locked always.
pub fn apply_release(
    student: &mut Student,
    term: Term,
    desired: bool,
    complete: bool,
) -> Result<(), ReleaseError> {
    if desired && !complete {
        return Err(ReleaseError::NotComplete);
    }
    student.set_released_for(term, desired);
    Ok(())
}

/// German grade bands used on the printed report card.
pub fn german_grade(points: i64, max: i64) -> &'static str {
    if max == 0 {
        return "-";
    }
    let perc = (points as f64 / max as f64) * 100.0;
    if perc >= 92.0 {
        "1"
    } else if perc >= 81.0 {
        "2"
    } else if perc >= 67.0 {
        "3"
    } else if perc >= 50.0 {
        "4"
    } else if perc >= 30.0 {
        "5"
    } else {
        "6"
    }
}

pub const POINTS_MAX_PER_SUBJECT: i64 = 20;
pub const BONUS_MAX: i64 = 5;

/// Highest reachable score for a term: full points per subject plus the
/// participation bonus.
pub fn max_points(catalog_len: usize) -> i64 {
    catalog_len as i64 * POINTS_MAX_PER_SUBJECT + BONUS_MAX
}
