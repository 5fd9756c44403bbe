use chrono::{Datelike, NaiveDate};
use std::collections::HashSet;

use crate::model::{
    AttendanceRecord, NotificationDraft, Student, StudentStatus, AUDIENCE_ALL, ROLE_PRINCIPAL,
    ROLE_TEACHER,
};

/// Absences inside the evaluation month before the yellow-list warning fires.
pub const MONTHLY_ABSENCE_THRESHOLD: usize = 6;

/// Leading run of absence records before a student moves to the red list.
pub const CONSECUTIVE_ABSENCE_THRESHOLD: usize = 16;

pub const WARNING_TITLE: &str = "Gelbe Liste Warnung";
pub const DISMISSAL_TITLE: &str = "Rote Liste: Ausschluss";

/// Result of one full recomputation: a replacement student list and the
/// notifications to append, applied together by the caller.
#[derive(Debug, Clone)]
pub struct Outcome {
    pub students: Vec<Student>,
    pub notifications: Vec<NotificationDraft>,
    /// Ids that transitioned to dismissed in this pass.
    pub dismissed_ids: Vec<String>,
}

pub fn warning_dedup_key(student_id: &str, today: NaiveDate) -> String {
    format!(
        "warn:{}:{:04}-{:02}",
        student_id,
        today.year(),
        today.month()
    )
}

/// Re-derives disciplinary status for every student from the full attendance
/// snapshot. Pure: inputs are immutable snapshots, outputs are fresh
/// collections. Running it twice over unchanged inputs yields the same
/// student list and no further notifications.
///
/// `sent_keys` holds the dedup keys of notifications already emitted; the
/// monthly warning is suppressed when its key is present. Dismissal needs no
/// key: the status transition itself guards re-emission.
pub fn evaluate(
    students: &[Student],
    attendance: &[AttendanceRecord],
    sent_keys: &HashSet<String>,
    today: NaiveDate,
) -> Outcome {
    let mut updated: Vec<Student> = students.to_vec();
    let mut notifications: Vec<NotificationDraft> = Vec::new();
    let mut dismissed_ids: Vec<String> = Vec::new();

    for student in updated.iter_mut() {
        if student.status == StudentStatus::Dismissed {
            continue;
        }

        let mut records: Vec<&AttendanceRecord> = attendance
            .iter()
            .filter(|a| a.student_id == student.id)
            .collect();
        if records.is_empty() {
            continue;
        }
        records.sort_by(|a, b| b.date.cmp(&a.date));

        let monthly_absences = records
            .iter()
            .filter(|a| {
                !a.is_present && a.date.month() == today.month() && a.date.year() == today.year()
            })
            .count();

        if monthly_absences >= MONTHLY_ABSENCE_THRESHOLD {
            let key = warning_dedup_key(&student.id, today);
            if !sent_keys.contains(&key) {
                notifications.push(NotificationDraft {
                    user_id: AUDIENCE_ALL.to_string(),
                    role: Some(ROLE_TEACHER.to_string()),
                    title: WARNING_TITLE.to_string(),
                    message: format!(
                        "SCHÜLER {} ({}) hat {} Fehltage in diesem Monat erreicht. Bitte Kontakt aufnehmen.",
                        student.display_name(),
                        student.id,
                        monthly_absences
                    ),
                    kind: "system".to_string(),
                    dedup_key: Some(key),
                });
            }
        }

        // Leading streak over existing records only. Gaps in the calendar
        // neither break nor extend it.
        let mut consecutive = 0usize;
        for record in &records {
            if record.is_present {
                break;
            }
            consecutive += 1;
        }

        if consecutive >= CONSECUTIVE_ABSENCE_THRESHOLD {
            student.status = StudentStatus::Dismissed;
            dismissed_ids.push(student.id.clone());
            notifications.push(NotificationDraft {
                user_id: AUDIENCE_ALL.to_string(),
                role: Some(ROLE_PRINCIPAL.to_string()),
                title: DISMISSAL_TITLE.to_string(),
                message: format!(
                    "{} wurde nach {} aufeinanderfolgenden Fehltagen in die Rote Liste verschoben.",
                    student.display_name(),
                    consecutive
                ),
                kind: "system".to_string(),
                dedup_key: None,
            });
        }
    }

    Outcome {
        students: updated,
        notifications,
        dismissed_ids,
    }
}
