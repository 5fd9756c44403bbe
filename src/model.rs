use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StudentStatus {
    #[serde(rename = "active")]
    Active,
    #[serde(rename = "dismissed")]
    Dismissed,
}

impl StudentStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(StudentStatus::Active),
            "dismissed" => Some(StudentStatus::Dismissed),
            _ => None,
        }
    }
}

/// The two grading cycles. They share no state: grades, participation and
/// release flags are all keyed per term.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Term {
    Halbjahr,
    Abschluss,
}

impl Term {
    pub fn as_str(self) -> &'static str {
        match self {
            Term::Halbjahr => "Halbjahr",
            Term::Abschluss => "Abschluss",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Halbjahr" => Some(Term::Halbjahr),
            "Abschluss" => Some(Term::Abschluss),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub gender: String,
    pub birth_date: String,
    pub class_name: String,
    pub guardian: String,
    pub whatsapp: String,
    pub registration_date: String,
    pub status: StudentStatus,
    pub report_released_halbjahr: bool,
    pub report_released_abschluss: bool,
}

impl Student {
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    pub fn released_for(&self, term: Term) -> bool {
        match term {
            Term::Halbjahr => self.report_released_halbjahr,
            Term::Abschluss => self.report_released_abschluss,
        }
    }

    pub fn set_released_for(&mut self, term: Term, released: bool) {
        match term {
            Term::Halbjahr => self.report_released_halbjahr = released,
            Term::Abschluss => self.report_released_abschluss = released,
        }
    }
}

/// One presence fact. At most one record exists per (student, date); the
/// absence of a record means "no record", never "absent".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttendanceRecord {
    pub student_id: String,
    pub date: NaiveDate,
    pub is_present: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Grade {
    pub student_id: String,
    pub subject: String,
    pub term: Term,
    pub points: i64,
    pub date: String,
}

/// Broadcast audience marker for notifications.
pub const AUDIENCE_ALL: &str = "ALL";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationDraft {
    pub user_id: String,
    pub role: Option<String>,
    pub title: String,
    pub message: String,
    pub kind: String,
    /// Idempotency key recorded alongside the stored notification. Emission
    /// is suppressed when the key was already sent.
    pub dedup_key: Option<String>,
}

pub const ROLE_PRINCIPAL: &str = "PRINCIPAL";
pub const ROLE_TEACHER: &str = "TEACHER";
