use crate::db;
use crate::escalation;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::model::StudentStatus;
use chrono::{Datelike, NaiveDate};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

struct HandlerErr {
    code: &'static str,
    message: String,
    details: Option<serde_json::Value>,
}

impl HandlerErr {
    fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }

    fn db(e: impl std::fmt::Display) -> Self {
        HandlerErr {
            code: "db_query_failed",
            message: e.to_string(),
            details: None,
        }
    }

    fn bad(message: impl Into<String>) -> Self {
        HandlerErr {
            code: "bad_params",
            message: message.into(),
            details: None,
        }
    }
}

fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| HandlerErr::bad(format!("missing {}", key)))
}

fn parse_date(params: &serde_json::Value, key: &str) -> Result<NaiveDate, HandlerErr> {
    let raw = get_required_str(params, key)?;
    raw.parse()
        .map_err(|_| HandlerErr::bad(format!("{} must be YYYY-MM-DD", key)))
}

/// Evaluation moment for the escalation pass. Injectable for determinism;
/// the live clock is only consulted here at the boundary.
fn parse_today(params: &serde_json::Value) -> Result<NaiveDate, HandlerErr> {
    match params.get("today").and_then(|v| v.as_str()) {
        Some(raw) => raw
            .parse()
            .map_err(|_| HandlerErr::bad("today must be YYYY-MM-DD")),
        None => Ok(chrono::Local::now().date_naive()),
    }
}

fn parse_month_key(month: &str) -> Result<(i32, u32), HandlerErr> {
    let Some((y, m)) = month.trim().split_once('-') else {
        return Err(HandlerErr::bad("month must be YYYY-MM"));
    };
    let year = y
        .parse::<i32>()
        .map_err(|_| HandlerErr::bad("month year must be numeric"))?;
    let month_num = m
        .parse::<u32>()
        .map_err(|_| HandlerErr::bad("month must be YYYY-MM"))?;
    if !(1..=12).contains(&month_num) {
        return Err(HandlerErr::bad("month must be between 01 and 12"));
    }
    Ok((year, month_num))
}

fn student_exists(conn: &Connection, student_id: &str) -> Result<bool, HandlerErr> {
    conn.query_row("SELECT 1 FROM students WHERE id = ?", [student_id], |r| {
        r.get::<_, i64>(0)
    })
    .optional()
    .map(|v| v.is_some())
    .map_err(HandlerErr::db)
}

fn escalation_json(outcome: &escalation::Outcome) -> serde_json::Value {
    json!({
        "dismissed": outcome.dismissed_ids,
        "notificationsEmitted": outcome.notifications.len(),
    })
}

fn attendance_set_day(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let date = parse_date(params, "date")?;
    let is_present = params
        .get("isPresent")
        .and_then(|v| v.as_bool())
        .ok_or_else(|| HandlerErr::bad("missing isPresent"))?;
    let today = parse_today(params)?;

    if !student_exists(conn, &student_id)? {
        return Err(HandlerErr {
            code: "not_found",
            message: "student not found".to_string(),
            details: None,
        });
    }

    let tx = conn.unchecked_transaction().map_err(|e| HandlerErr {
        code: "db_tx_failed",
        message: e.to_string(),
        details: None,
    })?;
    tx.execute(
        "INSERT INTO attendance(student_id, date, is_present)
         VALUES(?, ?, ?)
         ON CONFLICT(student_id, date) DO UPDATE SET
           is_present = excluded.is_present",
        (&student_id, date.to_string(), is_present as i64),
    )
    .map_err(|e| HandlerErr {
        code: "db_update_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "attendance" })),
    })?;
    let outcome = db::recompute_escalation(&tx, today).map_err(HandlerErr::db)?;
    tx.commit().map_err(|e| HandlerErr {
        code: "db_commit_failed",
        message: e.to_string(),
        details: None,
    })?;

    Ok(json!({ "ok": true, "escalation": escalation_json(&outcome) }))
}

fn attendance_clear_day(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let date = parse_date(params, "date")?;
    let today = parse_today(params)?;

    let tx = conn.unchecked_transaction().map_err(|e| HandlerErr {
        code: "db_tx_failed",
        message: e.to_string(),
        details: None,
    })?;
    // "No record" is distinct from "absent": clearing removes the fact, and
    // the recompute reflects the deletion immediately.
    tx.execute(
        "DELETE FROM attendance WHERE student_id = ? AND date = ?",
        (&student_id, date.to_string()),
    )
    .map_err(|e| HandlerErr {
        code: "db_update_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "attendance" })),
    })?;
    let outcome = db::recompute_escalation(&tx, today).map_err(HandlerErr::db)?;
    tx.commit().map_err(|e| HandlerErr {
        code: "db_commit_failed",
        message: e.to_string(),
        details: None,
    })?;

    Ok(json!({ "ok": true, "escalation": escalation_json(&outcome) }))
}

fn attendance_mark_all_present(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let class_name = get_required_str(params, "className")?;
    let date = parse_date(params, "date")?;
    let today = parse_today(params)?;

    let students = db::load_students(conn).map_err(HandlerErr::db)?;
    let ids: Vec<String> = students
        .iter()
        .filter(|s| s.class_name == class_name && s.status == StudentStatus::Active)
        .map(|s| s.id.clone())
        .collect();

    let tx = conn.unchecked_transaction().map_err(|e| HandlerErr {
        code: "db_tx_failed",
        message: e.to_string(),
        details: None,
    })?;
    for id in &ids {
        tx.execute(
            "INSERT INTO attendance(student_id, date, is_present)
             VALUES(?, ?, 1)
             ON CONFLICT(student_id, date) DO UPDATE SET
               is_present = excluded.is_present",
            (id, date.to_string()),
        )
        .map_err(|e| HandlerErr {
            code: "db_update_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "attendance" })),
        })?;
    }
    let outcome = db::recompute_escalation(&tx, today).map_err(HandlerErr::db)?;
    tx.commit().map_err(|e| HandlerErr {
        code: "db_commit_failed",
        message: e.to_string(),
        details: None,
    })?;

    Ok(json!({
        "marked": ids.len(),
        "escalation": escalation_json(&outcome)
    }))
}

fn attendance_month_summary(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let class_name = get_required_str(params, "className")?;
    let month_key = get_required_str(params, "month")?;
    let (year, month_num) = parse_month_key(&month_key)?;

    let students = db::load_students(conn).map_err(HandlerErr::db)?;
    let attendance = db::load_attendance(conn).map_err(HandlerErr::db)?;

    let rows: Vec<serde_json::Value> = students
        .iter()
        .filter(|s| s.class_name == class_name && s.status == StudentStatus::Active)
        .map(|s| {
            let month_records: Vec<_> = attendance
                .iter()
                .filter(|a| {
                    a.student_id == s.id
                        && a.date.year() == year
                        && a.date.month() == month_num
                })
                .collect();
            let present = month_records.iter().filter(|a| a.is_present).count();
            let absent = month_records.len() - present;
            json!({
                "studentId": s.id,
                "displayName": s.display_name(),
                "present": present,
                "absent": absent,
            })
        })
        .collect();

    Ok(json!({ "month": month_key, "rows": rows }))
}

fn with_conn(
    state: &AppState,
    req: &Request,
    f: impl FnOnce(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>,
) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match f(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attendance.setDay" => Some(with_conn(state, req, attendance_set_day)),
        "attendance.clearDay" => Some(with_conn(state, req, attendance_clear_day)),
        "attendance.markAllPresent" => Some(with_conn(state, req, attendance_mark_all_present)),
        "attendance.monthSummary" => Some(with_conn(state, req, attendance_month_summary)),
        _ => None,
    }
}
