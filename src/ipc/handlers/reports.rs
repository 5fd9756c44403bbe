use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::model::Term;
use crate::reports::{self, ReleaseError};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.to_string())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

fn required_term(req: &Request) -> Result<Term, serde_json::Value> {
    let raw = required_str(req, "term")?;
    Term::parse(&raw).ok_or_else(|| {
        err(
            &req.id,
            "bad_params",
            "term must be Halbjahr or Abschluss",
            Some(json!({ "term": raw })),
        )
    })
}

fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

fn completion_for(
    conn: &Connection,
    req: &Request,
    student_id: &str,
    term: Term,
) -> Result<reports::CompletionStats, serde_json::Value> {
    let grades =
        db::load_grades(conn).map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))?;
    let subjects = db::load_subjects(conn)
        .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))?;
    Ok(reports::completion(
        &grades,
        subjects.len(),
        student_id,
        term,
    ))
}

fn handle_completion(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let term = match required_term(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let stats = match completion_for(conn, req, &student_id, term) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    ok(
        &req.id,
        serde_json::to_value(stats).unwrap_or_else(|_| json!({})),
    )
}

/// The release gate. Releasing an incomplete term is refused with
/// `not_complete` and the flag stays unchanged; revoking always succeeds.
fn handle_set_released(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let term = match required_term(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(released) = req.params.get("released").and_then(|v| v.as_bool()) else {
        return err(&req.id, "bad_params", "missing released", None);
    };

    let mut student = match db::load_student(conn, &student_id) {
        Ok(Some(s)) => s,
        Ok(None) => return err(&req.id, "not_found", "student not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let stats = match completion_for(conn, req, &student_id, term) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match reports::apply_release(&mut student, term, released, stats.is_complete) {
        Ok(()) => {}
        Err(ReleaseError::NotComplete) => {
            return err(
                &req.id,
                "not_complete",
                "report is not complete for this term",
                Some(json!({
                    "graded": stats.graded,
                    "total": stats.total,
                })),
            );
        }
    }

    let column = match term {
        Term::Halbjahr => "report_released_halbjahr",
        Term::Abschluss => "report_released_abschluss",
    };
    let sql = format!("UPDATE students SET {} = ? WHERE id = ?", column);
    if let Err(e) = conn.execute(&sql, (student.released_for(term) as i64, &student_id)) {
        return err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "students", "column": column })),
        );
    }

    ok(
        &req.id,
        json!({
            "studentId": student_id,
            "term": term.as_str(),
            "released": student.released_for(term),
        }),
    )
}

/// Printable report-card payload: per-subject points, totals and the German
/// grade for the term.
fn handle_card(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let term = match required_term(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let student = match db::load_student(conn, &student_id) {
        Ok(Some(s)) => s,
        Ok(None) => return err(&req.id, "not_found", "student not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let grades = match db::load_grades(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let subjects = match db::load_subjects(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let bonus: i64 = conn
        .query_row(
            "SELECT zusatzpunkte FROM participation WHERE student_id = ? AND term = ?",
            (&student_id, term.as_str()),
            |r| r.get(0),
        )
        .optional()
        .unwrap_or(None)
        .unwrap_or(0);

    let mut total: i64 = bonus;
    let rows: Vec<serde_json::Value> = subjects
        .iter()
        .map(|subject| {
            let points = grades
                .iter()
                .find(|g| g.student_id == student_id && g.term == term && &g.subject == subject)
                .map(|g| g.points);
            total += points.unwrap_or(0);
            json!({ "subject": subject, "points": points })
        })
        .collect();

    let max = reports::max_points(subjects.len());
    let stats = reports::completion(&grades, subjects.len(), &student_id, term);

    ok(
        &req.id,
        json!({
            "student": serde_json::to_value(&student).unwrap_or_else(|_| json!({})),
            "term": term.as_str(),
            "subjects": rows,
            "bonus": bonus,
            "total": total,
            "max": max,
            "germanGrade": reports::german_grade(total, max),
            "isComplete": stats.is_complete,
            "released": student.released_for(term),
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reports.completion" => Some(handle_completion(state, req)),
        "reports.setReleased" => Some(handle_set_released(state, req)),
        "reports.card" => Some(handle_card(state, req)),
        _ => None,
    }
}
