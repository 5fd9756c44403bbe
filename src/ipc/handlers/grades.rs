use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::model::Term;
use crate::reports::{BONUS_MAX, POINTS_MAX_PER_SUBJECT};
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

fn student_exists(conn: &Connection, req: &Request, id: &str) -> Result<(), serde_json::Value> {
    let found = conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()
        .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))?;
    if found.is_none() {
        return Err(err(&req.id, "not_found", "student not found", None));
    }
    Ok(())
}

fn handle_upsert(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let subject = match required_str(req, "subject") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let term = match required_term(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(points) = req.params.get("points").and_then(|v| v.as_i64()) else {
        return err(&req.id, "bad_params", "missing points", None);
    };
    if !(0..=POINTS_MAX_PER_SUBJECT).contains(&points) {
        return err(
            &req.id,
            "bad_params",
            format!("points must be between 0 and {}", POINTS_MAX_PER_SUBJECT),
            Some(json!({ "points": points })),
        );
    }
    if let Err(resp) = student_exists(conn, req, &student_id) {
        return resp;
    }

    // Grades are only accepted against the current catalog.
    let subjects = match db::load_subjects(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if !subjects.iter().any(|s| s == &subject) {
        return err(
            &req.id,
            "not_found",
            "subject not in catalog",
            Some(json!({ "subject": subject })),
        );
    }

    let date = req
        .params
        .get("date")
        .and_then(|v| v.as_str())
        .map(|v| v.to_string())
        .unwrap_or_else(|| chrono::Local::now().format("%Y-%m-%d").to_string());

    let res = conn.execute(
        "INSERT INTO grades(student_id, subject, term, points, date)
         VALUES(?, ?, ?, ?, ?)
         ON CONFLICT(student_id, subject, term) DO UPDATE SET
           points = excluded.points,
           date = excluded.date",
        (&student_id, &subject, term.as_str(), points, &date),
    );
    if let Err(e) = res {
        return err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "grades" })),
        );
    }
    ok(&req.id, json!({ "ok": true }))
}

fn handle_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let subject = match required_str(req, "subject") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let term = match required_term(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match conn.execute(
        "DELETE FROM grades WHERE student_id = ? AND subject = ? AND term = ?",
        (&student_id, &subject, term.as_str()),
    ) {
        Ok(n) if n > 0 => ok(&req.id, json!({ "deleted": true })),
        Ok(_) => err(&req.id, "not_found", "grade not found", None),
        Err(e) => err(&req.id, "db_update_failed", e.to_string(), None),
    }
}

fn handle_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let term_filter = req.params.get("term").and_then(|v| v.as_str()).map(|raw| {
        Term::parse(raw)
    });
    let term_filter = match term_filter {
        Some(None) => {
            return err(
                &req.id,
                "bad_params",
                "term must be Halbjahr or Abschluss",
                None,
            )
        }
        Some(Some(t)) => Some(t),
        None => None,
    };
    let student_filter = req
        .params
        .get("studentId")
        .and_then(|v| v.as_str())
        .map(|v| v.to_string());

    let grades = match db::load_grades(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows: Vec<serde_json::Value> = grades
        .iter()
        .filter(|g| term_filter.map(|t| g.term == t).unwrap_or(true))
        .filter(|g| {
            student_filter
                .as_deref()
                .map(|s| g.student_id == s)
                .unwrap_or(true)
        })
        .map(|g| serde_json::to_value(g).unwrap_or_else(|_| json!({})))
        .collect();

    ok(&req.id, json!({ "grades": rows }))
}

const PARTICIPATION_LEVELS: &[&str] = &["Sehr gut", "Befriedigend", "Unzureichend"];

fn required_level(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    let raw = required_str(req, key)?;
    if !PARTICIPATION_LEVELS.contains(&raw.as_str()) {
        return Err(err(
            &req.id,
            "bad_params",
            format!("{} must be one of: {}", key, PARTICIPATION_LEVELS.join(", ")),
            None,
        ));
    }
    Ok(raw)
}

fn handle_participation_set(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let verhalten = match required_level(req, "verhalten") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let vortrag = match required_level(req, "vortrag") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let puenktlichkeit = match required_level(req, "puenktlichkeit") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let zusatzpunkte = req
        .params
        .get("zusatzpunkte")
        .and_then(|v| v.as_i64())
        .unwrap_or(0);
    if !(0..=BONUS_MAX).contains(&zusatzpunkte) {
        return err(
            &req.id,
            "bad_params",
            format!("zusatzpunkte must be between 0 and {}", BONUS_MAX),
            None,
        );
    }
    if let Err(resp) = student_exists(conn, req, &student_id) {
        return resp;
    }

    let res = conn.execute(
        "INSERT INTO participation(student_id, term, verhalten, vortrag, puenktlichkeit, zusatzpunkte)
         VALUES(?, ?, ?, ?, ?, ?)
         ON CONFLICT(student_id, term) DO UPDATE SET
           verhalten = excluded.verhalten,
           vortrag = excluded.vortrag,
           puenktlichkeit = excluded.puenktlichkeit,
           zusatzpunkte = excluded.zusatzpunkte",
        (
            &student_id,
            term.as_str(),
            &verhalten,
            &vortrag,
            &puenktlichkeit,
            zusatzpunkte,
        ),
    );
    if let Err(e) = res {
        return err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "participation" })),
        );
    }
    ok(&req.id, json!({ "ok": true }))
}

fn handle_participation_get(state: &mut AppState, req: &Request) -> serde_json::Value {
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

    let row = conn
        .query_row(
            "SELECT verhalten, vortrag, puenktlichkeit, zusatzpunkte
             FROM participation WHERE student_id = ? AND term = ?",
            (&student_id, term.as_str()),
            |r| {
                Ok(json!({
                    "studentId": student_id,
                    "term": term.as_str(),
                    "verhalten": r.get::<_, String>(0)?,
                    "vortrag": r.get::<_, String>(1)?,
                    "puenktlichkeit": r.get::<_, String>(2)?,
                    "zusatzpunkte": r.get::<_, i64>(3)?,
                }))
            },
        )
        .optional();
    match row {
        Ok(Some(v)) => ok(&req.id, json!({ "participation": v })),
        Ok(None) => ok(&req.id, json!({ "participation": null })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "grades.upsert" => Some(handle_upsert(state, req)),
        "grades.delete" => Some(handle_delete(state, req)),
        "grades.list" => Some(handle_list(state, req)),
        "participation.set" => Some(handle_participation_set(state, req)),
        "participation.get" => Some(handle_participation_get(state, req)),
        _ => None,
    }
}
