use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::model::NotificationDraft;
use rusqlite::Connection;
use serde_json::json;

const COURSE_TYPES: &[&str] = &[
    "ANFAENGER",
    "FORTGESCHRITTENE",
    "ARABISCH",
    "IMAM",
    "ILMIYA",
];

fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.to_string())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

fn optional_str(req: &Request, key: &str) -> String {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string()
}

fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

fn handle_add(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let first_name = match required_str(req, "firstName") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let last_name = match required_str(req, "lastName") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let course_type = match required_str(req, "courseType") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    if !COURSE_TYPES.contains(&course_type.as_str()) {
        return err(
            &req.id,
            "bad_params",
            format!("courseType must be one of: {}", COURSE_TYPES.join(", ")),
            None,
        );
    }

    let id = uuid::Uuid::new_v4().to_string();
    let created_at = chrono::Local::now().format("%Y-%m-%d").to_string();
    let res = conn.execute(
        "INSERT INTO waitlist(id, first_name, last_name, gender, birth_date, course_type,
                              whatsapp, guardian, address, lesson_times, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            &first_name,
            &last_name,
            &optional_str(req, "gender"),
            &optional_str(req, "birthDate"),
            &course_type,
            &optional_str(req, "whatsapp"),
            &optional_str(req, "guardian"),
            &optional_str(req, "address"),
            &optional_str(req, "lessonTimes"),
            &created_at,
        ),
    );
    match res {
        Ok(_) => ok(&req.id, json!({ "id": id })),
        Err(e) => err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "waitlist" })),
        ),
    }
}

fn handle_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let mut stmt = match conn.prepare(
        "SELECT id, first_name, last_name, gender, birth_date, course_type,
                whatsapp, guardian, address, lesson_times, created_at
         FROM waitlist ORDER BY created_at, rowid",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "firstName": r.get::<_, String>(1)?,
                "lastName": r.get::<_, String>(2)?,
                "gender": r.get::<_, String>(3)?,
                "birthDate": r.get::<_, String>(4)?,
                "courseType": r.get::<_, String>(5)?,
                "whatsapp": r.get::<_, String>(6)?,
                "guardian": r.get::<_, String>(7)?,
                "address": r.get::<_, String>(8)?,
                "lessonTimes": r.get::<_, String>(9)?,
                "createdAt": r.get::<_, String>(10)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match rows {
        Ok(entries) => ok(&req.id, json!({ "entries": entries })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

/// Converts a waitlist entry into an active student and announces it.
fn handle_admit(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let id = match required_str(req, "id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let class_name = match required_str(req, "className") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let entry = conn.query_row(
        "SELECT first_name, last_name, gender, birth_date, whatsapp, guardian
         FROM waitlist WHERE id = ?",
        [&id],
        |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
                r.get::<_, String>(4)?,
                r.get::<_, String>(5)?,
            ))
        },
    );
    let (first_name, last_name, gender, birth_date, whatsapp, guardian) = match entry {
        Ok(v) => v,
        Err(rusqlite::Error::QueryReturnedNoRows) => {
            return err(&req.id, "not_found", "waitlist entry not found", None)
        }
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let student_id = uuid::Uuid::new_v4().to_string();
    let registration_date = chrono::Local::now().format("%Y-%m-%d").to_string();

    let tx = match conn.unchecked_transaction() {
        Ok(tx) => tx,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    let insert = tx.execute(
        "INSERT INTO students(id, first_name, last_name, gender, birth_date, class_name,
                              guardian, whatsapp, registration_date, status)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, 'active')",
        (
            &student_id,
            &first_name,
            &last_name,
            &gender,
            &birth_date,
            &class_name,
            &guardian,
            &whatsapp,
            &registration_date,
        ),
    );
    if let Err(e) = insert {
        return err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "students" })),
        );
    }
    if let Err(e) = tx.execute("DELETE FROM waitlist WHERE id = ?", [&id]) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    let draft = NotificationDraft {
        user_id: crate::model::AUDIENCE_ALL.to_string(),
        role: None,
        title: "Schüler aufgenommen".to_string(),
        message: format!("{} ist jetzt in Klasse {}.", first_name, class_name),
        kind: "system".to_string(),
        dedup_key: None,
    };
    if let Err(e) = db::insert_notification(&tx, &draft) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "studentId": student_id }))
}

fn handle_remove(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let id = match required_str(req, "id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match conn.execute("DELETE FROM waitlist WHERE id = ?", [&id]) {
        Ok(n) if n > 0 => ok(&req.id, json!({ "removed": id })),
        Ok(_) => err(&req.id, "not_found", "waitlist entry not found", None),
        Err(e) => err(&req.id, "db_update_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "waitlist.add" => Some(handle_add(state, req)),
        "waitlist.list" => Some(handle_list(state, req)),
        "waitlist.admit" => Some(handle_admit(state, req)),
        "waitlist.remove" => Some(handle_remove(state, req)),
        _ => None,
    }
}
