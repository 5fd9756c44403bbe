use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::model::StudentStatus;
use rusqlite::Connection;
use serde_json::json;

fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.to_string())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

fn optional_str(req: &Request, key: &str) -> Option<String> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.to_string())
}

fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

fn student_json(student: &crate::model::Student) -> serde_json::Value {
    serde_json::to_value(student).unwrap_or_else(|_| json!({}))
}

fn handle_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let scope = optional_str(req, "scope").unwrap_or_else(|| "all".to_string());
    let class_filter = optional_str(req, "className");

    let students = match db::load_students(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let filtered: Vec<serde_json::Value> = students
        .iter()
        .filter(|s| match scope.as_str() {
            "active" => s.status == StudentStatus::Active,
            "dismissed" => s.status == StudentStatus::Dismissed,
            _ => true,
        })
        .filter(|s| {
            class_filter
                .as_deref()
                .map(|c| s.class_name == c)
                .unwrap_or(true)
        })
        .map(student_json)
        .collect();

    ok(&req.id, json!({ "students": filtered }))
}

fn handle_register(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let class_name = match required_str(req, "className") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let gender = optional_str(req, "gender").unwrap_or_default();
    let birth_date = optional_str(req, "birthDate").unwrap_or_default();
    let guardian = optional_str(req, "guardian").unwrap_or_default();
    let whatsapp = optional_str(req, "whatsapp").unwrap_or_default();
    let registration_date = optional_str(req, "registrationDate")
        .unwrap_or_else(|| chrono::Local::now().format("%Y-%m-%d").to_string());

    let id = uuid::Uuid::new_v4().to_string();
    let res = conn.execute(
        "INSERT INTO students(id, first_name, last_name, gender, birth_date, class_name,
                              guardian, whatsapp, registration_date, status)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, 'active')",
        (
            &id,
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
    if let Err(e) = res {
        return err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "students" })),
        );
    }

    match db::load_student(conn, &id) {
        Ok(Some(s)) => ok(&req.id, json!({ "student": student_json(&s) })),
        Ok(None) => err(&req.id, "db_query_failed", "student vanished", None),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

const UPDATABLE_FIELDS: &[(&str, &str)] = &[
    ("firstName", "first_name"),
    ("lastName", "last_name"),
    ("gender", "gender"),
    ("birthDate", "birth_date"),
    ("className", "class_name"),
    ("guardian", "guardian"),
    ("whatsapp", "whatsapp"),
];

fn handle_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let id = match required_str(req, "id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match db::load_student(conn, &id) {
        Ok(Some(_)) => {}
        Ok(None) => return err(&req.id, "not_found", "student not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    for (param, column) in UPDATABLE_FIELDS {
        let Some(value) = optional_str(req, param) else {
            continue;
        };
        let sql = format!("UPDATE students SET {} = ? WHERE id = ?", column);
        if let Err(e) = conn.execute(&sql, (&value, &id)) {
            return err(
                &req.id,
                "db_update_failed",
                e.to_string(),
                Some(json!({ "table": "students", "column": column })),
            );
        }
    }

    match db::load_student(conn, &id) {
        Ok(Some(s)) => ok(&req.id, json!({ "student": student_json(&s) })),
        Ok(None) => err(&req.id, "not_found", "student not found", None),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

/// Administrative removal, distinct from dismissal: the student row and all
/// dependent rows go away.
fn handle_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let id = match required_str(req, "id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match db::load_student(conn, &id) {
        Ok(Some(_)) => {}
        Ok(None) => return err(&req.id, "not_found", "student not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let tx = match conn.unchecked_transaction() {
        Ok(tx) => tx,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    let steps = [
        "DELETE FROM attendance WHERE student_id = ?",
        "DELETE FROM grades WHERE student_id = ?",
        "DELETE FROM participation WHERE student_id = ?",
        "DELETE FROM students WHERE id = ?",
    ];
    for sql in steps {
        if let Err(e) = tx.execute(sql, [&id]) {
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "deleted": id }))
}

/// Manual dismissed -> active restore. The escalation engine recomputes from
/// full history, so a still-leading absence streak re-dismisses on the next
/// attendance change.
fn handle_restore(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let id = match required_str(req, "id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let student = match db::load_student(conn, &id) {
        Ok(Some(s)) => s,
        Ok(None) => return err(&req.id, "not_found", "student not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if student.status != StudentStatus::Dismissed {
        return err(&req.id, "conflict", "student is not dismissed", None);
    }

    if let Err(e) = conn.execute("UPDATE students SET status = 'active' WHERE id = ?", [&id]) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    match db::load_student(conn, &id) {
        Ok(Some(s)) => ok(&req.id, json!({ "student": student_json(&s) })),
        Ok(None) => err(&req.id, "not_found", "student not found", None),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" => Some(handle_list(state, req)),
        "students.register" => Some(handle_register(state, req)),
        "students.update" => Some(handle_update(state, req)),
        "students.delete" => Some(handle_delete(state, req)),
        "students.restore" => Some(handle_restore(state, req)),
        _ => None,
    }
}
