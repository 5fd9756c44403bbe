use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::model::AUDIENCE_ALL;
use rusqlite::Connection;
use serde_json::json;

fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.to_string())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

/// A notification is visible to a user when it targets their id, targets
/// everyone, or targets their role.
fn visible_to(
    row_user_id: &str,
    row_role: Option<&str>,
    user_id: &str,
    role: Option<&str>,
) -> bool {
    if row_user_id == user_id {
        return true;
    }
    if row_user_id == AUDIENCE_ALL {
        return match (row_role, role) {
            (None, _) => true,
            (Some(rr), Some(r)) => rr == r,
            (Some(_), None) => false,
        };
    }
    false
}

fn handle_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let user_id = match required_str(req, "userId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let role = req
        .params
        .get("role")
        .and_then(|v| v.as_str())
        .map(|v| v.to_string());

    let mut stmt = match conn.prepare(
        "SELECT id, user_id, role, title, message, kind, is_read, created_at
         FROM notifications ORDER BY created_at DESC, rowid DESC",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt.query_map([], |r| {
        Ok((
            r.get::<_, String>(0)?,
            r.get::<_, String>(1)?,
            r.get::<_, Option<String>>(2)?,
            r.get::<_, String>(3)?,
            r.get::<_, String>(4)?,
            r.get::<_, String>(5)?,
            r.get::<_, i64>(6)? != 0,
            r.get::<_, String>(7)?,
        ))
    });
    let rows = match rows.and_then(|it| it.collect::<Result<Vec<_>, _>>()) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let list: Vec<serde_json::Value> = rows
        .into_iter()
        .filter(|(_, row_user, row_role, ..)| {
            visible_to(row_user, row_role.as_deref(), &user_id, role.as_deref())
        })
        .map(
            |(id, row_user, row_role, title, message, kind, is_read, created_at)| {
                json!({
                    "id": id,
                    "userId": row_user,
                    "role": row_role,
                    "title": title,
                    "message": message,
                    "kind": kind,
                    "isRead": is_read,
                    "createdAt": created_at,
                })
            },
        )
        .collect();

    ok(&req.id, json!({ "notifications": list }))
}

fn handle_mark_read(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let id = match required_str(req, "id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match conn.execute("UPDATE notifications SET is_read = 1 WHERE id = ?", [&id]) {
        Ok(n) if n > 0 => ok(&req.id, json!({ "ok": true })),
        Ok(_) => err(&req.id, "not_found", "notification not found", None),
        Err(e) => err(&req.id, "db_update_failed", e.to_string(), None),
    }
}

fn handle_mark_all_read(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let user_id = match required_str(req, "userId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let role = req.params.get("role").and_then(|v| v.as_str());

    let res = match role {
        Some(r) => conn.execute(
            "UPDATE notifications SET is_read = 1
             WHERE user_id = ?1 OR (user_id = ?2 AND (role IS NULL OR role = ?3))",
            (&user_id, AUDIENCE_ALL, r),
        ),
        None => conn.execute(
            "UPDATE notifications SET is_read = 1
             WHERE user_id = ?1 OR (user_id = ?2 AND role IS NULL)",
            (&user_id, AUDIENCE_ALL),
        ),
    };
    match res {
        Ok(n) => ok(&req.id, json!({ "updated": n })),
        Err(e) => err(&req.id, "db_update_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "notifications.list" => Some(handle_list(state, req)),
        "notifications.markRead" => Some(handle_mark_read(state, req)),
        "notifications.markAllRead" => Some(handle_mark_all_read(state, req)),
        _ => None,
    }
}
