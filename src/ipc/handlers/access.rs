use serde_json::json;
use uuid::Uuid;

use crate::catalog;
use crate::db;
use crate::effects;
use crate::errors::ApiError;
use crate::ipc::error::respond;
use crate::ipc::helpers::{get_opt_str, get_str, require_admin, require_db, resolve_actor};
use crate::ipc::types::{AppState, Request};

fn handle_submit(state: &mut AppState, req: &Request) -> Result<serde_json::Value, ApiError> {
    let conn = require_db(state)?;
    let email = get_str(&req.params, "email")?.to_ascii_lowercase();
    let name = get_str(&req.params, "name")?;
    let role = get_opt_str(&req.params, "role").unwrap_or_else(|| "teacher".to_string());

    if catalog::find_teacher_by_email(conn, &email)?.is_some() {
        return Err(ApiError::validation(
            "This email is already on the roster.",
        ));
    }
    let pending: i64 = conn.query_row(
        "SELECT COUNT(*) FROM access_requests WHERE email = ? AND status = 'pending'",
        [&email],
        |r| r.get(0),
    )?;
    if pending > 0 {
        return Err(ApiError::validation(
            "An access request for this email is already pending.",
        ));
    }

    let request_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO access_requests(id, email, name, role, status, submitted_at)
         VALUES(?, ?, ?, ?, 'pending', ?)",
        (&request_id, &email, &name, &role, db::now_iso()),
    )?;

    Ok(json!({ "requestId": request_id }))
}

fn handle_list(state: &mut AppState, req: &Request) -> Result<serde_json::Value, ApiError> {
    let conn = require_db(state)?;
    let actor = resolve_actor(conn, &req.params)?;
    require_admin(&actor)?;

    let mut stmt = conn.prepare(
        "SELECT id, email, name, role, status, submitted_at FROM access_requests
         ORDER BY submitted_at",
    )?;
    let rows = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "email": r.get::<_, String>(1)?,
                "name": r.get::<_, String>(2)?,
                "role": r.get::<_, String>(3)?,
                "status": r.get::<_, String>(4)?,
                "submittedAt": r.get::<_, Option<String>>(5)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "requests": rows }))
}

struct PendingAccess {
    email: String,
    name: String,
    role: String,
}

fn load_pending(conn: &rusqlite::Connection, request_id: &str) -> Result<PendingAccess, ApiError> {
    use rusqlite::OptionalExtension;
    let row = conn
        .query_row(
            "SELECT email, name, role, status FROM access_requests WHERE id = ?",
            [request_id],
            |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, String>(3)?,
                ))
            },
        )
        .optional()?
        .ok_or(ApiError::NotFound("access request"))?;
    if row.3 != "pending" {
        return Err(ApiError::Validation(format!(
            "This access request is not pending (status: {}).",
            row.3
        )));
    }
    Ok(PendingAccess {
        email: row.0,
        name: row.1,
        role: row.2,
    })
}

fn handle_approve(state: &mut AppState, req: &Request) -> Result<serde_json::Value, ApiError> {
    let conn = require_db(state)?;
    let actor = resolve_actor(conn, &req.params)?;
    require_admin(&actor)?;
    let request_id = get_str(&req.params, "requestId")?;

    let _guard = state
        .lock
        .acquire(state.config.lock_wait)
        .ok_or(ApiError::Busy)?;
    let pending = load_pending(conn, &request_id)?;
    if catalog::find_teacher_by_email(conn, &pending.email)?.is_some() {
        return Err(ApiError::validation(
            "This email is already on the roster.",
        ));
    }

    let teacher_id = Uuid::new_v4().to_string();
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO teachers(id, email, name, grades, kind, role, active)
         VALUES(?, ?, ?, '[]', 'classroom', ?, 1)",
        (&teacher_id, &pending.email, &pending.name, &pending.role),
    )?;
    tx.execute(
        "UPDATE access_requests SET status = 'approved', decided_by = ?, decided_at = ?
         WHERE id = ?",
        (&actor.email, db::now_iso(), &request_id),
    )?;
    tx.commit()?;

    effects::audit_append(
        conn,
        "access.approve",
        &actor.email,
        json!({ "requestId": &request_id, "teacherId": &teacher_id }),
    );
    effects::send_notification(
        conn,
        &pending.email,
        "Observation scheduler access approved",
        "Your access request was approved. You can now book observations.",
    );

    Ok(json!({ "requestId": request_id, "teacherId": teacher_id }))
}

fn handle_deny(state: &mut AppState, req: &Request) -> Result<serde_json::Value, ApiError> {
    let conn = require_db(state)?;
    let actor = resolve_actor(conn, &req.params)?;
    require_admin(&actor)?;
    let request_id = get_str(&req.params, "requestId")?;

    let _guard = state
        .lock
        .acquire(state.config.lock_wait)
        .ok_or(ApiError::Busy)?;
    let pending = load_pending(conn, &request_id)?;
    conn.execute(
        "UPDATE access_requests SET status = 'denied', decided_by = ?, decided_at = ?
         WHERE id = ?",
        (&actor.email, db::now_iso(), &request_id),
    )?;

    effects::audit_append(
        conn,
        "access.deny",
        &actor.email,
        json!({ "requestId": &request_id, "email": &pending.email }),
    );

    Ok(json!({ "requestId": request_id, "status": "denied" }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "access.submit" => handle_submit(state, req),
        "access.list" => handle_list(state, req),
        "access.approve" => handle_approve(state, req),
        "access.deny" => handle_deny(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
