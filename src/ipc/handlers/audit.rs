use serde_json::json;

use crate::errors::ApiError;
use crate::ipc::error::respond;
use crate::ipc::helpers::{require_admin, require_db, resolve_actor};
use crate::ipc::types::{AppState, Request};

fn handle_list(state: &mut AppState, req: &Request) -> Result<serde_json::Value, ApiError> {
    let conn = require_db(state)?;
    let actor = resolve_actor(conn, &req.params)?;
    require_admin(&actor)?;

    let limit = req
        .params
        .get("limit")
        .and_then(|v| v.as_u64())
        .unwrap_or(100)
        .min(1000) as i64;

    let mut stmt = conn.prepare(
        "SELECT action, actor_email, details, at FROM audit_log
         ORDER BY at DESC LIMIT ?",
    )?;
    let rows = stmt
        .query_map([limit], |r| {
            let details_raw: Option<String> = r.get(2)?;
            let details = details_raw
                .and_then(|raw| serde_json::from_str::<serde_json::Value>(&raw).ok())
                .unwrap_or(serde_json::Value::Null);
            Ok(json!({
                "action": r.get::<_, String>(0)?,
                "actorEmail": r.get::<_, String>(1)?,
                "details": details,
                "at": r.get::<_, String>(3)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "entries": rows }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "audit.list" => Some(respond(&req.id, handle_list(state, req))),
        _ => None,
    }
}
