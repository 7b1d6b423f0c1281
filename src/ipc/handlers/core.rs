use serde_json::json;
use std::path::PathBuf;

use crate::config;
use crate::db;
use crate::errors::ApiError;
use crate::ipc::error::{err, ok, respond};
use crate::ipc::helpers::get_str;
use crate::ipc::types::{AppState, Request};

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string())
        }),
    )
}

fn handle_workspace_select(state: &mut AppState, req: &Request) -> serde_json::Value {
    let path = match get_str(&req.params, "path") {
        Ok(p) => PathBuf::from(p),
        Err(e) => return respond(&req.id, Err(e)),
    };

    match db::open_db(&path) {
        Ok(conn) => {
            state.config = config::load(&conn);
            state.workspace = Some(path.clone());
            state.db = Some(conn);
            ok(&req.id, json!({ "workspacePath": path.to_string_lossy() }))
        }
        Err(e) => err(&req.id, "db_open_failed", format!("{e:?}"), None),
    }
}

fn handle_settings_set(state: &mut AppState, req: &Request) -> Result<serde_json::Value, ApiError> {
    let conn = crate::ipc::helpers::require_db(state)?;
    let actor = crate::ipc::helpers::resolve_actor(conn, &req.params)?;
    crate::ipc::helpers::require_admin(&actor)?;

    let key = get_str(&req.params, "key")?;
    let value = req
        .params
        .get("value")
        .cloned()
        .ok_or_else(|| ApiError::bad_params("missing value"))?;
    db::settings_set_json(conn, &key, &value)?;
    crate::effects::audit_append(
        conn,
        "settings.set",
        &actor.email,
        json!({ "key": &key }),
    );

    // Settings feed the immutable config; rebuild it so the change applies
    // to subsequent operations.
    if let Some(conn) = state.db.as_ref() {
        state.config = config::load(conn);
    }
    Ok(json!({ "key": key }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "workspace.select" => Some(handle_workspace_select(state, req)),
        "settings.set" => {
            let resp = handle_settings_set(state, req);
            Some(respond(&req.id, resp))
        }
        _ => None,
    }
}
