use serde_json::json;

use crate::errors::ApiError;
use crate::ipc::error::respond;
use crate::ipc::helpers::{require_db, resolve_actor, today};
use crate::ipc::types::{AppState, Request};
use crate::requirement;

fn handle_status(state: &mut AppState, req: &Request) -> Result<serde_json::Value, ApiError> {
    let conn = require_db(state)?;
    let actor = resolve_actor(conn, &req.params)?;

    let now = today();
    let (window_start, deadline) = requirement::school_year_window(now, &state.config);
    let status = requirement::status(conn, &state.config, &actor.id, now)?;

    Ok(json!({
        "count": status.count,
        "hasMetRequirement": status.has_met_requirement,
        "daysRemaining": status.days_remaining,
        "isPastDeadline": status.is_past_deadline,
        "windowStart": window_start.format("%Y-%m-%d").to_string(),
        "deadline": deadline.format("%Y-%m-%d").to_string(),
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "requirement.status" => Some(respond(&req.id, handle_status(state, req))),
        _ => None,
    }
}
