use serde_json::json;

use crate::approval::{self, SubRequestStatus};
use crate::errors::ApiError;
use crate::ipc::error::respond;
use crate::ipc::helpers::{get_opt_str, get_str, require_admin, require_db, resolve_actor};
use crate::ipc::types::{AppState, Request};

fn handle_list(state: &mut AppState, req: &Request) -> Result<serde_json::Value, ApiError> {
    let conn = require_db(state)?;
    let actor = resolve_actor(conn, &req.params)?;
    require_admin(&actor)?;

    let status = match get_opt_str(&req.params, "status") {
        Some(raw) => match raw.as_str() {
            "pending" => Some(SubRequestStatus::Pending),
            "approved" => Some(SubRequestStatus::Approved),
            "denied" => Some(SubRequestStatus::Denied),
            "canceled" => Some(SubRequestStatus::Canceled),
            other => {
                return Err(ApiError::bad_params(format!(
                    "unknown status filter: {}",
                    other
                )))
            }
        },
        None => None,
    };

    let requests = approval::list_requests(conn, status)?;
    Ok(json!({
        "requests": requests
            .iter()
            .map(|r| json!({
                "id": &r.id,
                "observationId": &r.observation_id,
                "requesterEmail": &r.requester_email,
                "date": &r.date,
                "periods": &r.periods,
                "status": r.status.as_str(),
                "denyReason": &r.deny_reason,
            }))
            .collect::<Vec<_>>()
    }))
}

fn handle_approve(state: &mut AppState, req: &Request) -> Result<serde_json::Value, ApiError> {
    let conn = require_db(state)?;
    let actor = resolve_actor(conn, &req.params)?;
    let request_id = get_str(&req.params, "requestId")?;

    approval::approve_request(conn, &state.config, &state.lock, &actor, &request_id)?;

    Ok(json!({ "requestId": request_id, "status": "approved" }))
}

fn handle_deny(state: &mut AppState, req: &Request) -> Result<serde_json::Value, ApiError> {
    let conn = require_db(state)?;
    let actor = resolve_actor(conn, &req.params)?;
    let request_id = get_str(&req.params, "requestId")?;
    let reason = get_str(&req.params, "reason")?;

    approval::deny_request(conn, &state.config, &state.lock, &actor, &request_id, &reason)?;

    Ok(json!({ "requestId": request_id, "status": "denied" }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "subs.list" => handle_list(state, req),
        "subs.approve" => handle_approve(state, req),
        "subs.deny" => handle_deny(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
