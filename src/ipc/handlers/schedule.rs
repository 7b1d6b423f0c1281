use serde_json::json;

use crate::availability;
use crate::catalog;
use crate::errors::ApiError;
use crate::ipc::error::respond;
use crate::ipc::helpers::{get_date, get_str, require_db, resolve_actor};
use crate::ipc::types::{AppState, Request};

fn handle_bell(state: &mut AppState, req: &Request) -> Result<serde_json::Value, ApiError> {
    let conn = require_db(state)?;
    let grade = get_str(&req.params, "grade")?;
    let cohort = catalog::cohort_for_grade(&grade);
    let slots = catalog::bell_schedule(conn, cohort)?;
    Ok(json!({
        "cohort": cohort,
        "slots": slots
            .iter()
            .map(|s| json!({
                "period": s.period,
                "startsAt": &s.starts_at,
                "endsAt": &s.ends_at,
            }))
            .collect::<Vec<_>>()
    }))
}

fn handle_resolve(state: &mut AppState, req: &Request) -> Result<serde_json::Value, ApiError> {
    let conn = require_db(state)?;
    let observer = resolve_actor(conn, &req.params)?;

    let teacher_id = get_str(&req.params, "teacherId")?;
    let target =
        catalog::find_teacher(conn, &teacher_id)?.ok_or(ApiError::NotFound("teacher"))?;
    let date = get_date(&req.params, "date")?;

    let slots = availability::resolve_slots(conn, &observer, &target, date)?;
    Ok(json!({
        "date": date.format("%Y-%m-%d").to_string(),
        "teacher": { "id": &target.id, "name": &target.name, "room": &target.room },
        "slots": slots
            .iter()
            .map(|s| json!({
                "period": s.period,
                "startsAt": &s.starts_at,
                "endsAt": &s.ends_at,
                "available": s.available,
                "reason": s.reason,
            }))
            .collect::<Vec<_>>()
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "schedule.bell" => handle_bell(state, req),
        "slots.resolve" => handle_resolve(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
