use serde_json::json;

use crate::booking::{self, BookingRequest};
use crate::catalog;
use crate::errors::ApiError;
use crate::ipc::error::respond;
use crate::ipc::helpers::{
    get_bool, get_date, get_opt_str, get_periods, get_str, require_booker, require_db,
    resolve_actor, today,
};
use crate::ipc::types::{AppState, Request};

fn observation_json(
    conn: &rusqlite::Connection,
    obs: &booking::Observation,
) -> Result<serde_json::Value, ApiError> {
    // Names and rooms are a display cache; the roster stays authoritative.
    let observer = catalog::find_teacher(conn, &obs.observer_id)?;
    let teacher = catalog::find_teacher(conn, &obs.teacher_id)?;
    Ok(json!({
        "id": &obs.id,
        "observerId": &obs.observer_id,
        "observerName": observer.as_ref().map(|t| t.name.clone()),
        "teacherId": &obs.teacher_id,
        "teacherName": teacher.as_ref().map(|t| t.name.clone()),
        "room": teacher.as_ref().and_then(|t| t.room.clone()),
        "date": obs.date.format("%Y-%m-%d").to_string(),
        "periods": &obs.periods,
        "needsSub": obs.needs_sub,
        "subStatus": obs.sub_status.as_str(),
        "status": obs.status.as_str(),
        "cancelReason": &obs.cancel_reason,
        "createdAt": &obs.created_at,
    }))
}

fn handle_create(state: &mut AppState, req: &Request) -> Result<serde_json::Value, ApiError> {
    let conn = require_db(state)?;
    let observer = resolve_actor(conn, &req.params)?;
    require_booker(&observer)?;

    let request = BookingRequest {
        teacher_id: get_str(&req.params, "teacherId")?,
        date: get_date(&req.params, "date")?,
        periods: get_periods(&req.params, "periods")?,
        needs_sub: get_bool(&req.params, "needsSub", false),
    };

    let outcome = booking::create_booking(
        conn,
        &state.config,
        &state.lock,
        &observer,
        &request,
        today(),
    )?;

    Ok(json!({
        "observationId": outcome.observation_id,
        "status": outcome.status.as_str(),
        "subStatus": outcome.sub_status.as_str(),
        "alreadyMetRequirement": outcome.already_met_requirement,
    }))
}

fn handle_list(state: &mut AppState, req: &Request) -> Result<serde_json::Value, ApiError> {
    let conn = require_db(state)?;
    let include_canceled = get_bool(&req.params, "includeCanceled", false);

    let mut sql = String::from(
        "SELECT id FROM observations WHERE 1=1",
    );
    let mut args: Vec<String> = Vec::new();
    if let Some(teacher_id) = get_opt_str(&req.params, "teacherId") {
        sql.push_str(" AND teacher_id = ?");
        args.push(teacher_id);
    }
    if let Some(observer_email) = get_opt_str(&req.params, "observerEmail") {
        let observer = catalog::find_teacher_by_email(conn, &observer_email)?
            .ok_or(ApiError::NotFound("teacher"))?;
        sql.push_str(" AND observer_id = ?");
        args.push(observer.id);
    }
    if let Some(date) = get_opt_str(&req.params, "date") {
        sql.push_str(" AND date = ?");
        args.push(date);
    }
    if !include_canceled {
        sql.push_str(" AND status != 'canceled'");
    }
    sql.push_str(" ORDER BY date, id");

    let mut stmt = conn.prepare(&sql)?;
    let ids = stmt
        .query_map(rusqlite::params_from_iter(args.iter()), |r| {
            r.get::<_, String>(0)
        })?
        .collect::<Result<Vec<_>, _>>()?;
    drop(stmt);

    let mut rows = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(obs) = booking::find_observation(conn, &id)? {
            rows.push(observation_json(conn, &obs)?);
        }
    }
    Ok(json!({ "observations": rows }))
}

fn handle_reschedule(state: &mut AppState, req: &Request) -> Result<serde_json::Value, ApiError> {
    let conn = require_db(state)?;
    let actor = resolve_actor(conn, &req.params)?;
    let observation_id = get_str(&req.params, "observationId")?;

    let existing = booking::find_observation(conn, &observation_id)?
        .ok_or(ApiError::NotFound("observation"))?;
    let request = BookingRequest {
        teacher_id: existing.teacher_id.clone(),
        date: get_date(&req.params, "date")?,
        periods: get_periods(&req.params, "periods")?,
        needs_sub: get_bool(&req.params, "needsSub", existing.needs_sub),
    };

    let updated = booking::reschedule_booking(
        conn,
        &state.config,
        &state.lock,
        &actor,
        &observation_id,
        &request,
        today(),
    )?;

    Ok(json!({
        "observation": observation_json(conn, &updated)?,
    }))
}

fn handle_cancel(state: &mut AppState, req: &Request) -> Result<serde_json::Value, ApiError> {
    let conn = require_db(state)?;
    let actor = resolve_actor(conn, &req.params)?;
    let observation_id = get_str(&req.params, "observationId")?;
    let reason = get_opt_str(&req.params, "reason");

    booking::cancel_booking(
        conn,
        &state.config,
        &state.lock,
        &actor,
        &observation_id,
        reason.as_deref(),
    )?;

    Ok(json!({ "observationId": observation_id, "status": "canceled" }))
}

fn handle_delete(state: &mut AppState, req: &Request) -> Result<serde_json::Value, ApiError> {
    let conn = require_db(state)?;
    let actor = resolve_actor(conn, &req.params)?;
    let observation_id = get_str(&req.params, "observationId")?;

    booking::delete_booking(conn, &state.config, &state.lock, &actor, &observation_id)?;

    Ok(json!({ "observationId": observation_id, "deleted": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "observations.create" => handle_create(state, req),
        "observations.list" => handle_list(state, req),
        "observations.reschedule" => handle_reschedule(state, req),
        "observations.cancel" => handle_cancel(state, req),
        "observations.delete" => handle_delete(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
