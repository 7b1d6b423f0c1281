use serde_json::json;
use uuid::Uuid;

use crate::catalog::{self, grades_to_json, Teacher};
use crate::db;
use crate::effects;
use crate::errors::ApiError;
use crate::ipc::error::respond;
use crate::ipc::helpers::{
    get_bool, get_opt_str, get_str, require_admin, require_db, resolve_actor,
};
use crate::ipc::types::{AppState, Request};

pub fn teacher_json(teacher: &Teacher) -> serde_json::Value {
    json!({
        "id": &teacher.id,
        "email": &teacher.email,
        "name": &teacher.name,
        "room": &teacher.room,
        "grades": &teacher.grades,
        "kind": teacher.kind.as_str(),
        "role": teacher.role.as_str(),
        "unavailablePeriods": &teacher.unavailable_periods,
        "lunchPeriod": teacher.lunch_period,
        "active": teacher.active,
    })
}

fn get_grades(params: &serde_json::Value, key: &str) -> Result<Vec<String>, ApiError> {
    let Some(value) = params.get(key) else {
        return Ok(Vec::new());
    };
    let items = value
        .as_array()
        .ok_or_else(|| ApiError::bad_params(format!("{} must be an array", key)))?;
    Ok(items
        .iter()
        .filter_map(|v| match v {
            serde_json::Value::String(s) => Some(s.trim().to_string()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .filter(|s| !s.is_empty())
        .collect())
}

fn get_opt_periods(
    params: &serde_json::Value,
    key: &str,
) -> Result<Option<Vec<u32>>, ApiError> {
    if params.get(key).map(|v| v.is_null()).unwrap_or(true) {
        return Ok(None);
    }
    crate::ipc::helpers::get_periods(params, key).map(Some)
}

fn handle_list(state: &mut AppState, req: &Request) -> Result<serde_json::Value, ApiError> {
    let conn = require_db(state)?;
    let include_inactive = get_bool(&req.params, "includeInactive", false);
    let teachers = catalog::list_teachers(conn, include_inactive)?;
    Ok(json!({
        "teachers": teachers.iter().map(teacher_json).collect::<Vec<_>>()
    }))
}

fn handle_create(state: &mut AppState, req: &Request) -> Result<serde_json::Value, ApiError> {
    let conn = require_db(state)?;

    // First-run bootstrap: until an admin exists, the roster can be seeded
    // without credentials. Afterwards creation is admin-only.
    let actor_email = if catalog::admin_exists(conn)? {
        let actor = resolve_actor(conn, &req.params)?;
        require_admin(&actor)?;
        actor.email
    } else {
        get_opt_str(&req.params, "actorEmail").unwrap_or_else(|| "setup".to_string())
    };

    let email = get_str(&req.params, "email")?.to_ascii_lowercase();
    let name = get_str(&req.params, "name")?;
    if catalog::find_teacher_by_email(conn, &email)?.is_some() {
        return Err(ApiError::validation(
            "A teacher with this email already exists.",
        ));
    }

    let room = get_opt_str(&req.params, "room");
    let grades = get_grades(&req.params, "grades")?;
    let kind = get_opt_str(&req.params, "kind").unwrap_or_else(|| "classroom".to_string());
    let role = get_opt_str(&req.params, "role").unwrap_or_else(|| "teacher".to_string());
    let unavailable = get_opt_periods(&req.params, "unavailablePeriods")?;
    let lunch_period = req
        .params
        .get("lunchPeriod")
        .and_then(|v| v.as_u64())
        .map(|v| v as i64);

    let _guard = state
        .lock
        .acquire(state.config.lock_wait)
        .ok_or(ApiError::Busy)?;
    let teacher_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO teachers(id, email, name, room, grades, kind, role, unavailable_periods, lunch_period, active)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, 1)",
        (
            &teacher_id,
            &email,
            &name,
            &room,
            grades_to_json(&grades),
            &kind,
            &role,
            unavailable.as_deref().map(db::period_set_to_json),
            lunch_period,
        ),
    )?;

    effects::audit_append(
        conn,
        "teacher.create",
        &actor_email,
        json!({ "teacherId": &teacher_id, "email": &email }),
    );

    Ok(json!({ "teacherId": teacher_id, "email": email }))
}

fn handle_update(state: &mut AppState, req: &Request) -> Result<serde_json::Value, ApiError> {
    let conn = require_db(state)?;
    let actor = resolve_actor(conn, &req.params)?;
    require_admin(&actor)?;

    let teacher_id = get_str(&req.params, "teacherId")?;
    let mut teacher =
        catalog::find_teacher(conn, &teacher_id)?.ok_or(ApiError::NotFound("teacher"))?;

    let patch = req
        .params
        .get("patch")
        .cloned()
        .ok_or_else(|| ApiError::bad_params("missing patch"))?;

    if let Some(name) = get_opt_str(&patch, "name") {
        teacher.name = name;
    }
    if patch.get("room").is_some() {
        teacher.room = get_opt_str(&patch, "room");
    }
    if patch.get("grades").is_some() {
        teacher.grades = get_grades(&patch, "grades")?;
    }
    if let Some(kind) = get_opt_str(&patch, "kind") {
        teacher.kind = catalog::TeacherKind::parse(&kind);
    }
    if let Some(role) = get_opt_str(&patch, "role") {
        teacher.role = catalog::Role::parse(&role);
    }
    if patch.get("unavailablePeriods").is_some() {
        teacher.unavailable_periods = get_opt_periods(&patch, "unavailablePeriods")?;
    }
    if patch.get("lunchPeriod").is_some() {
        teacher.lunch_period = patch
            .get("lunchPeriod")
            .and_then(|v| v.as_u64())
            .map(|v| v as u32);
    }

    let _guard = state
        .lock
        .acquire(state.config.lock_wait)
        .ok_or(ApiError::Busy)?;
    conn.execute(
        "UPDATE teachers SET name = ?, room = ?, grades = ?, kind = ?, role = ?,
            unavailable_periods = ?, lunch_period = ?
         WHERE id = ?",
        (
            &teacher.name,
            &teacher.room,
            grades_to_json(&teacher.grades),
            teacher.kind.as_str(),
            teacher.role.as_str(),
            teacher
                .unavailable_periods
                .as_deref()
                .map(db::period_set_to_json),
            teacher.lunch_period,
            &teacher_id,
        ),
    )?;

    effects::audit_append(
        conn,
        "teacher.update",
        &actor.email,
        json!({ "teacherId": &teacher_id }),
    );

    Ok(json!({ "teacher": teacher_json(&teacher) }))
}

fn handle_set_active(state: &mut AppState, req: &Request) -> Result<serde_json::Value, ApiError> {
    let conn = require_db(state)?;
    let actor = resolve_actor(conn, &req.params)?;
    require_admin(&actor)?;

    let teacher_id = get_str(&req.params, "teacherId")?;
    if catalog::find_teacher(conn, &teacher_id)?.is_none() {
        return Err(ApiError::NotFound("teacher"));
    }
    let active = req
        .params
        .get("active")
        .and_then(|v| v.as_bool())
        .ok_or_else(|| ApiError::bad_params("missing active"))?;

    let _guard = state
        .lock
        .acquire(state.config.lock_wait)
        .ok_or(ApiError::Busy)?;
    conn.execute(
        "UPDATE teachers SET active = ? WHERE id = ?",
        (active as i64, &teacher_id),
    )?;

    effects::audit_append(
        conn,
        "teacher.setActive",
        &actor.email,
        json!({ "teacherId": &teacher_id, "active": active }),
    );

    Ok(json!({ "teacherId": teacher_id, "active": active }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "teachers.list" => handle_list(state, req),
        "teachers.create" => handle_create(state, req),
        "teachers.update" => handle_update(state, req),
        "teachers.setActive" => handle_set_active(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
