use chrono::NaiveDate;
use rusqlite::Connection;

use super::types::AppState;
use crate::catalog::{self, Role, Teacher};
use crate::errors::ApiError;

pub fn require_db(state: &AppState) -> Result<&Connection, ApiError> {
    state.db.as_ref().ok_or(ApiError::NoWorkspace)
}

pub fn get_str(params: &serde_json::Value, key: &str) -> Result<String, ApiError> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::bad_params(format!("missing {}", key)))
}

pub fn get_opt_str(params: &serde_json::Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub fn get_bool(params: &serde_json::Value, key: &str, default: bool) -> bool {
    params.get(key).and_then(|v| v.as_bool()).unwrap_or(default)
}

pub fn get_date(params: &serde_json::Value, key: &str) -> Result<NaiveDate, ApiError> {
    let raw = get_str(params, key)?;
    NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
        .map_err(|_| ApiError::bad_params(format!("{} must be YYYY-MM-DD", key)))
}

pub fn get_periods(params: &serde_json::Value, key: &str) -> Result<Vec<u32>, ApiError> {
    let items = params
        .get(key)
        .and_then(|v| v.as_array())
        .ok_or_else(|| ApiError::bad_params(format!("missing {}", key)))?;
    let mut periods = Vec::with_capacity(items.len());
    for item in items {
        let value = match item {
            serde_json::Value::Number(n) => n.as_u64(),
            serde_json::Value::String(s) => s.trim().parse::<u64>().ok(),
            _ => None,
        };
        let Some(v) = value else {
            return Err(ApiError::bad_params(format!(
                "{} must be an array of period numbers",
                key
            )));
        };
        periods.push(v as u32);
    }
    periods.sort_unstable();
    periods.dedup();
    Ok(periods)
}

pub fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

/// Resolve the caller from params.actorEmail against the roster.
pub fn resolve_actor(conn: &Connection, params: &serde_json::Value) -> Result<Teacher, ApiError> {
    let email = get_str(params, "actorEmail")?;
    let teacher = catalog::find_teacher_by_email(conn, &email)?
        .ok_or_else(|| ApiError::Unauthorized(format!("No roster account for {}.", email)))?;
    if !teacher.active {
        return Err(ApiError::Unauthorized(
            "This account has been deactivated.".to_string(),
        ));
    }
    Ok(teacher)
}

pub fn require_admin(actor: &Teacher) -> Result<(), ApiError> {
    if actor.role != Role::Admin {
        return Err(ApiError::Unauthorized(
            "This action requires an administrator.".to_string(),
        ));
    }
    Ok(())
}

pub fn require_booker(actor: &Teacher) -> Result<(), ApiError> {
    if actor.role == Role::ReadOnly {
        return Err(ApiError::Unauthorized(
            "Read-only accounts cannot book observations.".to_string(),
        ));
    }
    Ok(())
}
