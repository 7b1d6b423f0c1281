use rusqlite::{Connection, OptionalExtension, Row};

use crate::booking;
use crate::catalog::{self, Role, Teacher};
use crate::config::SchedulerConfig;
use crate::db;
use crate::effects;
use crate::errors::ApiError;
use crate::lock::StoreLock;

pub const DENIAL_CANCEL_REASON: &str = "Substitute coverage denied";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubRequestStatus {
    Pending,
    Approved,
    Denied,
    Canceled,
}

impl SubRequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubRequestStatus::Pending => "pending",
            SubRequestStatus::Approved => "approved",
            SubRequestStatus::Denied => "denied",
            SubRequestStatus::Canceled => "canceled",
        }
    }

    pub fn parse(raw: &str) -> SubRequestStatus {
        match raw {
            "approved" => SubRequestStatus::Approved,
            "denied" => SubRequestStatus::Denied,
            "canceled" => SubRequestStatus::Canceled,
            _ => SubRequestStatus::Pending,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SubstituteRequest {
    pub id: String,
    pub observation_id: String,
    pub requester_email: String,
    pub date: String,
    pub periods: Vec<u32>,
    pub status: SubRequestStatus,
    pub deny_reason: Option<String>,
}

const REQUEST_COLUMNS: &str =
    "id, observation_id, requester_email, date, periods, status, deny_reason";

fn request_from_row(row: &Row<'_>) -> Result<SubstituteRequest, rusqlite::Error> {
    let periods_raw: String = row.get(4)?;
    let status_raw: String = row.get(5)?;
    Ok(SubstituteRequest {
        id: row.get(0)?,
        observation_id: row.get(1)?,
        requester_email: row.get(2)?,
        date: row.get(3)?,
        periods: db::parse_period_set(&periods_raw),
        status: SubRequestStatus::parse(&status_raw),
        deny_reason: row.get(6)?,
    })
}

pub fn find_request(
    conn: &Connection,
    id: &str,
) -> Result<Option<SubstituteRequest>, rusqlite::Error> {
    let sql = format!("SELECT {} FROM substitute_requests WHERE id = ?", REQUEST_COLUMNS);
    conn.query_row(&sql, [id], |r| request_from_row(r)).optional()
}

pub fn find_request_for_observation(
    conn: &Connection,
    observation_id: &str,
) -> Result<Option<SubstituteRequest>, rusqlite::Error> {
    let sql = format!(
        "SELECT {} FROM substitute_requests WHERE observation_id = ?",
        REQUEST_COLUMNS
    );
    conn.query_row(&sql, [observation_id], |r| request_from_row(r))
        .optional()
}

pub fn list_requests(
    conn: &Connection,
    status: Option<SubRequestStatus>,
) -> Result<Vec<SubstituteRequest>, rusqlite::Error> {
    let mut out = Vec::new();
    match status {
        Some(s) => {
            let sql = format!(
                "SELECT {} FROM substitute_requests WHERE status = ? ORDER BY date",
                REQUEST_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map([s.as_str()], |r| request_from_row(r))?;
            for row in rows {
                out.push(row?);
            }
        }
        None => {
            let sql = format!(
                "SELECT {} FROM substitute_requests ORDER BY date",
                REQUEST_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map([], |r| request_from_row(r))?;
            for row in rows {
                out.push(row?);
            }
        }
    }
    Ok(out)
}

fn load_pending(
    conn: &Connection,
    request_id: &str,
) -> Result<SubstituteRequest, ApiError> {
    let request =
        find_request(conn, request_id)?.ok_or(ApiError::NotFound("substitute request"))?;
    if request.status != SubRequestStatus::Pending {
        return Err(ApiError::Validation(format!(
            "This substitute request is not pending (status: {}).",
            request.status.as_str()
        )));
    }
    Ok(request)
}

/// pending -> approved. Confirms the parent observation and creates its
/// calendar artifacts.
pub fn approve_request(
    conn: &Connection,
    cfg: &SchedulerConfig,
    lock: &StoreLock,
    actor: &Teacher,
    request_id: &str,
) -> Result<(), ApiError> {
    if actor.role != Role::Admin {
        return Err(ApiError::Unauthorized(
            "Only an administrator can approve substitute requests.".to_string(),
        ));
    }

    let _guard = lock.acquire(cfg.lock_wait).ok_or(ApiError::Busy)?;
    let request = load_pending(conn, request_id)?;
    let now = db::now_iso();

    conn.execute(
        "UPDATE substitute_requests SET status = 'approved', decided_by = ?, decided_at = ?
         WHERE id = ?",
        (&actor.email, &now, request_id),
    )?;
    conn.execute(
        "UPDATE observations SET sub_status = 'approved', status = 'confirmed',
            modified_at = ?, modified_by = ?
         WHERE id = ?",
        (&now, &actor.email, &request.observation_id),
    )?;

    if let Some(observation) = booking::find_observation(conn, &request.observation_id)? {
        let observer = catalog::find_teacher(conn, &observation.observer_id)?;
        let target = catalog::find_teacher(conn, &observation.teacher_id)?;
        if let (Some(observer), Some(target)) = (observer, target) {
            booking::attach_calendar_artifacts(
                conn,
                &observer,
                &target,
                &observation.id,
                observation.date,
                &observation.periods,
            );
        }
    }

    effects::send_notification(
        conn,
        &request.requester_email,
        "Substitute coverage approved",
        &format!(
            "Your substitute request for {} (periods {:?}) was approved.",
            request.date, request.periods
        ),
    );
    effects::audit_append(
        conn,
        "sub.approve",
        &actor.email,
        serde_json::json!({
            "requestId": request_id,
            "observationId": &request.observation_id,
        }),
    );

    Ok(())
}

/// pending -> denied. Cascades: the parent observation is canceled and its
/// calendar artifacts removed.
pub fn deny_request(
    conn: &Connection,
    cfg: &SchedulerConfig,
    lock: &StoreLock,
    actor: &Teacher,
    request_id: &str,
    reason: &str,
) -> Result<(), ApiError> {
    if actor.role != Role::Admin {
        return Err(ApiError::Unauthorized(
            "Only an administrator can deny substitute requests.".to_string(),
        ));
    }

    let _guard = lock.acquire(cfg.lock_wait).ok_or(ApiError::Busy)?;
    let request = load_pending(conn, request_id)?;
    let now = db::now_iso();

    conn.execute(
        "UPDATE substitute_requests SET status = 'denied', decided_by = ?, decided_at = ?,
            deny_reason = ?
         WHERE id = ?",
        (&actor.email, &now, reason, request_id),
    )?;
    conn.execute(
        "UPDATE observations SET sub_status = 'denied', status = 'canceled',
            cancel_reason = ?, canceled_at = ?, canceled_by = ?, modified_at = ?, modified_by = ?
         WHERE id = ?",
        (
            DENIAL_CANCEL_REASON,
            &now,
            &actor.email,
            &now,
            &actor.email,
            &request.observation_id,
        ),
    )?;

    if let Some(observation) = booking::find_observation(conn, &request.observation_id)? {
        booking::remove_calendar_artifacts(conn, &observation);
    }

    effects::send_notification(
        conn,
        &request.requester_email,
        "Substitute coverage denied",
        &format!(
            "Your substitute request for {} was denied: {}",
            request.date, reason
        ),
    );
    effects::audit_append(
        conn,
        "sub.deny",
        &actor.email,
        serde_json::json!({
            "requestId": request_id,
            "observationId": &request.observation_id,
            "reason": reason,
        }),
    );

    Ok(())
}

/// pending/approved -> canceled, triggered by the parent observation being
/// canceled or rescheduled to no longer need coverage. Terminal states are
/// left untouched. Runs under the caller's lock.
pub fn cancel_request_for_observation(
    conn: &Connection,
    observation_id: &str,
    actor_email: &str,
) -> Result<(), rusqlite::Error> {
    conn.execute(
        "UPDATE substitute_requests SET status = 'canceled', decided_by = ?, decided_at = ?
         WHERE observation_id = ? AND status IN ('pending', 'approved')",
        (actor_email, db::now_iso(), observation_id),
    )?;
    Ok(())
}
