use chrono::{Datelike, NaiveDate, Weekday};
use rusqlite::{Connection, OptionalExtension, Row};
use uuid::Uuid;

use crate::catalog::{self, Role, Teacher};
use crate::config::SchedulerConfig;
use crate::db;
use crate::effects;
use crate::errors::ApiError;
use crate::lock::StoreLock;
use crate::requirement;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObservationStatus {
    Confirmed,
    PendingSub,
    Canceled,
}

impl ObservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObservationStatus::Confirmed => "confirmed",
            ObservationStatus::PendingSub => "pending_sub",
            ObservationStatus::Canceled => "canceled",
        }
    }

    pub fn parse(raw: &str) -> ObservationStatus {
        match raw {
            "pending_sub" => ObservationStatus::PendingSub,
            "canceled" => ObservationStatus::Canceled,
            _ => ObservationStatus::Confirmed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubStatus {
    NotNeeded,
    Pending,
    Approved,
    Denied,
}

impl SubStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubStatus::NotNeeded => "not_needed",
            SubStatus::Pending => "pending",
            SubStatus::Approved => "approved",
            SubStatus::Denied => "denied",
        }
    }

    pub fn parse(raw: &str) -> SubStatus {
        match raw {
            "pending" => SubStatus::Pending,
            "approved" => SubStatus::Approved,
            "denied" => SubStatus::Denied,
            _ => SubStatus::NotNeeded,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Observation {
    pub id: String,
    pub observer_id: String,
    pub teacher_id: String,
    pub date: NaiveDate,
    pub periods: Vec<u32>,
    pub needs_sub: bool,
    pub sub_status: SubStatus,
    pub status: ObservationStatus,
    pub cancel_reason: Option<String>,
    pub observer_event_id: Option<String>,
    pub teacher_event_id: Option<String>,
    pub created_at: Option<String>,
}

const OBSERVATION_COLUMNS: &str = "id, observer_id, teacher_id, date, periods, needs_sub, \
     sub_status, status, cancel_reason, observer_event_id, teacher_event_id, created_at";

fn observation_from_row(row: &Row<'_>) -> Result<Observation, rusqlite::Error> {
    let date_raw: String = row.get(3)?;
    let periods_raw: String = row.get(4)?;
    let sub_status_raw: String = row.get(6)?;
    let status_raw: String = row.get(7)?;
    Ok(Observation {
        id: row.get(0)?,
        observer_id: row.get(1)?,
        teacher_id: row.get(2)?,
        date: NaiveDate::parse_from_str(&date_raw, "%Y-%m-%d").map_err(|_| {
            rusqlite::Error::FromSqlConversionFailure(
                3,
                rusqlite::types::Type::Text,
                format!("bad date: {}", date_raw).into(),
            )
        })?,
        periods: db::parse_period_set(&periods_raw),
        needs_sub: row.get::<_, i64>(5)? != 0,
        sub_status: SubStatus::parse(&sub_status_raw),
        status: ObservationStatus::parse(&status_raw),
        cancel_reason: row.get(8)?,
        observer_event_id: row.get(9)?,
        teacher_event_id: row.get(10)?,
        created_at: row.get(11)?,
    })
}

pub fn find_observation(
    conn: &Connection,
    id: &str,
) -> Result<Option<Observation>, rusqlite::Error> {
    let sql = format!("SELECT {} FROM observations WHERE id = ?", OBSERVATION_COLUMNS);
    conn.query_row(&sql, [id], |r| observation_from_row(r)).optional()
}

/// Non-canceled observations where the teacher is the observed party.
pub fn observations_for_teacher_on(
    conn: &Connection,
    teacher_id: &str,
    date: NaiveDate,
) -> Result<Vec<Observation>, rusqlite::Error> {
    let sql = format!(
        "SELECT {} FROM observations
         WHERE teacher_id = ? AND date = ? AND status != 'canceled'",
        OBSERVATION_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(
            (teacher_id, date.format("%Y-%m-%d").to_string()),
            |r| observation_from_row(r),
        )?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Non-canceled observations involving the person on either side.
pub fn observations_involving_on(
    conn: &Connection,
    person_id: &str,
    date: NaiveDate,
) -> Result<Vec<Observation>, rusqlite::Error> {
    let sql = format!(
        "SELECT {} FROM observations
         WHERE (observer_id = ? OR teacher_id = ?) AND date = ? AND status != 'canceled'",
        OBSERVATION_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(
            (person_id, person_id, date.format("%Y-%m-%d").to_string()),
            |r| observation_from_row(r),
        )?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[derive(Debug, Clone)]
pub struct BookingRequest {
    pub teacher_id: String,
    pub date: NaiveDate,
    pub periods: Vec<u32>,
    pub needs_sub: bool,
}

#[derive(Debug, Clone)]
pub struct BookingOutcome {
    pub observation_id: String,
    pub status: ObservationStatus,
    pub sub_status: SubStatus,
    /// Whether the observer had met the yearly requirement before this
    /// booking was written.
    pub already_met_requirement: bool,
}

fn overlapping_period(requested: &[u32], existing: &[u32]) -> Option<u32> {
    requested.iter().copied().find(|p| existing.contains(p))
}

/// The one validation routine for bookings. Runs before the store lock is
/// taken (fail fast) and again after (close the race window); both runs see
/// exactly the same rules. `exclude` skips the observation's own row when
/// rescheduling.
pub fn validate_booking(
    conn: &Connection,
    observer: &Teacher,
    req: &BookingRequest,
    exclude: Option<&str>,
    today: NaiveDate,
) -> Result<Teacher, ApiError> {
    if req.periods.is_empty() {
        return Err(ApiError::validation("At least one period is required."));
    }
    if req.teacher_id == observer.id {
        return Err(ApiError::validation(
            "You cannot schedule an observation of yourself.",
        ));
    }
    if req.date < today {
        return Err(ApiError::validation(
            "Observations cannot be scheduled in the past.",
        ));
    }
    if matches!(req.date.weekday(), Weekday::Sat | Weekday::Sun) {
        return Err(ApiError::validation(
            "Observations must fall on a school day (Monday through Friday).",
        ));
    }

    let target = catalog::find_teacher(conn, &req.teacher_id)?
        .ok_or(ApiError::NotFound("teacher"))?;
    if !target.active {
        return Err(ApiError::validation("This teacher is not currently active."));
    }

    let lunch = catalog::lunch_set_for_teacher(conn, &target)?;
    if let Some(p) = req.periods.iter().copied().find(|p| lunch.contains(p)) {
        return Err(ApiError::Validation(format!(
            "Period {} is a lunch period for this teacher.",
            p
        )));
    }

    for existing in observations_for_teacher_on(conn, &target.id, req.date)? {
        if exclude == Some(existing.id.as_str()) {
            continue;
        }
        if let Some(p) = overlapping_period(&req.periods, &existing.periods) {
            return Err(ApiError::Validation(format!(
                "Period {} already has an observer scheduled.",
                p
            )));
        }
    }

    for existing in observations_involving_on(conn, &observer.id, req.date)? {
        if exclude == Some(existing.id.as_str()) {
            continue;
        }
        if let Some(p) = overlapping_period(&req.periods, &existing.periods) {
            if existing.observer_id == observer.id {
                return Err(ApiError::Validation(format!(
                    "You already have another observation during period {}.",
                    p
                )));
            }
            return Err(ApiError::Validation(format!(
                "You are being observed during period {}.",
                p
            )));
        }
    }

    Ok(target)
}

pub fn create_booking(
    conn: &Connection,
    cfg: &SchedulerConfig,
    lock: &StoreLock,
    observer: &Teacher,
    req: &BookingRequest,
    today: NaiveDate,
) -> Result<BookingOutcome, ApiError> {
    // Optimistic pass; nothing is written before the lock is held.
    validate_booking(conn, observer, req, None, today)?;

    let _guard = lock.acquire(cfg.lock_wait).ok_or(ApiError::Busy)?;
    let target = validate_booking(conn, observer, req, None, today)?;

    // Requirement state is read before the insert: the response reports
    // whether the observer had met it prior to this booking.
    let already_met =
        requirement::status(conn, cfg, &observer.id, today)?.has_met_requirement;

    let (status, sub_status) = if req.needs_sub {
        (ObservationStatus::PendingSub, SubStatus::Pending)
    } else {
        (ObservationStatus::Confirmed, SubStatus::NotNeeded)
    };

    let observation_id = Uuid::new_v4().to_string();
    let now = db::now_iso();
    let date_text = req.date.format("%Y-%m-%d").to_string();
    let periods_json = db::period_set_to_json(&req.periods);

    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO observations(
            id, observer_id, teacher_id, date, periods, needs_sub,
            sub_status, status, created_at, created_by
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &observation_id,
            &observer.id,
            &target.id,
            &date_text,
            &periods_json,
            req.needs_sub as i64,
            sub_status.as_str(),
            status.as_str(),
            &now,
            &observer.email,
        ),
    )?;
    if req.needs_sub {
        tx.execute(
            "INSERT INTO substitute_requests(
                id, observation_id, requester_email, date, periods, status, created_at
             ) VALUES(?, ?, ?, ?, ?, 'pending', ?)",
            (
                Uuid::new_v4().to_string(),
                &observation_id,
                &observer.email,
                &date_text,
                &periods_json,
                &now,
            ),
        )?;
    }
    tx.commit()?;

    effects::audit_append(
        conn,
        "observation.create",
        &observer.email,
        serde_json::json!({
            "observationId": &observation_id,
            "teacherId": &target.id,
            "date": &date_text,
            "periods": &req.periods,
            "needsSub": req.needs_sub,
        }),
    );

    if req.needs_sub {
        if let Some(coordinator) = &cfg.coordinator_email {
            effects::send_notification(
                conn,
                coordinator,
                "Substitute coverage requested",
                &format!(
                    "{} requested coverage on {} (periods {:?}) to observe {}.",
                    observer.name, date_text, req.periods, target.name
                ),
            );
        }
    } else {
        attach_calendar_artifacts(conn, observer, &target, &observation_id, req.date, &req.periods);
    }

    Ok(BookingOutcome {
        observation_id,
        status,
        sub_status,
        already_met_requirement: already_met,
    })
}

pub fn reschedule_booking(
    conn: &Connection,
    cfg: &SchedulerConfig,
    lock: &StoreLock,
    actor: &Teacher,
    observation_id: &str,
    req: &BookingRequest,
    today: NaiveDate,
) -> Result<Observation, ApiError> {
    let existing =
        find_observation(conn, observation_id)?.ok_or(ApiError::NotFound("observation"))?;
    if actor.id != existing.observer_id && actor.role != Role::Admin {
        return Err(ApiError::Unauthorized(
            "Only the observer or an administrator can reschedule this observation.".to_string(),
        ));
    }
    if existing.status == ObservationStatus::Canceled {
        return Err(ApiError::validation("This observation has been canceled."));
    }

    let observer = catalog::find_teacher(conn, &existing.observer_id)?
        .ok_or(ApiError::NotFound("teacher"))?;

    // Same rule set as creation, minus the observation's own row.
    validate_booking(conn, &observer, req, Some(observation_id), today)?;

    let _guard = lock.acquire(cfg.lock_wait).ok_or(ApiError::Busy)?;
    let existing =
        find_observation(conn, observation_id)?.ok_or(ApiError::NotFound("observation"))?;
    if existing.status == ObservationStatus::Canceled {
        return Err(ApiError::validation("This observation has been canceled."));
    }
    let target = validate_booking(conn, &observer, req, Some(observation_id), today)?;

    let now = db::now_iso();
    let date_text = req.date.format("%Y-%m-%d").to_string();
    let periods_json = db::period_set_to_json(&req.periods);

    let sub = crate::approval::find_request_for_observation(conn, observation_id)?;
    let (status, sub_status) = if req.needs_sub {
        match sub.as_ref().map(|s| s.status) {
            Some(crate::approval::SubRequestStatus::Pending) => {
                conn.execute(
                    "UPDATE substitute_requests SET date = ?, periods = ? WHERE observation_id = ?",
                    (&date_text, &periods_json, observation_id),
                )?;
                (ObservationStatus::PendingSub, SubStatus::Pending)
            }
            Some(crate::approval::SubRequestStatus::Approved) => {
                conn.execute(
                    "UPDATE substitute_requests SET date = ?, periods = ? WHERE observation_id = ?",
                    (&date_text, &periods_json, observation_id),
                )?;
                (ObservationStatus::Confirmed, SubStatus::Approved)
            }
            _ => {
                // Newly requested coverage (or a denied/canceled request left
                // behind): start a fresh pending request.
                conn.execute(
                    "DELETE FROM substitute_requests WHERE observation_id = ?",
                    [observation_id],
                )?;
                conn.execute(
                    "INSERT INTO substitute_requests(
                        id, observation_id, requester_email, date, periods, status, created_at
                     ) VALUES(?, ?, ?, ?, ?, 'pending', ?)",
                    (
                        Uuid::new_v4().to_string(),
                        observation_id,
                        &observer.email,
                        &date_text,
                        &periods_json,
                        &now,
                    ),
                )?;
                if let Some(coordinator) = &cfg.coordinator_email {
                    effects::send_notification(
                        conn,
                        coordinator,
                        "Substitute coverage requested",
                        &format!(
                            "{} requested coverage on {} (periods {:?}) to observe {}.",
                            observer.name, date_text, req.periods, target.name
                        ),
                    );
                }
                (ObservationStatus::PendingSub, SubStatus::Pending)
            }
        }
    } else {
        crate::approval::cancel_request_for_observation(conn, observation_id, &actor.email)?;
        (ObservationStatus::Confirmed, SubStatus::NotNeeded)
    };

    conn.execute(
        "UPDATE observations SET
            date = ?, periods = ?, needs_sub = ?, status = ?, sub_status = ?,
            rescheduled_at = ?, modified_at = ?, modified_by = ?
         WHERE id = ?",
        (
            &date_text,
            &periods_json,
            req.needs_sub as i64,
            status.as_str(),
            sub_status.as_str(),
            &now,
            &now,
            &actor.email,
            observation_id,
        ),
    )?;

    // Stale calendar artifacts are replaced; both steps are best-effort.
    remove_calendar_artifacts(conn, &existing);
    if status == ObservationStatus::Confirmed {
        attach_calendar_artifacts(conn, &observer, &target, observation_id, req.date, &req.periods);
    }

    effects::audit_append(
        conn,
        "observation.reschedule",
        &actor.email,
        serde_json::json!({
            "observationId": observation_id,
            "date": &date_text,
            "periods": &req.periods,
            "needsSub": req.needs_sub,
        }),
    );

    find_observation(conn, observation_id)?.ok_or(ApiError::NotFound("observation"))
}

pub fn cancel_booking(
    conn: &Connection,
    cfg: &SchedulerConfig,
    lock: &StoreLock,
    actor: &Teacher,
    observation_id: &str,
    reason: Option<&str>,
) -> Result<(), ApiError> {
    let existing =
        find_observation(conn, observation_id)?.ok_or(ApiError::NotFound("observation"))?;
    if actor.id != existing.observer_id && actor.role != Role::Admin {
        return Err(ApiError::Unauthorized(
            "Only the observer or an administrator can cancel this observation.".to_string(),
        ));
    }

    let _guard = lock.acquire(cfg.lock_wait).ok_or(ApiError::Busy)?;
    let existing =
        find_observation(conn, observation_id)?.ok_or(ApiError::NotFound("observation"))?;
    if existing.status == ObservationStatus::Canceled {
        return Err(ApiError::validation("This observation is already canceled."));
    }

    crate::approval::cancel_request_for_observation(conn, observation_id, &actor.email)?;

    // Calendar removal must not block the cancellation.
    remove_calendar_artifacts(conn, &existing);

    let now = db::now_iso();
    conn.execute(
        "UPDATE observations SET
            status = 'canceled', cancel_reason = ?, canceled_at = ?, canceled_by = ?,
            modified_at = ?, modified_by = ?
         WHERE id = ?",
        (reason, &now, &actor.email, &now, &actor.email, observation_id),
    )?;

    effects::audit_append(
        conn,
        "observation.cancel",
        &actor.email,
        serde_json::json!({
            "observationId": observation_id,
            "reason": reason,
        }),
    );

    Ok(())
}

/// Admin-only hard delete; the only path that removes rows.
pub fn delete_booking(
    conn: &Connection,
    cfg: &SchedulerConfig,
    lock: &StoreLock,
    actor: &Teacher,
    observation_id: &str,
) -> Result<(), ApiError> {
    if actor.role != Role::Admin {
        return Err(ApiError::Unauthorized(
            "Only an administrator can delete an observation.".to_string(),
        ));
    }

    let _guard = lock.acquire(cfg.lock_wait).ok_or(ApiError::Busy)?;
    let existing =
        find_observation(conn, observation_id)?.ok_or(ApiError::NotFound("observation"))?;

    remove_calendar_artifacts(conn, &existing);

    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "DELETE FROM substitute_requests WHERE observation_id = ?",
        [observation_id],
    )?;
    tx.execute("DELETE FROM observations WHERE id = ?", [observation_id])?;
    tx.commit()?;

    effects::audit_append(
        conn,
        "observation.delete",
        &actor.email,
        serde_json::json!({ "observationId": observation_id }),
    );

    Ok(())
}

/// Create paired calendar events for a confirmed observation and remember
/// their ids. Best-effort; a failed event leaves its column NULL.
pub fn attach_calendar_artifacts(
    conn: &Connection,
    observer: &Teacher,
    target: &Teacher,
    observation_id: &str,
    date: NaiveDate,
    periods: &[u32],
) {
    let slots = match catalog::bell_schedule(conn, catalog::cohort_for_teacher(target)) {
        Ok(s) => s,
        Err(_) => return,
    };
    let covered: Vec<_> = slots
        .iter()
        .filter(|s| periods.contains(&s.period))
        .collect();
    let (Some(first), Some(last)) = (covered.first(), covered.last()) else {
        return;
    };
    let starts_at = format!("{}T{}:00", date.format("%Y-%m-%d"), first.starts_at);
    let ends_at = format!("{}T{}:00", date.format("%Y-%m-%d"), last.ends_at);
    let attendees = vec![observer.email.clone(), target.email.clone()];
    let room = target.room.as_deref().unwrap_or("");

    let observer_event = effects::calendar_create_event(
        conn,
        &format!("Observation of {}", target.name),
        &starts_at,
        &ends_at,
        &attendees,
        &format!("Classroom observation in room {}", room),
    );
    let teacher_event = effects::calendar_create_event(
        conn,
        &format!("Observation by {}", observer.name),
        &starts_at,
        &ends_at,
        &attendees,
        &format!("Classroom observation in room {}", room),
    );

    let _ = conn.execute(
        "UPDATE observations SET observer_event_id = ?, teacher_event_id = ? WHERE id = ?",
        (observer_event, teacher_event, observation_id),
    );
}

pub fn remove_calendar_artifacts(conn: &Connection, observation: &Observation) {
    if let Some(id) = &observation.observer_event_id {
        effects::calendar_delete_event(conn, id);
    }
    if let Some(id) = &observation.teacher_event_id {
        effects::calendar_delete_event(conn, id);
    }
    let _ = conn.execute(
        "UPDATE observations SET observer_event_id = NULL, teacher_event_id = NULL WHERE id = ?",
        [&observation.id],
    );
}
