use rusqlite::Connection;
use tracing::warn;
use uuid::Uuid;

use crate::db;

/// Outcome of a best-effort side effect. Failures are logged by the helpers
/// below and must never become the operation's error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffectOutcome {
    Sent,
    Failed,
}

/// Queue a notification for delivery. Delivery mechanics live outside the
/// core; from here a written outbox row counts as sent.
pub fn send_notification(conn: &Connection, to: &str, subject: &str, body: &str) -> EffectOutcome {
    let result = conn.execute(
        "INSERT INTO notification_outbox(id, recipient, subject, body, status, at)
         VALUES(?, ?, ?, ?, 'sent', ?)",
        (
            Uuid::new_v4().to_string(),
            to.trim().to_ascii_lowercase(),
            subject,
            body,
            db::now_iso(),
        ),
    );
    match result {
        Ok(_) => EffectOutcome::Sent,
        Err(e) => {
            warn!(recipient = to, error = %e, "notification send failed");
            EffectOutcome::Failed
        }
    }
}

pub fn audit_append(
    conn: &Connection,
    action: &str,
    actor_email: &str,
    details: serde_json::Value,
) -> EffectOutcome {
    let result = conn.execute(
        "INSERT INTO audit_log(id, action, actor_email, details, at) VALUES(?, ?, ?, ?, ?)",
        (
            Uuid::new_v4().to_string(),
            action,
            actor_email,
            details.to_string(),
            db::now_iso(),
        ),
    );
    match result {
        Ok(_) => EffectOutcome::Sent,
        Err(e) => {
            warn!(action, error = %e, "audit append failed");
            EffectOutcome::Failed
        }
    }
}

/// Create an external calendar event; returns its id, or None when the
/// collaborator fails (logged, never fatal).
pub fn calendar_create_event(
    conn: &Connection,
    title: &str,
    starts_at: &str,
    ends_at: &str,
    attendees: &[String],
    description: &str,
) -> Option<String> {
    let id = Uuid::new_v4().to_string();
    let attendees_json =
        serde_json::to_string(attendees).unwrap_or_else(|_| "[]".to_string());
    let result = conn.execute(
        "INSERT INTO calendar_events(id, title, starts_at, ends_at, attendees, description, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            title,
            starts_at,
            ends_at,
            attendees_json,
            description,
            db::now_iso(),
        ),
    );
    match result {
        Ok(_) => Some(id),
        Err(e) => {
            warn!(title, error = %e, "calendar event creation failed");
            None
        }
    }
}

pub fn calendar_delete_event(conn: &Connection, event_id: &str) -> EffectOutcome {
    match conn.execute("DELETE FROM calendar_events WHERE id = ?", [event_id]) {
        Ok(_) => EffectOutcome::Sent,
        Err(e) => {
            warn!(event_id, error = %e, "calendar event removal failed");
            EffectOutcome::Failed
        }
    }
}
