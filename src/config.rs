use rusqlite::Connection;
use std::time::Duration;

use crate::db;

/// Immutable configuration for a workspace, built once when the workspace
/// opens and passed into the components that need it. Nothing reads the
/// settings table after this point.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Month/day of the yearly observation deadline, in the calendar year
    /// after the school year starts.
    pub deadline_month: u32,
    pub deadline_day: u32,
    /// Recipient of substitute-coverage notifications.
    pub coordinator_email: Option<String>,
    /// Bound on store-lock acquisition for mutating operations.
    pub lock_wait: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            deadline_month: 5,
            deadline_day: 30,
            coordinator_email: None,
            lock_wait: Duration::from_secs(30),
        }
    }
}

pub fn load(conn: &Connection) -> SchedulerConfig {
    let mut cfg = SchedulerConfig::default();

    if let Ok(Some(v)) = db::settings_get_json(conn, "requirement.deadlineMonth") {
        if let Some(m) = v.as_u64() {
            if (1..=12).contains(&m) {
                cfg.deadline_month = m as u32;
            }
        }
    }
    if let Ok(Some(v)) = db::settings_get_json(conn, "requirement.deadlineDay") {
        if let Some(d) = v.as_u64() {
            if (1..=31).contains(&d) {
                cfg.deadline_day = d as u32;
            }
        }
    }
    if let Ok(Some(v)) = db::settings_get_json(conn, "coverage.coordinatorEmail") {
        if let Some(email) = v.as_str() {
            let email = email.trim().to_ascii_lowercase();
            if !email.is_empty() {
                cfg.coordinator_email = Some(email);
            }
        }
    }
    if let Ok(Some(v)) = db::settings_get_json(conn, "store.lockWaitMs") {
        if let Some(ms) = v.as_u64() {
            if ms > 0 {
                cfg.lock_wait = Duration::from_millis(ms);
            }
        }
    }

    cfg
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn load_uses_defaults_then_settings_overrides() {
        let conn = Connection::open_in_memory().expect("open");
        db::init_schema(&conn).expect("schema");

        let cfg = load(&conn);
        assert_eq!(cfg.deadline_month, 5);
        assert_eq!(cfg.deadline_day, 30);
        assert_eq!(cfg.coordinator_email, None);
        assert_eq!(cfg.lock_wait, Duration::from_secs(30));

        db::settings_set_json(&conn, "requirement.deadlineMonth", &json!(4)).expect("set");
        db::settings_set_json(&conn, "requirement.deadlineDay", &json!(15)).expect("set");
        db::settings_set_json(&conn, "coverage.coordinatorEmail", &json!("Office@School.org"))
            .expect("set");
        db::settings_set_json(&conn, "store.lockWaitMs", &json!(500)).expect("set");

        let cfg = load(&conn);
        assert_eq!(cfg.deadline_month, 4);
        assert_eq!(cfg.deadline_day, 15);
        assert_eq!(cfg.coordinator_email.as_deref(), Some("office@school.org"));
        assert_eq!(cfg.lock_wait, Duration::from_millis(500));
    }
}
