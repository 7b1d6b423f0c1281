use chrono::{Datelike, NaiveDate};
use rusqlite::Connection;

use crate::config::SchedulerConfig;

/// Yearly observation minimum. One completed or scheduled observation inside
/// the school-year window satisfies it; the tracker is informational only and
/// never blocks a booking.
#[derive(Debug, Clone, Copy)]
pub struct RequirementStatus {
    pub count: u32,
    pub has_met_requirement: bool,
    pub days_remaining: i64,
    pub is_past_deadline: bool,
}

/// [Aug 1 of the school year's starting calendar year, deadline in the
/// following calendar year].
pub fn school_year_window(today: NaiveDate, cfg: &SchedulerConfig) -> (NaiveDate, NaiveDate) {
    let aug_first = clamped_ymd(today.year(), 8, 1);
    let start_year = if today >= aug_first {
        today.year()
    } else {
        today.year() - 1
    };
    let start = clamped_ymd(start_year, 8, 1);
    let deadline = clamped_ymd(start_year + 1, cfg.deadline_month, cfg.deadline_day);
    (start, deadline)
}

fn clamped_ymd(year: i32, month: u32, day: u32) -> NaiveDate {
    let month = month.clamp(1, 12);
    let mut d = day.clamp(1, 31);
    loop {
        if let Some(date) = NaiveDate::from_ymd_opt(year, month, d) {
            return date;
        }
        d -= 1;
    }
}

pub fn status(
    conn: &Connection,
    cfg: &SchedulerConfig,
    observer_id: &str,
    today: NaiveDate,
) -> Result<RequirementStatus, rusqlite::Error> {
    let (start, deadline) = school_year_window(today, cfg);
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM observations
         WHERE observer_id = ? AND status != 'canceled' AND date >= ? AND date <= ?",
        (
            observer_id,
            start.format("%Y-%m-%d").to_string(),
            deadline.format("%Y-%m-%d").to_string(),
        ),
        |r| r.get(0),
    )?;

    Ok(RequirementStatus {
        count: count as u32,
        has_met_requirement: count >= 1,
        days_remaining: (deadline - today).num_days().max(0),
        is_past_deadline: today > deadline,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").expect("date")
    }

    #[test]
    fn window_starts_aug_first_of_current_school_year() {
        let cfg = SchedulerConfig::default();
        let (start, deadline) = school_year_window(d("2026-09-15"), &cfg);
        assert_eq!(start, d("2026-08-01"));
        assert_eq!(deadline, d("2027-05-30"));

        // Spring belongs to the school year that started the previous August.
        let (start, deadline) = school_year_window(d("2027-02-10"), &cfg);
        assert_eq!(start, d("2026-08-01"));
        assert_eq!(deadline, d("2027-05-30"));

        // Aug 1 itself starts the new year.
        let (start, _) = school_year_window(d("2026-08-01"), &cfg);
        assert_eq!(start, d("2026-08-01"));

        // Jul 31 is still the old year.
        let (start, _) = school_year_window(d("2026-07-31"), &cfg);
        assert_eq!(start, d("2025-08-01"));
    }

    #[test]
    fn deadline_day_clamps_to_month_end() {
        let mut cfg = SchedulerConfig::default();
        cfg.deadline_month = 2;
        cfg.deadline_day = 31;
        let (_, deadline) = school_year_window(d("2026-09-01"), &cfg);
        assert_eq!(deadline, d("2027-02-28"));
    }

    fn seed_observation(conn: &Connection, id: &str, observer: &str, date: &str, status: &str) {
        conn.execute(
            "INSERT INTO observations(id, observer_id, teacher_id, date, periods, status)
             VALUES(?, ?, 'other', ?, '[3]', ?)",
            (id, observer, date, status),
        )
        .expect("insert observation");
    }

    fn roster(conn: &Connection) {
        for id in ["me", "other"] {
            conn.execute(
                "INSERT INTO teachers(id, email, name, grades) VALUES(?, ?, ?, '[\"7\"]')",
                (id, format!("{}@school.test", id), id),
            )
            .expect("insert teacher");
        }
    }

    #[test]
    fn counts_only_observer_role_non_canceled_in_window() {
        let conn = Connection::open_in_memory().expect("open");
        db::init_schema(&conn).expect("schema");
        roster(&conn);
        let cfg = SchedulerConfig::default();
        let today = d("2026-09-15");

        let st = status(&conn, &cfg, "me", today).expect("status");
        assert_eq!(st.count, 0);
        assert!(!st.has_met_requirement);
        assert!(!st.is_past_deadline);

        seed_observation(&conn, "in-window", "me", "2026-10-01", "confirmed");
        seed_observation(&conn, "canceled", "me", "2026-10-02", "canceled");
        seed_observation(&conn, "last-year", "me", "2026-05-01", "confirmed");
        seed_observation(&conn, "not-mine", "other", "2026-10-03", "confirmed");

        let st = status(&conn, &cfg, "me", today).expect("status");
        assert_eq!(st.count, 1);
        assert!(st.has_met_requirement);
    }

    #[test]
    fn days_remaining_clamps_past_deadline() {
        let conn = Connection::open_in_memory().expect("open");
        db::init_schema(&conn).expect("schema");
        let cfg = SchedulerConfig::default();

        let st = status(&conn, &cfg, "me", d("2027-06-15")).expect("status");
        assert_eq!(st.days_remaining, 0);
        assert!(st.is_past_deadline);
    }
}
