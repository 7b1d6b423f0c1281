use chrono::NaiveDate;
use rusqlite::Connection;
use std::collections::BTreeSet;

use crate::booking;
use crate::catalog::{self, Teacher};

pub const REASON_TEACHER_UNAVAILABLE: &str = "Teacher unavailable";
pub const REASON_ALREADY_HAS_OBSERVER: &str = "Already has observer";
pub const REASON_OBSERVER_BUSY: &str = "You have another observation";
pub const REASON_BEING_OBSERVED: &str = "You are being observed";

#[derive(Debug, Clone)]
pub struct Slot {
    pub period: u32,
    pub starts_at: String,
    pub ends_at: String,
    pub available: bool,
    pub reason: Option<&'static str>,
}

/// Availability matrix for the target teacher's bell schedule on one date.
/// Advisory: the picker renders from this, but the booking path re-checks
/// everything under the store lock. Reasons are mutually exclusive; the
/// first matching rule wins.
pub fn resolve_slots(
    conn: &Connection,
    observer: &Teacher,
    target: &Teacher,
    date: NaiveDate,
) -> Result<Vec<Slot>, rusqlite::Error> {
    let schedule = catalog::bell_schedule(conn, catalog::cohort_for_teacher(target))?;
    let unavailable = catalog::unavailable_periods(conn, target)?;

    let mut target_booked: BTreeSet<u32> = BTreeSet::new();
    for obs in booking::observations_for_teacher_on(conn, &target.id, date)? {
        target_booked.extend(obs.periods.iter().copied());
    }

    let mut observer_busy: BTreeSet<u32> = BTreeSet::new();
    let mut observer_observed: BTreeSet<u32> = BTreeSet::new();
    for obs in booking::observations_involving_on(conn, &observer.id, date)? {
        if obs.observer_id == observer.id {
            observer_busy.extend(obs.periods.iter().copied());
        } else {
            observer_observed.extend(obs.periods.iter().copied());
        }
    }

    let slots = schedule
        .into_iter()
        .map(|slot| {
            let reason = if unavailable.contains(&slot.period) {
                Some(REASON_TEACHER_UNAVAILABLE)
            } else if target_booked.contains(&slot.period) {
                Some(REASON_ALREADY_HAS_OBSERVER)
            } else if observer_busy.contains(&slot.period) {
                Some(REASON_OBSERVER_BUSY)
            } else if observer_observed.contains(&slot.period) {
                Some(REASON_BEING_OBSERVED)
            } else {
                None
            };
            Slot {
                period: slot.period,
                starts_at: slot.starts_at,
                ends_at: slot.ends_at,
                available: reason.is_none(),
                reason,
            }
        })
        .collect();

    Ok(slots)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::grades_to_json;
    use crate::db;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").expect("date")
    }

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().expect("open");
        db::init_schema(&conn).expect("schema");
        for id in ["alice", "bob", "carol"] {
            conn.execute(
                "INSERT INTO teachers(id, email, name, grades, kind)
                 VALUES(?, ?, ?, ?, 'classroom')",
                (
                    id,
                    format!("{}@school.test", id),
                    id,
                    grades_to_json(&["7".to_string()]),
                ),
            )
            .expect("insert teacher");
        }
        conn
    }

    fn teacher(conn: &Connection, id: &str) -> Teacher {
        catalog::find_teacher(conn, id).expect("query").expect("teacher")
    }

    fn seed_observation(conn: &Connection, id: &str, observer: &str, target: &str, periods: &str) {
        conn.execute(
            "INSERT INTO observations(id, observer_id, teacher_id, date, periods, status)
             VALUES(?, ?, ?, '2030-09-02', ?, 'confirmed')",
            (id, observer, target, periods),
        )
        .expect("insert observation");
    }

    fn slot(slots: &[Slot], period: u32) -> &Slot {
        slots.iter().find(|s| s.period == period).expect("slot")
    }

    #[test]
    fn open_periods_are_available() {
        let conn = setup();
        let slots = resolve_slots(
            &conn,
            &teacher(&conn, "alice"),
            &teacher(&conn, "bob"),
            d("2030-09-02"),
        )
        .expect("slots");
        assert_eq!(slots.len(), 8);
        let s = slot(&slots, 3);
        assert!(s.available);
        assert!(s.reason.is_none());
    }

    #[test]
    fn lunch_marks_teacher_unavailable() {
        let conn = setup();
        let slots = resolve_slots(
            &conn,
            &teacher(&conn, "alice"),
            &teacher(&conn, "bob"),
            d("2030-09-02"),
        )
        .expect("slots");
        // grade 7 lunch is period 6
        let s = slot(&slots, 6);
        assert!(!s.available);
        assert_eq!(s.reason, Some(REASON_TEACHER_UNAVAILABLE));
    }

    #[test]
    fn booked_period_reports_already_has_observer() {
        let conn = setup();
        seed_observation(&conn, "o1", "carol", "bob", "[3]");
        let slots = resolve_slots(
            &conn,
            &teacher(&conn, "alice"),
            &teacher(&conn, "bob"),
            d("2030-09-02"),
        )
        .expect("slots");
        let s = slot(&slots, 3);
        assert!(!s.available);
        assert_eq!(s.reason, Some(REASON_ALREADY_HAS_OBSERVER));
    }

    #[test]
    fn unavailable_beats_already_booked() {
        let conn = setup();
        // Period 6 is both bob's lunch and (incorrectly) booked; rule 1 wins.
        seed_observation(&conn, "o1", "carol", "bob", "[6]");
        let slots = resolve_slots(
            &conn,
            &teacher(&conn, "alice"),
            &teacher(&conn, "bob"),
            d("2030-09-02"),
        )
        .expect("slots");
        assert_eq!(slot(&slots, 6).reason, Some(REASON_TEACHER_UNAVAILABLE));
    }

    #[test]
    fn observer_conflicts_reported_in_priority_order() {
        let conn = setup();
        seed_observation(&conn, "o1", "alice", "carol", "[2]");
        seed_observation(&conn, "o2", "carol", "alice", "[4]");
        let slots = resolve_slots(
            &conn,
            &teacher(&conn, "alice"),
            &teacher(&conn, "bob"),
            d("2030-09-02"),
        )
        .expect("slots");
        assert_eq!(slot(&slots, 2).reason, Some(REASON_OBSERVER_BUSY));
        assert_eq!(slot(&slots, 4).reason, Some(REASON_BEING_OBSERVED));
    }

    #[test]
    fn canceled_observations_do_not_block() {
        let conn = setup();
        conn.execute(
            "INSERT INTO observations(id, observer_id, teacher_id, date, periods, status)
             VALUES('o1', 'carol', 'bob', '2030-09-02', '[3]', 'canceled')",
            [],
        )
        .expect("insert");
        let slots = resolve_slots(
            &conn,
            &teacher(&conn, "alice"),
            &teacher(&conn, "bob"),
            d("2030-09-02"),
        )
        .expect("slots");
        assert!(slot(&slots, 3).available);
    }
}
