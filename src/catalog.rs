use rusqlite::{Connection, OptionalExtension, Row};
use std::collections::BTreeSet;

use crate::db;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeacherKind {
    Classroom,
    Support,
}

impl TeacherKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TeacherKind::Classroom => "classroom",
            TeacherKind::Support => "support",
        }
    }

    pub fn parse(raw: &str) -> TeacherKind {
        match raw {
            "support" => TeacherKind::Support,
            _ => TeacherKind::Classroom,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Teacher,
    Admin,
    ReadOnly,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Teacher => "teacher",
            Role::Admin => "admin",
            Role::ReadOnly => "readonly",
        }
    }

    pub fn parse(raw: &str) -> Role {
        match raw {
            "admin" => Role::Admin,
            "readonly" => Role::ReadOnly,
            _ => Role::Teacher,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Teacher {
    pub id: String,
    pub email: String,
    pub name: String,
    pub room: Option<String>,
    pub grades: Vec<String>,
    pub kind: TeacherKind,
    pub role: Role,
    /// Explicit per-teacher unavailable periods; highest-precedence source.
    pub unavailable_periods: Option<Vec<u32>>,
    /// Legacy single lunch-period field kept for older rosters.
    pub lunch_period: Option<u32>,
    pub active: bool,
}

#[derive(Debug, Clone)]
pub struct BellSlot {
    pub period: u32,
    pub starts_at: String,
    pub ends_at: String,
}

/// Grade 6 runs its own bell schedule; every other grade shares cohort 7.
pub fn cohort_for_grade(grade: &str) -> &'static str {
    if grade.trim() == "6" {
        "6"
    } else {
        "7"
    }
}

pub fn cohort_for_teacher(teacher: &Teacher) -> &'static str {
    teacher
        .grades
        .first()
        .map(|g| cohort_for_grade(g))
        .unwrap_or("7")
}

pub fn bell_schedule(conn: &Connection, cohort: &str) -> Result<Vec<BellSlot>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT period, starts_at, ends_at FROM bell_schedules
         WHERE cohort = ? ORDER BY period",
    )?;
    let slots = stmt
        .query_map([cohort], |r| {
            Ok(BellSlot {
                period: r.get::<_, i64>(0)? as u32,
                starts_at: r.get(1)?,
                ends_at: r.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(slots)
}

pub fn lunch_periods(conn: &Connection, grade: &str) -> Result<BTreeSet<u32>, rusqlite::Error> {
    let mut stmt = conn.prepare("SELECT period FROM lunch_periods WHERE grade = ?")?;
    let periods = stmt
        .query_map([grade.trim()], |r| Ok(r.get::<_, i64>(0)? as u32))?
        .collect::<Result<BTreeSet<_>, _>>()?;
    Ok(periods)
}

/// Periods the teacher can never be observed in. Precedence, first non-empty
/// source wins: explicit list, legacy single lunch period, grade-derived
/// lunch periods (unioned across all grades). Support teachers have none.
pub fn unavailable_periods(
    conn: &Connection,
    teacher: &Teacher,
) -> Result<BTreeSet<u32>, rusqlite::Error> {
    if teacher.kind == TeacherKind::Support {
        return Ok(BTreeSet::new());
    }

    if let Some(explicit) = &teacher.unavailable_periods {
        if !explicit.is_empty() {
            return Ok(explicit.iter().copied().collect());
        }
    }

    if let Some(lunch) = teacher.lunch_period {
        let mut set = BTreeSet::new();
        set.insert(lunch);
        return Ok(set);
    }

    let mut union = BTreeSet::new();
    for grade in &teacher.grades {
        union.extend(lunch_periods(conn, grade)?);
    }
    Ok(union)
}

/// Lunch periods that can never be observed for this teacher: the
/// grade-derived lunch periods across all their grades, plus the legacy
/// per-teacher lunch field when set. Support teachers are exempt.
pub fn lunch_set_for_teacher(
    conn: &Connection,
    teacher: &Teacher,
) -> Result<BTreeSet<u32>, rusqlite::Error> {
    if teacher.kind == TeacherKind::Support {
        return Ok(BTreeSet::new());
    }
    let mut set = BTreeSet::new();
    for grade in &teacher.grades {
        set.extend(lunch_periods(conn, grade)?);
    }
    if let Some(lunch) = teacher.lunch_period {
        set.insert(lunch);
    }
    Ok(set)
}

fn teacher_from_row(row: &Row<'_>) -> Result<Teacher, rusqlite::Error> {
    let grades_raw: String = row.get(4)?;
    let kind_raw: String = row.get(5)?;
    let role_raw: String = row.get(6)?;
    let unavailable_raw: Option<String> = row.get(7)?;
    let lunch: Option<i64> = row.get(8)?;
    Ok(Teacher {
        id: row.get(0)?,
        email: row.get(1)?,
        name: row.get(2)?,
        room: row.get(3)?,
        grades: parse_grades(&grades_raw),
        kind: TeacherKind::parse(&kind_raw),
        role: Role::parse(&role_raw),
        unavailable_periods: unavailable_raw.map(|raw| db::parse_period_set(&raw)),
        lunch_period: lunch.map(|v| v as u32),
        active: row.get::<_, i64>(9)? != 0,
    })
}

const TEACHER_COLUMNS: &str = "id, email, name, room, grades, kind, role, unavailable_periods, lunch_period, active";

pub fn find_teacher(conn: &Connection, id: &str) -> Result<Option<Teacher>, rusqlite::Error> {
    let sql = format!("SELECT {} FROM teachers WHERE id = ?", TEACHER_COLUMNS);
    conn.query_row(&sql, [id], |r| teacher_from_row(r)).optional()
}

pub fn find_teacher_by_email(
    conn: &Connection,
    email: &str,
) -> Result<Option<Teacher>, rusqlite::Error> {
    let sql = format!("SELECT {} FROM teachers WHERE email = ?", TEACHER_COLUMNS);
    conn.query_row(&sql, [email.trim().to_ascii_lowercase()], |r| {
        teacher_from_row(r)
    })
    .optional()
}

pub fn list_teachers(
    conn: &Connection,
    include_inactive: bool,
) -> Result<Vec<Teacher>, rusqlite::Error> {
    let sql = if include_inactive {
        format!("SELECT {} FROM teachers ORDER BY name", TEACHER_COLUMNS)
    } else {
        format!(
            "SELECT {} FROM teachers WHERE active = 1 ORDER BY name",
            TEACHER_COLUMNS
        )
    };
    let mut stmt = conn.prepare(&sql)?;
    let teachers = stmt
        .query_map([], |r| teacher_from_row(r))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(teachers)
}

pub fn admin_exists(conn: &Connection) -> Result<bool, rusqlite::Error> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM teachers WHERE role = 'admin'",
        [],
        |r| r.get(0),
    )?;
    Ok(count > 0)
}

/// Grades are stored as a JSON array of strings; older rosters used bare
/// comma-separated text.
fn parse_grades(raw: &str) -> Vec<String> {
    if let Ok(serde_json::Value::Array(items)) = serde_json::from_str::<serde_json::Value>(raw) {
        return items
            .into_iter()
            .filter_map(|v| match v {
                serde_json::Value::String(s) => Some(s.trim().to_string()),
                serde_json::Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .filter(|s| !s.is_empty())
            .collect();
    }
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

pub fn grades_to_json(grades: &[String]) -> String {
    serde_json::to_string(grades).unwrap_or_else(|_| "[]".to_string())
}
