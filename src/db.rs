use rusqlite::Connection;
use std::path::Path;

pub const DB_FILE: &str = "observations.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE);
    let conn = Connection::open(db_path)?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS teachers(
            id TEXT PRIMARY KEY,
            email TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            room TEXT,
            grades TEXT NOT NULL,
            kind TEXT NOT NULL DEFAULT 'classroom',
            role TEXT NOT NULL DEFAULT 'teacher',
            unavailable_periods TEXT,
            lunch_period INTEGER,
            active INTEGER NOT NULL DEFAULT 1
        )",
        [],
    )?;
    ensure_teachers_role(conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_teachers_email ON teachers(email)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS bell_schedules(
            cohort TEXT NOT NULL,
            period INTEGER NOT NULL,
            starts_at TEXT NOT NULL,
            ends_at TEXT NOT NULL,
            PRIMARY KEY(cohort, period)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS lunch_periods(
            grade TEXT NOT NULL,
            period INTEGER NOT NULL,
            PRIMARY KEY(grade, period)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS observations(
            id TEXT PRIMARY KEY,
            observer_id TEXT NOT NULL,
            teacher_id TEXT NOT NULL,
            date TEXT NOT NULL,
            periods TEXT NOT NULL,
            needs_sub INTEGER NOT NULL DEFAULT 0,
            sub_status TEXT NOT NULL DEFAULT 'not_needed',
            status TEXT NOT NULL DEFAULT 'confirmed',
            cancel_reason TEXT,
            observer_event_id TEXT,
            teacher_event_id TEXT,
            created_at TEXT,
            created_by TEXT,
            modified_at TEXT,
            modified_by TEXT,
            rescheduled_at TEXT,
            canceled_at TEXT,
            canceled_by TEXT,
            FOREIGN KEY(observer_id) REFERENCES teachers(id),
            FOREIGN KEY(teacher_id) REFERENCES teachers(id)
        )",
        [],
    )?;
    ensure_observations_calendar_columns(conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_observations_teacher_date ON observations(teacher_id, date)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_observations_observer_date ON observations(observer_id, date)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS substitute_requests(
            id TEXT PRIMARY KEY,
            observation_id TEXT NOT NULL UNIQUE,
            requester_email TEXT NOT NULL,
            date TEXT NOT NULL,
            periods TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            decided_by TEXT,
            decided_at TEXT,
            deny_reason TEXT,
            created_at TEXT,
            FOREIGN KEY(observation_id) REFERENCES observations(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_substitute_requests_status ON substitute_requests(status)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS access_requests(
            id TEXT PRIMARY KEY,
            email TEXT NOT NULL,
            name TEXT NOT NULL,
            role TEXT NOT NULL DEFAULT 'teacher',
            status TEXT NOT NULL DEFAULT 'pending',
            submitted_at TEXT,
            decided_by TEXT,
            decided_at TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS audit_log(
            id TEXT PRIMARY KEY,
            action TEXT NOT NULL,
            actor_email TEXT NOT NULL,
            details TEXT,
            at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_audit_log_at ON audit_log(at)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS notification_outbox(
            id TEXT PRIMARY KEY,
            recipient TEXT NOT NULL,
            subject TEXT NOT NULL,
            body TEXT NOT NULL,
            status TEXT NOT NULL,
            error TEXT,
            at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS calendar_events(
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            starts_at TEXT NOT NULL,
            ends_at TEXT NOT NULL,
            attendees TEXT NOT NULL,
            description TEXT,
            created_at TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )",
        [],
    )?;

    seed_reference_data(conn)?;

    // Older workspaces stored period lists as comma strings or bare numbers.
    // Rewrite them to canonical JSON arrays so business rules only ever see
    // one representation.
    normalize_period_columns(conn)?;

    Ok(())
}

fn ensure_teachers_role(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "teachers", "role")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE teachers ADD COLUMN role TEXT NOT NULL DEFAULT 'teacher'",
        [],
    )?;
    Ok(())
}

fn ensure_observations_calendar_columns(conn: &Connection) -> anyhow::Result<()> {
    if !table_has_column(conn, "observations", "observer_event_id")? {
        conn.execute(
            "ALTER TABLE observations ADD COLUMN observer_event_id TEXT",
            [],
        )?;
    }
    if !table_has_column(conn, "observations", "teacher_event_id")? {
        conn.execute(
            "ALTER TABLE observations ADD COLUMN teacher_event_id TEXT",
            [],
        )?;
    }
    Ok(())
}

fn seed_reference_data(conn: &Connection) -> anyhow::Result<()> {
    let bell_count: i64 = conn.query_row("SELECT COUNT(*) FROM bell_schedules", [], |r| r.get(0))?;
    if bell_count == 0 {
        let times = [
            (1, "08:00", "08:47"),
            (2, "08:51", "09:38"),
            (3, "09:42", "10:29"),
            (4, "10:33", "11:20"),
            (5, "11:24", "12:11"),
            (6, "12:15", "13:02"),
            (7, "13:06", "13:53"),
            (8, "13:57", "14:44"),
        ];
        for cohort in ["6", "7"] {
            for (period, starts_at, ends_at) in times {
                conn.execute(
                    "INSERT INTO bell_schedules(cohort, period, starts_at, ends_at) VALUES(?, ?, ?, ?)",
                    (cohort, period, starts_at, ends_at),
                )?;
            }
        }
    }

    let lunch_count: i64 = conn.query_row("SELECT COUNT(*) FROM lunch_periods", [], |r| r.get(0))?;
    if lunch_count == 0 {
        for (grade, period) in [("6", 5), ("7", 6), ("8", 6)] {
            conn.execute(
                "INSERT INTO lunch_periods(grade, period) VALUES(?, ?)",
                (grade, period),
            )?;
        }
    }

    Ok(())
}

fn normalize_period_columns(conn: &Connection) -> anyhow::Result<()> {
    for (table, column) in [
        ("observations", "periods"),
        ("substitute_requests", "periods"),
        ("teachers", "unavailable_periods"),
    ] {
        let sql = format!(
            "SELECT rowid, {} FROM {} WHERE {} IS NOT NULL",
            column, table, column
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], |r| Ok((r.get::<_, i64>(0)?, r.get::<_, String>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        drop(stmt);

        for (rowid, raw) in rows {
            let canonical = period_set_to_json(&parse_period_set(&raw));
            if canonical != raw {
                let sql = format!("UPDATE {} SET {} = ? WHERE rowid = ?", table, column);
                conn.execute(&sql, (&canonical, rowid))?;
            }
        }
    }
    Ok(())
}

/// Accepts every historical encoding of a period list (JSON array of numbers
/// or numeric strings, comma-separated string, bare number) and produces the
/// one in-memory representation: a sorted, deduplicated Vec<u32>.
pub fn parse_period_set(raw: &str) -> Vec<u32> {
    let mut out: Vec<u32> = Vec::new();

    if let Ok(value) = serde_json::from_str::<serde_json::Value>(raw) {
        match value {
            serde_json::Value::Array(items) => {
                for item in items {
                    match item {
                        serde_json::Value::Number(n) => {
                            if let Some(v) = n.as_u64() {
                                out.push(v as u32);
                            }
                        }
                        serde_json::Value::String(s) => {
                            if let Ok(v) = s.trim().parse::<u32>() {
                                out.push(v);
                            }
                        }
                        _ => {}
                    }
                }
                out.sort_unstable();
                out.dedup();
                return out;
            }
            serde_json::Value::Number(n) => {
                if let Some(v) = n.as_u64() {
                    return vec![v as u32];
                }
                return out;
            }
            _ => {}
        }
    }

    for part in raw.split(',') {
        if let Ok(v) = part.trim().parse::<u32>() {
            out.push(v);
        }
    }
    out.sort_unstable();
    out.dedup();
    out
}

pub fn period_set_to_json(periods: &[u32]) -> String {
    serde_json::to_string(periods).unwrap_or_else(|_| "[]".to_string())
}

pub fn settings_get_json(
    conn: &Connection,
    key: &str,
) -> anyhow::Result<Option<serde_json::Value>> {
    use rusqlite::OptionalExtension;
    let raw: Option<String> = conn
        .query_row("SELECT value FROM settings WHERE key = ?", [key], |r| {
            r.get(0)
        })
        .optional()?;
    match raw {
        Some(text) => Ok(Some(serde_json::from_str(&text)?)),
        None => Ok(None),
    }
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}

pub fn now_iso() -> String {
    chrono::Utc::now().to_rfc3339()
}

pub fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
