use anyhow::Context;
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub const DB_FILE_NAME: &str = "timetable.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)
        .with_context(|| format!("failed to create workspace {}", workspace.to_string_lossy()))?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(&db_path)
        .with_context(|| format!("failed to open database {}", db_path.to_string_lossy()))?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            owner_id TEXT NOT NULL,
            key TEXT NOT NULL,
            value_json TEXT NOT NULL,
            PRIMARY KEY(owner_id, key)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS grades(
            id TEXT PRIMARY KEY,
            owner_id TEXT NOT NULL,
            name TEXT NOT NULL,
            sort_order INTEGER NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grades_owner ON grades(owner_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subjects(
            id TEXT PRIMARY KEY,
            owner_id TEXT NOT NULL,
            name TEXT NOT NULL,
            color TEXT,
            weekly_hours INTEGER NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_subjects_owner ON subjects(owner_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS teachers(
            id TEXT PRIMARY KEY,
            owner_id TEXT NOT NULL,
            name TEXT NOT NULL,
            credential_id TEXT,
            max_weekly_lessons INTEGER NOT NULL,
            active INTEGER NOT NULL,
            updated_at TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_teachers_owner ON teachers(owner_id)",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS teacher_subjects(
            teacher_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            PRIMARY KEY(teacher_id, subject_id),
            FOREIGN KEY(teacher_id) REFERENCES teachers(id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id)
        )",
        [],
    )?;
    // kind is 'blocked' or 'preferred'
    conn.execute(
        "CREATE TABLE IF NOT EXISTS teacher_slot_rules(
            teacher_id TEXT NOT NULL,
            day INTEGER NOT NULL,
            period INTEGER NOT NULL,
            kind TEXT NOT NULL,
            PRIMARY KEY(teacher_id, day, period, kind),
            FOREIGN KEY(teacher_id) REFERENCES teachers(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classes(
            id TEXT PRIMARY KEY,
            owner_id TEXT NOT NULL,
            grade_id TEXT NOT NULL,
            name TEXT NOT NULL,
            shift TEXT NOT NULL,
            FOREIGN KEY(grade_id) REFERENCES grades(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_classes_owner ON classes(owner_id)",
        [],
    )?;
    // weekly_hours NULL falls back to subjects.weekly_hours
    conn.execute(
        "CREATE TABLE IF NOT EXISTS class_subjects(
            class_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            weekly_hours INTEGER,
            PRIMARY KEY(class_id, subject_id),
            FOREIGN KEY(class_id) REFERENCES classes(id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS schedule_slots(
            owner_id TEXT NOT NULL,
            day INTEGER NOT NULL,
            period INTEGER NOT NULL,
            teacher_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            class_id TEXT NOT NULL,
            FOREIGN KEY(teacher_id) REFERENCES teachers(id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id),
            FOREIGN KEY(class_id) REFERENCES classes(id),
            UNIQUE(owner_id, day, period, teacher_id),
            UNIQUE(owner_id, day, period, class_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_schedule_slots_teacher ON schedule_slots(owner_id, teacher_id, day)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS emergency_absences(
            id TEXT PRIMARY KEY,
            absence_id TEXT NOT NULL,
            owner_id TEXT NOT NULL,
            teacher_id TEXT NOT NULL,
            date TEXT NOT NULL,
            class_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            period INTEGER NOT NULL,
            reason TEXT NOT NULL,
            origin TEXT NOT NULL,
            session_id TEXT,
            created_at TEXT,
            FOREIGN KEY(teacher_id) REFERENCES teachers(id),
            FOREIGN KEY(class_id) REFERENCES classes(id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id)
        )",
        [],
    )?;
    // an emergency absence is one row per lesson and day; a skipped makeup slot is one row
    // per session, so two sessions on the same date accrue separately
    conn.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS ux_emergency_absences_lesson
         ON emergency_absences(owner_id, teacher_id, date, class_id, subject_id, period)
         WHERE origin = 'absence'",
        [],
    )?;
    conn.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS ux_emergency_absences_makeup_slot
         ON emergency_absences(session_id, teacher_id, class_id, period)
         WHERE origin = 'makeup_absence'",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_emergency_absences_owner_date ON emergency_absences(owner_id, date)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_emergency_absences_session ON emergency_absences(session_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS makeup_sessions(
            id TEXT PRIMARY KEY,
            owner_id TEXT NOT NULL,
            date TEXT NOT NULL,
            max_periods INTEGER NOT NULL,
            mode TEXT NOT NULL,
            status TEXT NOT NULL,
            created_at TEXT,
            processed_at TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_makeup_sessions_owner_date ON makeup_sessions(owner_id, date)",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS makeup_slots(
            session_id TEXT NOT NULL,
            class_id TEXT NOT NULL,
            period INTEGER NOT NULL,
            teacher_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            PRIMARY KEY(session_id, class_id, period),
            UNIQUE(session_id, period, teacher_id),
            FOREIGN KEY(session_id) REFERENCES makeup_sessions(id),
            FOREIGN KEY(class_id) REFERENCES classes(id),
            FOREIGN KEY(teacher_id) REFERENCES teachers(id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS makeup_attendance(
            session_id TEXT NOT NULL,
            teacher_id TEXT NOT NULL,
            PRIMARY KEY(session_id, teacher_id),
            FOREIGN KEY(session_id) REFERENCES makeup_sessions(id),
            FOREIGN KEY(teacher_id) REFERENCES teachers(id)
        )",
        [],
    )?;

    Ok(conn)
}

pub fn settings_get_json(
    conn: &Connection,
    owner_id: &str,
    key: &str,
) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM settings WHERE owner_id = ? AND key = ?",
            (owner_id, key),
            |r| r.get(0),
        )
        .optional()?;
    let Some(raw) = raw else {
        return Ok(None);
    };
    let value = serde_json::from_str(&raw)
        .with_context(|| format!("settings value for {} is not valid json", key))?;
    Ok(Some(value))
}

pub fn settings_set_json(
    conn: &Connection,
    owner_id: &str,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    let raw = serde_json::to_string(value)?;
    conn.execute(
        "INSERT INTO settings(owner_id, key, value_json)
         VALUES(?, ?, ?)
         ON CONFLICT(owner_id, key) DO UPDATE SET
           value_json = excluded.value_json",
        (owner_id, key, &raw),
    )?;
    Ok(())
}

pub fn now_ts() -> String {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
