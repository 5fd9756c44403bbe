use chrono::NaiveDate;
use rusqlite::Connection;
use std::collections::HashSet;
use std::path::Path;

use crate::escalation;
use crate::model::{AttendanceRecord, Grade, NotificationDraft, Student, StudentStatus, Term};

pub const DB_FILE: &str = "madrassah.sqlite3";

/// Notifications are a capped sink: oldest rows are evicted past this.
pub const NOTIFICATION_CAP: usize = 50;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            gender TEXT NOT NULL,
            birth_date TEXT NOT NULL,
            class_name TEXT NOT NULL,
            guardian TEXT NOT NULL,
            whatsapp TEXT NOT NULL,
            registration_date TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'active',
            report_released_halbjahr INTEGER NOT NULL DEFAULT 0,
            report_released_abschluss INTEGER NOT NULL DEFAULT 0
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_class ON students(class_name)",
        [],
    )?;

    // Workspaces created before release gating existed lack the flag columns.
    ensure_students_release_flags(&conn)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance(
            student_id TEXT NOT NULL,
            date TEXT NOT NULL,
            is_present INTEGER NOT NULL,
            PRIMARY KEY(student_id, date),
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_student ON attendance(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_date ON attendance(date)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS grades(
            student_id TEXT NOT NULL,
            subject TEXT NOT NULL,
            term TEXT NOT NULL,
            points INTEGER NOT NULL,
            date TEXT NOT NULL,
            PRIMARY KEY(student_id, subject, term),
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grades_student ON grades(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS participation(
            student_id TEXT NOT NULL,
            term TEXT NOT NULL,
            verhalten TEXT NOT NULL,
            vortrag TEXT NOT NULL,
            puenktlichkeit TEXT NOT NULL,
            zusatzpunkte INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY(student_id, term),
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subjects(
            name TEXT PRIMARY KEY,
            sort_order INTEGER NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS notifications(
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            role TEXT,
            title TEXT NOT NULL,
            message TEXT NOT NULL,
            kind TEXT NOT NULL,
            dedup_key TEXT,
            is_read INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_notifications_dedup ON notifications(dedup_key)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS waitlist(
            id TEXT PRIMARY KEY,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            gender TEXT NOT NULL,
            birth_date TEXT NOT NULL,
            course_type TEXT NOT NULL,
            whatsapp TEXT NOT NULL,
            guardian TEXT NOT NULL,
            address TEXT NOT NULL,
            lesson_times TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    Ok(conn)
}

fn ensure_students_release_flags(conn: &Connection) -> anyhow::Result<()> {
    if !table_has_column(conn, "students", "report_released_halbjahr")? {
        conn.execute(
            "ALTER TABLE students ADD COLUMN report_released_halbjahr INTEGER NOT NULL DEFAULT 0",
            [],
        )?;
    }
    if !table_has_column(conn, "students", "report_released_abschluss")? {
        conn.execute(
            "ALTER TABLE students ADD COLUMN report_released_abschluss INTEGER NOT NULL DEFAULT 0",
            [],
        )?;
    }
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
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

const STUDENT_COLUMNS: &str = "id, first_name, last_name, gender, birth_date, class_name, \
     guardian, whatsapp, registration_date, status, \
     report_released_halbjahr, report_released_abschluss";

fn student_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Student> {
    let status_raw: String = row.get(9)?;
    Ok(Student {
        id: row.get(0)?,
        first_name: row.get(1)?,
        last_name: row.get(2)?,
        gender: row.get(3)?,
        birth_date: row.get(4)?,
        class_name: row.get(5)?,
        guardian: row.get(6)?,
        whatsapp: row.get(7)?,
        registration_date: row.get(8)?,
        status: StudentStatus::parse(&status_raw).unwrap_or(StudentStatus::Active),
        report_released_halbjahr: row.get::<_, i64>(10)? != 0,
        report_released_abschluss: row.get::<_, i64>(11)? != 0,
    })
}

pub fn load_students(conn: &Connection) -> anyhow::Result<Vec<Student>> {
    let sql = format!(
        "SELECT {} FROM students ORDER BY last_name, first_name",
        STUDENT_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let students = stmt
        .query_map([], student_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(students)
}

pub fn load_student(conn: &Connection, id: &str) -> anyhow::Result<Option<Student>> {
    use rusqlite::OptionalExtension;
    let sql = format!("SELECT {} FROM students WHERE id = ?", STUDENT_COLUMNS);
    let student = conn.query_row(&sql, [id], student_from_row).optional()?;
    Ok(student)
}

pub fn load_attendance(conn: &Connection) -> anyhow::Result<Vec<AttendanceRecord>> {
    let mut stmt = conn.prepare("SELECT student_id, date, is_present FROM attendance")?;
    let mut records = Vec::new();
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let date_raw: String = row.get(1)?;
        // A malformed date would silently fall out of the month window, so
        // fail loudly instead; the write path only ever stores ISO dates.
        let date: NaiveDate = date_raw
            .parse()
            .map_err(|e| anyhow::anyhow!("bad attendance date {}: {}", date_raw, e))?;
        records.push(AttendanceRecord {
            student_id: row.get(0)?,
            date,
            is_present: row.get::<_, i64>(2)? != 0,
        });
    }
    Ok(records)
}

pub fn load_grades(conn: &Connection) -> anyhow::Result<Vec<Grade>> {
    let mut stmt = conn.prepare("SELECT student_id, subject, term, points, date FROM grades")?;
    let mut grades = Vec::new();
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let term_raw: String = row.get(2)?;
        let Some(term) = Term::parse(&term_raw) else {
            continue;
        };
        grades.push(Grade {
            student_id: row.get(0)?,
            subject: row.get(1)?,
            term,
            points: row.get(3)?,
            date: row.get(4)?,
        });
    }
    Ok(grades)
}

pub fn load_subjects(conn: &Connection) -> anyhow::Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT name FROM subjects ORDER BY sort_order")?;
    let names = stmt
        .query_map([], |r| r.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(names)
}

pub fn load_sent_dedup_keys(conn: &Connection) -> anyhow::Result<HashSet<String>> {
    let mut stmt =
        conn.prepare("SELECT dedup_key FROM notifications WHERE dedup_key IS NOT NULL")?;
    let keys = stmt
        .query_map([], |r| r.get::<_, String>(0))?
        .collect::<Result<HashSet<_>, _>>()?;
    Ok(keys)
}

/// Appends one notification and evicts the oldest rows past the cap.
pub fn insert_notification(conn: &Connection, draft: &NotificationDraft) -> anyhow::Result<()> {
    let id = uuid::Uuid::new_v4().to_string();
    let created_at = chrono::Local::now()
        .format("%Y-%m-%dT%H:%M:%S%.3f")
        .to_string();
    conn.execute(
        "INSERT INTO notifications(id, user_id, role, title, message, kind, dedup_key, is_read, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, 0, ?)",
        (
            &id,
            &draft.user_id,
            &draft.role,
            &draft.title,
            &draft.message,
            &draft.kind,
            &draft.dedup_key,
            &created_at,
        ),
    )?;
    conn.execute(
        &format!(
            "DELETE FROM notifications WHERE id NOT IN (
                SELECT id FROM notifications ORDER BY created_at DESC, rowid DESC LIMIT {}
            )",
            NOTIFICATION_CAP
        ),
        [],
    )?;
    Ok(())
}

/// Runs the escalation engine over the current snapshot and applies the
/// outcome (status transitions plus notifications). Attendance mutations
/// call this with their own write pending on the same transaction, so the
/// whole batch commits or rolls back together.
pub fn recompute_escalation(
    conn: &Connection,
    today: NaiveDate,
) -> anyhow::Result<escalation::Outcome> {
    let students = load_students(conn)?;
    let attendance = load_attendance(conn)?;
    let sent_keys = load_sent_dedup_keys(conn)?;

    let outcome = escalation::evaluate(&students, &attendance, &sent_keys, today);

    for id in &outcome.dismissed_ids {
        conn.execute("UPDATE students SET status = 'dismissed' WHERE id = ?", [id])?;
    }
    for draft in &outcome.notifications {
        insert_notification(conn, draft)?;
    }
    Ok(outcome)
}
