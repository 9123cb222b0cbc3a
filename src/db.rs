use rusqlite::{Connection, OptionalExtension};
use std::path::{Path, PathBuf};

pub const DB_FILE_NAME: &str = "examd.sqlite3";

pub fn db_path(workspace: &Path) -> PathBuf {
    workspace.join(DB_FILE_NAME)
}

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let conn = Connection::open(db_path(workspace))?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    for table in ["streams", "subjects", "exam_types", "terms"] {
        conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {}(
                    id TEXT PRIMARY KEY,
                    name TEXT NOT NULL UNIQUE
                )",
                table
            ),
            [],
        )?;
    }

    conn.execute(
        "CREATE TABLE IF NOT EXISTS grade_bands(
            id TEXT PRIMARY KEY,
            grade TEXT NOT NULL UNIQUE,
            lower_bound REAL NOT NULL UNIQUE
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            reg_no TEXT PRIMARY KEY,
            first_name TEXT NOT NULL,
            middle_name TEXT,
            last_name TEXT NOT NULL,
            nominal_form INTEGER NOT NULL,
            enrollment_year INTEGER NOT NULL,
            date_registered TEXT NOT NULL,
            stream_id TEXT NOT NULL,
            house TEXT,
            kcpe_marks INTEGER,
            guardian_first_name TEXT,
            guardian_middle_name TEXT,
            guardian_last_name TEXT,
            guardian_phone TEXT,
            guardian_email TEXT,
            updated_at TEXT,
            FOREIGN KEY(stream_id) REFERENCES streams(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_stream ON students(stream_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS staff(
            id TEXT PRIMARY KEY,
            username TEXT NOT NULL UNIQUE,
            first_name TEXT NOT NULL,
            middle_name TEXT,
            last_name TEXT NOT NULL,
            email TEXT,
            phone_number TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subject_enrollments(
            id TEXT PRIMARY KEY,
            student_reg_no TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            FOREIGN KEY(student_reg_no) REFERENCES students(reg_no) ON DELETE CASCADE,
            FOREIGN KEY(subject_id) REFERENCES subjects(id) ON DELETE CASCADE,
            UNIQUE(student_reg_no, subject_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_subject_enrollments_student ON subject_enrollments(student_reg_no)",
        [],
    )?;

    // The unique key is the single source of truth for "one record per
    // (student, subject, exam type, term)"; upserts rely on it.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS exams(
            id TEXT PRIMARY KEY,
            student_reg_no TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            exam_type_id TEXT NOT NULL,
            term_id TEXT NOT NULL,
            date_done TEXT NOT NULL,
            marks REAL NOT NULL CHECK(marks >= 0 AND marks <= 99.99),
            FOREIGN KEY(student_reg_no) REFERENCES students(reg_no) ON DELETE CASCADE,
            FOREIGN KEY(subject_id) REFERENCES subjects(id) ON DELETE CASCADE,
            FOREIGN KEY(exam_type_id) REFERENCES exam_types(id) ON DELETE CASCADE,
            FOREIGN KEY(term_id) REFERENCES terms(id) ON DELETE CASCADE,
            UNIQUE(student_reg_no, subject_id, exam_type_id, term_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_exams_term_student ON exams(term_id, student_reg_no)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    Ok(())
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        Some(s) => Ok(Some(serde_json::from_str(&s)?)),
        None => Ok(None),
    }
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

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

    #[test]
    fn schema_is_idempotent() {
        let conn = Connection::open_in_memory().expect("open");
        init_schema(&conn).expect("first init");
        init_schema(&conn).expect("second init");
        assert!(table_has_column(&conn, "students", "updated_at").expect("pragma"));
        assert!(table_has_column(&conn, "exams", "marks").expect("pragma"));
    }

    #[test]
    fn settings_roundtrip_overwrites() {
        let conn = Connection::open_in_memory().expect("open");
        init_schema(&conn).expect("init");
        settings_set_json(&conn, "k", &serde_json::json!({ "a": 1 })).expect("set");
        settings_set_json(&conn, "k", &serde_json::json!({ "a": 2 })).expect("set");
        let v = settings_get_json(&conn, "k").expect("get").expect("present");
        assert_eq!(v["a"], 2);
    }
}
