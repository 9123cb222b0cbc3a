//! Administrative writes: reference tables, grade bands, student and staff
//! registration, and subject enrollment maintenance.

use crate::entry::check_marks;
use crate::error::{ExamError, FieldErrors};
use crate::model::{capitalize_name, GradeBand, Staff, Student, ALL_SUBJECTS};
use crate::store::{SchoolStore, SqliteStore};
use chrono::{Datelike, NaiveDate};
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::path::Path;
use uuid::Uuid;

const NAME_MAX_CHARS: usize = 20;
const PERSON_NAME_MAX_CHARS: usize = 50;
const USERNAME_MAX_CHARS: usize = 150;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefTable {
    Streams,
    Subjects,
    ExamTypes,
    Terms,
}

impl RefTable {
    pub fn table(self) -> &'static str {
        match self {
            RefTable::Streams => "streams",
            RefTable::Subjects => "subjects",
            RefTable::ExamTypes => "exam_types",
            RefTable::Terms => "terms",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            RefTable::Streams => "Stream",
            RefTable::Subjects => "Subject",
            RefTable::ExamTypes => "Exam type",
            RefTable::Terms => "Term",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NamedRow {
    pub id: String,
    pub name: String,
}

fn check_length(errs: &mut FieldErrors, field: &str, value: &str, max: usize) {
    let n = value.chars().count();
    if n > max {
        errs.add(
            field,
            format!(
                "Ensure this value has at most {} characters (it has {}).",
                max, n
            ),
        );
    }
}

fn required<'v>(errs: &mut FieldErrors, field: &str, value: &'v str) -> &'v str {
    let v = value.trim();
    if v.is_empty() {
        errs.add(field, "This field is required.");
    }
    v
}

fn non_empty(v: Option<String>) -> Option<String> {
    v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn insert_err(e: rusqlite::Error) -> ExamError {
    ExamError::new("db_insert_failed", e.to_string())
}

pub fn create_named(conn: &Connection, kind: RefTable, raw_name: &str) -> Result<NamedRow, ExamError> {
    let mut errs = FieldErrors::new();
    let trimmed = required(&mut errs, "name", raw_name);
    check_length(&mut errs, "name", trimmed, NAME_MAX_CHARS);
    errs.into_result("bad_params", "invalid name")?;

    let name = capitalize_name(trimmed);
    if kind == RefTable::Subjects && name.eq_ignore_ascii_case(ALL_SUBJECTS) {
        let mut errs = FieldErrors::new();
        errs.add("name", format!("'{}' is reserved for all subjects.", ALL_SUBJECTS));
        errs.into_result("bad_params", "reserved name")?;
    }

    let exists: Option<String> = conn
        .query_row(
            &format!("SELECT id FROM {} WHERE name = ?", kind.table()),
            [&name],
            |r| r.get(0),
        )
        .optional()?;
    if exists.is_some() {
        let mut errs = FieldErrors::new();
        errs.add(
            "name",
            format!("{} with this Name already exists.", kind.label()),
        );
        errs.into_result("duplicate", "name already exists")?;
    }

    let id = Uuid::new_v4().to_string();
    conn.execute(
        &format!("INSERT INTO {}(id, name) VALUES(?, ?)", kind.table()),
        (&id, &name),
    )
    .map_err(insert_err)?;
    tracing::info!(table = kind.table(), %name, "created reference row");
    Ok(NamedRow { id, name })
}

pub fn list_named(conn: &Connection, kind: RefTable) -> Result<Vec<NamedRow>, ExamError> {
    Ok(SqliteStore::new(conn)
        .list_named(kind.table())?
        .into_iter()
        .map(|(id, name)| NamedRow { id, name })
        .collect())
}

pub fn delete_named(conn: &Connection, kind: RefTable, id: &str) -> Result<(), ExamError> {
    if kind == RefTable::Streams {
        let in_use: i64 = conn.query_row(
            "SELECT COUNT(*) FROM students WHERE stream_id = ?",
            [id],
            |r| r.get(0),
        )?;
        if in_use > 0 {
            return Err(ExamError::new(
                "bad_params",
                format!("stream still has {} student(s)", in_use),
            ));
        }
    }
    let n = conn.execute(&format!("DELETE FROM {} WHERE id = ?", kind.table()), [id])?;
    if n == 0 {
        return Err(ExamError::new(
            "not_found",
            format!("{} not found", kind.label().to_lowercase()),
        ));
    }
    tracing::info!(table = kind.table(), %id, "deleted reference row");
    Ok(())
}

pub fn create_grade_band(
    conn: &Connection,
    raw_grade: &str,
    lower_bound: Option<f64>,
) -> Result<GradeBand, ExamError> {
    let mut errs = FieldErrors::new();
    let trimmed = required(&mut errs, "grade", raw_grade);
    check_length(&mut errs, "grade", trimmed, NAME_MAX_CHARS);
    let bound = match lower_bound {
        None => {
            errs.add("greatest_lower_bound", "Enter a number.");
            None
        }
        Some(v) => match check_marks(v) {
            Ok(v) => Some(v),
            Err(msg) => {
                errs.add("greatest_lower_bound", msg);
                None
            }
        },
    };
    errs.into_result("bad_params", "invalid grade band")?;
    let grade = trimmed.to_uppercase();
    let Some(bound) = bound else {
        return Err(ExamError::invariant("validated bound missing"));
    };

    let mut dup = FieldErrors::new();
    let grade_taken: Option<String> = conn
        .query_row("SELECT id FROM grade_bands WHERE grade = ?", [&grade], |r| r.get(0))
        .optional()?;
    if grade_taken.is_some() {
        dup.add("grade", "This grade already exists.");
    }
    let bound_taken: Option<String> = conn
        .query_row(
            "SELECT id FROM grade_bands WHERE lower_bound = ?",
            [bound],
            |r| r.get(0),
        )
        .optional()?;
    if bound_taken.is_some() {
        dup.add(
            "greatest_lower_bound",
            "This greatest lower bound is already associated with a grade.",
        );
    }
    dup.into_result("duplicate", "grade band already exists")?;

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO grade_bands(id, grade, lower_bound) VALUES(?, ?, ?)",
        (&id, &grade, bound),
    )
    .map_err(insert_err)?;
    Ok(GradeBand {
        id,
        grade,
        lower_bound: bound,
    })
}

pub fn delete_grade_band(conn: &Connection, id: &str) -> Result<(), ExamError> {
    let n = conn.execute("DELETE FROM grade_bands WHERE id = ?", [id])?;
    if n == 0 {
        return Err(ExamError::new("not_found", "grade band not found"));
    }
    Ok(())
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StudentForm {
    pub reg_no: String,
    pub first_name: String,
    pub middle_name: Option<String>,
    pub last_name: String,
    pub form: Option<i64>,
    pub stream: String,
    pub house: Option<String>,
    pub kcpe_marks: Option<i64>,
    pub date_registered: String,
    pub guardian_first_name: Option<String>,
    pub guardian_middle_name: Option<String>,
    pub guardian_last_name: Option<String>,
    pub guardian_phone_number: Option<String>,
    pub guardian_email: Option<String>,
    pub subjects: Vec<String>,
}

/// Partial update; absent fields keep their stored value.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StudentPatch {
    pub first_name: Option<String>,
    pub middle_name: Option<String>,
    pub last_name: Option<String>,
    pub form: Option<i64>,
    pub stream: Option<String>,
    pub house: Option<String>,
    pub kcpe_marks: Option<i64>,
    pub date_registered: Option<String>,
    pub guardian_first_name: Option<String>,
    pub guardian_middle_name: Option<String>,
    pub guardian_last_name: Option<String>,
    pub guardian_phone_number: Option<String>,
    pub guardian_email: Option<String>,
}

fn parse_date_registered(errs: &mut FieldErrors, raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.is_empty() {
        errs.add("date_registered", "This field is required.");
        return None;
    }
    match NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        Ok(d) => Some(d),
        Err(_) => {
            errs.add("date_registered", "Enter a valid date (YYYY-MM-DD).");
            None
        }
    }
}

fn check_email(errs: &mut FieldErrors, field: &str, email: Option<&str>) {
    if let Some(e) = email {
        let valid = e
            .split_once('@')
            .map(|(user, domain)| !user.is_empty() && domain.contains('.'))
            .unwrap_or(false);
        if !valid {
            errs.add(field, "Enter a valid email address.");
        }
    }
}

/// Validated student row ready to be written.
struct StudentRow {
    reg_no: String,
    first_name: String,
    middle_name: Option<String>,
    last_name: String,
    nominal_form: i64,
    enrollment_year: i32,
    date_registered: String,
    stream_id: String,
    house: Option<String>,
    kcpe_marks: Option<i64>,
    guardian_first_name: Option<String>,
    guardian_middle_name: Option<String>,
    guardian_last_name: Option<String>,
    guardian_phone: Option<String>,
    guardian_email: Option<String>,
}

fn validate_student(store: &SqliteStore<'_>, f: StudentForm) -> Result<StudentRow, ExamError> {
    let mut errs = FieldErrors::new();
    let reg_no = required(&mut errs, "reg_no", &f.reg_no).to_string();
    check_length(&mut errs, "reg_no", &reg_no, NAME_MAX_CHARS);
    let first_name = required(&mut errs, "first_name", &f.first_name).to_string();
    check_length(&mut errs, "first_name", &first_name, PERSON_NAME_MAX_CHARS);
    let last_name = required(&mut errs, "last_name", &f.last_name).to_string();
    check_length(&mut errs, "last_name", &last_name, PERSON_NAME_MAX_CHARS);

    let nominal_form = match f.form {
        Some(v) if v >= 1 => v,
        Some(_) => {
            errs.add("form", "Ensure this value is greater than or equal to 1.");
            0
        }
        None => {
            errs.add("form", "This field is required.");
            0
        }
    };
    if let Some(k) = f.kcpe_marks {
        if k < 0 {
            errs.add("kcpe_marks", "Ensure this value is greater than or equal to 0.");
        }
    }

    let stream_id = match f.stream.trim() {
        "" => {
            errs.add("stream", "This field is required.");
            String::new()
        }
        name => match store.stream_by_name(name)? {
            Some(s) => s.id,
            None => {
                errs.add("stream", "This stream is not found.");
                String::new()
            }
        },
    };

    let date = parse_date_registered(&mut errs, &f.date_registered);
    let guardian_email = non_empty(f.guardian_email);
    check_email(&mut errs, "guardian_email", guardian_email.as_deref());

    errs.into_result("bad_params", "invalid student details")?;
    let Some(date) = date else {
        return Err(ExamError::invariant("validated date missing"));
    };

    Ok(StudentRow {
        reg_no,
        first_name,
        middle_name: non_empty(f.middle_name),
        last_name,
        nominal_form,
        enrollment_year: date.year(),
        date_registered: date.format("%Y-%m-%d").to_string(),
        stream_id,
        house: non_empty(f.house),
        kcpe_marks: f.kcpe_marks,
        guardian_first_name: non_empty(f.guardian_first_name),
        guardian_middle_name: non_empty(f.guardian_middle_name),
        guardian_last_name: non_empty(f.guardian_last_name),
        guardian_phone: non_empty(f.guardian_phone_number),
        guardian_email,
    })
}

fn resolve_subject_ids(
    store: &SqliteStore<'_>,
    names: &[String],
) -> Result<Vec<String>, ExamError> {
    let mut errs = FieldErrors::new();
    let mut ids = Vec::with_capacity(names.len());
    for name in names {
        match store.subject_by_name(name)? {
            Some(s) => {
                if !ids.contains(&s.id) {
                    ids.push(s.id);
                }
            }
            None => errs.add("subjects", format!("Subject '{}' is not found.", name.trim())),
        }
    }
    errs.into_result("not_found", "unknown subject")?;
    Ok(ids)
}

fn replace_enrollment_ids(
    conn: &Connection,
    reg_no: &str,
    subject_ids: &[String],
) -> Result<(), ExamError> {
    conn.execute(
        "DELETE FROM subject_enrollments WHERE student_reg_no = ?",
        [reg_no],
    )?;
    for subject_id in subject_ids {
        conn.execute(
            "INSERT INTO subject_enrollments(id, student_reg_no, subject_id) VALUES(?, ?, ?)",
            (Uuid::new_v4().to_string(), reg_no, subject_id),
        )
        .map_err(insert_err)?;
    }
    Ok(())
}

pub fn register_student(conn: &Connection, form: StudentForm) -> Result<Student, ExamError> {
    let store = SqliteStore::new(conn);
    let subjects = form.subjects.clone();
    let row = validate_student(&store, form)?;
    let subject_ids = resolve_subject_ids(&store, &subjects)?;

    if store.student(&row.reg_no)?.is_some() {
        let mut errs = FieldErrors::new();
        errs.add("reg_no", "Student profile with this Reg no already exists.");
        errs.into_result("duplicate", "registration number already exists")?;
    }

    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO students(
            reg_no, first_name, middle_name, last_name, nominal_form, enrollment_year,
            date_registered, stream_id, house, kcpe_marks, guardian_first_name,
            guardian_middle_name, guardian_last_name, guardian_phone, guardian_email
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            row.reg_no,
            row.first_name,
            row.middle_name,
            row.last_name,
            row.nominal_form,
            row.enrollment_year,
            row.date_registered,
            row.stream_id,
            row.house,
            row.kcpe_marks,
            row.guardian_first_name,
            row.guardian_middle_name,
            row.guardian_last_name,
            row.guardian_phone,
            row.guardian_email,
        ],
    )
    .map_err(insert_err)?;
    replace_enrollment_ids(&tx, &row.reg_no, &subject_ids)?;
    tx.commit()?;

    tracing::info!(reg_no = %row.reg_no, subjects = subject_ids.len(), "registered student");
    store
        .student(&row.reg_no)?
        .ok_or_else(|| ExamError::invariant("student missing after insert"))
}

pub fn update_student(
    conn: &Connection,
    reg_no: &str,
    patch: StudentPatch,
) -> Result<Student, ExamError> {
    let store = SqliteStore::new(conn);
    let Some(current) = store.student(reg_no)? else {
        return Err(ExamError::new("not_found", "student not found"));
    };

    let merged = StudentForm {
        reg_no: current.reg_no.clone(),
        first_name: patch.first_name.unwrap_or(current.first_name),
        middle_name: patch.middle_name.or(current.middle_name),
        last_name: patch.last_name.unwrap_or(current.last_name),
        form: Some(patch.form.unwrap_or(current.nominal_form)),
        stream: patch.stream.unwrap_or(current.stream_name),
        house: patch.house.or(current.house),
        kcpe_marks: patch.kcpe_marks.or(current.kcpe_marks),
        date_registered: patch.date_registered.unwrap_or(current.date_registered),
        guardian_first_name: patch.guardian_first_name.or(current.guardian.first_name),
        guardian_middle_name: patch.guardian_middle_name.or(current.guardian.middle_name),
        guardian_last_name: patch.guardian_last_name.or(current.guardian.last_name),
        guardian_phone_number: patch.guardian_phone_number.or(current.guardian.phone_number),
        guardian_email: patch.guardian_email.or(current.guardian.email),
        subjects: Vec::new(),
    };
    let row = validate_student(&store, merged)?;

    conn.execute(
        "UPDATE students SET
            first_name = ?, middle_name = ?, last_name = ?, nominal_form = ?,
            enrollment_year = ?, date_registered = ?, stream_id = ?, house = ?,
            kcpe_marks = ?, guardian_first_name = ?, guardian_middle_name = ?,
            guardian_last_name = ?, guardian_phone = ?, guardian_email = ?,
            updated_at = ?
         WHERE reg_no = ?",
        rusqlite::params![
            row.first_name,
            row.middle_name,
            row.last_name,
            row.nominal_form,
            row.enrollment_year,
            row.date_registered,
            row.stream_id,
            row.house,
            row.kcpe_marks,
            row.guardian_first_name,
            row.guardian_middle_name,
            row.guardian_last_name,
            row.guardian_phone,
            row.guardian_email,
            chrono::Utc::now().to_rfc3339(),
            row.reg_no,
        ],
    )?;
    store
        .student(&row.reg_no)?
        .ok_or_else(|| ExamError::invariant("student missing after update"))
}

pub fn delete_student(conn: &Connection, reg_no: &str) -> Result<(), ExamError> {
    let n = conn.execute("DELETE FROM students WHERE reg_no = ?", [reg_no.trim()])?;
    if n == 0 {
        return Err(ExamError::new("not_found", "student not found"));
    }
    tracing::info!(%reg_no, "deleted student");
    Ok(())
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StaffForm {
    pub username: String,
    pub first_name: String,
    pub middle_name: Option<String>,
    pub last_name: String,
    pub email: Option<String>,
    pub phone_number: Option<String>,
}

pub fn register_staff(conn: &Connection, f: StaffForm) -> Result<Staff, ExamError> {
    let mut errs = FieldErrors::new();
    let username = required(&mut errs, "username", &f.username).to_string();
    check_length(&mut errs, "username", &username, USERNAME_MAX_CHARS);
    let first_name = required(&mut errs, "first_name", &f.first_name).to_string();
    let last_name = required(&mut errs, "last_name", &f.last_name).to_string();
    let email = non_empty(f.email);
    check_email(&mut errs, "email", email.as_deref());
    errs.into_result("bad_params", "invalid staff details")?;

    let taken: Option<String> = conn
        .query_row("SELECT id FROM staff WHERE username = ?", [&username], |r| r.get(0))
        .optional()?;
    if taken.is_some() {
        let mut errs = FieldErrors::new();
        errs.add("username", "A user with that username already exists.");
        errs.into_result("duplicate", "username already exists")?;
    }

    let staff = Staff {
        id: Uuid::new_v4().to_string(),
        username,
        first_name,
        middle_name: non_empty(f.middle_name),
        last_name,
        email,
        phone_number: non_empty(f.phone_number),
    };
    conn.execute(
        "INSERT INTO staff(id, username, first_name, middle_name, last_name, email, phone_number)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            staff.id,
            staff.username,
            staff.first_name,
            staff.middle_name,
            staff.last_name,
            staff.email,
            staff.phone_number,
        ],
    )
    .map_err(insert_err)?;
    Ok(staff)
}

fn require_student(store: &SqliteStore<'_>, reg_no: &str) -> Result<Student, ExamError> {
    store.student(reg_no)?.ok_or_else(|| {
        ExamError::new("not_found", "A student with this registration number is not found.")
            .with_details(json!({ "fieldErrors": { "reg_no": ["A student with this registration number is not found."] } }))
    })
}

/// Adds the enrollment if absent. Returns whether a row was created.
pub fn add_enrollment(conn: &Connection, reg_no: &str, subject_name: &str) -> Result<bool, ExamError> {
    let store = SqliteStore::new(conn);
    let student = require_student(&store, reg_no)?;
    let ids = resolve_subject_ids(&store, &[subject_name.to_string()])?;
    let mut created = false;
    for subject_id in ids {
        let n = conn
            .execute(
                "INSERT OR IGNORE INTO subject_enrollments(id, student_reg_no, subject_id)
                 VALUES(?, ?, ?)",
                (Uuid::new_v4().to_string(), &student.reg_no, &subject_id),
            )
            .map_err(insert_err)?;
        created |= n > 0;
    }
    Ok(created)
}

/// Replaces the student's whole enrollment set.
pub fn set_enrollments(
    conn: &Connection,
    reg_no: &str,
    subject_names: &[String],
) -> Result<Vec<String>, ExamError> {
    let store = SqliteStore::new(conn);
    let student = require_student(&store, reg_no)?;
    let ids = resolve_subject_ids(&store, subject_names)?;
    let tx = conn.unchecked_transaction()?;
    replace_enrollment_ids(&tx, &student.reg_no, &ids)?;
    tx.commit()?;
    store.enrolled_subject_names(&student.reg_no)
}

#[derive(Debug, Deserialize)]
struct EnrollmentCsvRow {
    reg_no: String,
    subject: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrollmentImportSummary {
    pub rows: usize,
    pub students_updated: usize,
    pub enrollments: usize,
    pub warnings: Vec<serde_json::Value>,
}

/// Reads `reg_no,subject` rows and bulk-replaces each listed student's
/// enrollment set. Unknown students or subjects become warnings.
pub fn import_enrollments_csv(
    conn: &Connection,
    path: &Path,
) -> anyhow::Result<EnrollmentImportSummary> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_path(path)?;
    let store = SqliteStore::new(conn);

    let mut order: Vec<String> = Vec::new();
    let mut grouped: HashMap<String, Vec<String>> = HashMap::new();
    let mut warnings = Vec::new();
    let mut rows = 0usize;

    for (i, result) in rdr.deserialize::<EnrollmentCsvRow>().enumerate() {
        // Header is line 1.
        let line = i + 2;
        rows += 1;
        let row = match result {
            Ok(r) => r,
            Err(e) => {
                warnings.push(json!({ "line": line, "code": "bad_row", "message": e.to_string() }));
                continue;
            }
        };
        if store.student(&row.reg_no)?.is_none() {
            warnings.push(json!({
                "line": line,
                "code": "unknown_student",
                "message": format!("student {} not found", row.reg_no)
            }));
            continue;
        }
        let Some(subject) = store.subject_by_name(&row.subject)? else {
            warnings.push(json!({
                "line": line,
                "code": "unknown_subject",
                "message": format!("subject {} not found", row.subject)
            }));
            continue;
        };
        let ids = grouped.entry(row.reg_no.clone()).or_insert_with(|| {
            order.push(row.reg_no.clone());
            Vec::new()
        });
        if !ids.contains(&subject.id) {
            ids.push(subject.id);
        }
    }

    let tx = conn.unchecked_transaction()?;
    let mut enrollments = 0usize;
    for reg_no in &order {
        let ids = grouped.get(reg_no).map(|v| v.as_slice()).unwrap_or(&[]);
        replace_enrollment_ids(&tx, reg_no, ids)?;
        enrollments += ids.len();
    }
    tx.commit()?;

    tracing::info!(
        rows,
        students = order.len(),
        warnings = warnings.len(),
        "imported subject enrollments"
    );
    Ok(EnrollmentImportSummary {
        rows,
        students_updated: order.len(),
        enrollments,
        warnings,
    })
}
