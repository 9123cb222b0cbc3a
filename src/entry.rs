//! Exam mark ingestion: single-record upsert and roster-driven batch entry.

use crate::calc::round_off_2_decimals;
use crate::error::{ExamError, FieldErrors};
use crate::model::{ExamRecord, ExamType, Stream, Student, Subject, SubjectSelector, Term, ALL_SUBJECTS};
use crate::roster::{resolve_roster, CurrentYear};
use crate::store::{SchoolStore, SqliteStore};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

pub const MAX_MARKS: f64 = 99.99;
pub const MAX_BATCH_CELLS: usize = 5000;
const STORED_DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Validates a numeric score against the entry bounds: finite, within
/// [0, 99.99], at most two decimal places.
pub fn check_marks(v: f64) -> Result<f64, String> {
    if !v.is_finite() {
        return Err("Enter a number.".to_string());
    }
    if v < 0.0 {
        return Err("Ensure this value is greater than or equal to 0.".to_string());
    }
    if v > MAX_MARKS {
        return Err(format!(
            "Ensure this value is less than or equal to {}.",
            MAX_MARKS
        ));
    }
    let scaled = v * 100.0;
    if (scaled - scaled.round()).abs() > 1e-6 {
        return Err("Ensure that there are no more than 2 decimal places.".to_string());
    }
    Ok(round_off_2_decimals(v))
}

/// `Ok(None)` for a blank cell (null or whitespace string).
pub fn parse_marks(value: &Value) -> Result<Option<f64>, String> {
    let v = match value {
        Value::Null => return Ok(None),
        Value::Number(n) => n.as_f64().ok_or_else(|| "Enter a number.".to_string())?,
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                return Ok(None);
            }
            s.parse::<f64>().map_err(|_| "Enter a number.".to_string())?
        }
        _ => return Err("Enter a number.".to_string()),
    };
    check_marks(v).map(Some)
}

/// Accepts RFC 3339, `YYYY-MM-DD HH:MM[:SS]`, `YYYY-MM-DDTHH:MM[:SS]` or a
/// bare date; absent means now.
pub fn parse_date_done(raw: Option<&str>) -> Result<String, String> {
    let raw = match raw.map(str::trim) {
        None | Some("") => {
            return Ok(chrono::Local::now()
                .naive_local()
                .format(STORED_DATE_FORMAT)
                .to_string())
        }
        Some(s) => s,
    };
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.naive_local().format(STORED_DATE_FORMAT).to_string());
    }
    for fmt in [
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H:%M",
    ] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Ok(dt.format(STORED_DATE_FORMAT).to_string());
        }
    }
    if let Ok(d) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        if let Some(dt) = d.and_hms_opt(0, 0, 0) {
            return Ok(dt.format(STORED_DATE_FORMAT).to_string());
        }
    }
    Err("Enter a valid date/time.".to_string())
}

/// Atomic insert-or-overwrite on the (student, subject, exam type, term) key.
pub fn upsert_exam(
    conn: &Connection,
    reg_no: &str,
    subject_id: &str,
    exam_type_id: &str,
    term_id: &str,
    date_done: &str,
    marks: f64,
) -> Result<ExamRecord, ExamError> {
    conn.execute(
        "INSERT INTO exams(id, student_reg_no, subject_id, exam_type_id, term_id, date_done, marks)
         VALUES(?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(student_reg_no, subject_id, exam_type_id, term_id) DO UPDATE SET
           date_done = excluded.date_done,
           marks = excluded.marks",
        rusqlite::params![
            Uuid::new_v4().to_string(),
            reg_no,
            subject_id,
            exam_type_id,
            term_id,
            date_done,
            marks
        ],
    )
    .map_err(|e| ExamError::new("db_insert_failed", e.to_string()))?;

    let record = conn.query_row(
        "SELECT id, student_reg_no, subject_id, exam_type_id, term_id, date_done, marks
         FROM exams
         WHERE student_reg_no = ? AND subject_id = ? AND exam_type_id = ? AND term_id = ?",
        (reg_no, subject_id, exam_type_id, term_id),
        |r| {
            Ok(ExamRecord {
                id: r.get(0)?,
                student_reg_no: r.get(1)?,
                subject_id: r.get(2)?,
                exam_type_id: r.get(3)?,
                term_id: r.get(4)?,
                date_done: r.get(5)?,
                marks: r.get(6)?,
            })
        },
    )?;
    Ok(record)
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExamEntry {
    pub reg_no: String,
    pub subject: String,
    pub exam_type: String,
    pub term: String,
    pub date_done: Option<String>,
    pub marks: Value,
}

fn lookup_subject(
    store: &SqliteStore<'_>,
    errs: &mut FieldErrors,
    field: &str,
    name: &str,
) -> Result<Option<Subject>, ExamError> {
    if name.trim().eq_ignore_ascii_case(ALL_SUBJECTS) {
        errs.add(field, "Marks are recorded against a single subject.");
        return Ok(None);
    }
    let found = store.subject_by_name(name)?;
    if found.is_none() {
        errs.add_not_found(field, "This subject is not found.");
    }
    Ok(found)
}

fn lookup_exam_type(
    store: &SqliteStore<'_>,
    errs: &mut FieldErrors,
    name: &str,
) -> Result<Option<ExamType>, ExamError> {
    let found = store.exam_type_by_name(name)?;
    if found.is_none() {
        errs.add_not_found("exam_type_name", "This exam type is not found.");
    }
    Ok(found)
}

fn lookup_term(
    store: &SqliteStore<'_>,
    errs: &mut FieldErrors,
    name: &str,
) -> Result<Option<Term>, ExamError> {
    let found = store.term_by_name(name)?;
    if found.is_none() {
        errs.add_not_found("term_name", "This term is not found.");
    }
    Ok(found)
}

pub fn record_or_update_exam(conn: &Connection, entry: ExamEntry) -> Result<ExamRecord, ExamError> {
    let store = SqliteStore::new(conn);
    let mut errs = FieldErrors::new();

    let student = store.student(&entry.reg_no)?;
    if student.is_none() {
        errs.add_not_found(
            "student_reg_no",
            "A student with this registration number is not found.",
        );
    }
    let subject = lookup_subject(&store, &mut errs, "subject_name", &entry.subject)?;
    let exam_type = lookup_exam_type(&store, &mut errs, &entry.exam_type)?;
    let term = lookup_term(&store, &mut errs, &entry.term)?;
    let marks = match parse_marks(&entry.marks) {
        Ok(Some(v)) => Some(v),
        Ok(None) => {
            errs.add("marks", "This field is required.");
            None
        }
        Err(msg) => {
            errs.add("marks", msg);
            None
        }
    };
    let date_done = match parse_date_done(entry.date_done.as_deref()) {
        Ok(d) => Some(d),
        Err(msg) => {
            errs.add("date_done", msg);
            None
        }
    };

    errs.into_filter_result("exam entry rejected")?;

    let (Some(student), Some(subject), Some(exam_type), Some(term), Some(marks), Some(date_done)) =
        (student, subject, exam_type, term, marks, date_done)
    else {
        return Err(ExamError::invariant("validated exam entry incomplete"));
    };

    let record = upsert_exam(
        conn,
        &student.reg_no,
        &subject.id,
        &exam_type.id,
        &term.id,
        &date_done,
        marks,
    )?;
    tracing::info!(
        reg_no = %student.reg_no,
        subject = %subject.name,
        exam_type = %exam_type.name,
        term = %term.name,
        marks,
        "recorded exam"
    );
    Ok(record)
}

/// Filter values shared by batch filtering and batch recording.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BatchFilter {
    pub form: Option<i64>,
    pub stream: String,
    pub subject: String,
    pub exam_type: String,
    pub term: String,
    pub reference_year: Option<i32>,
}

#[derive(Debug, Clone)]
pub struct EntryContext {
    pub form: i64,
    pub stream: Stream,
    pub subject: Subject,
    pub exam_type: ExamType,
    pub term: Term,
    pub reference_year: Option<i32>,
}

pub fn resolve_entry_context(
    store: &SqliteStore<'_>,
    filter: &BatchFilter,
) -> Result<EntryContext, ExamError> {
    let mut errs = FieldErrors::new();
    let form = match filter.form {
        Some(f) if f >= 1 => Some(f),
        Some(_) => {
            errs.add("form", "Ensure this value is greater than or equal to 1.");
            None
        }
        None => {
            errs.add("form", "This field is required.");
            None
        }
    };
    let stream = store.stream_by_name(&filter.stream)?;
    if stream.is_none() {
        errs.add_not_found("stream_name", "This stream is not found.");
    }
    let subject = lookup_subject(store, &mut errs, "subject_name", &filter.subject)?;
    let exam_type = lookup_exam_type(store, &mut errs, &filter.exam_type)?;
    let term = lookup_term(store, &mut errs, &filter.term)?;
    errs.into_filter_result("batch filter rejected")?;

    match (form, stream, subject, exam_type, term) {
        (Some(form), Some(stream), Some(subject), Some(exam_type), Some(term)) => Ok(EntryContext {
            form,
            stream,
            subject,
            exam_type,
            term,
            reference_year: filter.reference_year,
        }),
        _ => Err(ExamError::invariant("validated batch filter incomplete")),
    }
}

/// Students of the form and stream who take the subject.
pub fn entry_roster(
    store: &SqliteStore<'_>,
    ctx: &EntryContext,
    clock: &dyn CurrentYear,
) -> Result<Vec<Student>, ExamError> {
    let candidates = store.students(Some(&ctx.stream.id))?;
    let roster = resolve_roster(&candidates, ctx.form, ctx.reference_year, clock);
    let reg_nos: Vec<String> = roster.iter().map(|s| s.reg_no.clone()).collect();
    let index = store.enrollments(&reg_nos)?;
    Ok(index.filter_by_enrollment(roster, &SubjectSelector::One(ctx.subject.clone())))
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchCell {
    pub reg_no: String,
    pub name: String,
    pub marks: Option<f64>,
}

pub fn batch_cells(
    store: &SqliteStore<'_>,
    ctx: &EntryContext,
    roster: &[Student],
) -> Result<Vec<BatchCell>, ExamError> {
    let reg_nos: Vec<String> = roster.iter().map(|s| s.reg_no.clone()).collect();
    let records = store.exam_records(&ctx.term.id, &reg_nos)?;
    Ok(roster
        .iter()
        .map(|s| BatchCell {
            reg_no: s.reg_no.clone(),
            name: s.full_name(),
            marks: records
                .iter()
                .find(|r| {
                    r.student_reg_no == s.reg_no
                        && r.subject_id == ctx.subject.id
                        && r.exam_type_id == ctx.exam_type.id
                })
                .map(|r| r.marks),
        })
        .collect())
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchFailure {
    pub reg_no: String,
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchOutcome {
    pub saved: usize,
    pub skipped: usize,
    pub failed: Vec<BatchFailure>,
    pub message: String,
}

impl BatchOutcome {
    fn fail(&mut self, reg_no: &str, code: &str, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(%reg_no, %code, %message, "batch cell rejected");
        self.failed.push(BatchFailure {
            reg_no: reg_no.to_string(),
            code: code.to_string(),
            message,
        });
    }

    fn summarize(&mut self) {
        self.message = if self.failed.is_empty() {
            format!("Saved marks for {} student(s).", self.saved)
        } else {
            let ids: Vec<&str> = self.failed.iter().map(|f| f.reg_no.as_str()).collect();
            format!(
                "Saved marks for {} student(s). Marks for the following registration numbers were not saved: {}.",
                self.saved,
                ids.join(", ")
            )
        };
    }
}

/// Validates and upserts each cell independently. One bad cell never blocks
/// the others; every upsert is its own statement.
pub fn record_batch(
    conn: &Connection,
    ctx: &EntryContext,
    roster: &[Student],
    date_done: Option<&str>,
    cells: &serde_json::Map<String, Value>,
) -> Result<BatchOutcome, ExamError> {
    if cells.len() > MAX_BATCH_CELLS {
        return Err(ExamError::new(
            "bad_params",
            format!(
                "batch has {} cells; at most {} are accepted",
                cells.len(),
                MAX_BATCH_CELLS
            ),
        ));
    }
    let date_done = parse_date_done(date_done).map_err(|msg| {
        ExamError::new("bad_params", msg.clone())
            .with_details(serde_json::json!({ "fieldErrors": { "date_done": [msg] } }))
    })?;

    let mut outcome = BatchOutcome::default();
    // Roster order first, then any stray keys.
    for student in roster {
        let Some(value) = cells.get(&student.reg_no) else {
            outcome.skipped += 1;
            continue;
        };
        match parse_marks(value) {
            Ok(None) => outcome.skipped += 1,
            Ok(Some(marks)) => match upsert_exam(
                conn,
                &student.reg_no,
                &ctx.subject.id,
                &ctx.exam_type.id,
                &ctx.term.id,
                &date_done,
                marks,
            ) {
                Ok(_) => outcome.saved += 1,
                Err(e) => outcome.fail(&student.reg_no, &e.code, e.message),
            },
            Err(msg) => outcome.fail(&student.reg_no, "bad_marks", msg),
        }
    }
    for reg_no in cells.keys() {
        if !roster.iter().any(|s| &s.reg_no == reg_no) {
            outcome.fail(
                reg_no,
                "not_in_roster",
                "student is not in the selected form, stream and subject",
            );
        }
    }
    outcome.summarize();
    tracing::info!(
        subject = %ctx.subject.name,
        exam_type = %ctx.exam_type.name,
        term = %ctx.term.name,
        saved = outcome.saved,
        skipped = outcome.skipped,
        failed = outcome.failed.len(),
        "batch exam entry"
    );
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::tests::{conn, student_form};
    use crate::registry::{create_named, register_student, RefTable};
    use crate::roster::FixedYear;
    use serde_json::json;

    fn seed(c: &Connection) {
        create_named(c, RefTable::Streams, "north").expect("stream");
        create_named(c, RefTable::Subjects, "mathematics").expect("subject");
        create_named(c, RefTable::ExamTypes, "cat2").expect("exam type");
        create_named(c, RefTable::Terms, "1").expect("term");
        register_student(c, student_form("R1", 1, "2020-02-03", &["Mathematics"])).expect("r1");
        register_student(c, student_form("R2", 1, "2020-02-03", &["Mathematics"])).expect("r2");
        register_student(c, student_form("R3", 1, "2020-02-03", &[])).expect("r3");
    }

    fn entry(marks: Value) -> ExamEntry {
        ExamEntry {
            reg_no: "R1".into(),
            subject: "Mathematics".into(),
            exam_type: "Cat2".into(),
            term: "1".into(),
            date_done: Some("2021-03-01".into()),
            marks,
        }
    }

    #[test]
    fn marks_validation() {
        assert_eq!(parse_marks(&json!(55.5)), Ok(Some(55.5)));
        assert_eq!(parse_marks(&json!(" 80 ")), Ok(Some(80.0)));
        assert_eq!(parse_marks(&json!("")), Ok(None));
        assert_eq!(parse_marks(&Value::Null), Ok(None));
        assert!(parse_marks(&json!("nan")).is_err());
        assert!(parse_marks(&json!("inf")).is_err());
        assert!(parse_marks(&json!(-1)).is_err());
        assert!(parse_marks(&json!(100)).is_err());
        assert!(parse_marks(&json!(12.345)).is_err());
        assert!(parse_marks(&json!(true)).is_err());
        assert_eq!(check_marks(99.99), Ok(99.99));
    }

    #[test]
    fn date_formats() {
        assert_eq!(
            parse_date_done(Some("2021-03-01")).expect("date"),
            "2021-03-01T00:00:00"
        );
        assert_eq!(
            parse_date_done(Some("2021-03-01 10:15")).expect("date"),
            "2021-03-01T10:15:00"
        );
        assert!(parse_date_done(Some("yesterday")).is_err());
        assert!(parse_date_done(None).is_ok());
    }

    #[test]
    fn repeated_entry_overwrites_single_record() {
        let c = conn();
        seed(&c);
        let first = record_or_update_exam(&c, entry(json!(50.0))).expect("first");
        let second = record_or_update_exam(&c, entry(json!("55.5"))).expect("second");
        assert_eq!(first.id, second.id);
        assert_eq!(second.marks, 55.5);
        let n: i64 = c
            .query_row("SELECT COUNT(*) FROM exams", [], |r| r.get(0))
            .expect("count");
        assert_eq!(n, 1);
    }

    #[test]
    fn lookup_failures_are_reported_together() {
        let c = conn();
        seed(&c);
        let mut e = entry(json!(50));
        e.reg_no = "NOPE".into();
        e.subject = "Chemistry".into();
        e.term = "9".into();
        let err = record_or_update_exam(&c, e).expect_err("lookup");
        assert_eq!(err.code, "not_found");
        let fields = &err.details.expect("details")["fieldErrors"];
        assert!(fields.get("student_reg_no").is_some());
        assert!(fields.get("subject_name").is_some());
        assert!(fields.get("term_name").is_some());
        assert!(fields.get("exam_type_name").is_none());
    }

    #[test]
    fn batch_keeps_valid_rows_when_one_is_bad() {
        let c = conn();
        seed(&c);
        let store = SqliteStore::new(&c);
        let filter = BatchFilter {
            form: Some(2),
            stream: "North".into(),
            subject: "Mathematics".into(),
            exam_type: "CAT2".into(),
            term: "1".into(),
            reference_year: Some(2021),
        };
        let ctx = resolve_entry_context(&store, &filter).expect("ctx");
        let roster = entry_roster(&store, &ctx, &FixedYear(2030)).expect("roster");
        let ids: Vec<_> = roster.iter().map(|s| s.reg_no.as_str()).collect();
        assert_eq!(ids, vec!["R1", "R2"]);

        let cells = json!({ "R1": "nan", "R2": 72, "R3": 40 });
        let outcome = record_batch(&c, &ctx, &roster, Some("2021-03-01"), cells.as_object().expect("map"))
            .expect("batch");
        assert_eq!(outcome.saved, 1);
        let failed: Vec<_> = outcome.failed.iter().map(|f| (f.reg_no.as_str(), f.code.as_str())).collect();
        assert_eq!(failed, vec![("R1", "bad_marks"), ("R3", "not_in_roster")]);
        assert!(outcome.message.contains("R1"));

        let prefilled = batch_cells(&store, &ctx, &roster).expect("cells");
        assert_eq!(prefilled[0].marks, None);
        assert_eq!(prefilled[1].marks, Some(72.0));
    }

    #[test]
    fn oversized_batch_is_refused() {
        let c = conn();
        seed(&c);
        let store = SqliteStore::new(&c);
        let filter = BatchFilter {
            form: Some(1),
            stream: "North".into(),
            subject: "Mathematics".into(),
            exam_type: "CAT2".into(),
            term: "1".into(),
            reference_year: Some(2020),
        };
        let ctx = resolve_entry_context(&store, &filter).expect("ctx");
        let mut cells = serde_json::Map::new();
        for i in 0..=MAX_BATCH_CELLS {
            cells.insert(format!("X{}", i), json!(1));
        }
        let err = record_batch(&c, &ctx, &[], None, &cells).expect_err("too big");
        assert_eq!(err.code, "bad_params");
    }

    #[test]
    fn bad_form_alone_is_bad_params() {
        let c = conn();
        seed(&c);
        let store = SqliteStore::new(&c);
        let mut filter = BatchFilter {
            form: Some(0),
            stream: "North".into(),
            subject: "Mathematics".into(),
            exam_type: "CAT2".into(),
            term: "1".into(),
            reference_year: Some(2021),
        };
        let err = resolve_entry_context(&store, &filter).expect_err("form");
        assert_eq!(err.code, "bad_params");

        filter.stream = "South".into();
        let err = resolve_entry_context(&store, &filter).expect_err("stream");
        assert_eq!(err.code, "not_found");
    }
}
