use crate::error::ExamError;
use crate::model::{
    ExamRecord, ExamType, GradeBand, Guardian, Staff, Stream, Student, Subject, Term,
};
use crate::roster::EnrollmentIndex;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension, Row};

/// Read-only lookups the scoring and report code depends on.
pub trait SchoolStore {
    fn stream_by_name(&self, name: &str) -> Result<Option<Stream>, ExamError>;
    fn subject_by_name(&self, name: &str) -> Result<Option<Subject>, ExamError>;
    fn exam_type_by_name(&self, name: &str) -> Result<Option<ExamType>, ExamError>;
    fn term_by_name(&self, name: &str) -> Result<Option<Term>, ExamError>;
    fn subjects(&self) -> Result<Vec<Subject>, ExamError>;
    fn grade_bands(&self) -> Result<Vec<GradeBand>, ExamError>;
    fn student(&self, reg_no: &str) -> Result<Option<Student>, ExamError>;
    /// All students in registration order, optionally limited to a stream.
    fn students(&self, stream_id: Option<&str>) -> Result<Vec<Student>, ExamError>;
    fn enrollments(&self, reg_nos: &[String]) -> Result<EnrollmentIndex, ExamError>;
    fn exam_records(&self, term_id: &str, reg_nos: &[String]) -> Result<Vec<ExamRecord>, ExamError>;
}

pub struct SqliteStore<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn named_by_name(
        &self,
        table: &str,
        name: &str,
    ) -> Result<Option<(String, String)>, ExamError> {
        let sql = format!("SELECT id, name FROM {} WHERE name = ? COLLATE NOCASE", table);
        Ok(self
            .conn
            .query_row(&sql, [name.trim()], |r| Ok((r.get(0)?, r.get(1)?)))
            .optional()?)
    }

    pub fn list_named(&self, table: &str) -> Result<Vec<(String, String)>, ExamError> {
        let sql = format!("SELECT id, name FROM {} ORDER BY name", table);
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], |r| Ok((r.get(0)?, r.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn staff(&self) -> Result<Vec<Staff>, ExamError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, username, first_name, middle_name, last_name, email, phone_number
             FROM staff
             ORDER BY rowid",
        )?;
        let rows = stmt
            .query_map([], |r| {
                Ok(Staff {
                    id: r.get(0)?,
                    username: r.get(1)?,
                    first_name: r.get(2)?,
                    middle_name: r.get(3)?,
                    last_name: r.get(4)?,
                    email: r.get(5)?,
                    phone_number: r.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn enrolled_subject_names(&self, reg_no: &str) -> Result<Vec<String>, ExamError> {
        let mut stmt = self.conn.prepare(
            "SELECT s.name
             FROM subject_enrollments e
             JOIN subjects s ON s.id = e.subject_id
             WHERE e.student_reg_no = ?
             ORDER BY s.name",
        )?;
        let names = stmt
            .query_map([reg_no], |r| r.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names)
    }
}

const STUDENT_COLUMNS: &str = "st.reg_no, st.first_name, st.middle_name, st.last_name,
    st.nominal_form, st.enrollment_year, st.date_registered, st.stream_id, sr.name,
    st.house, st.kcpe_marks, st.guardian_first_name, st.guardian_middle_name,
    st.guardian_last_name, st.guardian_phone, st.guardian_email";

fn student_from_row(r: &Row<'_>) -> rusqlite::Result<Student> {
    Ok(Student {
        reg_no: r.get(0)?,
        first_name: r.get(1)?,
        middle_name: r.get(2)?,
        last_name: r.get(3)?,
        nominal_form: r.get(4)?,
        enrollment_year: r.get(5)?,
        date_registered: r.get(6)?,
        stream_id: r.get(7)?,
        stream_name: r.get(8)?,
        house: r.get(9)?,
        kcpe_marks: r.get(10)?,
        guardian: Guardian {
            first_name: r.get(11)?,
            middle_name: r.get(12)?,
            last_name: r.get(13)?,
            phone_number: r.get(14)?,
            email: r.get(15)?,
        },
    })
}

fn placeholders(n: usize) -> String {
    std::iter::repeat("?").take(n).collect::<Vec<_>>().join(",")
}

impl<'a> SchoolStore for SqliteStore<'a> {
    fn stream_by_name(&self, name: &str) -> Result<Option<Stream>, ExamError> {
        Ok(self
            .named_by_name("streams", name)?
            .map(|(id, name)| Stream { id, name }))
    }

    fn subject_by_name(&self, name: &str) -> Result<Option<Subject>, ExamError> {
        Ok(self
            .named_by_name("subjects", name)?
            .map(|(id, name)| Subject { id, name }))
    }

    fn exam_type_by_name(&self, name: &str) -> Result<Option<ExamType>, ExamError> {
        Ok(self
            .named_by_name("exam_types", name)?
            .map(|(id, name)| ExamType { id, name }))
    }

    fn term_by_name(&self, name: &str) -> Result<Option<Term>, ExamError> {
        Ok(self
            .named_by_name("terms", name)?
            .map(|(id, name)| Term { id, name }))
    }

    fn subjects(&self) -> Result<Vec<Subject>, ExamError> {
        Ok(self
            .list_named("subjects")?
            .into_iter()
            .map(|(id, name)| Subject { id, name })
            .collect())
    }

    fn grade_bands(&self) -> Result<Vec<GradeBand>, ExamError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, grade, lower_bound FROM grade_bands ORDER BY lower_bound DESC",
        )?;
        let bands = stmt
            .query_map([], |r| {
                Ok(GradeBand {
                    id: r.get(0)?,
                    grade: r.get(1)?,
                    lower_bound: r.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(bands)
    }

    fn student(&self, reg_no: &str) -> Result<Option<Student>, ExamError> {
        let sql = format!(
            "SELECT {} FROM students st JOIN streams sr ON sr.id = st.stream_id
             WHERE st.reg_no = ?",
            STUDENT_COLUMNS
        );
        Ok(self
            .conn
            .query_row(&sql, [reg_no.trim()], student_from_row)
            .optional()?)
    }

    fn students(&self, stream_id: Option<&str>) -> Result<Vec<Student>, ExamError> {
        let mut sql = format!(
            "SELECT {} FROM students st JOIN streams sr ON sr.id = st.stream_id",
            STUDENT_COLUMNS
        );
        let mut binds: Vec<Value> = Vec::new();
        if let Some(id) = stream_id {
            sql.push_str(" WHERE st.stream_id = ?");
            binds.push(Value::Text(id.to_string()));
        }
        sql.push_str(" ORDER BY st.rowid");
        let mut stmt = self.conn.prepare(&sql)?;
        let students = stmt
            .query_map(params_from_iter(binds), student_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(students)
    }

    fn enrollments(&self, reg_nos: &[String]) -> Result<EnrollmentIndex, ExamError> {
        if reg_nos.is_empty() {
            return Ok(EnrollmentIndex::default());
        }
        let sql = format!(
            "SELECT student_reg_no, subject_id FROM subject_enrollments
             WHERE student_reg_no IN ({})",
            placeholders(reg_nos.len())
        );
        let binds: Vec<Value> = reg_nos.iter().map(|r| Value::Text(r.clone())).collect();
        let mut stmt = self.conn.prepare(&sql)?;
        let pairs = stmt
            .query_map(params_from_iter(binds), |r| {
                Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(EnrollmentIndex::from_pairs(pairs))
    }

    fn exam_records(&self, term_id: &str, reg_nos: &[String]) -> Result<Vec<ExamRecord>, ExamError> {
        if reg_nos.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT id, student_reg_no, subject_id, exam_type_id, term_id, date_done, marks
             FROM exams
             WHERE term_id = ? AND student_reg_no IN ({})",
            placeholders(reg_nos.len())
        );
        let mut binds: Vec<Value> = Vec::with_capacity(reg_nos.len() + 1);
        binds.push(Value::Text(term_id.to_string()));
        for r in reg_nos {
            binds.push(Value::Text(r.clone()));
        }
        let mut stmt = self.conn.prepare(&sql)?;
        let records = stmt
            .query_map(params_from_iter(binds), |r| {
                Ok(ExamRecord {
                    id: r.get(0)?,
                    student_reg_no: r.get(1)?,
                    subject_id: r.get(2)?,
                    exam_type_id: r.get(3)?,
                    term_id: r.get(4)?,
                    date_done: r.get(5)?,
                    marks: r.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }
}
