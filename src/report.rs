//! Report tables: class lists, exam reports and results slips.
//!
//! Builders return plain serialisable models (already sorted and graded);
//! byte layout is left to a [`DocumentPainter`]. CSV is painted in-process,
//! PDF layout stays with the host.

use crate::calc::{position_of, MarkSheet, Position, RankedEntry, ScoreAggregator};
use crate::error::{ExamError, FieldErrors};
use crate::grading::GradingTable;
use crate::model::{ExamType, Stream, Student, Subject, SubjectSelector, Term, ALL_SUBJECTS};
use crate::roster::{current_form, resolve_roster, CurrentYear, EnrollmentIndex};
use crate::store::SchoolStore;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReportFilter {
    pub form: Option<i64>,
    pub stream: String,
    pub subject: Option<String>,
    pub term: Option<String>,
    pub exam_types: Vec<String>,
    pub reference_year: Option<i32>,
}

/// Form and stream after validation, with the year the roster was resolved for.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassRef {
    pub form: i64,
    pub stream: Stream,
    pub reference_year: i32,
}

fn require_form(errs: &mut FieldErrors, form: Option<i64>) -> i64 {
    match form {
        Some(f) if f >= 1 => f,
        Some(_) => {
            errs.add("form", "Ensure this value is greater than or equal to 1.");
            0
        }
        None => {
            errs.add("form", "This field is required.");
            0
        }
    }
}

fn lookup_stream(
    store: &dyn SchoolStore,
    errs: &mut FieldErrors,
    name: &str,
) -> Result<Option<Stream>, ExamError> {
    let found = store.stream_by_name(name)?;
    if found.is_none() {
        errs.add_not_found("stream_name", "This stream is not found.");
    }
    Ok(found)
}

fn lookup_term(
    store: &dyn SchoolStore,
    errs: &mut FieldErrors,
    name: Option<&str>,
) -> Result<Option<Term>, ExamError> {
    let Some(name) = name else {
        errs.add("term_name", "This field is required.");
        return Ok(None);
    };
    let found = store.term_by_name(name)?;
    if found.is_none() {
        errs.add_not_found("term_name", "This term is not found.");
    }
    Ok(found)
}

fn lookup_exam_types(
    store: &dyn SchoolStore,
    errs: &mut FieldErrors,
    names: &[String],
) -> Result<Vec<ExamType>, ExamError> {
    if names.is_empty() {
        errs.add("exam_types", "Select at least one exam type.");
    }
    let mut out: Vec<ExamType> = Vec::with_capacity(names.len());
    for name in names {
        match store.exam_type_by_name(name)? {
            Some(t) => {
                if !out.iter().any(|o| o.id == t.id) {
                    out.push(t);
                }
            }
            None => errs.add_not_found(
                "exam_types",
                format!("Exam type '{}' is not found.", name.trim()),
            ),
        }
    }
    Ok(out)
}

fn lookup_selector(
    store: &dyn SchoolStore,
    errs: &mut FieldErrors,
    name: Option<&str>,
) -> Result<Option<SubjectSelector>, ExamError> {
    let name = name.map(str::trim).unwrap_or(ALL_SUBJECTS);
    if name.eq_ignore_ascii_case(ALL_SUBJECTS) {
        return Ok(Some(SubjectSelector::All));
    }
    match store.subject_by_name(name)? {
        Some(s) => Ok(Some(SubjectSelector::One(s))),
        None => {
            errs.add_not_found("subject_name", "This subject is not found.");
            Ok(None)
        }
    }
}

fn class_students(
    store: &dyn SchoolStore,
    form: i64,
    stream: &Stream,
    reference_year: i32,
    clock: &dyn CurrentYear,
) -> Result<Vec<Student>, ExamError> {
    let candidates = store.students(Some(&stream.id))?;
    Ok(resolve_roster(&candidates, form, Some(reference_year), clock))
}

fn no_students(form: i64, stream: &Stream, subject: Option<&str>) -> ExamError {
    let mut msg = format!("No students found in form {} {}", form, stream.name);
    if let Some(s) = subject {
        msg.push_str(&format!(" taking {}", s));
    }
    ExamError::new("no_students", msg).with_details(serde_json::json!({
        "form": form,
        "stream": stream.name,
        "subject": subject,
    }))
}

fn reg_nos(students: &[Student]) -> Vec<String> {
    students.iter().map(|s| s.reg_no.clone()).collect()
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassListRow {
    pub ordinal: usize,
    pub reg_no: String,
    pub name: String,
    pub house: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassList {
    pub school: Option<String>,
    pub title: String,
    pub class: ClassRef,
    pub rows: Vec<ClassListRow>,
}

pub fn class_list(
    store: &dyn SchoolStore,
    filter: &ReportFilter,
    clock: &dyn CurrentYear,
) -> Result<ClassList, ExamError> {
    let mut errs = FieldErrors::new();
    let form = require_form(&mut errs, filter.form);
    let stream = lookup_stream(store, &mut errs, &filter.stream)?;
    errs.into_filter_result("class list filter rejected")?;
    let Some(stream) = stream else {
        return Err(ExamError::invariant("validated stream missing"));
    };

    let year = filter.reference_year.unwrap_or_else(|| clock.current_year());
    let students = class_students(store, form, &stream, year, clock)?;
    if students.is_empty() {
        return Err(no_students(form, &stream, None));
    }
    let rows = students
        .iter()
        .enumerate()
        .map(|(i, s)| ClassListRow {
            ordinal: i + 1,
            reg_no: s.reg_no.clone(),
            name: s.full_name(),
            house: s.house.clone(),
        })
        .collect();
    Ok(ClassList {
        school: None,
        title: format!("Form {} {} class list", form, stream.name),
        class: ClassRef {
            form,
            stream,
            reference_year: year,
        },
        rows,
    })
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportRow {
    pub ordinal: usize,
    pub reg_no: String,
    pub full_name: String,
    pub marks: Vec<Option<f64>>,
    pub total: f64,
    pub average: f64,
    pub grade: String,
    pub position: Position,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamReport {
    pub school: Option<String>,
    pub title: String,
    pub class: ClassRef,
    pub subject: String,
    pub term: Term,
    pub exam_types: Vec<ExamType>,
    /// Labels of the per-row `marks` cells.
    pub columns: Vec<String>,
    pub rows: Vec<ReportRow>,
}

/// Resolved inputs for scoring one class in one term.
struct Scoring {
    class: ClassRef,
    term: Term,
    exam_types: Vec<ExamType>,
    students: Vec<Student>,
    index: EnrollmentIndex,
    sheet: MarkSheet,
    grading: GradingTable,
}

fn load_scoring(
    store: &dyn SchoolStore,
    form: i64,
    stream: Stream,
    term: Term,
    exam_types: Vec<ExamType>,
    reference_year: Option<i32>,
    clock: &dyn CurrentYear,
) -> Result<Scoring, ExamError> {
    let year = reference_year.unwrap_or_else(|| clock.current_year());
    let students = class_students(store, form, &stream, year, clock)?;
    let ids = reg_nos(&students);
    let index = store.enrollments(&ids)?;
    let sheet = MarkSheet::from_records(store.exam_records(&term.id, &ids)?);
    let grading = GradingTable::new(store.grade_bands()?);
    Ok(Scoring {
        class: ClassRef {
            form,
            stream,
            reference_year: year,
        },
        term,
        exam_types,
        students,
        index,
        sheet,
        grading,
    })
}

impl Scoring {
    fn aggregator(&self) -> ScoreAggregator<'_> {
        ScoreAggregator::new(&self.sheet, &self.index)
    }

    /// Cohort for a selector: enrolled in the subject, or enrolled in
    /// anything for all-subjects.
    fn cohort(&self, selector: &SubjectSelector) -> Vec<Student> {
        let filtered = self
            .index
            .filter_by_enrollment(self.students.clone(), selector);
        match selector {
            SubjectSelector::All => self.index.drop_unenrolled(filtered),
            SubjectSelector::One(_) => filtered,
        }
    }

    fn rank(&self, selector: &SubjectSelector) -> Result<Vec<RankedEntry>, ExamError> {
        let cohort = self.cohort(selector);
        self.aggregator()
            .rank_cohort(&cohort, &self.term, &self.exam_types, selector)
    }

    /// Subjects taken by at least one class member, by name.
    fn taught_subjects(&self, all_subjects: &[Subject]) -> Vec<Subject> {
        let taken: BTreeSet<&String> = self
            .students
            .iter()
            .flat_map(|s| self.index.enrolled_subjects(&s.reg_no).iter())
            .collect();
        all_subjects
            .iter()
            .filter(|s| taken.contains(&s.id))
            .cloned()
            .collect()
    }
}

pub fn exam_report(
    store: &dyn SchoolStore,
    filter: &ReportFilter,
    clock: &dyn CurrentYear,
) -> Result<ExamReport, ExamError> {
    let mut errs = FieldErrors::new();
    let form = require_form(&mut errs, filter.form);
    let stream = lookup_stream(store, &mut errs, &filter.stream)?;
    let selector = lookup_selector(store, &mut errs, filter.subject.as_deref())?;
    let term = lookup_term(store, &mut errs, filter.term.as_deref())?;
    let exam_types = lookup_exam_types(store, &mut errs, &filter.exam_types)?;
    errs.into_filter_result("exam report filter rejected")?;
    let (Some(stream), Some(selector), Some(term)) = (stream, selector, term) else {
        return Err(ExamError::invariant("validated report filter incomplete"));
    };

    let scoring = load_scoring(
        store,
        form,
        stream,
        term,
        exam_types,
        filter.reference_year,
        clock,
    )?;
    let ranked = scoring.rank(&selector)?;
    if ranked.is_empty() {
        return Err(no_students(
            form,
            &scoring.class.stream,
            Some(selector.label()),
        ));
    }

    let subjects = match &selector {
        SubjectSelector::All => scoring.taught_subjects(&store.subjects()?),
        SubjectSelector::One(_) => Vec::new(),
    };
    let columns: Vec<String> = match &selector {
        SubjectSelector::All => subjects.iter().map(|s| s.name.clone()).collect(),
        SubjectSelector::One(_) => scoring.exam_types.iter().map(|t| t.name.clone()).collect(),
    };

    let agg = scoring.aggregator();
    let mut rows = Vec::with_capacity(ranked.len());
    for (i, entry) in ranked.iter().enumerate() {
        let reg_no = &entry.student.reg_no;
        let marks = match &selector {
            SubjectSelector::One(subject) => scoring
                .exam_types
                .iter()
                .map(|t| scoring.sheet.mark(reg_no, &subject.id, &t.id, &scoring.term.id))
                .collect(),
            SubjectSelector::All => {
                let mut cells = Vec::with_capacity(subjects.len());
                for subject in &subjects {
                    if scoring.index.is_enrolled(reg_no, &subject.id) {
                        let totals = agg.aggregate_subject(
                            &entry.student,
                            &subject.id,
                            &scoring.term,
                            &scoring.exam_types,
                        )?;
                        cells.push(Some(totals.average));
                    } else {
                        cells.push(None);
                    }
                }
                cells
            }
        };
        rows.push(ReportRow {
            ordinal: i + 1,
            reg_no: reg_no.clone(),
            full_name: entry.student.full_name(),
            marks,
            total: entry.total,
            average: entry.average,
            grade: scoring.grading.resolve_grade(entry.average),
            position: position_of(&ranked, reg_no),
        });
    }

    Ok(ExamReport {
        school: None,
        title: format!("{} exam report", selector.label()),
        subject: selector.label().to_string(),
        class: scoring.class,
        term: scoring.term,
        exam_types: scoring.exam_types,
        columns,
        rows,
    })
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SlipLine {
    pub subject: String,
    pub marks: Vec<Option<f64>>,
    pub average: f64,
    pub grade: String,
    pub position: Position,
    pub out_of: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SlipOverall {
    pub total: Option<f64>,
    pub average: Option<f64>,
    pub grade: String,
    pub position: Position,
    pub class_size: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultsSlip {
    pub reg_no: String,
    pub name: String,
    pub house: Option<String>,
    pub lines: Vec<SlipLine>,
    pub overall: SlipOverall,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultsSlips {
    pub school: Option<String>,
    pub title: String,
    pub class: ClassRef,
    pub term: Term,
    pub exam_types: Vec<ExamType>,
    pub slips: Vec<ResultsSlip>,
}

/// Rankings for every subject the class takes plus the overall ranking,
/// computed once and shared by all slips.
struct ClassRanking {
    subjects: Vec<(Subject, Vec<RankedEntry>)>,
    overall: Vec<RankedEntry>,
}

impl ClassRanking {
    fn build(scoring: &Scoring, all_subjects: &[Subject]) -> Result<Self, ExamError> {
        let mut subjects = Vec::new();
        for subject in scoring.taught_subjects(all_subjects) {
            let ranked = scoring.rank(&SubjectSelector::One(subject.clone()))?;
            subjects.push((subject, ranked));
        }
        let overall = scoring.rank(&SubjectSelector::All)?;
        Ok(Self { subjects, overall })
    }

    fn slip(&self, scoring: &Scoring, student: &Student) -> ResultsSlip {
        let mut lines = Vec::new();
        for (subject, ranked) in &self.subjects {
            let Some(entry) = ranked.iter().find(|e| e.student.reg_no == student.reg_no) else {
                continue;
            };
            lines.push(SlipLine {
                subject: subject.name.clone(),
                marks: scoring
                    .exam_types
                    .iter()
                    .map(|t| {
                        scoring
                            .sheet
                            .mark(&student.reg_no, &subject.id, &t.id, &scoring.term.id)
                    })
                    .collect(),
                average: entry.average,
                grade: scoring.grading.resolve_grade(entry.average),
                position: position_of(ranked, &student.reg_no),
                out_of: ranked.len(),
            });
        }
        let overall_entry = self
            .overall
            .iter()
            .find(|e| e.student.reg_no == student.reg_no);
        ResultsSlip {
            reg_no: student.reg_no.clone(),
            name: student.full_name(),
            house: student.house.clone(),
            lines,
            overall: SlipOverall {
                total: overall_entry.map(|e| e.total),
                average: overall_entry.map(|e| e.average),
                grade: match overall_entry {
                    Some(e) => scoring.grading.resolve_grade(e.average),
                    None => crate::model::UNRESOLVED.to_string(),
                },
                position: position_of(&self.overall, &student.reg_no),
                class_size: self.overall.len(),
            },
        }
    }
}

fn slips_for(
    store: &dyn SchoolStore,
    scoring: &Scoring,
    only: Option<&str>,
) -> Result<ResultsSlips, ExamError> {
    let ranking = ClassRanking::build(scoring, &store.subjects()?)?;
    let slips = scoring
        .students
        .iter()
        .filter(|s| only.map_or(true, |r| r == s.reg_no))
        .map(|s| ranking.slip(scoring, s))
        .collect();
    Ok(ResultsSlips {
        school: None,
        title: format!(
            "Form {} {} results slips",
            scoring.class.form, scoring.class.stream.name
        ),
        class: scoring.class.clone(),
        term: scoring.term.clone(),
        exam_types: scoring.exam_types.clone(),
        slips,
    })
}

pub fn results_slips_class(
    store: &dyn SchoolStore,
    filter: &ReportFilter,
    clock: &dyn CurrentYear,
) -> Result<ResultsSlips, ExamError> {
    let mut errs = FieldErrors::new();
    let form = require_form(&mut errs, filter.form);
    let stream = lookup_stream(store, &mut errs, &filter.stream)?;
    let term = lookup_term(store, &mut errs, filter.term.as_deref())?;
    let exam_types = lookup_exam_types(store, &mut errs, &filter.exam_types)?;
    errs.into_filter_result("results slip filter rejected")?;
    let (Some(stream), Some(term)) = (stream, term) else {
        return Err(ExamError::invariant("validated slip filter incomplete"));
    };

    let scoring = load_scoring(
        store,
        form,
        stream,
        term,
        exam_types,
        filter.reference_year,
        clock,
    )?;
    if scoring.students.is_empty() {
        return Err(no_students(form, &scoring.class.stream, None));
    }
    slips_for(store, &scoring, None)
}

/// Slip for one student, ranked against their current class.
pub fn results_slip_student(
    store: &dyn SchoolStore,
    reg_no: &str,
    filter: &ReportFilter,
    clock: &dyn CurrentYear,
) -> Result<ResultsSlips, ExamError> {
    let mut errs = FieldErrors::new();
    let student = store.student(reg_no)?;
    if student.is_none() {
        errs.add_not_found(
            "student_reg_no",
            "A student with this registration number is not found.",
        );
    }
    let term = lookup_term(store, &mut errs, filter.term.as_deref())?;
    let exam_types = lookup_exam_types(store, &mut errs, &filter.exam_types)?;
    errs.into_filter_result("results slip filter rejected")?;
    let (Some(student), Some(term)) = (student, term) else {
        return Err(ExamError::invariant("validated slip filter incomplete"));
    };

    let year = filter.reference_year.unwrap_or_else(|| clock.current_year());
    let form = current_form(&student, year);
    let stream = Stream {
        id: student.stream_id.clone(),
        name: student.stream_name.clone(),
    };
    let scoring = load_scoring(store, form, stream, term, exam_types, Some(year), clock)?;
    slips_for(store, &scoring, Some(&student.reg_no))
}

/// Receives report cells row by row; implementations own the byte layout.
pub trait DocumentPainter {
    fn heading(&mut self, text: &str) -> anyhow::Result<()>;
    fn row(&mut self, cells: &[String]) -> anyhow::Result<()>;
    fn gap(&mut self) -> anyhow::Result<()>;
}

pub struct CsvPainter {
    writer: csv::Writer<Vec<u8>>,
    rows: usize,
}

impl CsvPainter {
    pub fn new() -> Self {
        Self {
            writer: csv::WriterBuilder::new()
                .flexible(true)
                .from_writer(Vec::new()),
            rows: 0,
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn finish(self) -> anyhow::Result<String> {
        let bytes = self
            .writer
            .into_inner()
            .map_err(|e| anyhow::anyhow!("csv flush failed: {}", e))?;
        Ok(String::from_utf8(bytes)?)
    }
}

impl Default for CsvPainter {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentPainter for CsvPainter {
    fn heading(&mut self, text: &str) -> anyhow::Result<()> {
        self.writer.write_record([text])?;
        self.rows += 1;
        Ok(())
    }

    fn row(&mut self, cells: &[String]) -> anyhow::Result<()> {
        self.writer.write_record(cells)?;
        self.rows += 1;
        Ok(())
    }

    fn gap(&mut self) -> anyhow::Result<()> {
        self.writer.write_record([""])?;
        self.rows += 1;
        Ok(())
    }
}

fn fmt_mark(v: Option<f64>) -> String {
    v.map(|m| format!("{:.2}", m)).unwrap_or_default()
}

fn paint_heading(
    p: &mut dyn DocumentPainter,
    school: Option<&str>,
    title: &str,
) -> anyhow::Result<()> {
    if let Some(s) = school {
        p.heading(s)?;
    }
    p.heading(title)
}

pub trait Paint {
    fn paint(&self, p: &mut dyn DocumentPainter) -> anyhow::Result<()>;
    fn file_name(&self) -> String;
}

/// `form2_north_mathematics_exam_report.csv`
pub fn report_filename(form: i64, stream: &str, title: &str) -> String {
    let slug = |s: &str| {
        s.split(|c: char| !c.is_ascii_alphanumeric())
            .filter(|w| !w.is_empty())
            .map(|w| w.to_ascii_lowercase())
            .collect::<Vec<_>>()
            .join("_")
    };
    format!("form{}_{}_{}.csv", form, slug(stream), slug(title))
}

impl Paint for ClassList {
    fn paint(&self, p: &mut dyn DocumentPainter) -> anyhow::Result<()> {
        paint_heading(p, self.school.as_deref(), &self.title)?;
        p.row(&[
            "#".to_string(),
            "Reg No".to_string(),
            "Name".to_string(),
            "House".to_string(),
        ])?;
        for r in &self.rows {
            p.row(&[
                r.ordinal.to_string(),
                r.reg_no.clone(),
                r.name.clone(),
                r.house.clone().unwrap_or_default(),
            ])?;
        }
        Ok(())
    }

    fn file_name(&self) -> String {
        report_filename(self.class.form, &self.class.stream.name, "class list")
    }
}

impl Paint for ExamReport {
    fn paint(&self, p: &mut dyn DocumentPainter) -> anyhow::Result<()> {
        paint_heading(p, self.school.as_deref(), &self.title)?;
        p.heading(&format!(
            "Form {} {} - Term {}",
            self.class.form, self.class.stream.name, self.term.name
        ))?;
        let mut header: Vec<String> = vec!["#".to_string(), "Reg No".to_string(), "Name".to_string()];
        header.extend(self.columns.iter().cloned());
        header.extend(["Average", "Grade", "Position"].map(String::from));
        p.row(&header)?;
        for r in &self.rows {
            let mut cells = vec![r.ordinal.to_string(), r.reg_no.clone(), r.full_name.clone()];
            cells.extend(r.marks.iter().map(|m| fmt_mark(*m)));
            cells.push(format!("{:.2}", r.average));
            cells.push(r.grade.clone());
            cells.push(r.position.to_string());
            p.row(&cells)?;
        }
        Ok(())
    }

    fn file_name(&self) -> String {
        report_filename(self.class.form, &self.class.stream.name, &self.title)
    }
}

impl Paint for ResultsSlips {
    fn paint(&self, p: &mut dyn DocumentPainter) -> anyhow::Result<()> {
        paint_heading(p, self.school.as_deref(), &self.title)?;
        for slip in &self.slips {
            p.gap()?;
            p.row(&[
                "Reg No".to_string(),
                slip.reg_no.clone(),
                "Name".to_string(),
                slip.name.clone(),
                "Term".to_string(),
                self.term.name.clone(),
            ])?;
            let mut header: Vec<String> = vec!["Subject".to_string()];
            header.extend(self.exam_types.iter().map(|t| t.name.clone()));
            header.extend(["Average", "Grade", "Position"].map(String::from));
            p.row(&header)?;
            for line in &slip.lines {
                let mut cells = vec![line.subject.clone()];
                cells.extend(line.marks.iter().map(|m| fmt_mark(*m)));
                cells.push(format!("{:.2}", line.average));
                cells.push(line.grade.clone());
                cells.push(format!("{} / {}", line.position, line.out_of));
                p.row(&cells)?;
            }
            p.row(&[
                "Overall".to_string(),
                fmt_mark(slip.overall.average),
                slip.overall.grade.clone(),
                format!("{} / {}", slip.overall.position, slip.overall.class_size),
            ])?;
        }
        Ok(())
    }

    fn file_name(&self) -> String {
        let title = match self.slips.as_slice() {
            [one] => format!("{} results slip", one.reg_no),
            _ => "results slips".to_string(),
        };
        report_filename(self.class.form, &self.class.stream.name, &title)
    }
}

/// Paints into CSV text, returning the text and its record count.
pub fn render_csv<D: Paint + ?Sized>(doc: &D) -> anyhow::Result<(String, usize)> {
    let mut painter = CsvPainter::new();
    doc.paint(&mut painter)?;
    let rows = painter.rows();
    Ok((painter.finish()?, rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{record_or_update_exam, ExamEntry};
    use crate::registry::tests::{conn, student_form};
    use crate::registry::{create_grade_band, create_named, register_student, RefTable};
    use crate::roster::FixedYear;
    use crate::store::SqliteStore;
    use rusqlite::Connection;
    use serde_json::json;

    fn seed(c: &Connection) {
        create_named(c, RefTable::Streams, "north").expect("stream");
        create_named(c, RefTable::Subjects, "mathematics").expect("subject");
        create_named(c, RefTable::Subjects, "english").expect("subject");
        create_named(c, RefTable::ExamTypes, "cat2").expect("exam type");
        create_named(c, RefTable::ExamTypes, "end term").expect("exam type");
        create_named(c, RefTable::Terms, "1").expect("term");
        create_grade_band(c, "A", Some(80.0)).expect("band");
        create_grade_band(c, "B", Some(65.0)).expect("band");
        register_student(c, student_form("A1", 1, "2020-01-10", &["Mathematics", "English"]))
            .expect("a");
        register_student(c, student_form("B1", 1, "2020-01-10", &["Mathematics"])).expect("b");
    }

    fn mark(c: &Connection, reg_no: &str, subject: &str, exam_type: &str, marks: f64) {
        record_or_update_exam(
            c,
            ExamEntry {
                reg_no: reg_no.into(),
                subject: subject.into(),
                exam_type: exam_type.into(),
                term: "1".into(),
                date_done: Some("2021-03-01".into()),
                marks: json!(marks),
            },
        )
        .expect("mark");
    }

    fn filter(subject: &str, exam_types: &[&str]) -> ReportFilter {
        ReportFilter {
            form: Some(2),
            stream: "North".into(),
            subject: Some(subject.into()),
            term: Some("1".into()),
            exam_types: exam_types.iter().map(|s| s.to_string()).collect(),
            reference_year: Some(2021),
        }
    }

    #[test]
    fn single_subject_report_ranks_missing_marks_as_zero() {
        let c = conn();
        seed(&c);
        mark(&c, "A1", "Mathematics", "Cat2", 80.0);
        let store = SqliteStore::new(&c);

        let report = exam_report(&store, &filter("Mathematics", &["CAT2"]), &FixedYear(2030))
            .expect("report");
        assert_eq!(report.columns, vec!["Cat2"]);
        let a = &report.rows[0];
        assert_eq!((a.reg_no.as_str(), a.average, a.grade.as_str()), ("A1", 80.0, "A"));
        assert_eq!(a.position, Position::Ranked(1));
        let b = &report.rows[1];
        assert_eq!((b.reg_no.as_str(), b.average, b.grade.as_str()), ("B1", 0.0, "**"));
        assert_eq!(b.marks, vec![None]);
        assert_eq!(
            report.file_name(),
            "form2_north_mathematics_exam_report.csv"
        );
    }

    #[test]
    fn all_subjects_report_uses_enrolled_subject_columns() {
        let c = conn();
        seed(&c);
        mark(&c, "A1", "Mathematics", "Cat2", 70.0);
        mark(&c, "A1", "English", "Cat2", 90.0);
        mark(&c, "B1", "Mathematics", "Cat2", 60.0);
        let store = SqliteStore::new(&c);

        let report = exam_report(&store, &filter("All", &["Cat2"]), &FixedYear(2030))
            .expect("report");
        assert_eq!(report.columns, vec!["English", "Mathematics"]);
        assert_eq!(report.rows[0].reg_no, "A1");
        assert_eq!(report.rows[0].average, 80.0);
        assert_eq!(report.rows[1].marks, vec![None, Some(60.0)]);

        let (csv, rows) = render_csv(&report).expect("csv");
        assert_eq!(rows, 2 + 1 + 2);
        assert!(csv.contains("1,A1,Amina OtienoA1,90.00,70.00,80.00,A,1"));
        assert!(csv.contains("80.00,A,1"));
    }

    #[test]
    fn unknown_filters_and_empty_cohorts() {
        let c = conn();
        seed(&c);
        let store = SqliteStore::new(&c);

        let mut bad = filter("Chemistry", &["Nope"]);
        bad.stream = "South".into();
        let err = exam_report(&store, &bad, &FixedYear(2030)).expect_err("filters");
        let fields = &err.details.expect("details")["fieldErrors"];
        assert!(fields.get("subject_name").is_some());
        assert!(fields.get("stream_name").is_some());
        assert!(fields.get("exam_types").is_some());

        let mut empty = filter("Mathematics", &["Cat2"]);
        empty.form = Some(4);
        let err = exam_report(&store, &empty, &FixedYear(2030)).expect_err("empty");
        assert_eq!(err.code, "no_students");
        assert!(err.message.contains("form 4 North"));
    }

    #[test]
    fn results_slip_positions_per_subject_and_overall() {
        let c = conn();
        seed(&c);
        mark(&c, "A1", "Mathematics", "Cat2", 50.0);
        mark(&c, "A1", "English", "Cat2", 90.0);
        mark(&c, "B1", "Mathematics", "Cat2", 60.0);
        let store = SqliteStore::new(&c);

        let slips = results_slips_class(&store, &filter("All", &["Cat2"]), &FixedYear(2030))
            .expect("slips");
        assert_eq!(slips.slips.len(), 2);
        let a = &slips.slips[0];
        let math = a.lines.iter().find(|l| l.subject == "Mathematics").expect("math");
        assert_eq!(math.position, Position::Ranked(2));
        assert_eq!(math.out_of, 2);
        assert_eq!(a.overall.average, Some(70.0));
        assert_eq!(a.overall.position, Position::Ranked(1));

        let one = results_slip_student(&store, "B1", &filter("All", &["Cat2"]), &FixedYear(2030))
            .expect("slip");
        assert_eq!(one.slips.len(), 1);
        assert_eq!(one.slips[0].overall.class_size, 2);
        assert_eq!(one.file_name(), "form2_north_b1_results_slip.csv");
    }

    #[test]
    fn class_list_in_registration_order() {
        let c = conn();
        seed(&c);
        let store = SqliteStore::new(&c);
        let list = class_list(&store, &filter("All", &[]), &FixedYear(2021)).expect("list");
        let ids: Vec<_> = list.rows.iter().map(|r| r.reg_no.as_str()).collect();
        assert_eq!(ids, vec!["A1", "B1"]);
        assert_eq!(list.file_name(), "form2_north_class_list.csv");
    }

    #[test]
    fn missing_form_is_bad_params() {
        let c = conn();
        seed(&c);
        let store = SqliteStore::new(&c);
        let mut f = filter("Mathematics", &["Cat2"]);
        f.form = None;
        let err = class_list(&store, &f, &FixedYear(2030)).expect_err("form");
        assert_eq!(err.code, "bad_params");
        let err = exam_report(&store, &f, &FixedYear(2030)).expect_err("form");
        assert_eq!(err.code, "bad_params");

        f.term = Some("9".into());
        let err = exam_report(&store, &f, &FixedYear(2030)).expect_err("term");
        assert_eq!(err.code, "not_found");
    }
}
