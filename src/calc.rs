use crate::error::ExamError;
use crate::model::{ExamRecord, ExamType, Student, SubjectSelector, Term, UNRESOLVED};
use crate::roster::EnrollmentIndex;
use serde::{Serialize, Serializer};
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use std::fmt;

/// Half-away-from-zero rounding to two decimals, applied to the shortest
/// decimal form of `x` so that 1.005 rounds to 1.01.
pub fn round_off_2_decimals(x: f64) -> f64 {
    if !x.is_finite() || x.abs() >= 1e15 {
        return x;
    }
    let text = x.abs().to_string();
    let (int_part, frac_part) = text.split_once('.').unwrap_or((text.as_str(), ""));
    if frac_part.len() <= 2 {
        return x;
    }
    let digits = frac_part.as_bytes();
    let mut hundredths: i64 = int_part.parse::<i64>().unwrap_or(0) * 100
        + i64::from(digits[0] - b'0') * 10
        + i64::from(digits[1] - b'0');
    if digits[2] >= b'5' {
        hundredths += 1;
    }
    hundredths_to_f64(if x < 0.0 { -hundredths } else { hundredths })
}

/// Marks carry at most two decimals, so sums are exact in hundredths.
fn to_hundredths(marks: f64) -> i64 {
    (marks * 100.0).round() as i64
}

fn hundredths_to_f64(h: i64) -> f64 {
    h as f64 / 100.0
}

/// `total / divisor` in hundredths, rounded half away from zero.
fn average_hundredths(total: i64, divisor: i64) -> i64 {
    let q = (2 * total.abs() + divisor) / (2 * divisor);
    if total < 0 {
        -q
    } else {
        q
    }
}

fn totals_from_hundredths(total: i64, divisor: usize) -> ScoreTotals {
    ScoreTotals {
        total: hundredths_to_f64(total),
        average: hundredths_to_f64(average_hundredths(total, divisor as i64)),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreTotals {
    pub total: f64,
    pub average: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct MarkKey {
    reg_no: String,
    subject_id: String,
    exam_type_id: String,
    term_id: String,
}

/// Marks indexed by (student, subject, exam type, term).
#[derive(Debug, Clone, Default)]
pub struct MarkSheet {
    marks: HashMap<MarkKey, f64>,
}

impl MarkSheet {
    pub fn from_records<I>(records: I) -> Self
    where
        I: IntoIterator<Item = ExamRecord>,
    {
        let mut marks = HashMap::new();
        for r in records {
            marks.insert(
                MarkKey {
                    reg_no: r.student_reg_no,
                    subject_id: r.subject_id,
                    exam_type_id: r.exam_type_id,
                    term_id: r.term_id,
                },
                r.marks,
            );
        }
        Self { marks }
    }

    pub fn mark(
        &self,
        reg_no: &str,
        subject_id: &str,
        exam_type_id: &str,
        term_id: &str,
    ) -> Option<f64> {
        self.marks
            .get(&MarkKey {
                reg_no: reg_no.to_string(),
                subject_id: subject_id.to_string(),
                exam_type_id: exam_type_id.to_string(),
                term_id: term_id.to_string(),
            })
            .copied()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedEntry {
    pub student: Student,
    pub total: f64,
    pub average: f64,
}

/// 1-based position in a ranked cohort, or `"**"` when absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    Ranked(usize),
    Unresolved,
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Position::Ranked(n) => write!(f, "{}", n),
            Position::Unresolved => f.write_str(UNRESOLVED),
        }
    }
}

impl Serialize for Position {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Position::Ranked(n) => serializer.serialize_u64(*n as u64),
            Position::Unresolved => serializer.serialize_str(UNRESOLVED),
        }
    }
}

pub fn position_of(ranked: &[RankedEntry], reg_no: &str) -> Position {
    ranked
        .iter()
        .position(|e| e.student.reg_no == reg_no)
        .map(|i| Position::Ranked(i + 1))
        .unwrap_or(Position::Unresolved)
}

fn distinct_exam_type_ids(exam_types: &[ExamType]) -> BTreeSet<&str> {
    exam_types.iter().map(|e| e.id.as_str()).collect()
}

/// Totals and averages over a preloaded mark sheet.
///
/// Averages divide by the number of requested exam types (times enrolled
/// subjects for the all-subjects variant), not by the number of records
/// found: a missing record counts as zero.
pub struct ScoreAggregator<'a> {
    sheet: &'a MarkSheet,
    enrollment: &'a EnrollmentIndex,
}

impl<'a> ScoreAggregator<'a> {
    pub fn new(sheet: &'a MarkSheet, enrollment: &'a EnrollmentIndex) -> Self {
        Self { sheet, enrollment }
    }

    pub fn aggregate_subject(
        &self,
        student: &Student,
        subject_id: &str,
        term: &Term,
        exam_types: &[ExamType],
    ) -> Result<ScoreTotals, ExamError> {
        let type_ids = distinct_exam_type_ids(exam_types);
        if type_ids.is_empty() {
            return Err(ExamError::invariant(format!(
                "no exam types requested for {}",
                student.reg_no
            )));
        }

        let total: i64 = type_ids
            .iter()
            .filter_map(|t| self.sheet.mark(&student.reg_no, subject_id, t, &term.id))
            .map(to_hundredths)
            .sum();
        Ok(totals_from_hundredths(total, type_ids.len()))
    }

    pub fn aggregate_all_subjects(
        &self,
        student: &Student,
        term: &Term,
        exam_types: &[ExamType],
    ) -> Result<ScoreTotals, ExamError> {
        let type_ids = distinct_exam_type_ids(exam_types);
        let subjects = self.enrollment.enrolled_subjects(&student.reg_no);
        let divisor = type_ids.len() * subjects.len();
        if divisor == 0 {
            return Err(ExamError::invariant(format!(
                "zero divisor for {} ({} exam types, {} enrolled subjects)",
                student.reg_no,
                type_ids.len(),
                subjects.len()
            )));
        }

        let mut total = 0_i64;
        for subject_id in subjects {
            for t in &type_ids {
                if let Some(m) = self.sheet.mark(&student.reg_no, subject_id, t, &term.id) {
                    total += to_hundredths(m);
                }
            }
        }
        Ok(totals_from_hundredths(total, divisor))
    }

    pub fn aggregate(
        &self,
        student: &Student,
        selector: &SubjectSelector,
        term: &Term,
        exam_types: &[ExamType],
    ) -> Result<ScoreTotals, ExamError> {
        match selector {
            SubjectSelector::All => self.aggregate_all_subjects(student, term, exam_types),
            SubjectSelector::One(subject) => {
                self.aggregate_subject(student, &subject.id, term, exam_types)
            }
        }
    }

    /// Descending by average; equal averages keep their input order.
    pub fn rank_cohort(
        &self,
        students: &[Student],
        term: &Term,
        exam_types: &[ExamType],
        selector: &SubjectSelector,
    ) -> Result<Vec<RankedEntry>, ExamError> {
        let mut ranked = Vec::with_capacity(students.len());
        for s in students {
            let totals = self.aggregate(s, selector, term, exam_types)?;
            ranked.push(RankedEntry {
                student: s.clone(),
                total: totals.total,
                average: totals.average,
            });
        }
        ranked.sort_by(|a, b| b.average.partial_cmp(&a.average).unwrap_or(Ordering::Equal));
        Ok(ranked)
    }
}
