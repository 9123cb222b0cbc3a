use crate::model::{Student, SubjectSelector};
use chrono::Datelike;
use std::collections::{BTreeSet, HashMap};

/// Source of the "current year" used when a caller does not pin one.
pub trait CurrentYear {
    fn current_year(&self) -> i32;
}

/// Wall-clock year in local time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemYear;

impl CurrentYear for SystemYear {
    fn current_year(&self) -> i32 {
        chrono::Local::now().year()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FixedYear(pub i32);

impl CurrentYear for FixedYear {
    fn current_year(&self) -> i32 {
        self.0
    }
}

pub fn current_form(student: &Student, reference_year: i32) -> i64 {
    let elapsed = i64::from(reference_year) - i64::from(student.enrollment_year);
    student.nominal_form.saturating_add(elapsed)
}

/// Keeps the candidates whose derived form equals `target_form`, in input
/// order. An empty result is not an error here.
pub fn resolve_roster(
    candidates: &[Student],
    target_form: i64,
    reference_year: Option<i32>,
    clock: &dyn CurrentYear,
) -> Vec<Student> {
    let year = reference_year.unwrap_or_else(|| clock.current_year());
    candidates
        .iter()
        .filter(|s| current_form(s, year) == target_form)
        .cloned()
        .collect()
}

static NO_SUBJECTS: BTreeSet<String> = BTreeSet::new();

/// Student -> enrolled subject ids.
#[derive(Debug, Clone, Default)]
pub struct EnrollmentIndex {
    by_student: HashMap<String, BTreeSet<String>>,
}

impl EnrollmentIndex {
    pub fn from_pairs<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut by_student: HashMap<String, BTreeSet<String>> = HashMap::new();
        for (reg_no, subject_id) in pairs {
            by_student.entry(reg_no).or_default().insert(subject_id);
        }
        Self { by_student }
    }

    pub fn enrolled_subjects(&self, reg_no: &str) -> &BTreeSet<String> {
        self.by_student.get(reg_no).unwrap_or(&NO_SUBJECTS)
    }

    pub fn is_enrolled(&self, reg_no: &str, subject_id: &str) -> bool {
        self.enrolled_subjects(reg_no).contains(subject_id)
    }

    pub fn filter_by_enrollment(
        &self,
        students: Vec<Student>,
        selector: &SubjectSelector,
    ) -> Vec<Student> {
        match selector {
            SubjectSelector::All => students,
            SubjectSelector::One(subject) => students
                .into_iter()
                .filter(|s| self.is_enrolled(&s.reg_no, &subject.id))
                .collect(),
        }
    }

    /// Drops students without any enrolled subject; used before
    /// all-subjects aggregation so the divisor is never zero.
    pub fn drop_unenrolled(&self, students: Vec<Student>) -> Vec<Student> {
        students
            .into_iter()
            .filter(|s| !self.enrolled_subjects(&s.reg_no).is_empty())
            .collect()
    }
}
