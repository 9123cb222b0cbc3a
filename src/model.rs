use serde::Serialize;

/// Reserved subject name meaning "aggregate across every subject".
pub const ALL_SUBJECTS: &str = "All";

/// Placeholder shown when a grade or position cannot be resolved.
pub const UNRESOLVED: &str = "**";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Stream {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Subject {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamType {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Term {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeBand {
    pub id: String,
    pub grade: String,
    pub lower_bound: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Guardian {
    pub first_name: Option<String>,
    pub middle_name: Option<String>,
    pub last_name: Option<String>,
    pub phone_number: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub reg_no: String,
    pub first_name: String,
    pub middle_name: Option<String>,
    pub last_name: String,
    /// Form the student joined at; the current form is derived from it.
    pub nominal_form: i64,
    pub enrollment_year: i32,
    pub date_registered: String,
    pub stream_id: String,
    pub stream_name: String,
    pub house: Option<String>,
    pub kcpe_marks: Option<i64>,
    pub guardian: Guardian,
}

impl Student {
    pub fn full_name(&self) -> String {
        let mut parts = vec![self.first_name.as_str()];
        if let Some(m) = self.middle_name.as_deref().filter(|m| !m.is_empty()) {
            parts.push(m);
        }
        parts.push(self.last_name.as_str());
        parts.join(" ")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Staff {
    pub id: String,
    pub username: String,
    pub first_name: String,
    pub middle_name: Option<String>,
    pub last_name: String,
    pub email: Option<String>,
    pub phone_number: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamRecord {
    pub id: String,
    pub student_reg_no: String,
    pub subject_id: String,
    pub exam_type_id: String,
    pub term_id: String,
    pub date_done: String,
    pub marks: f64,
}

/// Subject dimension of an aggregation: one subject or every enrolled one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubjectSelector {
    All,
    One(Subject),
}

impl SubjectSelector {
    pub fn label(&self) -> &str {
        match self {
            SubjectSelector::All => ALL_SUBJECTS,
            SubjectSelector::One(s) => &s.name,
        }
    }
}

/// Python-style `capitalize`: first character upper-case, the rest lower.
pub fn capitalize_name(raw: &str) -> String {
    let lower = raw.trim().to_lowercase();
    let mut chars = lower.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
