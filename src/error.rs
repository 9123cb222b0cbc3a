use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::fmt;

/// Error shape shared by storage lookups, computation and ingestion.
///
/// `code` is the stable machine-readable identifier that ends up in the IPC
/// error envelope; `details` carries structured context such as per-field
/// validation messages.
#[derive(Debug, Clone, Serialize)]
pub struct ExamError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ExamError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn invariant(message: impl Into<String>) -> Self {
        let message = message.into();
        tracing::error!(%message, "invariant violation");
        Self::new("invariant_violation", message)
    }
}

impl fmt::Display for ExamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ExamError {}

impl From<rusqlite::Error> for ExamError {
    fn from(e: rusqlite::Error) -> Self {
        ExamError::new("db_query_failed", e.to_string())
    }
}

/// Accumulates validation messages keyed by input field name.
#[derive(Debug, Clone, Default)]
pub struct FieldErrors {
    fields: BTreeMap<String, Vec<String>>,
    lookup_failed: bool,
}

impl FieldErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.fields
            .entry(field.to_string())
            .or_default()
            .push(message.into());
    }

    /// Records a failed reference lookup (unknown student, subject, term ...).
    pub fn add_not_found(&mut self, field: &str, message: impl Into<String>) {
        self.add(field, message);
        self.lookup_failed = true;
    }

    /// Ok when nothing was recorded; otherwise a single error carrying every
    /// field message under `details.fieldErrors`.
    pub fn into_result(self, code: &str, message: &str) -> Result<(), ExamError> {
        if self.fields.is_empty() {
            return Ok(());
        }
        Err(ExamError::new(code, message).with_details(json!({ "fieldErrors": self.fields })))
    }

    /// Like [`FieldErrors::into_result`], choosing `not_found` when any lookup
    /// failed and `bad_params` when only plain validation did.
    pub fn into_filter_result(self, message: &str) -> Result<(), ExamError> {
        let code = if self.lookup_failed { "not_found" } else { "bad_params" };
        self.into_result(code, message)
    }
}
