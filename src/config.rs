//! Runtime configuration read from `.env` and the process environment.

use std::env;
use std::path::PathBuf;

pub const DEFAULT_LOG_FILTER: &str = "examd=info";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonConfig {
    /// Workspace opened at start-up, as if `workspace.select` had been sent.
    pub workspace: Option<PathBuf>,
    /// Pins the clock used for form derivation when requests omit a year.
    pub reference_year: Option<i32>,
    pub log_filter: String,
}

impl DaemonConfig {
    /// Loads `.env` (if any) and reads `EXAMD_*` variables.
    ///
    /// Malformed values are reported on stderr and ignored; stdout is
    /// reserved for protocol responses.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let reference_year = non_empty("EXAMD_REFERENCE_YEAR").and_then(|v| match v.parse::<i32>() {
            Ok(y) => Some(y),
            Err(_) => {
                eprintln!("examd: ignoring EXAMD_REFERENCE_YEAR={:?} (not a year)", v);
                None
            }
        });

        Self {
            workspace: non_empty("EXAMD_WORKSPACE").map(PathBuf::from),
            reference_year,
            log_filter: non_empty("EXAMD_LOG").unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string()),
        }
    }
}
