use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

use crate::roster::{CurrentYear, FixedYear, SystemYear};

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    pub clock: Box<dyn CurrentYear>,
}

impl AppState {
    /// A pinned year replaces the wall clock for every request that does not
    /// carry its own `referenceYear`.
    pub fn new(pinned_year: Option<i32>) -> Self {
        let clock: Box<dyn CurrentYear> = match pinned_year {
            Some(y) => Box::new(FixedYear(y)),
            None => Box::new(SystemYear),
        };
        Self {
            workspace: None,
            db: None,
            clock,
        }
    }
}
