use rusqlite::Connection;
use serde::de::DeserializeOwned;
use serde_json::json;

use crate::ipc::error::err;
use crate::ipc::types::{AppState, Request};

pub fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| {
            err(
                &req.id,
                "bad_params",
                format!("missing {}", key),
                Some(json!({ "fieldErrors": { key: ["This field is required."] } })),
            )
        })
}

pub fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

/// Deserialises the whole params object into a typed form.
pub fn parse_params<T: DeserializeOwned>(req: &Request) -> Result<T, serde_json::Value> {
    let params = if req.params.is_null() {
        json!({})
    } else {
        req.params.clone()
    };
    serde_json::from_value(params)
        .map_err(|e| err(&req.id, "bad_params", format!("invalid params: {}", e), None))
}
