use crate::ipc::error::{err, exam_err, ok};
use crate::ipc::helpers::{db_conn, required_str};
use crate::ipc::types::{AppState, Request};
use crate::registry::{self, RefTable};
use crate::store::{SchoolStore, SqliteStore};
use serde_json::json;

fn table_for(prefix: &str) -> Option<RefTable> {
    match prefix {
        "streams" => Some(RefTable::Streams),
        "subjects" => Some(RefTable::Subjects),
        "examTypes" => Some(RefTable::ExamTypes),
        "terms" => Some(RefTable::Terms),
        _ => None,
    }
}

fn handle_named_list(state: &mut AppState, req: &Request, kind: RefTable) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    match registry::list_named(conn, kind) {
        Ok(rows) => ok(&req.id, json!({ "items": rows })),
        Err(e) => exam_err(&req.id, e),
    }
}

fn handle_named_create(state: &mut AppState, req: &Request, kind: RefTable) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let name = req.params.get("name").and_then(|v| v.as_str()).unwrap_or("");
    match registry::create_named(conn, kind, name) {
        Ok(row) => ok(&req.id, json!({ "id": row.id, "name": row.name })),
        Err(e) => exam_err(&req.id, e),
    }
}

fn handle_named_delete(state: &mut AppState, req: &Request, kind: RefTable) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let id = match required_str(req, "id") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match registry::delete_named(conn, kind, &id) {
        Ok(()) => ok(&req.id, json!({ "deleted": id })),
        Err(e) => exam_err(&req.id, e),
    }
}

fn handle_grade_bands_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    match SqliteStore::new(conn).grade_bands() {
        Ok(bands) => ok(&req.id, json!({ "items": bands })),
        Err(e) => exam_err(&req.id, e),
    }
}

fn handle_grade_bands_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let grade = req.params.get("grade").and_then(|v| v.as_str()).unwrap_or("");
    let lower_bound = match req.params.get("lowerBound") {
        None | Some(serde_json::Value::Null) => None,
        Some(v) => match crate::entry::parse_marks(v) {
            Ok(bound) => bound,
            Err(msg) => {
                return err(
                    &req.id,
                    "bad_params",
                    "invalid grade band",
                    Some(json!({ "fieldErrors": { "greatest_lower_bound": [msg] } })),
                )
            }
        },
    };
    match registry::create_grade_band(conn, grade, lower_bound) {
        Ok(band) => ok(&req.id, json!(band)),
        Err(e) => exam_err(&req.id, e),
    }
}

fn handle_grade_bands_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let id = match required_str(req, "id") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match registry::delete_grade_band(conn, &id) {
        Ok(()) => ok(&req.id, json!({ "deleted": id })),
        Err(e) => exam_err(&req.id, e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "gradeBands.list" => return Some(handle_grade_bands_list(state, req)),
        "gradeBands.create" => return Some(handle_grade_bands_create(state, req)),
        "gradeBands.delete" => return Some(handle_grade_bands_delete(state, req)),
        _ => {}
    }

    let (prefix, action) = req.method.split_once('.')?;
    let kind = table_for(prefix)?;
    match action {
        "list" => Some(handle_named_list(state, req, kind)),
        "create" => Some(handle_named_create(state, req, kind)),
        "delete" => Some(handle_named_delete(state, req, kind)),
        _ => None,
    }
}
