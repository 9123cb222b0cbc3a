use crate::ipc::error::{err, exam_err, ok};
use crate::ipc::helpers::{db_conn, required_str};
use crate::ipc::types::{AppState, Request};
use crate::registry;
use crate::store::{SchoolStore, SqliteStore};
use serde_json::json;
use std::path::PathBuf;

fn handle_enrollments_add(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let reg_no = match required_str(req, "regNo") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let subject = match required_str(req, "subject") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match registry::add_enrollment(conn, &reg_no, &subject) {
        Ok(created) => ok(&req.id, json!({ "regNo": reg_no, "created": created })),
        Err(e) => exam_err(&req.id, e),
    }
}

fn handle_enrollments_set(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let reg_no = match required_str(req, "regNo") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(raw) = req.params.get("subjects").and_then(|v| v.as_array()) else {
        return err(&req.id, "bad_params", "subjects must be an array of names", None);
    };
    let mut subjects = Vec::with_capacity(raw.len());
    for v in raw {
        match v.as_str() {
            Some(s) => subjects.push(s.to_string()),
            None => return err(&req.id, "bad_params", "subjects must be an array of names", None),
        }
    }
    match registry::set_enrollments(conn, &reg_no, &subjects) {
        Ok(names) => ok(&req.id, json!({ "regNo": reg_no, "subjects": names })),
        Err(e) => exam_err(&req.id, e),
    }
}

fn handle_enrollments_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let reg_no = match required_str(req, "regNo") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let store = SqliteStore::new(conn);
    match store.student(&reg_no) {
        Ok(Some(s)) => match store.enrolled_subject_names(&s.reg_no) {
            Ok(names) => ok(&req.id, json!({ "regNo": s.reg_no, "subjects": names })),
            Err(e) => exam_err(&req.id, e),
        },
        Ok(None) => err(&req.id, "not_found", "student not found", None),
        Err(e) => exam_err(&req.id, e),
    }
}

fn handle_enrollments_import_csv(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let path = match required_str(req, "path") {
        Ok(v) => PathBuf::from(v),
        Err(e) => return e,
    };
    if !path.is_file() {
        return err(
            &req.id,
            "not_found",
            "csv file not found",
            Some(json!({ "path": path.to_string_lossy() })),
        );
    }
    match registry::import_enrollments_csv(conn, &path) {
        Ok(summary) => ok(&req.id, json!(summary)),
        Err(e) => err(
            &req.id,
            "io_failed",
            format!("{e:#}"),
            Some(json!({ "path": path.to_string_lossy() })),
        ),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "enrollments.add" => Some(handle_enrollments_add(state, req)),
        "enrollments.set" => Some(handle_enrollments_set(state, req)),
        "enrollments.list" => Some(handle_enrollments_list(state, req)),
        "enrollments.importCsv" => Some(handle_enrollments_import_csv(state, req)),
        _ => None,
    }
}
