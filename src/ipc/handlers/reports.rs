use crate::db;
use crate::error::ExamError;
use crate::ipc::error::{err, exam_err, ok};
use crate::ipc::helpers::{db_conn, parse_params, required_str};
use crate::ipc::types::{AppState, Request};
use crate::report::{self, Paint, ReportFilter};
use crate::roster::CurrentYear;
use crate::store::SqliteStore;
use rusqlite::Connection;
use serde::Serialize;
use serde_json::json;
use std::path::PathBuf;

const SCHOOL_NAME_KEY: &str = "school.name";

fn school_name(conn: &Connection) -> Option<String> {
    match db::settings_get_json(conn, SCHOOL_NAME_KEY) {
        Ok(v) => v.and_then(|v| v.as_str().map(|s| s.to_string())),
        Err(e) => {
            tracing::warn!(error = %e, "could not read school name");
            None
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum ReportKind {
    ClassList,
    ExamReport,
    StudentSlip,
    ClassSlips,
}

fn build(
    kind: ReportKind,
    conn: &Connection,
    req: &Request,
    clock: &dyn CurrentYear,
) -> Result<Box<dyn ReportDoc>, serde_json::Value> {
    let filter: ReportFilter = parse_params(req)?;
    let store = SqliteStore::new(conn);
    let school = school_name(conn);
    let built: Result<Box<dyn ReportDoc>, ExamError> = match kind {
        ReportKind::ClassList => report::class_list(&store, &filter, clock).map(|mut r| {
            r.school = school;
            Box::new(r) as Box<dyn ReportDoc>
        }),
        ReportKind::ExamReport => report::exam_report(&store, &filter, clock).map(|mut r| {
            r.school = school;
            Box::new(r) as Box<dyn ReportDoc>
        }),
        ReportKind::StudentSlip => {
            let reg_no = required_str(req, "regNo")?;
            report::results_slip_student(&store, &reg_no, &filter, clock).map(|mut r| {
                r.school = school;
                Box::new(r) as Box<dyn ReportDoc>
            })
        }
        ReportKind::ClassSlips => report::results_slips_class(&store, &filter, clock).map(|mut r| {
            r.school = school;
            Box::new(r) as Box<dyn ReportDoc>
        }),
    };
    built.map_err(|e| exam_err(&req.id, e))
}

/// A report that can be both serialised as a model and painted.
trait ReportDoc: Paint {
    fn model(&self) -> serde_json::Result<serde_json::Value>;
}

impl<T: Paint + Serialize> ReportDoc for T {
    fn model(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(self)
    }
}

fn handle_model(state: &mut AppState, req: &Request, kind: ReportKind) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let doc = match build(kind, conn, req, state.clock.as_ref()) {
        Ok(d) => d,
        Err(e) => return e,
    };
    match doc.model() {
        Ok(model) => ok(&req.id, model),
        Err(e) => err(&req.id, "invariant_violation", e.to_string(), None),
    }
}

fn handle_csv(state: &mut AppState, req: &Request, kind: ReportKind) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let doc = match build(kind, conn, req, state.clock.as_ref()) {
        Ok(d) => d,
        Err(e) => return e,
    };
    let (body, rows) = match report::render_csv(doc.as_ref()) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "io_failed", format!("{e:#}"), None),
    };
    let filename = doc.file_name();

    let out_path = req
        .params
        .get("outPath")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty());
    match out_path {
        Some(p) => {
            let path = PathBuf::from(p);
            let written = path
                .parent()
                .filter(|d| !d.as_os_str().is_empty())
                .map_or(Ok(()), std::fs::create_dir_all)
                .and_then(|_| std::fs::write(&path, body.as_bytes()));
            if let Err(e) = written {
                return err(
                    &req.id,
                    "io_failed",
                    e.to_string(),
                    Some(json!({ "path": p })),
                );
            }
            tracing::info!(path = %p, rows, "wrote csv report");
            ok(
                &req.id,
                json!({
                    "filename": filename,
                    "contentType": "text/csv",
                    "rows": rows,
                    "path": p
                }),
            )
        }
        None => ok(
            &req.id,
            json!({
                "filename": filename,
                "contentType": "text/csv",
                "rows": rows,
                "body": body
            }),
        ),
    }
}

fn handle_results_slip_csv(state: &mut AppState, req: &Request) -> serde_json::Value {
    let has_reg_no = req
        .params
        .get("regNo")
        .and_then(|v| v.as_str())
        .is_some_and(|s| !s.trim().is_empty());
    let kind = if has_reg_no {
        ReportKind::StudentSlip
    } else {
        ReportKind::ClassSlips
    };
    handle_csv(state, req, kind)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reports.classListModel" => Some(handle_model(state, req, ReportKind::ClassList)),
        "reports.classListCsv" => Some(handle_csv(state, req, ReportKind::ClassList)),
        "reports.examReportModel" => Some(handle_model(state, req, ReportKind::ExamReport)),
        "reports.examReportCsv" => Some(handle_csv(state, req, ReportKind::ExamReport)),
        "reports.resultsSlipStudentModel" => {
            Some(handle_model(state, req, ReportKind::StudentSlip))
        }
        "reports.resultsSlipClassModel" => Some(handle_model(state, req, ReportKind::ClassSlips)),
        "reports.resultsSlipCsv" => Some(handle_results_slip_csv(state, req)),
        _ => None,
    }
}
