use crate::entry::{self, BatchFilter, ExamEntry};
use crate::ipc::error::{err, exam_err, ok};
use crate::ipc::helpers::{db_conn, parse_params};
use crate::ipc::types::{AppState, Request};
use crate::store::SqliteStore;
use serde_json::json;

fn handle_exams_record_one(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let input: ExamEntry = match parse_params(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    match entry::record_or_update_exam(conn, input) {
        Ok(record) => ok(&req.id, json!({ "exam": record })),
        Err(e) => exam_err(&req.id, e),
    }
}

fn handle_exams_batch_filter(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let filter: BatchFilter = match parse_params(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let store = SqliteStore::new(conn);
    let result = entry::resolve_entry_context(&store, &filter).and_then(|ctx| {
        let roster = entry::entry_roster(&store, &ctx, state.clock.as_ref())?;
        let cells = entry::batch_cells(&store, &ctx, &roster)?;
        Ok((ctx, cells))
    });
    match result {
        Ok((ctx, cells)) => ok(
            &req.id,
            json!({
                "form": ctx.form,
                "stream": ctx.stream,
                "subject": ctx.subject,
                "examType": ctx.exam_type,
                "term": ctx.term,
                "cells": cells
            }),
        ),
        Err(e) => exam_err(&req.id, e),
    }
}

fn handle_exams_batch_record(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let filter: BatchFilter = match parse_params(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(cells) = req.params.get("marks").and_then(|v| v.as_object()) else {
        return err(
            &req.id,
            "bad_params",
            "marks must be an object keyed by registration number",
            None,
        );
    };
    let date_done = req.params.get("dateDone").and_then(|v| v.as_str());

    let store = SqliteStore::new(conn);
    let result = entry::resolve_entry_context(&store, &filter).and_then(|ctx| {
        let roster = entry::entry_roster(&store, &ctx, state.clock.as_ref())?;
        entry::record_batch(conn, &ctx, &roster, date_done, cells)
    });
    match result {
        Ok(outcome) => ok(&req.id, json!(outcome)),
        Err(e) => exam_err(&req.id, e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "exams.recordOne" => Some(handle_exams_record_one(state, req)),
        "exams.batchFilter" => Some(handle_exams_batch_filter(state, req)),
        "exams.batchRecord" => Some(handle_exams_batch_record(state, req)),
        _ => None,
    }
}
