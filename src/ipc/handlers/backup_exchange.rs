use crate::backup;
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::required_str;
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::path::PathBuf;

fn handle_workspace_export_bundle(state: &mut AppState, req: &Request) -> serde_json::Value {
    let out_path = match required_str(req, "outPath") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(workspace_path) = state.workspace.clone() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    if let Some(conn) = state.db.as_ref() {
        if let Err(e) = conn.execute_batch("PRAGMA wal_checkpoint(FULL)") {
            tracing::warn!(error = %e, "checkpoint before export failed");
        }
    }

    let out = PathBuf::from(&out_path);
    match backup::export_workspace_bundle(&workspace_path, &out) {
        Ok(export) => ok(
            &req.id,
            json!({
                "path": out_path,
                "bundleFormat": export.bundle_format,
                "dbSha256": export.db_sha256,
                "entryCount": export.entry_count
            }),
        ),
        Err(e) => err(
            &req.id,
            "io_failed",
            format!("{e:#}"),
            Some(json!({ "path": out_path })),
        ),
    }
}

fn handle_workspace_import_bundle(state: &mut AppState, req: &Request) -> serde_json::Value {
    let in_path = match required_str(req, "inPath") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(workspace_path) = state.workspace.clone() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let src = PathBuf::from(&in_path);
    if !src.is_file() {
        return err(
            &req.id,
            "not_found",
            "bundle file not found",
            Some(json!({ "path": in_path })),
        );
    }

    // Drop open handle before replacing file.
    state.db = None;
    let imported = backup::import_workspace_bundle(&src, &workspace_path);

    let reopened = db::open_db(&workspace_path);
    let conn = match reopened {
        Ok(c) => c,
        Err(e) => return err(&req.id, "db_open_failed", format!("{e:#}"), None),
    };
    state.db = Some(conn);

    match imported {
        Ok(import) => ok(
            &req.id,
            json!({
                "workspacePath": workspace_path.to_string_lossy(),
                "bundleFormat": import.bundle_format,
                "dbSha256": import.db_sha256
            }),
        ),
        Err(e) => err(
            &req.id,
            "io_failed",
            format!("{e:#}"),
            Some(json!({ "path": in_path })),
        ),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "workspace.exportBundle" => Some(handle_workspace_export_bundle(state, req)),
        "workspace.importBundle" => Some(handle_workspace_import_bundle(state, req)),
        _ => None,
    }
}
