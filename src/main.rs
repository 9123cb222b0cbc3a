mod backup;
mod calc;
mod config;
mod db;
mod entry;
mod error;
mod grading;
mod ipc;
mod model;
mod registry;
mod report;
mod roster;
mod store;

use std::io::{self, BufRead, Write};

use tracing_subscriber::EnvFilter;

fn init_tracing(filter: &str) {
    // stdout carries protocol responses only.
    let env_filter =
        EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new(config::DEFAULT_LOG_FILTER));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

fn main() {
    let cfg = config::DaemonConfig::from_env();
    init_tracing(&cfg.log_filter);

    let mut state = ipc::AppState::new(cfg.reference_year);
    if let Some(path) = cfg.workspace.as_deref() {
        if let Err(e) = ipc::select_workspace(&mut state, path) {
            let reason = format!("{e:#}");
            tracing::error!(workspace = %path.display(), error = %reason, "could not open workspace");
        }
    }
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "examd ready");

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(e) => {
                tracing::error!(error = %e, "stdin closed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let resp = match serde_json::from_str::<ipc::Request>(&line) {
            Ok(req) => ipc::handle_request(&mut state, req),
            Err(e) => {
                tracing::warn!(error = %e, "unparseable request line");
                // No id to echo back.
                let mut resp = ipc::err("", "bad_json", e.to_string(), None);
                if let Some(obj) = resp.as_object_mut() {
                    obj.remove("id");
                }
                resp
            }
        };
        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }
}
