use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_examd");
    let mut child = Command::new(exe)
        .env("EXAMD_LOG", "off")
        .env("EXAMD_REFERENCE_YEAR", "2021")
        .env_remove("EXAMD_WORKSPACE")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn examd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn read_response(reader: &mut BufReader<ChildStdout>) -> serde_json::Value {
    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response");
    serde_json::from_str(line.trim()).expect("parse response json")
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let value = read_response(reader);
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    if value.get("ok").and_then(|v| v.as_bool()) == Some(false) {
        let code = value
            .get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown");
        assert_ne!(
            code, "not_implemented",
            "unexpected unknown method for {}",
            method
        );
    }
    value
}

#[test]
fn router_dispatch_smoke_covers_handler_families() {
    let workspace = temp_dir("examd-router-smoke");
    let bundle_out = workspace.join("smoke-backup.zip");
    let csv_in = workspace.join("enrollments.csv");
    std::fs::write(&csv_in, "reg_no,subject\n").expect("write csv");

    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let health = request(&mut stdin, &mut reader, "1", "health", json!({}));
    assert_eq!(health["result"]["currentYear"], 2021);

    let no_ws = request(&mut stdin, &mut reader, "1b", "subjects.list", json!({}));
    assert_eq!(no_ws["error"]["code"], "no_workspace");

    let _ = request(
        &mut stdin,
        &mut reader,
        "2",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let methods = [
        "settings.get",
        "settings.set",
        "streams.list",
        "streams.create",
        "streams.delete",
        "subjects.list",
        "subjects.create",
        "subjects.delete",
        "examTypes.list",
        "examTypes.create",
        "examTypes.delete",
        "terms.list",
        "terms.create",
        "terms.delete",
        "gradeBands.list",
        "gradeBands.create",
        "gradeBands.delete",
        "students.register",
        "students.update",
        "students.get",
        "students.delete",
        "students.list",
        "staff.register",
        "staff.list",
        "enrollments.add",
        "enrollments.set",
        "enrollments.list",
        "exams.recordOne",
        "exams.batchFilter",
        "exams.batchRecord",
        "reports.classListModel",
        "reports.classListCsv",
        "reports.examReportModel",
        "reports.examReportCsv",
        "reports.resultsSlipStudentModel",
        "reports.resultsSlipClassModel",
        "reports.resultsSlipCsv",
    ];
    for (i, method) in methods.iter().enumerate() {
        let _ = request(&mut stdin, &mut reader, &format!("m{}", i), method, json!({}));
    }

    let _ = request(
        &mut stdin,
        &mut reader,
        "3",
        "enrollments.importCsv",
        json!({ "path": csv_in.to_string_lossy() }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "4",
        "workspace.exportBundle",
        json!({ "outPath": bundle_out.to_string_lossy() }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "5",
        "workspace.importBundle",
        json!({ "inPath": bundle_out.to_string_lossy() }),
    );

    let unknown = {
        writeln!(stdin, "{}", json!({ "id": "6", "method": "nope.nothing" })).expect("write");
        stdin.flush().expect("flush");
        read_response(&mut reader)
    };
    assert_eq!(unknown["error"]["code"], "not_implemented");

    writeln!(stdin, "this is not json").expect("write");
    stdin.flush().expect("flush");
    let bad = read_response(&mut reader);
    assert_eq!(bad["ok"], false);
    assert_eq!(bad["error"]["code"], "bad_json");
    assert!(bad.get("id").is_none());

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
