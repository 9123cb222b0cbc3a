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

fn result(resp: &serde_json::Value) -> &serde_json::Value {
    assert_eq!(resp["ok"], true, "unexpected error: {}", resp);
    &resp["result"]
}

fn error_code(resp: &serde_json::Value) -> &str {
    assert_eq!(resp["ok"], false, "expected an error: {}", resp);
    resp["error"]["code"].as_str().unwrap_or("")
}

fn open_workspace(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    workspace: &std::path::Path,
) {
    let resp = request(
        stdin,
        reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    result(&resp);
}

/// North stream, Mathematics and English, CAT1/CAT2, term 1, bands A/B.
fn seed_reference_data(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>) {
    let rows = [
        ("streams.create", json!({ "name": "North" })),
        ("subjects.create", json!({ "name": "Mathematics" })),
        ("subjects.create", json!({ "name": "English" })),
        ("examTypes.create", json!({ "name": "CAT1" })),
        ("examTypes.create", json!({ "name": "CAT2" })),
        ("terms.create", json!({ "name": "1" })),
        ("gradeBands.create", json!({ "grade": "A", "lowerBound": 80 })),
        ("gradeBands.create", json!({ "grade": "B", "lowerBound": 65 })),
    ];
    for (i, (method, params)) in rows.into_iter().enumerate() {
        let resp = request(stdin, reader, &format!("seed{}", i), method, params);
        result(&resp);
    }
}

fn register(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    reg_no: &str,
    subjects: &[&str],
) -> serde_json::Value {
    request(
        stdin,
        reader,
        &format!("reg-{}", reg_no),
        "students.register",
        json!({
            "regNo": reg_no,
            "firstName": "Amina",
            "lastName": format!("Otieno {}", reg_no),
            "form": 1,
            "stream": "north",
            "dateRegistered": "2020-01-10",
            "subjects": subjects
        }),
    )
}

#[test]
fn bundle_export_then_import_restores_data() {
    let workspace = temp_dir("examd-backup");
    let bundle = workspace.join("backups").join("school.zip");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    open_workspace(&mut stdin, &mut reader, &workspace);
    seed_reference_data(&mut stdin, &mut reader);
    result(&register(&mut stdin, &mut reader, "R1", &["Mathematics"]));

    let exported = request(
        &mut stdin,
        &mut reader,
        "x1",
        "workspace.exportBundle",
        json!({ "outPath": bundle.to_string_lossy() }),
    );
    let export = result(&exported);
    assert_eq!(export["bundleFormat"], "examd-workspace-v1");
    let digest = export["dbSha256"].as_str().expect("digest").to_string();
    assert_eq!(digest.len(), 64);

    let deleted = request(&mut stdin, &mut reader, "d1", "students.delete", json!({ "regNo": "R1" }));
    result(&deleted);

    let imported = request(
        &mut stdin,
        &mut reader,
        "i1",
        "workspace.importBundle",
        json!({ "inPath": bundle.to_string_lossy() }),
    );
    assert_eq!(result(&imported)["dbSha256"], digest);

    let restored = request(&mut stdin, &mut reader, "g1", "students.get", json!({ "regNo": "R1" }));
    assert_eq!(result(&restored)["student"]["subjects"], json!(["Mathematics"]));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn tampered_bundle_is_rejected_and_workspace_stays_usable() {
    let workspace = temp_dir("examd-backup-tamper");
    let tampered = workspace.join("tampered.zip");
    {
        let file = std::fs::File::create(&tampered).expect("create zip");
        let mut zip = zip::ZipWriter::new(file);
        let opts = zip::write::FileOptions::default();
        zip.start_file("manifest.json", opts).expect("manifest");
        zip.write_all(
            json!({ "format": "examd-workspace-v1", "dbSha256": "00" })
                .to_string()
                .as_bytes(),
        )
        .expect("write manifest");
        zip.start_file("db/examd.sqlite3", opts).expect("db");
        zip.write_all(b"not really sqlite").expect("write db");
        zip.finish().expect("finish zip");
    }

    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    open_workspace(&mut stdin, &mut reader, &workspace);
    seed_reference_data(&mut stdin, &mut reader);

    let imported = request(
        &mut stdin,
        &mut reader,
        "i1",
        "workspace.importBundle",
        json!({ "inPath": tampered.to_string_lossy() }),
    );
    assert_eq!(error_code(&imported), "io_failed");
    assert!(imported["error"]["message"]
        .as_str()
        .unwrap_or("")
        .contains("checksum"));

    let still_there = request(&mut stdin, &mut reader, "l1", "subjects.list", json!({}));
    assert_eq!(result(&still_there)["items"].as_array().expect("items").len(), 2);

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
