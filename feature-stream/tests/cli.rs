use std::io::Write;
use std::process::{Command, Stdio};

#[test]
fn cli_reads_file_path() {
    let output = Command::new(env!("CARGO_BIN_EXE_feature-stream"))
        .arg("tests/fixtures/transmission-lines.geojson")
        .output()
        .expect("run CLI");

    assert!(
        output.status.success(),
        "cli exited with {}: {}",
        output.status,
        String::from_utf8_lossy(&output.stderr)
    );

    let stdout = String::from_utf8_lossy(&output.stdout);
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines.len(), 4);
    let first: serde_json::Value = serde_json::from_str(lines[0]).expect("json line");
    assert_eq!(first["properties"]["ID"], "110484");

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("4 records emitted, 1 skipped"), "{stderr}");
}

#[test]
fn cli_reads_stdin_with_limit() {
    let mut child = Command::new(env!("CARGO_BIN_EXE_feature-stream"))
        .args(["--limit", "2", "-"])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn CLI");

    let doc = include_str!("fixtures/transmission-lines.geojson");
    child
        .stdin
        .take()
        .expect("stdin open")
        .write_all(doc.as_bytes())
        .expect("write stdin");

    let output = child.wait_with_output().expect("read CLI output");
    assert!(
        output.status.success(),
        "cli exited with {}: {}",
        output.status,
        String::from_utf8_lossy(&output.stderr)
    );
    assert_eq!(String::from_utf8_lossy(&output.stdout).lines().count(), 2);
}

#[test]
fn cli_fails_when_array_is_missing() {
    let mut child = Command::new(env!("CARGO_BIN_EXE_feature-stream"))
        .args(["--key", "lines"])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn CLI");
    child
        .stdin
        .take()
        .expect("stdin open")
        .write_all(br#"{"features":[]}"#)
        .expect("write stdin");

    let output = child.wait_with_output().expect("read CLI output");
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("no array found"));
}
