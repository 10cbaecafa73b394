mod common;

use std::fs;
use std::path::Path;

use assert_cmd::Command;
use serde_json::Value;

fn run<I, S>(args: I) -> Value
where
    I: IntoIterator<Item = S>,
    S: AsRef<std::ffi::OsStr>,
{
    let output = Command::cargo_bin("jfr-flame")
        .unwrap()
        .arg("-q")
        .args(args)
        .output()
        .expect("failed to execute process");
    assert!(
        output.status.success(),
        "{}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).unwrap()
}

fn write(dir: &Path, name: &str, bytes: Vec<u8>) -> String {
    let path = dir.join(name);
    fs::write(&path, bytes).unwrap();
    path.to_str().unwrap().to_owned()
}

#[test]
fn headers_and_info() {
    let dir = tempfile::tempdir().unwrap();
    let file = write(
        dir.path(),
        "app.jfr",
        common::recording(&[&[("a", 1)], &[("b", 1)]]),
    );

    let headers = run(["headers", file.as_str()]);
    assert_eq!(headers.as_array().unwrap().len(), 2);
    assert_eq!(headers[1]["offset"], headers[0]["size"]);
    assert_eq!(headers[0]["byteOrder"], "big-endian");

    let chunks = run(["chunks", file.as_str()]);
    assert!(chunks[0]["eventTypes"]
        .as_array()
        .unwrap()
        .iter()
        .any(|t| t == "jdk.ExecutionSample"));

    let info = run(["info", file.as_str()]);
    assert_eq!(info["eventSource"], "jdk");
}

#[test]
fn disassemble() {
    let dir = tempfile::tempdir().unwrap();
    let file = write(
        dir.path(),
        "app.jfr",
        common::recording(&[&[("a", 1)], &[("b", 1)]]),
    );
    let out = dir.path().join("out");
    let files = run(["disassemble", file.as_str(), "--out", out.to_str().unwrap()]);
    assert_eq!(files.as_array().unwrap().len(), 2);
    assert!(out.join("app.0001.jfr").exists());
}

#[test]
fn flamegraph_and_diff() {
    let dir = tempfile::tempdir().unwrap();
    let before = write(dir.path(), "before.jfr", common::profile(&[("A", 10)]));
    let after = write(dir.path(), "after.jfr", common::profile(&[("A", 4), ("C", 3)]));

    let graph = run(["flamegraph", before.as_str(), after.as_str()]);
    assert_eq!(graph["levels"][0][0]["total"], 17);

    let diff = run(["diff", before.as_str(), after.as_str()]);
    assert_eq!(diff["titles"][0], "all");
    assert_eq!(diff["levels"][1][0]["diff"]["samples"], -6);
    assert_eq!(diff["levels"][1][1]["diff"]["kind"], "ADDED");
}

#[test]
fn summary_and_timeseries() {
    let dir = tempfile::tempdir().unwrap();
    let file = write(dir.path(), "app.jfr", common::profile(&[("a", 3)]));

    let summary = run(["summary", file.as_str()]);
    assert_eq!(summary["jdk.ExecutionSample"]["count"], 3);

    let series = run(["timeseries", file.as_str()]);
    assert_eq!(series[0][1], 3);
}

#[test]
fn missing_file_fails() {
    Command::cargo_bin("jfr-flame")
        .unwrap()
        .args(["-q", "headers", "/nonexistent/app.jfr"])
        .assert()
        .failure();
}

#[test]
fn bad_threshold_fails() {
    let dir = tempfile::tempdir().unwrap();
    let file = write(dir.path(), "app.jfr", common::profile(&[("a", 3)]));
    Command::cargo_bin("jfr-flame")
        .unwrap()
        .args(["-q", "flamegraph", "--min-width", "150", file.as_str()])
        .assert()
        .failure();
}
