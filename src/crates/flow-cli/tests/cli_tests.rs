//! Integration tests for `flowctl`, exercised as a subprocess against small
//! JSON IR programs written to a temp directory.

use std::fs;
use std::path::PathBuf;
use std::process::Command;
use tempfile::TempDir;

fn flowctl() -> Command {
    Command::new(env!("CARGO_BIN_EXE_flowctl"))
}

fn write_program(dir: &TempDir, name: &str, contents: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, contents).expect("writing test IR program");
    path
}

const NOOP_FLOW: &str = r#"
{
  "flows": {
    "main": {
      "entry_id": "start",
      "nodes": [
        { "id": "start", "kind": "noop" }
      ]
    }
  }
}
"#;

const REDIRECT_FLOW: &str = r#"
{
  "flows": {
    "first": {
      "entry_id": "go",
      "nodes": [
        { "id": "go", "kind": "goto_flow", "target": "second" }
      ]
    },
    "second": {
      "entry_id": "start",
      "nodes": [
        { "id": "start", "kind": "noop" }
      ]
    }
  }
}
"#;

#[test]
fn validate_accepts_a_well_formed_program() {
    let dir = TempDir::new().unwrap();
    let file = write_program(&dir, "program.json", NOOP_FLOW);

    let output = flowctl().arg("validate").arg(&file).output().expect("running flowctl validate");
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("valid IR program"));
    assert!(stdout.contains("flows: 1"));
}

#[test]
fn validate_rejects_a_program_with_a_dangling_next_id() {
    let dir = TempDir::new().unwrap();
    let dangling = r#"
    {
      "flows": {
        "main": {
          "entry_id": "start",
          "nodes": [
            { "id": "start", "kind": "noop", "next_ids": ["nowhere"] }
          ]
        }
      }
    }
    "#;
    let file = write_program(&dir, "program.json", dangling);

    let output = flowctl().arg("validate").arg(&file).output().expect("running flowctl validate");
    assert!(!output.status.success());
}

#[test]
fn validate_rejects_malformed_json() {
    let dir = TempDir::new().unwrap();
    let file = write_program(&dir, "program.json", "{ not json");

    let output = flowctl().arg("validate").arg(&file).output().expect("running flowctl validate");
    assert!(!output.status.success());
}

#[test]
fn run_executes_a_trivial_flow_to_completion() {
    let dir = TempDir::new().unwrap();
    let file = write_program(&dir, "program.json", NOOP_FLOW);

    let output = flowctl().arg("run").arg(&file).arg("main").output().expect("running flowctl run");
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Completed"));
}

#[test]
fn run_follows_a_goto_flow_redirect() {
    let dir = TempDir::new().unwrap();
    let file = write_program(&dir, "program.json", REDIRECT_FLOW);

    let output = flowctl().arg("run").arg(&file).arg("first").output().expect("running flowctl run");
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Completed"));
}

#[test]
fn run_rejects_an_unknown_flow_name() {
    let dir = TempDir::new().unwrap();
    let file = write_program(&dir, "program.json", NOOP_FLOW);

    let output = flowctl().arg("run").arg(&file).arg("missing").output().expect("running flowctl run");
    assert!(!output.status.success());
}

#[test]
fn run_accepts_a_json_input_flag() {
    let dir = TempDir::new().unwrap();
    let file = write_program(&dir, "program.json", NOOP_FLOW);

    let output = flowctl()
        .arg("run")
        .arg(&file)
        .arg("main")
        .arg("--input")
        .arg(r#"{"question": "hello"}"#)
        .output()
        .expect("running flowctl run");
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
}
