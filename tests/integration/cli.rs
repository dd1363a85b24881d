#[path = "common/mod.rs"]
mod common;

use std::{fs, net::TcpListener, path::Path};
#[cfg(target_os = "linux")]
use std::process::Command as StdCommand;

use assert_cmd::Command;
use common::write_descriptor;
use predicates::prelude::*;
use serde_json::Value;
use tempfile::tempdir;

/// An address nothing is listening on.
fn closed_address() -> String {
    let port = TcpListener::bind("127.0.0.1:0")
        .expect("bind ephemeral port")
        .local_addr()
        .expect("local addr")
        .port();
    format!("http://127.0.0.1:{port}")
}

fn write_config(dir: &Path, body: &str) -> String {
    let config_path = dir.join("botstatus.yaml");
    fs::write(&config_path, body).expect("write config");
    config_path.to_string_lossy().into_owned()
}

fn botstatus() -> Command {
    Command::new(assert_cmd::cargo::cargo_bin!("botstatus"))
}

#[cfg(target_os = "linux")]
#[test]
fn status_json_reports_live_and_dead_descriptors() {
    let temp = tempdir().expect("failed to create tempdir");
    let status_dir = temp.path().join("descriptors");

    let mut alive = StdCommand::new("sleep")
        .arg("30")
        .spawn()
        .expect("spawn sleep");
    let mut dead = StdCommand::new("sleep")
        .arg("0")
        .spawn()
        .expect("spawn sleep");
    let dead_pid = dead.id();
    dead.wait().expect("reap sleep");

    write_descriptor(&status_dir, "alive", alive.id(), &["30"]);
    write_descriptor(&status_dir, "dead", dead_pid, &["0"]);

    let config = write_config(
        temp.path(),
        r#"
status_dir: "descriptors"
interpreter_prefix: "sleep"
"#,
    );

    let output = botstatus()
        .arg("--config")
        .arg(&config)
        .arg("status")
        .arg("--json")
        .output()
        .expect("run botstatus status");

    let _ = alive.kill();
    let _ = alive.wait();

    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let json: Value = serde_json::from_slice(&output.stdout).expect("status json");
    assert_eq!(json["alive"]["online"], Value::Bool(true));
    assert_eq!(json["dead"]["online"], Value::Bool(false));
}

#[test]
fn detailed_status_shows_unreachable_node_as_offline() {
    let temp = tempdir().expect("failed to create tempdir");
    let config = write_config(
        temp.path(),
        &format!(
            r#"
status_dir: "descriptors"
request_timeout: 2s
services: ["ghost"]
nodes:
  node1:
    address: "{}"
"#,
            closed_address()
        ),
    );

    botstatus()
        .arg("--config")
        .arg(&config)
        .arg("status")
        .arg("--detailed")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("Server local is online:")
                .and(predicate::str::contains("Server node1 is offline:"))
                .and(predicate::str::contains("Last Error: request to http://127.0.0.1:"))
                .and(predicate::str::contains(
                    "Service without server association:\n  ❌ Service offline:\n  - ghost",
                ))
                .and(predicate::str::contains("Updated: ")),
        );
}

#[test]
fn down_json_lists_failed_nodes() {
    let temp = tempdir().expect("failed to create tempdir");
    let address = closed_address();
    let config = write_config(
        temp.path(),
        &format!(
            r#"
status_dir: "descriptors"
request_timeout: 2s
nodes:
  edge:
    address: "{address}"
"#
        ),
    );

    let output = botstatus()
        .arg("down")
        .arg("--json")
        .arg("--config")
        .arg(&config)
        .output()
        .expect("run botstatus down");

    assert!(output.status.success());
    let json: Value = serde_json::from_slice(&output.stdout).expect("down json");
    let reason = json["edge"].as_str().expect("edge reason");
    assert!(reason.contains(&address));
}

#[test]
fn empty_setup_prints_no_services() {
    let temp = tempdir().expect("failed to create tempdir");
    let config = write_config(temp.path(), "status_dir: \"descriptors\"\n");

    botstatus()
        .arg("--config")
        .arg(&config)
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::starts_with("No services available.\nUpdated: "));
}

#[test]
fn invalid_config_fails() {
    let temp = tempdir().expect("failed to create tempdir");
    let config = write_config(temp.path(), "refresh_interval: whenever\n");

    botstatus()
        .arg("--config")
        .arg(&config)
        .arg("status")
        .assert()
        .failure()
        .stderr(predicate::str::contains("refresh_interval"));
}

#[test]
fn invalid_stream_interval_fails_before_streaming() {
    let temp = tempdir().expect("failed to create tempdir");
    let config = write_config(temp.path(), "status_dir: \"descriptors\"\n");

    botstatus()
        .arg("--config")
        .arg(&config)
        .arg("status")
        .arg("--stream")
        .arg("soon")
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid stream interval 'soon'"));
}
