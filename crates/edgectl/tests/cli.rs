//! Drives the `edgectl` binary end to end.

use std::fs;

use assert_cmd::Command;
use predicates::prelude::*;

use edge_ghost::{GhostConfig, GhostRuntime, GhostService};
use edge_session::CancelToken;

fn edgectl() -> Command {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("edgectl");
    cmd.env_remove("LOG");
    for key in [
        "EDGE_GHOST_ID",
        "EDGE_GHOST_ADMIN_LISTEN",
        "EDGE_MIRAGE_ADDRESS",
        "EDGE_MIRAGE_LISTEN",
        "EDGE_MIRAGE_ADMIN_LISTEN",
        "EDGE_SECURITY_MODE",
    ] {
        cmd.env_remove(key);
    }
    cmd
}

fn start_ghost() -> GhostRuntime {
    GhostService::bootstrap(GhostConfig {
        id: "ghost.cli".into(),
        admin_listen: "127.0.0.1:0".into(),
        ..GhostConfig::default()
    })
    .unwrap()
    .start(&CancelToken::new())
    .unwrap()
}

#[test]
fn help_lists_the_subcommands() {
    edgectl()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("ghost"))
        .stdout(predicate::str::contains("mirage"))
        .stdout(predicate::str::contains("admin"));
}

#[test]
fn admin_status_prints_the_response() {
    let ghost = start_ghost();
    let addr = ghost.admin_addr().unwrap().to_string();

    edgectl()
        .args(["admin", "--addr", &addr, "status"])
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""ok": true"#))
        .stdout(predicate::str::contains(r#""ghost_id": "ghost.cli""#));

    edgectl()
        .args(["admin", "--addr", &addr, "execute", "--json"])
        .arg(r#"{"command":{"seed_selector":"seed.flow","operation":"status"}}"#)
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""outcome": "success""#));

    ghost.shutdown();
}

#[test]
fn admin_error_response_exits_nonzero() {
    let ghost = start_ghost();
    let addr = ghost.admin_addr().unwrap().to_string();

    edgectl()
        .args(["admin", "--addr", &addr, "reboot"])
        .assert()
        .failure()
        .code(1)
        .stdout(predicate::str::contains("unknown action: reboot"));

    ghost.shutdown();
}

#[test]
fn malformed_config_is_rejected_before_startup() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("edge.toml");
    fs::write(&path, "[mirage\nid = ").unwrap();

    edgectl()
        .args(["mirage", "run", "--config"])
        .arg(&path)
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("failed to parse"));
}

#[test]
fn incomplete_mirage_config_fails_bootstrap() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("edge.toml");
    fs::write(
        &path,
        "[mirage]\nlisten_addr = \"127.0.0.1:0\"\nadmin_listen_addr = \"127.0.0.1:0\"\n\n[logging]\nstdout = false\n",
    )
    .unwrap();

    edgectl()
        .args(["mirage", "run", "--config"])
        .arg(&path)
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("local ghost id is required"));
}
