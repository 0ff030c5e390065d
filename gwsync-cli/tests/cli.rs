//! End-to-end checks of the `gwsync` binary that need no network.

use std::path::PathBuf;

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;

fn fixture() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/rawdata.json")
}

/// The binary with a clean environment and the two required settings.
fn gwsync() -> Command {
    let mut cmd = Command::cargo_bin("gwsync").unwrap();
    cmd.env_clear()
        .env("NODE_NAME", "node1")
        .env("TRAEFIK_URL", "http://traefik:8080");
    cmd
}

#[test]
fn render_kv_splits_routers_per_entrypoint() {
    gwsync()
        .args(["render", "--input"])
        .arg(fixture())
        .assert()
        .success()
        .stdout(predicate::str::contains("traefik/http/routers/foo_web/rule"))
        .stdout(predicate::str::contains("traefik/http/routers/foo_websecure/tls"))
        .stdout(predicate::str::contains("traefik/http/routers/admin/rule"))
        .stdout(predicate::str::contains("fingerprint"))
        .stdout(predicate::str::contains("broken"));
}

#[test]
fn render_json_is_the_built_snapshot() {
    let output = gwsync()
        .args(["render", "--json", "--input"])
        .arg(fixture())
        .output()
        .unwrap();
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));

    let snapshot: Value = serde_json::from_slice(&output.stdout).unwrap();
    let entries = snapshot["entries"].as_object().unwrap();
    assert_eq!(entries["traefik/http/routers/foo_web/tls"], "false");
    assert_eq!(entries["traefik/http/routers/foo_websecure/tls"], "true");
    assert_eq!(entries["traefik/http/routers/foo_web/service"], "gw-node1-http");
    assert_eq!(entries["traefik/http/routers/foo_websecure/service"], "gw-node1-https");
    assert!(entries.keys().all(|k| !k.contains("broken") && !k.contains("api")));

    let registrations = snapshot["registrations"].as_array().unwrap();
    assert_eq!(registrations.len(), 2);
    assert!(registrations.iter().all(|r| r["Tags"].as_array().unwrap().is_empty()));
}

#[test]
fn render_is_deterministic() {
    let run = || {
        let output = gwsync()
            .args(["render", "--json", "--input"])
            .arg(fixture())
            .output()
            .unwrap();
        let mut snapshot: Value = serde_json::from_slice(&output.stdout).unwrap();
        snapshot["taken_at"] = Value::Null;
        snapshot
    };
    assert_eq!(run(), run());
}

#[test]
fn render_tags_mode_lists_service_tags() {
    gwsync()
        .env("MODE", "tags")
        .args(["render", "--input"])
        .arg(fixture())
        .assert()
        .success()
        .stdout(predicate::str::contains("gw-node1-http"))
        .stdout(predicate::str::contains("traefik.http.routers.foo_web.rule"))
        .stdout(predicate::str::contains("No keys."));
}

#[test]
fn render_rejects_unreadable_input() {
    gwsync()
        .args(["render", "--input", "/nonexistent/rawdata.json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to read"));
}

#[test]
fn check_config_accepts_defaults() {
    gwsync()
        .arg("check-config")
        .assert()
        .success()
        .stdout(predicate::str::contains("gw-node1-https"))
        .stdout(predicate::str::contains("http://traefik:8080/api/rawdata"))
        .stdout(predicate::str::contains("configuration is valid"));
}

#[test]
fn check_config_reads_flags_over_defaults() {
    let output = gwsync()
        .args(["check-config", "--json", "--mode", "tags", "--hc-interval", "5s"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let settings: Vec<Value> = serde_json::from_slice(&output.stdout).unwrap();
    let value = |name: &str| {
        settings
            .iter()
            .find(|s| s["name"] == name)
            .map(|s| s["value"].clone())
    };
    assert_eq!(value("mode"), Some(Value::from("tags")));
    assert_eq!(value("health check interval"), Some(Value::from("5s")));
    assert_eq!(value("kv prefix"), None);
}

#[test]
fn missing_traefik_url_fails() {
    let mut cmd = Command::cargo_bin("gwsync").unwrap();
    cmd.env_clear()
        .env("NODE_NAME", "node1")
        .arg("check-config")
        .assert()
        .failure()
        .stderr(predicate::str::contains("TRAEFIK_URL"));
}

#[test]
fn timeout_longer_than_interval_fails() {
    gwsync()
        .env("HC_TIMEOUT", "20s")
        .arg("check-config")
        .assert()
        .failure()
        .stderr(predicate::str::contains("HC_TIMEOUT"));
}

#[test]
fn unknown_mode_fails() {
    gwsync()
        .args(["check-config", "--mode", "catalog"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("MODE"));
}

#[test]
fn purge_requires_confirmation() {
    gwsync()
        .arg("purge")
        .assert()
        .failure()
        .stderr(predicate::str::contains("refusing to delete `traefik/`"))
        .stderr(predicate::str::contains("every node"));
}

#[test]
fn purge_help_says_the_whole_prefix_goes() {
    gwsync()
        .args(["purge", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("for every node"));
}
