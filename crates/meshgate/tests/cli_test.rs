//! Integration tests for the `meshgate` CLI binary.
//!
//! Argument parsing, help output, and error handling run without any
//! backend. The end-to-end cases point a profile at wiremock servers
//! standing in for Headscale and the WireGuard agent.
#![allow(clippy::unwrap_used)]

use std::path::{Path, PathBuf};

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use serde_json::{Value, json};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ── Helpers ─────────────────────────────────────────────────────────

/// Build a [`Command`] for the `meshgate` binary with env isolation.
///
/// Clears all `MESHGATE_*` env vars and points config directories at a
/// nonexistent path so tests never touch the user's real configuration.
fn meshgate_cmd() -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("meshgate");
    cmd.env("HOME", "/tmp/meshgate-cli-test-nonexistent")
        .env("XDG_CONFIG_HOME", "/tmp/meshgate-cli-test-nonexistent")
        .env("XDG_DATA_HOME", "/tmp/meshgate-cli-test-nonexistent")
        .env_remove("MESHGATE_CONFIG")
        .env_remove("MESHGATE_PROFILE")
        .env_remove("MESHGATE_OUTPUT")
        .env_remove("MESHGATE_INSECURE")
        .env_remove("MESHGATE_TIMEOUT")
        .env_remove("MESHGATE_LISTEN");
    cmd
}

/// Concatenate stdout + stderr from a command output for flexible matching.
fn combined_output(output: &std::process::Output) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    format!("{stdout}{stderr}")
}

/// Mock Headscale + WireGuard agent and a profile pointing at them.
struct Backends {
    headscale: MockServer,
    wireguard: MockServer,
    dir: tempfile::TempDir,
}

impl Backends {
    async fn start() -> Self {
        let headscale = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/node"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "nodes": [
                    { "id": "1", "name": "laptop", "ipAddresses": ["100.64.0.1"], "online": true },
                    { "id": "2", "name": "nas", "ipAddresses": ["100.64.0.2"], "online": true }
                ]
            })))
            .mount(&headscale)
            .await;

        let wireguard = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/wireguard/client"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "id": "c1", "name": "phone", "publicKey": "pk-phone=", "address": "10.8.0.2/32" }
            ])))
            .mount(&wireguard)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let config = format!(
            r#"
default_profile = "lab"

[profiles.lab]
state_file = "{state}"

[profiles.lab.headscale]
url = "{hs}"
api_key_env = "MESHGATE_TEST_HS_KEY"

[profiles.lab.wireguard]
url = "{wg}"
api_key_env = "MESHGATE_TEST_WG_KEY"
"#,
            state = dir.path().join("state.json").display(),
            hs = headscale.uri(),
            wg = wireguard.uri(),
        );
        std::fs::write(dir.path().join("config.toml"), config).unwrap();

        Self {
            headscale,
            wireguard,
            dir,
        }
    }

    fn config_path(&self) -> PathBuf {
        self.dir.path().join("config.toml")
    }

    fn state_path(&self) -> PathBuf {
        self.dir.path().join("state.json")
    }
}

/// Run the binary against `config` off the async runtime so the mock
/// servers keep answering.
async fn run_with(config: &Path, args: &[&str]) -> std::process::Output {
    let config = config.to_path_buf();
    let args: Vec<String> = args.iter().map(|a| (*a).to_owned()).collect();
    tokio::task::spawn_blocking(move || {
        meshgate_cmd()
            .arg("--config")
            .arg(&config)
            .env("MESHGATE_TEST_HS_KEY", "hs-test-key")
            .env("MESHGATE_TEST_WG_KEY", "wg-test-key")
            .args(&args)
            .output()
            .unwrap()
    })
    .await
    .unwrap()
}

fn stdout_json(output: &std::process::Output) -> Value {
    serde_json::from_slice(&output.stdout).unwrap_or_else(|e| {
        panic!("stdout is not JSON ({e}):\n{}", combined_output(output))
    })
}

// ── Basic invocation ────────────────────────────────────────────────

#[test]
fn test_no_args_shows_help() {
    let output = meshgate_cmd().output().unwrap();
    assert_eq!(output.status.code(), Some(2), "Expected exit code 2");
    let text = combined_output(&output);
    assert!(text.contains("Usage"), "Expected 'Usage' in output:\n{text}");
}

#[test]
fn test_help_flag() {
    meshgate_cmd().arg("--help").assert().success().stdout(
        predicate::str::contains("VPN clients")
            .and(predicate::str::contains("clients"))
            .and(predicate::str::contains("acl"))
            .and(predicate::str::contains("apply")),
    );
}

#[test]
fn test_version_flag() {
    meshgate_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("meshgate"));
}

// ── Shell completions ───────────────────────────────────────────────

#[test]
fn test_completions_bash() {
    meshgate_cmd()
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty().not());
}

#[test]
fn test_completions_zsh() {
    meshgate_cmd()
        .args(["completions", "zsh"])
        .assert()
        .success()
        .stdout(predicate::str::contains("#compdef"));
}

// ── Error cases ─────────────────────────────────────────────────────

#[test]
fn test_invalid_subcommand() {
    let output = meshgate_cmd().arg("foobar").output().unwrap();
    assert!(!output.status.success());
    let text = combined_output(&output);
    assert!(
        text.contains("unrecognized") || text.contains("foobar"),
        "Expected error mentioning invalid subcommand:\n{text}"
    );
}

#[test]
fn test_clients_list_without_config() {
    meshgate_cmd()
        .args(["clients", "list"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("config").or(predicate::str::contains("Configuration")));
}

#[test]
fn test_invalid_output_format() {
    let output = meshgate_cmd()
        .args(["--output", "invalid", "clients", "list"])
        .output()
        .unwrap();
    assert!(!output.status.success());
    let text = combined_output(&output);
    assert!(
        text.contains("invalid") || text.contains("possible values"),
        "Expected error about invalid output format:\n{text}"
    );
}

#[test]
fn test_dns_requires_on_or_off() {
    meshgate_cmd()
        .args(["dns", "laptop", "maybe"])
        .assert()
        .failure()
        .code(2);
}

// ── Config commands ─────────────────────────────────────────────────

#[test]
fn test_config_show_no_config() {
    // `config show` falls back to defaults when no file exists.
    meshgate_cmd()
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("default_profile"));
}

#[test]
fn test_config_path_honours_flag() {
    meshgate_cmd()
        .args(["--config", "/tmp/somewhere/meshgate.toml", "config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("/tmp/somewhere/meshgate.toml"));
}

#[test]
fn test_config_show_masks_plaintext_keys() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(
        &path,
        "[profiles.home.headscale]\nurl = \"https://hs.example.com\"\napi_key = \"super-secret\"\n",
    )
    .unwrap();

    meshgate_cmd()
        .arg("--config")
        .arg(&path)
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("super-secret").not())
        .stdout(predicate::str::contains("********"));
}

#[test]
fn test_unknown_profile_lists_available() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(
        &path,
        "[profiles.home.wireguard]\nurl = \"http://127.0.0.1:1\"\n",
    )
    .unwrap();

    meshgate_cmd()
        .arg("--config")
        .arg(&path)
        .args(["--profile", "office", "status"])
        .assert()
        .failure()
        .code(4)
        .stderr(predicate::str::contains("home"));
}

// ── Against mock backends ───────────────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn test_clients_list_merges_both_backends() {
    let backends = Backends::start().await;

    let output = run_with(&backends.config_path(), &["-o", "json", "clients", "list"]).await;
    assert!(output.status.success(), "{}", combined_output(&output));

    let clients = stdout_json(&output);
    let names: Vec<&str> = clients
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["name"].as_str().unwrap())
        .collect();
    assert_eq!(names.len(), 3);
    assert!(names.contains(&"laptop"));
    assert!(names.contains(&"phone"));
    assert!(backends.state_path().exists());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_acl_persists_between_invocations() {
    let backends = Backends::start().await;
    let config = backends.config_path();

    let set = run_with(
        &config,
        &["acl", "set", "laptop", "--policy", "selected", "--mutual", "phone"],
    )
    .await;
    assert!(set.status.success(), "{}", combined_output(&set));

    let reach = run_with(&config, &["-o", "json", "reach", "phone"]).await;
    assert!(reach.status.success(), "{}", combined_output(&reach));
    let view = stdout_json(&reach);
    assert_eq!(view["canReach"].as_array().unwrap().len(), 1);
    assert_eq!(view["reachableFrom"].as_array().unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_acl_set_rejects_unknown_policy() {
    let backends = Backends::start().await;

    let output = run_with(
        &backends.config_path(),
        &["acl", "set", "laptop", "--policy", "open"],
    )
    .await;
    assert_eq!(output.status.code(), Some(2), "{}", combined_output(&output));
    assert!(combined_output(&output).contains("block_all"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_apply_pushes_to_both_enforcement_layers() {
    let backends = Backends::start().await;
    Mock::given(method("PUT"))
        .and(path("/api/v1/policy"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "policy": "" })))
        .expect(1)
        .mount(&backends.headscale)
        .await;
    Mock::given(method("PUT"))
        .and(path("/api/firewall/ruleset"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&backends.wireguard)
        .await;

    let output = run_with(&backends.config_path(), &["-o", "json", "apply"]).await;
    assert!(output.status.success(), "{}", combined_output(&output));
    let status = stdout_json(&output);
    assert_eq!(status["inSync"], true);
    assert_eq!(status["pendingChanges"], false);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_rejected_apply_exits_nonzero_and_stays_pending() {
    let backends = Backends::start().await;
    Mock::given(method("PUT"))
        .and(path("/api/v1/policy"))
        .respond_with(ResponseTemplate::new(400).set_body_string("acl does not parse"))
        .mount(&backends.headscale)
        .await;
    Mock::given(method("PUT"))
        .and(path("/api/firewall/ruleset"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&backends.wireguard)
        .await;

    let output = run_with(&backends.config_path(), &["apply"]).await;
    assert_eq!(output.status.code(), Some(7), "{}", combined_output(&output));

    let status = run_with(&backends.config_path(), &["-o", "json", "status"]).await;
    let status = stdout_json(&status);
    assert_eq!(status["apply"]["pendingChanges"], true);
    assert!(status["apply"]["lastError"].is_string());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_dry_run_submits_nothing() {
    let backends = Backends::start().await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(204))
        .expect(0)
        .mount(&backends.wireguard)
        .await;

    let output = run_with(&backends.config_path(), &["apply", "--dry-run"]).await;
    assert!(output.status.success(), "{}", combined_output(&output));
    let text = String::from_utf8_lossy(&output.stdout);
    assert!(text.contains("table inet meshgate"));
}
