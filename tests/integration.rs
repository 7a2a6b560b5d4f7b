//! Integration tests for the allowlistd binary.
//!
//! Every test runs against its own temporary instance directory, with HOME
//! pointed there too so no user configuration is picked up. Reloads use
//! `true`/`false` instead of systemctl.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

/// Path to the compiled binary
fn binary_path() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_allowlistd"))
}

/// Run allowlistd with `dir` as instance directory and HOME
fn run_allowlistd(dir: &Path, args: &[&str]) -> Output {
    Command::new(binary_path())
        .arg("--instance-dir")
        .arg(dir)
        .args(args)
        .env("HOME", dir)
        .output()
        .expect("Failed to execute allowlistd")
}

fn write_config(dir: &Path, reload: &str) -> PathBuf {
    write_config_with(dir, &format!("[\"{reload}\"]"), "ipallowlist.conf")
}

/// `reload` is a YAML flow list, `allowlist_path` is relative to `dir`
fn write_config_with(dir: &Path, reload: &str, allowlist_path: &str) -> PathBuf {
    let path = dir.join("config.yaml");
    fs::write(
        &path,
        format!(
            r#"store:
  path: allowlist.csv
nginx:
  enabled: true
  allowlist_path: {allowlist_path}
  reload_command: {reload}
allowed_subnets:
  - 192.168.1.0/24
revert_daily: false
auth:
  type: static
  static:
    password_cleartext: hunter2
"#
        ),
    )
    .unwrap();
    path
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn test_version_command() {
    let dir = TempDir::new().unwrap();
    let output = run_allowlistd(dir.path(), &["version"]);
    assert!(output.status.success());
    assert!(stdout(&output).contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_help_command() {
    let dir = TempDir::new().unwrap();
    let output = run_allowlistd(dir.path(), &["--help"]);
    assert!(output.status.success());
    let text = stdout(&output);
    assert!(text.contains("serve"));
    assert!(text.contains("revert"));
    assert!(text.contains("hash-password"));
}

#[test]
fn test_hash_password_command() {
    let dir = TempDir::new().unwrap();
    let output = run_allowlistd(dir.path(), &["hash-password", "hunter2"]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));

    let hash = stdout(&output).trim().to_string();
    assert!(hash.starts_with("$argon2id$"));
    assert!(allowlistd::auth::verify_password(&hash, "hunter2"));
}

#[test]
fn test_missing_config_is_created_and_asks_for_password() {
    let dir = TempDir::new().unwrap();
    let output = run_allowlistd(dir.path(), &["list"]);

    assert!(!output.status.success());
    assert!(stderr(&output).contains("Please set password in"));
    assert!(dir.path().join("config.yaml").is_file());
}

#[test]
fn test_render_seeds_baseline_and_hashes_password() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path(), "true");

    let output = run_allowlistd(dir.path(), &["render"]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));

    assert_eq!(
        fs::read_to_string(dir.path().join("ipallowlist.conf")).unwrap(),
        "allow 192.168.1.0/24;\ndeny all;\n"
    );
    let store = fs::read_to_string(dir.path().join("allowlist.csv")).unwrap();
    assert!(store.starts_with("username,ip,date\n"));
    assert!(store.contains("default,192.168.1.0/24,"));

    let on_disk = fs::read_to_string(config).unwrap();
    assert!(!on_disk.contains("hunter2"));
    assert!(on_disk.contains("$argon2id$"));
}

#[test]
fn test_check_command() {
    let dir = TempDir::new().unwrap();
    write_config(dir.path(), "true");
    assert!(run_allowlistd(dir.path(), &["render"]).status.success());

    let output = run_allowlistd(dir.path(), &["check", "192.168.1.55"]);
    assert!(output.status.success());
    assert!(stdout(&output).contains("is ALLOWED"));

    let output = run_allowlistd(dir.path(), &["check", "10.0.0.1"]);
    assert!(output.status.success());
    assert!(stdout(&output).contains("is NOT allowed"));
}

#[test]
fn test_check_invalid_ip() {
    let dir = TempDir::new().unwrap();
    write_config(dir.path(), "true");

    let output = run_allowlistd(dir.path(), &["check", "not-an-ip"]);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("Invalid IP address"));
}

#[test]
fn test_revert_command_drops_dynamic_entries() {
    let dir = TempDir::new().unwrap();
    write_config(dir.path(), "true");
    fs::write(
        dir.path().join("allowlist.csv"),
        "username,ip,date\ndefault,192.168.1.0/24,2024-03-01 04:00:00.000000\nalice,203.0.113.9,2024-03-01 12:00:00.000000\n",
    )
    .unwrap();

    let output = run_allowlistd(dir.path(), &["revert"]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));

    let output = run_allowlistd(dir.path(), &["list"]);
    let text = stdout(&output);
    assert!(text.contains("192.168.1.0/24"));
    assert!(!text.contains("203.0.113.9"));
    assert!(text.contains("1 entries"));
}

#[test]
fn test_reload_failure_is_not_fatal() {
    let dir = TempDir::new().unwrap();
    write_config(dir.path(), "false");

    let output = run_allowlistd(dir.path(), &["render"]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert!(stderr(&output).contains("Couldn't reload nginx"));
    assert!(dir.path().join("ipallowlist.conf").is_file());
}

#[test]
fn test_corrupt_store_stops_startup() {
    let dir = TempDir::new().unwrap();
    write_config(dir.path(), "true");
    fs::write(dir.path().join("allowlist.csv"), "username,ip,date\nalice,10.0.0.1\n").unwrap();

    let output = run_allowlistd(dir.path(), &["render"]);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("corrupt"));
    // Never silently repaired
    assert_eq!(
        fs::read_to_string(dir.path().join("allowlist.csv")).unwrap(),
        "username,ip,date\nalice,10.0.0.1\n"
    );
}

#[test]
fn test_explicit_config_path() {
    let dir = TempDir::new().unwrap();
    let elsewhere = dir.path().join("etc");
    fs::create_dir(&elsewhere).unwrap();
    let config = write_config(&elsewhere, "true");

    let output = run_allowlistd(
        dir.path(),
        &["--config", config.to_str().unwrap(), "render"],
    );
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert!(elsewhere.join("ipallowlist.conf").is_file());
    assert!(!dir.path().join("config.yaml").exists());
}

#[test]
fn test_injected_store_row_stops_startup() {
    let dir = TempDir::new().unwrap();
    write_config(dir.path(), "true");
    let rows = "username,ip,date\nmallory,\"10.0.0.1; allow all\",2024-03-01 12:00:00\n";
    fs::write(dir.path().join("allowlist.csv"), rows).unwrap();

    let output = run_allowlistd(dir.path(), &["render"]);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("invalid address"));
    assert!(!dir.path().join("ipallowlist.conf").exists());
    assert_eq!(fs::read_to_string(dir.path().join("allowlist.csv")).unwrap(), rows);
}

#[test]
fn test_render_into_missing_directory_logs_critical() {
    let dir = TempDir::new().unwrap();
    write_config_with(dir.path(), "[\"true\"]", "missing/ipallowlist.conf");

    let output = run_allowlistd(dir.path(), &["render"]);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("CRITICAL: Failed to write nginx allowlist"));
    assert!(!dir.path().join("missing").exists());
    // The baseline is still stored
    let store = fs::read_to_string(dir.path().join("allowlist.csv")).unwrap();
    assert!(store.contains("default,192.168.1.0/24,"));
}

#[test]
fn test_revert_reloads_nginx_once() {
    let dir = TempDir::new().unwrap();
    let log = dir.path().join("reloads.log");
    let reload = format!("[\"sh\", \"-c\", \"echo reload >> '{}'\"]", log.display());
    write_config_with(dir.path(), &reload, "ipallowlist.conf");

    let output = run_allowlistd(dir.path(), &["revert"]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert_eq!(fs::read_to_string(&log).unwrap().lines().count(), 1);
    assert_eq!(
        fs::read_to_string(dir.path().join("ipallowlist.conf")).unwrap(),
        "allow 192.168.1.0/24;\ndeny all;\n"
    );
}
