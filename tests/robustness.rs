//! Robustness tests for concurrency and failure modes.
//!
//! These tests verify that concurrent logins never lose or duplicate entries
//! and that a broken renderer or reload never loses a stored address.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::thread;

use allowlistd::allowlist::{AllowlistManager, ManagerOptions};
use allowlistd::reloader::NginxReloader;
use allowlistd::renderer::NginxRenderer;
use allowlistd::scheduler::SystemClock;
use allowlistd::store::AllowlistStore;
use chrono::NaiveTime;
use tempfile::TempDir;

fn options(baseline: &[&str]) -> ManagerOptions {
    ManagerOptions {
        baseline_subnets: baseline.iter().map(|s| s.to_string()).collect(),
        revert_daily: false,
        revert_time: NaiveTime::from_hms_opt(4, 0, 0).unwrap(),
    }
}

fn manager(store: &Path, artifact: &Path, reload: &str) -> Arc<AllowlistManager> {
    let reloader = Arc::new(NginxReloader::from_command(&[reload.to_string()]));
    let renderer = NginxRenderer::new(artifact, Some(reloader)).unwrap();
    AllowlistManager::initialize(
        options(&["10.0.0.0/8"]),
        AllowlistStore::new(store),
        Some(renderer),
        Arc::new(SystemClock),
    )
    .unwrap()
}

fn store_rows(path: &Path) -> Vec<String> {
    fs::read_to_string(path)
        .unwrap()
        .lines()
        .skip(1)
        .map(str::to_string)
        .collect()
}

/// Test that concurrent adds of distinct addresses are all kept
#[test]
fn test_concurrent_distinct_adds() {
    let dir = TempDir::new().unwrap();
    let store = dir.path().join("allowlist.csv");
    let artifact = dir.path().join("ipallowlist.conf");
    let manager = manager(&store, &artifact, "true");

    const N: u8 = 24;
    thread::scope(|s| {
        for i in 0..N {
            let manager = &manager;
            s.spawn(move || {
                let ip = format!("198.51.100.{}", i + 1);
                assert!(manager.add("user", &ip).unwrap());
            });
        }
    });

    assert_eq!(manager.entries().len(), N as usize + 1);
    assert_eq!(store_rows(&store).len(), N as usize + 1);

    let rendered = fs::read_to_string(&artifact).unwrap();
    assert_eq!(rendered.matches("allow ").count(), N as usize + 1);
    assert!(rendered.ends_with("deny all;\n"));
}

/// Test that racing adds of one address store it exactly once
#[test]
fn test_concurrent_same_address() {
    let dir = TempDir::new().unwrap();
    let store = dir.path().join("allowlist.csv");
    let manager = manager(&store, &dir.path().join("ipallowlist.conf"), "true");

    let added: usize = thread::scope(|s| {
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let manager = &manager;
                s.spawn(move || manager.add("user", "203.0.113.77").unwrap())
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().unwrap() as usize)
            .sum()
    });

    assert_eq!(added, 1);
    let rows = store_rows(&store);
    assert_eq!(rows.iter().filter(|r| r.contains(",203.0.113.77,")).count(), 1);
}

/// Test that membership checks stay consistent while entries are added
#[test]
fn test_membership_during_adds() {
    let dir = TempDir::new().unwrap();
    let manager = manager(
        &dir.path().join("allowlist.csv"),
        &dir.path().join("ipallowlist.conf"),
        "true",
    );

    thread::scope(|s| {
        for i in 0..8u8 {
            let manager = &manager;
            s.spawn(move || {
                manager.add("user", &format!("192.0.2.{}", i + 1)).unwrap();
            });
        }
        for _ in 0..8 {
            let manager = &manager;
            s.spawn(move || {
                for _ in 0..50 {
                    assert!(manager.is_member("10.20.30.40"));
                    assert!(!manager.is_member("172.16.0.1"));
                }
            });
        }
    });

    for i in 0..8u8 {
        assert!(manager.is_member(&format!("192.0.2.{}", i + 1)));
    }
}

/// Test that a render into a missing directory fails without losing the entry
#[test]
fn test_render_to_missing_directory() {
    let dir = TempDir::new().unwrap();
    let nginx_dir = dir.path().join("nginx");
    fs::create_dir(&nginx_dir).unwrap();
    let store = dir.path().join("allowlist.csv");
    let artifact = nginx_dir.join("ipallowlist.conf");
    let manager = manager(&store, &artifact, "true");

    fs::remove_dir_all(&nginx_dir).unwrap();
    assert!(manager.add("alice", "203.0.113.9").is_err());
    assert!(manager.is_member("203.0.113.9"));
    assert!(store_rows(&store).iter().any(|r| r.contains(",203.0.113.9,")));

    // The directory coming back is enough to recover
    fs::create_dir(&nginx_dir).unwrap();
    manager.rerender().unwrap();
    assert!(fs::read_to_string(&artifact)
        .unwrap()
        .contains("allow 203.0.113.9;"));
}

/// Test that a failing reload never blocks later logins
#[test]
fn test_reload_failure_keeps_accepting() {
    let dir = TempDir::new().unwrap();
    let store = dir.path().join("allowlist.csv");
    let artifact = dir.path().join("ipallowlist.conf");
    let manager = manager(&store, &artifact, "false");

    assert!(manager.add("alice", "203.0.113.1").unwrap());
    assert!(manager.add("bob", "203.0.113.2").unwrap());
    assert_eq!(store_rows(&store).len(), 3);
    assert!(fs::read_to_string(&artifact)
        .unwrap()
        .contains("allow 203.0.113.2;"));
}

/// Test that a reload command which does not exist is only logged
#[test]
fn test_missing_reload_binary() {
    let dir = TempDir::new().unwrap();
    let manager = manager(
        &dir.path().join("allowlist.csv"),
        &dir.path().join("ipallowlist.conf"),
        "/nonexistent/allowlistd-reload",
    );
    assert!(manager.add("alice", "203.0.113.1").unwrap());
}

/// Test that garbage input never panics and never lands in the store
#[test]
fn test_malformed_addresses() {
    let dir = TempDir::new().unwrap();
    let store = dir.path().join("allowlist.csv");
    let manager = manager(&store, &dir.path().join("ipallowlist.conf"), "true");

    for garbage in [
        "",
        " ",
        "256.1.1.1",
        "1.2.3",
        "10.0.0.0/33",
        "::g",
        "1.2.3.4; deny all",
        "1.2.3.4\nallow all",
        "💥",
    ] {
        assert!(!manager.add("mallory", garbage).unwrap(), "{:?}", garbage);
        assert!(!manager.is_member(garbage), "{:?}", garbage);
    }
    assert_eq!(store_rows(&store).len(), 1);
}

/// Test that a revert racing with logins leaves a consistent store
#[test]
fn test_revert_during_adds() {
    let dir = TempDir::new().unwrap();
    let store = dir.path().join("allowlist.csv");
    let manager = manager(&store, &dir.path().join("ipallowlist.conf"), "true");

    thread::scope(|s| {
        for i in 0..8u8 {
            let manager = &manager;
            s.spawn(move || {
                manager.add("user", &format!("192.0.2.{}", i + 1)).unwrap();
            });
        }
        let manager = &manager;
        s.spawn(move || manager.reset_and_reseed().unwrap());
    });

    let entries = manager.entries();
    assert_eq!(entries[0].address, "10.0.0.0/8");
    assert_eq!(store_rows(&store).len(), entries.len());
}
