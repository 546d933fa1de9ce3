use assert_cmd::Command;
use predicates::prelude::*;

fn clipcache() -> Command {
    let mut cmd = Command::cargo_bin("clipcache").unwrap();
    cmd.env_remove("RUST_LOG").env_remove("CLIPCACHE_CONFIG");
    cmd
}

#[test]
fn test_help_lists_subcommands() {
    clipcache()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("serve"))
        .stdout(predicate::str::contains("convert"))
        .stdout(predicate::str::contains("doctor"));
}

#[test]
fn test_platforms_lists_supported_sites() {
    clipcache()
        .arg("platforms")
        .assert()
        .success()
        .stdout(predicate::str::contains("Bilibili"))
        .stdout(predicate::str::contains("YouTube"))
        .stdout(predicate::str::contains("xhslink.com"));
}

#[test]
fn test_convert_rejects_unsupported_url() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("config.yaml");

    clipcache()
        .args(["convert", "https://example.com/watch?v=1", "--config"])
        .arg(&config)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unsupported"));

    // Validation happens before any configuration is written
    assert!(!config.exists());
}

#[test]
fn test_convert_rejects_unknown_format() {
    clipcache()
        .args(["convert", "https://b23.tv/abc", "--format", "webm"])
        .assert()
        .failure();
}

#[test]
fn test_config_writes_default_file() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("clipcache.yaml");

    clipcache()
        .args(["config", "--show", "--config"])
        .arg(&config)
        .assert()
        .success()
        .stdout(predicate::str::contains("Artifact TTL: 30m 0s"));

    let written = std::fs::read_to_string(&config).unwrap();
    assert!(written.contains("ttl_secs: 1800"));
}
