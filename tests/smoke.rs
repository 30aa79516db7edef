//! Smoke tests -- verify the binary runs and each subcommand is wired up.

use assert_cmd::Command;

#[test]
fn test_cli_help() {
    Command::cargo_bin("ranguard")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicates::str::contains("root-cause attribution"));
}

#[test]
fn test_cli_version() {
    Command::cargo_bin("ranguard")
        .unwrap()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicates::str::contains("ranguard"));
}

#[test]
fn test_subcommands_exist() {
    for sub in ["serve", "detect", "seed", "baseline", "anomalies"] {
        Command::cargo_bin("ranguard")
            .unwrap()
            .args([sub, "--help"])
            .assert()
            .success();
    }
}

#[test]
fn test_seed_requires_file() {
    Command::cargo_bin("ranguard")
        .unwrap()
        .arg("seed")
        .assert()
        .failure()
        .stderr(predicates::str::contains("--file"));
}

#[test]
fn test_invalid_config_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = dir.path().join("ranguard.toml");
    std::fs::write(&cfg, "[detection]\nthroughput_threshold_pct = 150.0\n").unwrap();

    Command::cargo_bin("ranguard")
        .unwrap()
        .arg("--config")
        .arg(&cfg)
        .args(["anomalies"])
        .assert()
        .failure()
        .stderr(predicates::str::contains("throughput_threshold_pct"));
}

#[test]
fn test_serve_rejects_zero_poll_interval() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = dir.path().join("ranguard.toml");
    std::fs::write(&cfg, "[detection]\npoll_interval_ms = 0\n").unwrap();

    Command::cargo_bin("ranguard")
        .unwrap()
        .arg("--config")
        .arg(&cfg)
        .arg("serve")
        .assert()
        .failure()
        .stderr(predicates::str::contains("poll_interval_ms"));
}

#[test]
fn test_seed_interval_defaults_to_step_interval() {
    Command::cargo_bin("ranguard")
        .unwrap()
        .args(["seed", "--help"])
        .assert()
        .success()
        .stdout(predicates::str::contains("[default: 700]"));
}
