//! End-to-end tests for the `warden` binary
//!
//! Every command runs inside a scratch directory with HOME pointed at it so no
//! user-level config leaks in.

use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use std::process::Command;
use tempfile::TempDir;

fn warden_cmd(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("warden").unwrap();
    cmd.current_dir(dir)
        .env("HOME", dir)
        .env("NO_COLOR", "1")
        .env_remove("WARDEN_JSON")
        .env_remove("WARDEN_TIMEOUT_MS")
        .env_remove("WARDEN_MEMORY_LIMIT")
        .env_remove("WARDEN_BLOCK_SEVERITY");
    cmd
}

fn write(dir: &Path, name: &str, content: &str) {
    fs::write(dir.join(name), content).unwrap();
}

// ══════════════════════════════════════════════════════════════════════════════
// HELP
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_help_lists_commands() {
    let dir = TempDir::new().unwrap();
    warden_cmd(dir.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("scan"))
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("check"));
}

// ══════════════════════════════════════════════════════════════════════════════
// SCAN
// ══════════════════════════════════════════════════════════════════════════════

mod scan {
    use super::*;

    #[test]
    fn test_clean_script_passes() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "clean.wd", "total = 1 + 2\n");

        warden_cmd(dir.path())
            .arg("scan")
            .assert()
            .success()
            .stdout(predicate::str::contains("1 file(s) scanned, 0 blocked"));
    }

    #[test]
    fn test_dangerous_script_blocks() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "clean.wd", "total = 1 + 2\n");
        write(dir.path(), "bad.wd", "eval(input())\n");

        warden_cmd(dir.path())
            .args(["scan", "."])
            .assert()
            .failure()
            .stdout(predicate::str::contains("critical"))
            .stdout(predicate::str::contains("2 file(s) scanned, 1 blocked"))
            .stderr(predicate::str::contains("1 file(s) blocked"));
    }

    #[test]
    fn test_json_output() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "bad.wd", "eval(input())\n");

        let output = warden_cmd(dir.path())
            .args(["scan", "--json", "--sequential"])
            .output()
            .unwrap();
        assert!(!output.status.success());

        let reports: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
        let reports = reports.as_array().unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0]["blocked"], true);
        assert_eq!(reports[0]["report"]["risk"], "critical");
    }

    #[test]
    fn test_syntax_error_is_incomplete_and_blocked() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "broken.wd", "x = (1 +\n");

        warden_cmd(dir.path())
            .arg("scan")
            .assert()
            .failure()
            .stdout(predicate::str::contains("analysis incomplete"));
    }

    #[test]
    fn test_block_severity_flag() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "open.wd", "data = open(\"../../etc/hosts\")\n");

        warden_cmd(dir.path())
            .args(["scan", "--block-severity", "critical"])
            .assert()
            .success();
        warden_cmd(dir.path())
            .args(["scan", "--block-severity", "low"])
            .assert()
            .failure()
            .stdout(predicate::str::contains("1 file(s) scanned, 1 blocked"));
    }

    #[test]
    fn test_no_scripts_found() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "readme.txt", "nothing here");

        warden_cmd(dir.path())
            .arg("scan")
            .assert()
            .failure()
            .stderr(predicate::str::contains("No .wd files found"));
    }

    #[test]
    fn test_project_sources_are_used() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("jobs")).unwrap();
        write(dir.path(), "ignored.wd", "eval(input())\n");
        write(
            dir.path(),
            "warden.toml",
            "[project]\nname = \"demo\"\nsources = [\"jobs\"]\n",
        );
        fs::write(dir.path().join("jobs").join("ok.wd"), "x = 1\n").unwrap();

        warden_cmd(dir.path())
            .arg("scan")
            .assert()
            .success()
            .stdout(predicate::str::contains("1 file(s) scanned, 0 blocked"));
    }

    #[test]
    fn test_invalid_project_config_is_reported() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "warden.toml", "[sandbox]\nwall_clock_ms = 0\n");
        write(dir.path(), "ok.wd", "x = 1\n");

        warden_cmd(dir.path())
            .arg("scan")
            .assert()
            .failure()
            .stderr(predicate::str::contains("Failed to load configuration"));
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// RUN
// ══════════════════════════════════════════════════════════════════════════════

mod run {
    use super::*;

    #[test]
    fn test_blocked_script_never_runs() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "bad.wd", "eval(input())\n");

        warden_cmd(dir.path())
            .args(["run", "bad.wd", "--", "touch", "ran"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("blocked by static analysis"));
        assert!(!dir.path().join("ran").exists());
    }

    #[test]
    fn test_missing_file() {
        let dir = TempDir::new().unwrap();
        warden_cmd(dir.path())
            .args(["run", "absent.wd"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Failed to read source file"));
    }

    #[cfg(unix)]
    #[test]
    fn test_gated_command_runs() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "job.wd", "total = 1 + 2\n");

        warden_cmd(dir.path())
            .args(["run", "job.wd", "--", "echo", "hello"])
            .assert()
            .success()
            .stdout(predicate::str::contains("hello"))
            .stderr(predicate::str::contains("exit 0"));
    }

    #[cfg(unix)]
    #[test]
    fn test_timeout_flag() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "job.wd", "total = 1 + 2\n");

        warden_cmd(dir.path())
            .args(["run", "job.wd", "--timeout-ms", "200", "--", "sleep", "5"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("timed out"));
    }

    #[cfg(unix)]
    #[test]
    fn test_json_result() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "job.wd", "total = 1 + 2\n");

        let output = warden_cmd(dir.path())
            .args(["run", "job.wd", "--json", "--", "printf", "out"])
            .output()
            .unwrap();
        assert!(output.status.success());

        let result: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
        assert_eq!(result["stdout"], "out");
        assert_eq!(result["termination_reason"], "completed");
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// CHECK
// ══════════════════════════════════════════════════════════════════════════════

mod check {
    use super::*;

    #[test]
    fn test_ordinary_resource_allowed() {
        let dir = TempDir::new().unwrap();
        warden_cmd(dir.path())
            .args(["check", "-C", "file.read", "-r", "/data/report.csv"])
            .assert()
            .success()
            .stdout(predicate::str::contains("ALLOWED"));
    }

    #[test]
    fn test_sensitive_resource_denied() {
        let dir = TempDir::new().unwrap();
        warden_cmd(dir.path())
            .args(["check", "-C", "file.read", "-r", "/etc/shadow"])
            .assert()
            .failure()
            .stdout(predicate::str::contains("DENIED"));
    }

    #[test]
    fn test_project_policy_applies() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "warden.toml",
            "[[policy]]\ncapability = \"file.write\"\ndeny = [\"/srv/locked/**\"]\n",
        );

        warden_cmd(dir.path())
            .args([
                "check", "-C", "file.write", "-r", "/srv/locked/a.txt", "-o", "write",
            ])
            .assert()
            .failure()
            .stdout(predicate::str::contains("denied pattern"));
    }

    #[test]
    fn test_policy_file_flag() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "policies.json",
            r#"{"policy": [{"capability": "file.read", "deny": ["/tmp/blocked/**"]}]}"#,
        );

        warden_cmd(dir.path())
            .args([
                "check",
                "-C",
                "file.read",
                "-r",
                "/tmp/blocked/x",
                "--policy",
                "policies.json",
            ])
            .assert()
            .failure()
            .stdout(predicate::str::contains("DENIED"));
    }

    #[test]
    fn test_json_decision() {
        let dir = TempDir::new().unwrap();
        let output = warden_cmd(dir.path())
            .args(["check", "-C", "file.read", "-r", "/data/a", "--json"])
            .output()
            .unwrap();
        assert!(output.status.success());

        let result: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
        assert_eq!(result["decision"], "ALLOWED");
        assert_eq!(result["capability"], "file.read");
    }

    #[test]
    fn test_unknown_capability() {
        let dir = TempDir::new().unwrap();
        warden_cmd(dir.path())
            .args(["check", "-C", "file.teleport", "-r", "/x"])
            .assert()
            .failure();
    }
}
