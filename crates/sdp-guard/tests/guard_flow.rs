//! End-to-end guard flows: activation discipline, edit authorisation, and
//! the interaction between findings and blocking semantics.

use sdp_config::SdpPaths;
use sdp_error::ErrorCode;
use sdp_guard::{FindingStatus, FindingsStore, Guard, Priority};
use sdp_workstream::WorkstreamId;
use tempfile::TempDir;

const DESCRIPTOR_A: &str = "---\nws_id: 00-070-01\ntitle: Parser work\nstatus: open\nfeature_id: F070\ncoverage_threshold: 80\n---\n\n## Scope Files\n\n- `src/parser.rs`\n- `src/parser_tests.rs`\n\n## Verification Commands\n\n- `cargo test -p parser`\n";

const DESCRIPTOR_B: &str = "---\nws_id: 00-070-02\ntitle: Store work\nstatus: open\nfeature_id: F070\ncoverage_threshold: 80\n---\n\n## Scope Files\n\n- `src/store.rs`\n- `migrations/*.sql`\n\n## Verification Commands\n\n- `cargo test -p store`\n";

fn fixture() -> (TempDir, SdpPaths, Guard) {
    let tmp = TempDir::new().unwrap();
    let paths = SdpPaths::new(tmp.path());
    paths.init_scaffold().unwrap();
    std::fs::write(paths.descriptor_file("00-070-01"), DESCRIPTOR_A).unwrap();
    std::fs::write(paths.descriptor_file("00-070-02"), DESCRIPTOR_B).unwrap();
    let guard = Guard::new(paths.clone());
    (tmp, paths, guard)
}

fn ws(id: &str) -> WorkstreamId {
    WorkstreamId::parse(id).unwrap()
}

// ── Activation discipline ───────────────────────────────────────────

#[test]
fn switching_workstreams_requires_explicit_deactivation() {
    let (_tmp, _paths, guard) = fixture();

    guard.activate(&ws("00-070-01")).unwrap();
    let err = guard.activate(&ws("00-070-02")).unwrap_err();
    assert_eq!(err.code, ErrorCode::GuardAlreadyActive);
    // The error names the holder so the operator knows what to deactivate.
    assert!(err.message.contains("00-070-01"));

    guard.deactivate().unwrap();
    guard.activate(&ws("00-070-02")).unwrap();
    let state = guard.status().unwrap().unwrap();
    assert_eq!(state.active_ws.as_str(), "00-070-02");
}

#[test]
fn activation_fails_for_missing_descriptor() {
    let (_tmp, _paths, guard) = fixture();
    let err = guard.activate(&ws("00-070-09")).unwrap_err();
    assert_eq!(err.code, ErrorCode::IoFailed);
    assert!(guard.status().unwrap().is_none());
}

#[test]
fn state_survives_process_restart() {
    // A fresh Guard over the same layout sees the persisted state.
    let (_tmp, paths, guard) = fixture();
    guard.activate(&ws("00-070-01")).unwrap();

    let second = Guard::new(paths);
    let state = second.status().unwrap().unwrap();
    assert_eq!(state.active_ws.as_str(), "00-070-01");
    assert!(second.check("src/parser.rs").unwrap().allowed);
    second.deactivate().unwrap();
    assert!(guard.status().unwrap().is_none());
}

// ── Edit authorisation ──────────────────────────────────────────────

#[test]
fn scope_of_the_active_workstream_governs_checks() {
    let (_tmp, _paths, guard) = fixture();
    guard.activate(&ws("00-070-01")).unwrap();

    assert!(guard.check("src/parser.rs").unwrap().allowed);
    // 00-070-02's scope does not leak into 00-070-01's activation.
    let blocked = guard.check("src/store.rs").unwrap();
    assert!(!blocked.allowed);

    guard.deactivate().unwrap();
    guard.activate(&ws("00-070-02")).unwrap();
    assert!(guard.check("src/store.rs").unwrap().allowed);
    assert!(guard.check("migrations/0001_init.sql").unwrap().allowed);
    assert!(!guard.check("src/parser.rs").unwrap().allowed);
}

#[test]
fn allowlist_extends_scope_with_a_warning_reason() {
    let (_tmp, paths, guard) = fixture();
    std::fs::write(
        paths.allowlist_file(),
        "allow:\n  - docs/CHANGELOG.md\n",
    )
    .unwrap();
    guard.activate(&ws("00-070-01")).unwrap();

    let lockfile = guard.check("Cargo.lock").unwrap();
    assert!(lockfile.allowed);
    assert!(lockfile.reason.unwrap().contains("allowlisted"));

    let custom = guard.check("docs/CHANGELOG.md").unwrap();
    assert!(custom.allowed);

    let other = guard.check("docs/adr/0001.md").unwrap();
    assert!(!other.allowed);
}

// ── Findings & blocking ─────────────────────────────────────────────

#[test]
fn blocking_is_per_feature_and_per_priority() {
    let (_tmp, paths, _guard) = fixture();
    let store = FindingsStore::new(&paths);

    store
        .add("F070", "parser", "panics on empty input", Priority::P0, None)
        .unwrap();
    store
        .add("F070", "docs", "stale example", Priority::P3, None)
        .unwrap();
    store
        .add("F071", "store", "slow query", Priority::P1, None)
        .unwrap();

    assert!(store.has_blocking("F070").unwrap());
    assert!(store.has_blocking("F071").unwrap());
    assert!(!store.has_blocking("F072").unwrap());
}

#[test]
fn resolving_the_last_blocker_unblocks_the_feature() {
    let (_tmp, paths, _guard) = fixture();
    let store = FindingsStore::new(&paths);
    let a = store
        .add("F070", "parser", "first", Priority::P0, None)
        .unwrap();
    let b = store
        .add("F070", "parser", "second", Priority::P1, None)
        .unwrap();

    store.resolve(&a.id.to_string()).unwrap();
    assert!(store.has_blocking("F070").unwrap());
    store.resolve(&b.id.to_string()).unwrap();
    assert!(!store.has_blocking("F070").unwrap());

    // Resolved findings stay in the full listing for the audit trail.
    let all = store.list(true).unwrap();
    assert_eq!(all.len(), 2);
    assert!(all.iter().all(|f| f.status == FindingStatus::Resolved));
}

#[test]
fn ambiguous_resolve_prefix_is_refused() {
    let (_tmp, paths, _guard) = fixture();
    let store = FindingsStore::new(&paths);
    store.add("F070", "a", "one", Priority::P2, None).unwrap();
    store.add("F070", "b", "two", Priority::P2, None).unwrap();

    // The empty prefix matches everything.
    let err = store.resolve("").unwrap_err();
    assert!(err.message.contains("ambiguous"));
}
