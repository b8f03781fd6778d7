//! Deeper evidence-chain scenarios: reopen patterns, repair flows, and
//! multi-feature independence.

use sdp_error::ErrorCode;
use sdp_evidence::{EvidenceLog, chain_hash, repair_into, verify_chain};
use serde_json::json;
use tempfile::TempDir;

fn chain_file(tmp: &TempDir, feature: &str) -> std::path::PathBuf {
    tmp.path().join(format!("{feature}.jsonl"))
}

// ── Reopen patterns ─────────────────────────────────────────────────

#[test]
fn many_reopen_cycles_keep_one_linear_chain() {
    let tmp = TempDir::new().unwrap();
    let path = chain_file(&tmp, "F070");

    for cycle in 0..5 {
        let log = EvidenceLog::open(&path).unwrap();
        for i in 0..3 {
            log.append(
                "ws_completed",
                Some("00-070-01"),
                Some("F070"),
                json!({"cycle": cycle, "i": i}),
            )
            .unwrap();
        }
    }

    let summary = verify_chain(&path).unwrap();
    assert_eq!(summary.records, 15);
}

#[test]
fn reopen_after_external_append_still_links() {
    // Another process appended while we were closed; head recovery must
    // pick up the latest record, not a cached one.
    let tmp = TempDir::new().unwrap();
    let path = chain_file(&tmp, "F070");

    let first = EvidenceLog::open(&path).unwrap();
    first.append("a", None, None, json!({})).unwrap();
    drop(first);

    let second = EvidenceLog::open(&path).unwrap();
    second.append("b", None, None, json!({})).unwrap();
    drop(second);

    let third = EvidenceLog::open(&path).unwrap();
    let event = third.append("c", None, None, json!({})).unwrap();
    assert!(!event.prev_hash.is_empty());
    assert_eq!(verify_chain(&path).unwrap().records, 3);
}

#[test]
fn blank_lines_are_tolerated() {
    let tmp = TempDir::new().unwrap();
    let path = chain_file(&tmp, "F070");
    let log = EvidenceLog::open(&path).unwrap();
    log.append("a", None, None, json!({})).unwrap();
    log.append("b", None, None, json!({})).unwrap();

    let raw = std::fs::read_to_string(&path).unwrap();
    std::fs::write(&path, raw.replace('\n', "\n\n")).unwrap();
    assert_eq!(verify_chain(&path).unwrap().records, 2);
}

// ── Multi-feature independence ──────────────────────────────────────

#[test]
fn features_chain_independently() {
    let tmp = TempDir::new().unwrap();
    let f070 = EvidenceLog::open(chain_file(&tmp, "F070")).unwrap();
    let f071 = EvidenceLog::open(chain_file(&tmp, "F071")).unwrap();

    f070.append("a", None, Some("F070"), json!({})).unwrap();
    f071.append("a", None, Some("F071"), json!({})).unwrap();
    f070.append("b", None, Some("F070"), json!({})).unwrap();

    assert_eq!(verify_chain(&chain_file(&tmp, "F070")).unwrap().records, 2);
    assert_eq!(verify_chain(&chain_file(&tmp, "F071")).unwrap().records, 1);

    // Corrupting one feature's chain leaves the other intact.
    let raw = std::fs::read_to_string(chain_file(&tmp, "F070")).unwrap();
    std::fs::write(chain_file(&tmp, "F070"), raw.replace("\"a\"", "\"z\"")).unwrap();
    assert!(verify_chain(&chain_file(&tmp, "F070")).is_err());
    assert!(verify_chain(&chain_file(&tmp, "F071")).is_ok());
}

// ── Repair flows ────────────────────────────────────────────────────

#[test]
fn repaired_chain_accepts_new_appends() {
    let tmp = TempDir::new().unwrap();
    let path = chain_file(&tmp, "F070");
    let log = EvidenceLog::open(&path).unwrap();
    for i in 0..4 {
        log.append("event", None, None, json!({"i": i})).unwrap();
    }
    drop(log);

    // Corrupt the third record.
    let raw = std::fs::read_to_string(&path).unwrap();
    std::fs::write(&path, raw.replacen(r#""i":2"#, r#""i":9"#, 1)).unwrap();
    assert!(verify_chain(&path).is_err());

    let repaired = chain_file(&tmp, "F070.repaired");
    assert_eq!(repair_into(&path, &repaired).unwrap(), 2);

    // The repaired file is a working chain again.
    let log = EvidenceLog::open(&repaired).unwrap();
    log.append("post_repair", None, None, json!({})).unwrap();
    assert_eq!(verify_chain(&repaired).unwrap().records, 3);
}

#[test]
fn repair_of_intact_chain_copies_everything() {
    let tmp = TempDir::new().unwrap();
    let path = chain_file(&tmp, "F070");
    let log = EvidenceLog::open(&path).unwrap();
    for i in 0..3 {
        log.append("event", None, None, json!({"i": i})).unwrap();
    }
    let dst = chain_file(&tmp, "copy");
    assert_eq!(repair_into(&path, &dst).unwrap(), 3);
    assert_eq!(
        verify_chain(&path).unwrap().head,
        verify_chain(&dst).unwrap().head
    );
}

// ── Error detail ────────────────────────────────────────────────────

#[test]
fn break_reports_one_based_line_and_kind() {
    let tmp = TempDir::new().unwrap();
    let path = chain_file(&tmp, "F070");
    let log = EvidenceLog::open(&path).unwrap();
    log.append("first", None, None, json!({"n": 1})).unwrap();
    log.append("second", None, None, json!({"n": 2})).unwrap();

    let raw = std::fs::read_to_string(&path).unwrap();
    std::fs::write(&path, raw.replacen(r#""n":1"#, r#""n":5"#, 1)).unwrap();

    let err = verify_chain(&path).unwrap_err();
    assert_eq!(err.code, ErrorCode::HashChainBroken);
    assert_eq!(err.context["line"], json!(1));
    assert_eq!(err.context["kind"], json!("first"));
    assert!(err.message.contains("line 1"));
    assert!(err.message.contains("first"));
}

#[test]
fn chain_hash_depends_on_every_hashed_field() {
    let payload = json!({"x": 1});
    let base = chain_hash("prev", "2026-01-01T00:00:00Z", "kind", &payload);
    assert_ne!(base, chain_hash("other", "2026-01-01T00:00:00Z", "kind", &payload));
    assert_ne!(base, chain_hash("prev", "2026-01-01T00:00:01Z", "kind", &payload));
    assert_ne!(base, chain_hash("prev", "2026-01-01T00:00:00Z", "other", &payload));
    assert_ne!(
        base,
        chain_hash("prev", "2026-01-01T00:00:00Z", "kind", &json!({"x": 2}))
    );
}
