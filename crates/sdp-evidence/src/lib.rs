//! Append-only hash-chained evidence log.
//!
//! Each significant engine event becomes one JSON line whose `hash` is
//! `SHA-256(prev_hash || canonical(ts, kind, payload))`, where `prev_hash`
//! is the previous record's hash (empty for the first record). Records are
//! never mutated in place; a break anywhere in the chain is tamper-evident
//! in a single linear pass. Repair is a supervised copy of the valid prefix
//! into a fresh file.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use chrono::{SecondsFormat, Utc};
use sdp_error::{ErrorCode, Result, SdpError};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::warn;

// ---------------------------------------------------------------------------
// EvidenceEvent
// ---------------------------------------------------------------------------

/// One record of the evidence chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceEvent {
    /// RFC 3339 UTC timestamp, set at append time.
    pub ts: String,
    /// Event kind, e.g. `ws_completed`, `ci_max_iter`.
    pub kind: String,
    /// Workstream the event concerns, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ws_id: Option<String>,
    /// Feature the event concerns, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feature_id: Option<String>,
    /// Free-form structured payload. Never empty for recovered errors.
    pub payload: serde_json::Value,
    /// Hash of the previous record; empty string for the first record.
    pub prev_hash: String,
    /// `SHA-256(prev_hash || canonical(ts, kind, payload))`, hex-encoded.
    pub hash: String,
}

/// The hashed portion of a record, in fixed field order.
#[derive(Serialize)]
struct HashedFields<'a> {
    ts: &'a str,
    kind: &'a str,
    payload: &'a serde_json::Value,
}

/// Canonical JSON of the hashed fields. Struct serialisation preserves
/// declaration order, so the bytes are platform-independent.
fn canonical(ts: &str, kind: &str, payload: &serde_json::Value) -> String {
    serde_json::to_string(&HashedFields { ts, kind, payload })
        .expect("canonical fields always serialise")
}

/// Compute a record hash from its predecessor's hash and canonical form.
pub fn chain_hash(prev_hash: &str, ts: &str, kind: &str, payload: &serde_json::Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prev_hash.as_bytes());
    hasher.update(canonical(ts, kind, payload).as_bytes());
    hex_encode(&hasher.finalize())
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

// ---------------------------------------------------------------------------
// EvidenceLog
// ---------------------------------------------------------------------------

/// Handle to one feature's evidence chain file.
///
/// Appends are serialised by an in-process mutex (single-writer discipline
/// across processes is enforced by convention, one orchestrator per
/// feature). Each record is fully written and flushed before the new head
/// hash is retained.
#[derive(Debug)]
pub struct EvidenceLog {
    path: PathBuf,
    head: Mutex<String>,
}

impl EvidenceLog {
    /// Open (or create) the chain at `path`, recovering the head hash from
    /// the last record.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(SdpError::from)?;
        }
        let head = match last_line(&path)? {
            Some(line) => {
                let record: EvidenceEvent = serde_json::from_str(&line).map_err(|e| {
                    SdpError::new(
                        ErrorCode::HashChainBroken,
                        format!("unreadable final record: {e}"),
                    )
                    .with_context("file", path.display().to_string())
                })?;
                record.hash
            }
            None => String::new(),
        };
        Ok(Self {
            path,
            head: Mutex::new(head),
        })
    }

    /// Path of the underlying file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current chain head (hash of the last record; empty when the chain is
    /// empty).
    pub fn head(&self) -> String {
        self.head.lock().expect("evidence head lock").clone()
    }

    /// Append one event, durably.
    ///
    /// The record is fully written and flushed to disk before the in-memory
    /// head advances, so a crash mid-append never leaves the head ahead of
    /// the file.
    pub fn append(
        &self,
        kind: &str,
        ws_id: Option<&str>,
        feature_id: Option<&str>,
        payload: serde_json::Value,
    ) -> Result<EvidenceEvent> {
        let mut head = self.head.lock().expect("evidence head lock");
        let ts = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);
        let hash = chain_hash(&head, &ts, kind, &payload);
        let event = EvidenceEvent {
            ts,
            kind: kind.to_string(),
            ws_id: ws_id.map(str::to_string),
            feature_id: feature_id.map(str::to_string),
            payload,
            prev_hash: head.clone(),
            hash: hash.clone(),
        };

        let line = serde_json::to_string(&event)
            .map_err(|e| SdpError::internal(format!("serialise evidence event: {e}")))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(SdpError::from)?;
        writeln!(file, "{line}").map_err(SdpError::from)?;
        file.flush().map_err(SdpError::from)?;
        file.sync_all().map_err(SdpError::from)?;

        *head = hash;
        Ok(event)
    }

    /// Walk the whole file and verify the chain.
    pub fn verify(&self) -> Result<ChainSummary> {
        verify_chain(&self.path)
    }
}

/// Result of a successful chain walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainSummary {
    /// Number of records in the chain.
    pub records: usize,
    /// Hash of the final record; empty for an empty chain.
    pub head: String,
}

/// Walk the chain at `path`, recomputing every hash.
///
/// # Errors
///
/// `HASH_CHAIN_BROKEN` at the first mismatch, with the 1-based line number
/// and record kind in context. A missing file is an empty, intact chain.
pub fn verify_chain(path: &Path) -> Result<ChainSummary> {
    if !path.exists() {
        return Ok(ChainSummary {
            records: 0,
            head: String::new(),
        });
    }
    let file = File::open(path).map_err(SdpError::from)?;
    let mut prev = String::new();
    let mut records = 0usize;

    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(SdpError::from)?;
        if line.trim().is_empty() {
            continue;
        }
        let lineno = idx + 1;
        let record: EvidenceEvent = serde_json::from_str(&line).map_err(|e| {
            SdpError::new(
                ErrorCode::HashChainBroken,
                format!("line {lineno}: unreadable record: {e}"),
            )
            .with_context("line", lineno)
        })?;

        if record.prev_hash != prev {
            return Err(chain_break(lineno, &record, "prev_hash mismatch"));
        }
        let expected = chain_hash(&prev, &record.ts, &record.kind, &record.payload);
        if record.hash != expected {
            return Err(chain_break(lineno, &record, "hash mismatch"));
        }
        prev = record.hash;
        records += 1;
    }

    Ok(ChainSummary {
        records,
        head: prev,
    })
}

fn chain_break(lineno: usize, record: &EvidenceEvent, why: &str) -> SdpError {
    SdpError::new(
        ErrorCode::HashChainBroken,
        format!("line {lineno} ({}): {why}", record.kind),
    )
    .with_context("line", lineno)
    .with_context("kind", record.kind.clone())
}

/// Supervised repair: copy the valid prefix of `src` into `dst`.
///
/// Returns the number of records copied. `dst` must not already exist; the
/// broken suffix stays in `src` for the operator to archive.
pub fn repair_into(src: &Path, dst: &Path) -> Result<usize> {
    if dst.exists() {
        return Err(SdpError::new(
            ErrorCode::IoFailed,
            format!("repair target already exists: {}", dst.display()),
        ));
    }
    let file = File::open(src).map_err(SdpError::from)?;
    let mut out = File::create(dst).map_err(SdpError::from)?;
    let mut prev = String::new();
    let mut copied = 0usize;

    for line in BufReader::new(file).lines() {
        let line = line.map_err(SdpError::from)?;
        if line.trim().is_empty() {
            continue;
        }
        let Ok(record) = serde_json::from_str::<EvidenceEvent>(&line) else {
            break;
        };
        if record.prev_hash != prev
            || record.hash != chain_hash(&prev, &record.ts, &record.kind, &record.payload)
        {
            break;
        }
        writeln!(out, "{line}").map_err(SdpError::from)?;
        prev = record.hash;
        copied += 1;
    }
    out.sync_all().map_err(SdpError::from)?;
    warn!(src = %src.display(), dst = %dst.display(), copied, "evidence chain repaired");
    Ok(copied)
}

fn last_line(path: &Path) -> Result<Option<String>> {
    if !path.exists() {
        return Ok(None);
    }
    let file = File::open(path).map_err(SdpError::from)?;
    let mut last = None;
    for line in BufReader::new(file).lines() {
        let line = line.map_err(SdpError::from)?;
        if !line.trim().is_empty() {
            last = Some(line);
        }
    }
    Ok(last)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
