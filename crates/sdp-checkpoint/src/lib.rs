//! Atomic per-feature checkpoint persistence.
//!
//! A checkpoint is the resumable state of an in-flight feature. Saves go
//! through write-temp-then-rename, so a crash mid-save leaves the previous
//! checkpoint intact. There is no cross-process locking; running two
//! orchestrators against one feature is a user error. A corrupt checkpoint
//! is treated as absent (the operator is told to back it up and
//! reinitialise) rather than wedging resume forever.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use chrono::{SecondsFormat, Utc};
use sdp_error::{ErrorCode, Result, SdpError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

// ---------------------------------------------------------------------------
// Checkpoint
// ---------------------------------------------------------------------------

/// Lifecycle status of a feature run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureStatus {
    /// Workstreams are still executing.
    InProgress,
    /// Every workstream completed.
    Completed,
    /// A workstream failed non-retryably.
    Failed,
    /// A workstream is blocked on incomplete dependencies.
    Blocked,
}

/// Pipeline phase a feature is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Workstream execution.
    Execution,
    /// Post-push CI supervision.
    Ci,
}

/// Resumable state of an in-flight feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Feature this checkpoint belongs to.
    pub feature_id: String,
    /// Identity of the driving agent or operator.
    pub agent_id: String,
    /// Current run status.
    pub status: FeatureStatus,
    /// Workstreams that completed, in completion order. Append-only within
    /// a run; resume treats members as no-ops.
    pub completed_ws: Vec<String>,
    /// Workstreams that failed non-retryably.
    pub failed_ws: Vec<String>,
    /// Topological execution order pinned at run start. Never recomputed on
    /// resume.
    pub execution_order: Vec<String>,
    /// RFC 3339 UTC start time.
    pub started_at: String,
    /// RFC 3339 UTC time of the last save.
    pub last_updated: String,
    /// Branch the feature is developed on.
    pub branch: String,
    /// Current pipeline phase.
    pub phase: Phase,
    /// Pull request under CI supervision, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pr_number: Option<u64>,
}

impl Checkpoint {
    /// Fresh checkpoint for a feature with a pinned execution order.
    pub fn new(
        feature_id: &str,
        agent_id: &str,
        branch: &str,
        execution_order: Vec<String>,
    ) -> Self {
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        Self {
            feature_id: feature_id.to_string(),
            agent_id: agent_id.to_string(),
            status: FeatureStatus::InProgress,
            completed_ws: Vec::new(),
            failed_ws: Vec::new(),
            execution_order,
            started_at: now.clone(),
            last_updated: now,
            branch: branch.to_string(),
            phase: Phase::Execution,
            pr_number: None,
        }
    }

    /// Record a completion, preserving `completed_ws ∩ failed_ws = ∅`.
    pub fn mark_completed(&mut self, ws_id: &str) {
        if !self.completed_ws.iter().any(|w| w == ws_id) {
            self.completed_ws.push(ws_id.to_string());
        }
        self.failed_ws.retain(|w| w != ws_id);
    }

    /// Record a non-retryable failure.
    pub fn mark_failed(&mut self, ws_id: &str) {
        if !self.failed_ws.iter().any(|w| w == ws_id) && !self.completed_ws.iter().any(|w| w == ws_id)
        {
            self.failed_ws.push(ws_id.to_string());
        }
    }

    /// Whether a workstream already completed (resume no-op check).
    pub fn is_completed(&self, ws_id: &str) -> bool {
        self.completed_ws.iter().any(|w| w == ws_id)
    }

    /// The disjointness invariant between completed and failed sets.
    pub fn invariant_holds(&self) -> bool {
        !self
            .completed_ws
            .iter()
            .any(|w| self.failed_ws.contains(w))
    }
}

// ---------------------------------------------------------------------------
// CheckpointStore
// ---------------------------------------------------------------------------

/// Store of per-feature checkpoints under `.sdp/checkpoints/`.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    /// Store rooted at the checkpoints directory.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Path of a feature's checkpoint file.
    pub fn path_for(&self, feature_id: &str) -> PathBuf {
        self.dir.join(format!("{feature_id}.json"))
    }

    /// Load a feature's checkpoint.
    ///
    /// Returns `Ok(None)` when the file is absent, or corrupt, in which
    /// case a warning instructs the operator to back the file up and
    /// reinitialise. Tolerates the brief absence window during a concurrent
    /// rename with one short bounded retry.
    pub fn load(&self, feature_id: &str) -> Result<Option<Checkpoint>> {
        let path = self.path_for(feature_id);
        let raw = match read_with_rename_tolerance(&path)? {
            Some(raw) => raw,
            None => return Ok(None),
        };
        match serde_json::from_str::<Checkpoint>(&raw) {
            Ok(cp) if cp.invariant_holds() => Ok(Some(cp)),
            Ok(_) => {
                warn!(
                    file = %path.display(),
                    code = ErrorCode::CheckpointCorrupted.as_str(),
                    "checkpoint violates completed/failed disjointness; back it up and reinitialise"
                );
                Ok(None)
            }
            Err(e) => {
                warn!(
                    file = %path.display(),
                    code = ErrorCode::CheckpointCorrupted.as_str(),
                    error = %e,
                    "corrupt checkpoint treated as absent; back it up and reinitialise"
                );
                Ok(None)
            }
        }
    }

    /// Persist a checkpoint atomically, refreshing `last_updated`.
    pub fn save(&self, checkpoint: &mut Checkpoint) -> Result<PathBuf> {
        if !checkpoint.invariant_holds() {
            return Err(SdpError::new(
                ErrorCode::CheckpointCorrupted,
                "refusing to persist: completed_ws and failed_ws intersect",
            )
            .with_context("feature_id", checkpoint.feature_id.clone()));
        }
        std::fs::create_dir_all(&self.dir).map_err(SdpError::from)?;
        checkpoint.last_updated = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);

        let path = self.path_for(&checkpoint.feature_id);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(checkpoint)
            .map_err(|e| SdpError::internal(format!("serialise checkpoint: {e}")))?;
        std::fs::write(&tmp, format!("{json}\n")).map_err(SdpError::from)?;
        std::fs::rename(&tmp, &path).map_err(SdpError::from)?;
        Ok(path)
    }

    /// Remove a feature's checkpoint (re-plan).
    pub fn delete(&self, feature_id: &str) -> Result<bool> {
        let path = self.path_for(feature_id);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(SdpError::from(e)),
        }
    }
}

/// Read a file, retrying once after a short delay if it is absent (rename
/// window on some filesystems).
fn read_with_rename_tolerance(path: &Path) -> Result<Option<String>> {
    for attempt in 0..2 {
        match std::fs::read_to_string(path) {
            Ok(raw) => return Ok(Some(raw)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if attempt == 0 && path.with_extension("json.tmp").exists() {
                    std::thread::sleep(std::time::Duration::from_millis(25));
                    continue;
                }
                return Ok(None);
            }
            Err(e) => return Err(SdpError::from(e)),
        }
    }
    Ok(None)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
