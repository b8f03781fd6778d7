//! Review findings: structured review notes with blocking semantics.
//!
//! Findings are orthogonal to scope: reviewers append them during or after
//! execution, and any open finding at P0 or P1 blocks deployment gates
//! until explicitly resolved.

use sdp_config::SdpPaths;
use sdp_error::{ErrorCode, Result, SdpError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

/// Review priority. P0 and P1 findings block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Priority {
    /// Must fix immediately; release-blocking defect.
    P0,
    /// Must fix before the feature ships.
    P1,
    /// Should fix; not blocking.
    P2,
    /// Nice to have.
    P3,
}

impl Priority {
    /// Whether an open finding at this priority blocks deployment gates.
    pub fn is_blocking(self) -> bool {
        self <= Priority::P1
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::P0 => "P0",
            Self::P1 => "P1",
            Self::P2 => "P2",
            Self::P3 => "P3",
        };
        f.write_str(s)
    }
}

/// Resolution state of a finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingStatus {
    /// Not yet addressed.
    Open,
    /// Addressed and confirmed.
    Resolved,
}

/// One structured review finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    /// Stable identifier.
    pub id: Uuid,
    /// Feature the finding belongs to.
    pub feature: String,
    /// Area of the codebase or process.
    pub area: String,
    /// One-line summary.
    pub title: String,
    /// Review priority.
    pub priority: Priority,
    /// Reference into the external issue tracker, if filed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub beads_ref: Option<String>,
    /// Resolution state.
    pub status: FindingStatus,
}

/// JSON-file-backed findings store at `.sdp/findings.json`.
#[derive(Debug, Clone)]
pub struct FindingsStore {
    file: PathBuf,
}

impl FindingsStore {
    /// Store for a project layout.
    pub fn new(paths: &SdpPaths) -> Self {
        Self {
            file: paths.findings_file(),
        }
    }

    /// Append a new open finding and return it.
    pub fn add(
        &self,
        feature: &str,
        area: &str,
        title: &str,
        priority: Priority,
        beads_ref: Option<String>,
    ) -> Result<Finding> {
        let finding = Finding {
            id: Uuid::new_v4(),
            feature: feature.to_string(),
            area: area.to_string(),
            title: title.to_string(),
            priority,
            beads_ref,
            status: FindingStatus::Open,
        };
        let mut all = self.load()?;
        all.push(finding.clone());
        self.save(&all)?;
        Ok(finding)
    }

    /// Resolve a finding by id (full or unambiguous prefix).
    pub fn resolve(&self, id: &str) -> Result<Finding> {
        let mut all = self.load()?;
        let mut matches: Vec<usize> = all
            .iter()
            .enumerate()
            .filter(|(_, f)| f.id.to_string().starts_with(id))
            .map(|(i, _)| i)
            .collect();
        let idx = match (matches.len(), matches.pop()) {
            (1, Some(idx)) => idx,
            (0, _) => {
                return Err(SdpError::new(
                    ErrorCode::Internal,
                    format!("no finding matches id '{id}'"),
                ));
            }
            _ => {
                return Err(SdpError::new(
                    ErrorCode::Internal,
                    format!("finding id '{id}' is ambiguous"),
                ));
            }
        };
        all[idx].status = FindingStatus::Resolved;
        let resolved = all[idx].clone();
        self.save(&all)?;
        Ok(resolved)
    }

    /// All findings (`all = true`) or only the open ones.
    pub fn list(&self, all: bool) -> Result<Vec<Finding>> {
        let findings = self.load()?;
        Ok(if all {
            findings
        } else {
            findings
                .into_iter()
                .filter(|f| f.status == FindingStatus::Open)
                .collect()
        })
    }

    /// Remove every finding.
    pub fn clear(&self) -> Result<()> {
        match std::fs::remove_file(&self.file) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SdpError::from(e)),
        }
    }

    /// Whether any open blocking (P0/P1) finding exists for `feature`.
    pub fn has_blocking(&self, feature: &str) -> Result<bool> {
        Ok(self.load()?.iter().any(|f| {
            f.feature == feature && f.status == FindingStatus::Open && f.priority.is_blocking()
        }))
    }

    fn load(&self) -> Result<Vec<Finding>> {
        if !self.file.exists() {
            return Ok(Vec::new());
        }
        let raw = std::fs::read_to_string(&self.file).map_err(SdpError::from)?;
        serde_json::from_str(&raw).map_err(|e| {
            SdpError::new(ErrorCode::Internal, format!("unreadable findings store: {e}"))
                .with_context("file", self.file.display().to_string())
        })
    }

    fn save(&self, findings: &[Finding]) -> Result<()> {
        if let Some(parent) = self.file.parent() {
            std::fs::create_dir_all(parent).map_err(SdpError::from)?;
        }
        let json = serde_json::to_string_pretty(findings)
            .map_err(|e| SdpError::internal(format!("serialise findings: {e}")))?;
        let tmp = self.file.with_extension("json.tmp");
        std::fs::write(&tmp, format!("{json}\n")).map_err(SdpError::from)?;
        std::fs::rename(&tmp, &self.file).map_err(SdpError::from)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, FindingsStore) {
        let tmp = TempDir::new().unwrap();
        let paths = SdpPaths::new(tmp.path());
        paths.init_scaffold().unwrap();
        let store = FindingsStore::new(&paths);
        (tmp, store)
    }

    #[test]
    fn add_and_list() {
        let (_tmp, store) = store();
        store
            .add("F070", "guard", "scope check misses renames", Priority::P1, None)
            .unwrap();
        store
            .add("F070", "docs", "missing example", Priority::P3, None)
            .unwrap();

        let open = store.list(false).unwrap();
        assert_eq!(open.len(), 2);
    }

    #[test]
    fn blocking_follows_priority_and_status() {
        let (_tmp, store) = store();
        assert!(!store.has_blocking("F070").unwrap());

        let p3 = store
            .add("F070", "docs", "typo", Priority::P3, None)
            .unwrap();
        assert!(!store.has_blocking("F070").unwrap());

        let p1 = store
            .add("F070", "guard", "unsound check", Priority::P1, None)
            .unwrap();
        assert!(store.has_blocking("F070").unwrap());
        // A different feature is unaffected.
        assert!(!store.has_blocking("F071").unwrap());

        store.resolve(&p1.id.to_string()).unwrap();
        assert!(!store.has_blocking("F070").unwrap());
        let _ = p3;
    }

    #[test]
    fn resolve_by_prefix() {
        let (_tmp, store) = store();
        let f = store
            .add("F070", "guard", "x", Priority::P0, None)
            .unwrap();
        let prefix = &f.id.to_string()[..8];
        let resolved = store.resolve(prefix).unwrap();
        assert_eq!(resolved.id, f.id);
        assert_eq!(resolved.status, FindingStatus::Resolved);

        let open = store.list(false).unwrap();
        assert!(open.is_empty());
        let all = store.list(true).unwrap();
        assert_eq!(all.len(), 1);
    }

    #[test]
    fn resolve_unknown_id_fails() {
        let (_tmp, store) = store();
        assert!(store.resolve("deadbeef").is_err());
    }

    #[test]
    fn clear_is_idempotent() {
        let (_tmp, store) = store();
        store
            .add("F070", "guard", "x", Priority::P2, None)
            .unwrap();
        store.clear().unwrap();
        store.clear().unwrap();
        assert!(store.list(true).unwrap().is_empty());
    }

    #[test]
    fn beads_ref_roundtrips() {
        let (_tmp, store) = store();
        store
            .add("F070", "ci", "flaky test", Priority::P2, Some("bd-123".into()))
            .unwrap();
        let all = store.list(true).unwrap();
        assert_eq!(all[0].beads_ref.as_deref(), Some("bd-123"));
    }
}
