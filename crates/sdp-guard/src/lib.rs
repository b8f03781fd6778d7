//! Activation-scoped edit authorisation.
//!
//! The guard is cooperative, not a sandbox: agents consult
//! [`Guard::check`] before editing, and the retrospective
//! [`check_scope`](scope_check::check_scope) inspects what a commit
//! actually touched. Guard state lives per worktree under
//! `.sdp/guard.json` and is created by `activate`, cleared only by an
//! explicit `deactivate`.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod allowlist;
mod findings;
mod scope_check;

pub use allowlist::Allowlist;
pub use findings::{Finding, FindingStatus, FindingsStore, Priority};
pub use scope_check::{ScopeReport, check_scope};

use chrono::{SecondsFormat, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use sdp_config::SdpPaths;
use sdp_error::{ErrorCode, Result, SdpError};
use sdp_workstream::{WorkstreamId, parse_descriptor_file};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use tracing::info;

// ---------------------------------------------------------------------------
// Decision
// ---------------------------------------------------------------------------

/// Outcome of an authorisation check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    /// Whether the edit is permitted.
    pub allowed: bool,
    /// Why it was blocked (or allowed via the allowlist).
    pub reason: Option<String>,
}

impl Decision {
    /// Permit without commentary.
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    /// Permit, noting why.
    pub fn allow_because(reason: impl Into<String>) -> Self {
        Self {
            allowed: true,
            reason: Some(reason.into()),
        }
    }

    /// Block, with the reason.
    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Scope matching
// ---------------------------------------------------------------------------

/// Compiled scope patterns: literal paths, basenames, then globs, first
/// match wins.
#[derive(Debug, Clone)]
pub struct ScopeMatcher {
    literals: BTreeSet<String>,
    basenames: BTreeSet<String>,
    globs: Option<GlobSet>,
}

impl ScopeMatcher {
    /// Compile scope patterns. Patterns containing glob metacharacters also
    /// join the glob set.
    pub fn compile(patterns: &[String]) -> Result<Self> {
        let mut literals = BTreeSet::new();
        let mut basenames = BTreeSet::new();
        let mut builder = GlobSetBuilder::new();
        let mut has_globs = false;

        for pattern in patterns {
            literals.insert(pattern.clone());
            if let Some(name) = Path::new(pattern).file_name().and_then(|n| n.to_str()) {
                basenames.insert(name.to_string());
            }
            if pattern.contains(['*', '?', '[', '{']) {
                builder.add(Glob::new(pattern).map_err(|e| {
                    SdpError::new(
                        ErrorCode::FrontmatterInvalid,
                        format!("invalid scope glob '{pattern}': {e}"),
                    )
                })?);
                has_globs = true;
            }
        }

        let globs = if has_globs {
            Some(builder.build().map_err(|e| {
                SdpError::new(ErrorCode::FrontmatterInvalid, format!("compile scope globs: {e}"))
            })?)
        } else {
            None
        };

        Ok(Self {
            literals,
            basenames,
            globs,
        })
    }

    /// Whether `file` matches: literal path, basename, or glob, in that
    /// order.
    pub fn matches(&self, file: &str) -> bool {
        if self.literals.contains(file) {
            return true;
        }
        if let Some(name) = Path::new(file).file_name().and_then(|n| n.to_str()) {
            if self.basenames.contains(name) {
                return true;
            }
        }
        self.globs.as_ref().is_some_and(|g| g.is_match(file))
    }
}

// ---------------------------------------------------------------------------
// Guard state
// ---------------------------------------------------------------------------

/// Persisted guard state, one per worktree while a workstream is active.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardState {
    /// Workstream the guard is active for.
    pub active_ws: WorkstreamId,
    /// Scope patterns from the workstream descriptor.
    pub scope_patterns: Vec<String>,
    /// RFC 3339 UTC activation time.
    pub activated_at: String,
}

/// The per-worktree guard.
#[derive(Debug, Clone)]
pub struct Guard {
    paths: SdpPaths,
}

impl Guard {
    /// Guard rooted at a project layout.
    pub fn new(paths: SdpPaths) -> Self {
        Self { paths }
    }

    /// Activate the guard for a workstream.
    ///
    /// Parses the workstream descriptor for its scope files and writes the
    /// state file.
    ///
    /// # Errors
    ///
    /// `GUARD_ALREADY_ACTIVE` when a state file exists: a previous
    /// activation must be ended with an explicit [`Guard::deactivate`].
    pub fn activate(&self, ws_id: &WorkstreamId) -> Result<GuardState> {
        let doc = parse_descriptor_file(&self.paths.descriptor_file(ws_id.as_str()))?;
        self.activate_with(ws_id, doc.scope_files)
    }

    /// Activate with already-parsed scope patterns (orchestrator path: the
    /// descriptor is in hand, no re-parse).
    pub fn activate_with(
        &self,
        ws_id: &WorkstreamId,
        scope_patterns: Vec<String>,
    ) -> Result<GuardState> {
        let state_file = self.paths.guard_file();
        if state_file.exists() {
            let holder = self
                .status()?
                .map(|s| s.active_ws.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            return Err(SdpError::new(
                ErrorCode::GuardAlreadyActive,
                format!("guard already active for {holder}; deactivate it first"),
            )
            .with_context("active_ws", holder));
        }

        // Compile now so bad globs surface at activation, not at check time.
        ScopeMatcher::compile(&scope_patterns)?;

        let state = GuardState {
            active_ws: ws_id.clone(),
            scope_patterns,
            activated_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        };
        if let Some(parent) = state_file.parent() {
            std::fs::create_dir_all(parent).map_err(SdpError::from)?;
        }
        let json = serde_json::to_string_pretty(&state)
            .map_err(|e| SdpError::internal(format!("serialise guard state: {e}")))?;
        std::fs::write(&state_file, format!("{json}\n")).map_err(SdpError::from)?;
        info!(ws_id = %ws_id, "guard activated");
        Ok(state)
    }

    /// Current guard state, if any.
    pub fn status(&self) -> Result<Option<GuardState>> {
        let state_file = self.paths.guard_file();
        if !state_file.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&state_file).map_err(SdpError::from)?;
        let state = serde_json::from_str(&raw).map_err(|e| {
            SdpError::new(
                ErrorCode::Internal,
                format!("unreadable guard state: {e}"),
            )
            .with_context("file", state_file.display().to_string())
        })?;
        Ok(Some(state))
    }

    /// Authorise an edit to `file` under the active guard.
    ///
    /// # Errors
    ///
    /// `GUARD_NOT_ACTIVE` when no guard state exists.
    pub fn check(&self, file: &str) -> Result<Decision> {
        let state = self.status()?.ok_or_else(|| {
            SdpError::new(
                ErrorCode::GuardNotActive,
                "no active guard; activate a workstream first",
            )
        })?;
        let matcher = ScopeMatcher::compile(&state.scope_patterns)?;
        if matcher.matches(file) {
            return Ok(Decision::allow());
        }
        let allowlist = Allowlist::load(&self.paths)?;
        if allowlist.matches(file) {
            return Ok(Decision::allow_because(format!(
                "'{file}' is allowlisted (outside workstream scope)"
            )));
        }
        Ok(Decision::deny(format!(
            "'{file}' is outside the scope of {}",
            state.active_ws
        )))
    }

    /// Remove the guard state.
    ///
    /// # Errors
    ///
    /// `GUARD_NOT_ACTIVE` when no guard state exists.
    pub fn deactivate(&self) -> Result<GuardState> {
        let state = self.status()?.ok_or_else(|| {
            SdpError::new(ErrorCode::GuardNotActive, "no active guard to deactivate")
        })?;
        std::fs::remove_file(self.paths.guard_file()).map_err(SdpError::from)?;
        info!(ws_id = %state.active_ws, "guard deactivated");
        Ok(state)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const DESCRIPTOR: &str = "---\nws_id: 00-070-01\ntitle: Guard work\nstatus: open\nfeature_id: F070\ncoverage_threshold: 80\n---\n\n## Scope Files\n\n- `internal/guard/scope_check.go`\n- `internal/guard/*_test.go`\n\n## Verification Commands\n\n- `go test ./internal/guard/...`\n";

    fn fixture() -> (TempDir, Guard, WorkstreamId) {
        let tmp = TempDir::new().unwrap();
        let paths = SdpPaths::new(tmp.path());
        paths.init_scaffold().unwrap();
        std::fs::write(paths.descriptor_file("00-070-01"), DESCRIPTOR).unwrap();
        let ws = WorkstreamId::parse("00-070-01").unwrap();
        (tmp, Guard::new(paths), ws)
    }

    #[test]
    fn activate_writes_state_from_descriptor() {
        let (_tmp, guard, ws) = fixture();
        let state = guard.activate(&ws).unwrap();
        assert_eq!(state.active_ws, ws);
        assert_eq!(state.scope_patterns.len(), 2);
        assert_eq!(guard.status().unwrap().unwrap(), state);
    }

    #[test]
    fn double_activation_is_refused() {
        let (_tmp, guard, ws) = fixture();
        guard.activate(&ws).unwrap();
        let err = guard.activate(&ws).unwrap_err();
        assert_eq!(err.code, ErrorCode::GuardAlreadyActive);
    }

    #[test]
    fn deactivate_then_activate_again() {
        let (_tmp, guard, ws) = fixture();
        guard.activate(&ws).unwrap();
        guard.deactivate().unwrap();
        assert!(guard.status().unwrap().is_none());
        guard.activate(&ws).unwrap();
    }

    #[test]
    fn deactivate_without_state_fails() {
        let (_tmp, guard, _ws) = fixture();
        let err = guard.deactivate().unwrap_err();
        assert_eq!(err.code, ErrorCode::GuardNotActive);
    }

    #[test]
    fn check_allows_scope_and_blocks_the_rest() {
        let (_tmp, guard, ws) = fixture();
        guard.activate(&ws).unwrap();

        assert!(guard.check("internal/guard/scope_check.go").unwrap().allowed);
        // Basename match.
        assert!(guard.check("elsewhere/scope_check.go").unwrap().allowed);
        // Glob match.
        assert!(guard.check("internal/guard/state_test.go").unwrap().allowed);

        let blocked = guard.check("cmd/other/main.go").unwrap();
        assert!(!blocked.allowed);
        assert!(blocked.reason.unwrap().contains("00-070-01"));
    }

    #[test]
    fn check_without_active_guard_fails() {
        let (_tmp, guard, _ws) = fixture();
        let err = guard.check("internal/guard/scope_check.go").unwrap_err();
        assert_eq!(err.code, ErrorCode::GuardNotActive);
    }

    #[test]
    fn allowlisted_files_pass_with_reason() {
        let (_tmp, guard, ws) = fixture();
        guard.activate(&ws).unwrap();
        let decision = guard.check("go.mod").unwrap();
        assert!(decision.allowed);
        assert!(decision.reason.unwrap().contains("allowlisted"));
    }

    #[test]
    fn matcher_order_is_literal_basename_glob() {
        let m = ScopeMatcher::compile(&[
            "src/exact.rs".to_string(),
            "named.rs".to_string(),
            "tests/**/*.rs".to_string(),
        ])
        .unwrap();
        assert!(m.matches("src/exact.rs"));
        assert!(m.matches("deep/dir/named.rs"));
        assert!(m.matches("tests/unit/parser.rs"));
        assert!(!m.matches("src/other.rs"));
    }

    #[test]
    fn bad_glob_fails_at_activation() {
        let (tmp, guard, _ws) = fixture();
        let paths = SdpPaths::new(tmp.path());
        let bad = DESCRIPTOR.replace("internal/guard/*_test.go", "bad[glob");
        std::fs::write(paths.descriptor_file("00-070-02"), bad.replace("00-070-01", "00-070-02"))
            .unwrap();
        let ws2 = WorkstreamId::parse("00-070-02").unwrap();
        assert!(guard.activate(&ws2).is_err());
        // No half-written state.
        assert!(guard.status().unwrap().is_none());
    }
}
