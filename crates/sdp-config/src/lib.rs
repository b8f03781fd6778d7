//! Configuration, filesystem layout, and timeout resolution.
//!
//! Everything the engine persists lives under `.sdp/` at the project root;
//! [`SdpPaths`] is the single source of truth for that layout. Runtime
//! settings come from `.sdp/config.yaml` ([`SdpConfig`]), with timeouts
//! resolved in the precedence per-call parameter → config file →
//! `SDP_TIMEOUT_*` environment variable → hard-coded default.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod timeout;

pub use timeout::{TimeoutCategory, parse_duration, resolve_timeout};

use sdp_error::{ErrorCode, Result, SdpError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Name of the per-project state directory.
pub const SDP_DIR: &str = ".sdp";

/// Where workstream descriptors live, relative to the project root.
pub const BACKLOG_DIR: &str = "docs/workstreams/backlog";

// ---------------------------------------------------------------------------
// Project root discovery
// ---------------------------------------------------------------------------

/// Walk up from `start` looking for a directory containing `.sdp/` or `.git`.
///
/// `.sdp` wins over `.git` at the same level; worktrees carry a `.git` file
/// rather than a directory, which also counts.
pub fn find_project_root(start: &Path) -> Result<PathBuf> {
    let mut dir = if start.is_absolute() {
        start.to_path_buf()
    } else {
        std::env::current_dir()
            .map_err(SdpError::from)?
            .join(start)
    };
    loop {
        if dir.join(SDP_DIR).is_dir() || dir.join(".git").exists() {
            return Ok(dir);
        }
        if !dir.pop() {
            return Err(SdpError::new(
                ErrorCode::ToolMissing,
                "not inside a project: no .sdp or .git found in any ancestor",
            )
            .with_context("start", start.display().to_string()));
        }
    }
}

// ---------------------------------------------------------------------------
// Filesystem layout
// ---------------------------------------------------------------------------

/// The `.sdp/` filesystem layout, derived from a project root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdpPaths {
    /// Project root this layout is rooted at.
    pub root: PathBuf,
}

impl SdpPaths {
    /// Layout rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The `.sdp/` directory itself.
    pub fn sdp_dir(&self) -> PathBuf {
        self.root.join(SDP_DIR)
    }

    /// Optional runtime configuration.
    pub fn config_file(&self) -> PathBuf {
        self.sdp_dir().join("config.yaml")
    }

    /// Per-active-workstream guard state; absent when no guard is active.
    pub fn guard_file(&self) -> PathBuf {
        self.sdp_dir().join("guard.json")
    }

    /// Optional guard allowlist.
    pub fn allowlist_file(&self) -> PathBuf {
        self.sdp_dir().join("guard-allowlist.yaml")
    }

    /// Review findings store.
    pub fn findings_file(&self) -> PathBuf {
        self.sdp_dir().join("findings.json")
    }

    /// Session pin inside a worktree rooted at `worktree`.
    pub fn session_file_in(worktree: &Path) -> PathBuf {
        worktree.join(SDP_DIR).join("session.json")
    }

    /// Session pin of this root (when the root is itself a worktree).
    pub fn session_file(&self) -> PathBuf {
        Self::session_file_in(&self.root)
    }

    /// Directory of per-feature checkpoints.
    pub fn checkpoints_dir(&self) -> PathBuf {
        self.sdp_dir().join("checkpoints")
    }

    /// Directory of per-workstream verdict artifacts.
    pub fn verdicts_dir(&self) -> PathBuf {
        self.sdp_dir().join("ws-verdicts")
    }

    /// Directory of per-feature evidence chains.
    pub fn evidence_dir(&self) -> PathBuf {
        self.sdp_dir().join("evidence")
    }

    /// Evidence chain for one feature.
    pub fn evidence_file(&self, feature_id: &str) -> PathBuf {
        self.evidence_dir().join(format!("{feature_id}.jsonl"))
    }

    /// Directory of per-feature run logs (CI-loop decisions).
    pub fn runs_dir(&self) -> PathBuf {
        self.sdp_dir().join("runs")
    }

    /// Run log for one feature.
    pub fn runs_file(&self, feature_id: &str) -> PathBuf {
        self.runs_dir().join(format!("{feature_id}.jsonl"))
    }

    /// Workstream descriptor backlog.
    pub fn backlog_dir(&self) -> PathBuf {
        self.root.join(BACKLOG_DIR)
    }

    /// Descriptor path for one workstream id.
    pub fn descriptor_file(&self, ws_id: &str) -> PathBuf {
        self.backlog_dir().join(format!("{ws_id}.md"))
    }

    /// Create the `.sdp/` scaffolding. Idempotent.
    pub fn init_scaffold(&self) -> Result<()> {
        for dir in [
            self.sdp_dir(),
            self.checkpoints_dir(),
            self.verdicts_dir(),
            self.evidence_dir(),
            self.runs_dir(),
            self.backlog_dir(),
        ] {
            std::fs::create_dir_all(&dir).map_err(|e| {
                SdpError::from(e).with_context("dir", dir.display().to_string())
            })?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Config file
// ---------------------------------------------------------------------------

/// Per-language tool command overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolOverrides {
    /// Override for the coverage command.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coverage: Option<String>,
    /// Override for the lint command.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lint: Option<String>,
    /// Override for the build command.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build: Option<String>,
    /// Override for the test command.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test: Option<String>,
}

/// CI-loop settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CiConfig {
    /// Iteration budget per feature.
    #[serde(default = "default_max_iter")]
    pub max_iter: u32,
    /// Delay between polls while CI is running (Go-style duration).
    #[serde(default = "default_poll_delay")]
    pub poll_delay: String,
    /// Delay before re-polling a pending result (Go-style duration).
    #[serde(default = "default_retry_delay")]
    pub retry_delay: String,
}

fn default_max_iter() -> u32 {
    5
}
fn default_poll_delay() -> String {
    "30s".to_string()
}
fn default_retry_delay() -> String {
    "15s".to_string()
}

impl Default for CiConfig {
    fn default() -> Self {
        Self {
            max_iter: default_max_iter(),
            poll_delay: default_poll_delay(),
            retry_delay: default_retry_delay(),
        }
    }
}

/// Runtime settings loaded from `.sdp/config.yaml`. Every field is optional
/// in the file; missing fields take the documented defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SdpConfig {
    /// Timeout overrides per category (Go-style durations, e.g. `90s`).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub timeouts: BTreeMap<String, String>,
    /// Default coverage threshold when a descriptor does not set one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coverage_threshold: Option<f64>,
    /// Maximum executor retries per workstream.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    /// Per-language tool command overrides, keyed by project type tag.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tools: BTreeMap<String, ToolOverrides>,
    /// CI-loop settings.
    #[serde(default)]
    pub ci: CiConfig,
    /// Command template used to drive the external agent runner.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_runner: Option<String>,
}

impl SdpConfig {
    /// Default coverage threshold when neither descriptor nor config set one.
    pub const DEFAULT_COVERAGE_THRESHOLD: f64 = 80.0;
    /// Default executor retry bound.
    pub const DEFAULT_MAX_RETRIES: u32 = 2;

    /// Load the config for a project root. A missing file is an empty config.
    pub fn load(paths: &SdpPaths) -> Result<Self> {
        let file = paths.config_file();
        if !file.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(&file)
            .map_err(|e| SdpError::from(e).with_context("file", file.display().to_string()))?;
        serde_yaml::from_str(&raw).map_err(|e| {
            SdpError::new(ErrorCode::FrontmatterInvalid, format!("config.yaml: {e}"))
                .with_context("file", file.display().to_string())
        })
    }

    /// Effective coverage threshold.
    pub fn coverage_threshold(&self) -> f64 {
        self.coverage_threshold
            .unwrap_or(Self::DEFAULT_COVERAGE_THRESHOLD)
    }

    /// Effective retry bound.
    pub fn max_retries(&self) -> u32 {
        self.max_retries.unwrap_or(Self::DEFAULT_MAX_RETRIES)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn root_discovery_finds_sdp_dir() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("proj");
        std::fs::create_dir_all(root.join(".sdp")).unwrap();
        let nested = root.join("src/deep/module");
        std::fs::create_dir_all(&nested).unwrap();

        let found = find_project_root(&nested).unwrap();
        assert_eq!(found, root);
    }

    #[test]
    fn root_discovery_accepts_git_file() {
        // Worktrees have a `.git` file, not a directory.
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("wt");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(root.join(".git"), "gitdir: ../main/.git/worktrees/wt\n").unwrap();

        let found = find_project_root(&root).unwrap();
        assert_eq!(found, root);
    }

    #[test]
    fn root_discovery_fails_outside_projects() {
        let tmp = TempDir::new().unwrap();
        let err = find_project_root(tmp.path()).unwrap_err();
        assert_eq!(err.code, sdp_error::ErrorCode::ToolMissing);
    }

    #[test]
    fn layout_paths() {
        let p = SdpPaths::new("/proj");
        assert_eq!(p.guard_file(), PathBuf::from("/proj/.sdp/guard.json"));
        assert_eq!(
            p.evidence_file("F070"),
            PathBuf::from("/proj/.sdp/evidence/F070.jsonl")
        );
        assert_eq!(
            p.descriptor_file("00-070-01"),
            PathBuf::from("/proj/docs/workstreams/backlog/00-070-01.md")
        );
    }

    #[test]
    fn scaffold_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let p = SdpPaths::new(tmp.path());
        p.init_scaffold().unwrap();
        p.init_scaffold().unwrap();
        assert!(p.checkpoints_dir().is_dir());
        assert!(p.verdicts_dir().is_dir());
        assert!(p.backlog_dir().is_dir());
    }

    #[test]
    fn missing_config_is_default() {
        let tmp = TempDir::new().unwrap();
        let p = SdpPaths::new(tmp.path());
        let cfg = SdpConfig::load(&p).unwrap();
        assert_eq!(cfg, SdpConfig::default());
        assert_eq!(cfg.coverage_threshold(), 80.0);
        assert_eq!(cfg.max_retries(), 2);
    }

    #[test]
    fn config_parses_yaml() {
        let tmp = TempDir::new().unwrap();
        let p = SdpPaths::new(tmp.path());
        p.init_scaffold().unwrap();
        std::fs::write(
            p.config_file(),
            "coverage_threshold: 72.5\nmax_retries: 4\ntimeouts:\n  verification: 90s\nci:\n  max_iter: 3\ntools:\n  python:\n    lint: ruff check .\n",
        )
        .unwrap();

        let cfg = SdpConfig::load(&p).unwrap();
        assert_eq!(cfg.coverage_threshold(), 72.5);
        assert_eq!(cfg.max_retries(), 4);
        assert_eq!(cfg.timeouts["verification"], "90s");
        assert_eq!(cfg.ci.max_iter, 3);
        assert_eq!(cfg.tools["python"].lint.as_deref(), Some("ruff check ."));
    }

    #[test]
    fn malformed_config_is_a_protocol_error() {
        let tmp = TempDir::new().unwrap();
        let p = SdpPaths::new(tmp.path());
        p.init_scaffold().unwrap();
        std::fs::write(p.config_file(), "timeouts: [not, a, map\n").unwrap();
        let err = SdpConfig::load(&p).unwrap_err();
        assert_eq!(err.code, sdp_error::ErrorCode::FrontmatterInvalid);
    }
}
