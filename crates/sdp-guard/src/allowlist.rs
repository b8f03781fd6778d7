//! Guard allowlist: paths permitted outside any workstream scope.

use globset::{Glob, GlobSet, GlobSetBuilder};
use sdp_config::SdpPaths;
use sdp_error::{ErrorCode, Result, SdpError};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::Path;

/// Dependency lock files every workstream may touch.
pub const DEFAULT_ALLOWLIST: &[&str] = &[
    "go.mod",
    "go.sum",
    "Cargo.lock",
    "package-lock.json",
    "pnpm-lock.yaml",
    "yarn.lock",
    "poetry.lock",
    "uv.lock",
    "Gemfile.lock",
];

#[derive(Debug, Deserialize)]
struct AllowlistFile {
    #[serde(default)]
    allow: Vec<String>,
}

/// Compiled allowlist: defaults plus `.sdp/guard-allowlist.yaml` entries.
#[derive(Debug, Clone)]
pub struct Allowlist {
    exact: BTreeSet<String>,
    globs: Option<GlobSet>,
}

impl Allowlist {
    /// Load the allowlist for a project; missing file means defaults only.
    pub fn load(paths: &SdpPaths) -> Result<Self> {
        let mut entries: Vec<String> = DEFAULT_ALLOWLIST.iter().map(|s| s.to_string()).collect();
        let file = paths.allowlist_file();
        if file.exists() {
            let raw = std::fs::read_to_string(&file).map_err(SdpError::from)?;
            let parsed: AllowlistFile = serde_yaml::from_str(&raw).map_err(|e| {
                SdpError::new(
                    ErrorCode::FrontmatterInvalid,
                    format!("guard-allowlist.yaml: {e}"),
                )
                .with_context("file", file.display().to_string())
            })?;
            entries.extend(parsed.allow);
        }
        Self::compile(&entries)
    }

    fn compile(entries: &[String]) -> Result<Self> {
        let mut exact = BTreeSet::new();
        let mut builder = GlobSetBuilder::new();
        let mut has_globs = false;
        for entry in entries {
            if entry.contains(['*', '?', '[', '{']) {
                builder.add(Glob::new(entry).map_err(|e| {
                    SdpError::new(
                        ErrorCode::FrontmatterInvalid,
                        format!("invalid allowlist glob '{entry}': {e}"),
                    )
                })?);
                has_globs = true;
            } else {
                exact.insert(entry.clone());
            }
        }
        let globs = if has_globs {
            Some(builder.build().map_err(|e| {
                SdpError::new(ErrorCode::FrontmatterInvalid, format!("compile allowlist: {e}"))
            })?)
        } else {
            None
        };
        Ok(Self { exact, globs })
    }

    /// Whether `file` (full path or basename) is allowlisted.
    pub fn matches(&self, file: &str) -> bool {
        if self.exact.contains(file) {
            return true;
        }
        if let Some(name) = Path::new(file).file_name().and_then(|n| n.to_str()) {
            if self.exact.contains(name) {
                return true;
            }
        }
        self.globs.as_ref().is_some_and(|g| g.is_match(file))
    }
}
