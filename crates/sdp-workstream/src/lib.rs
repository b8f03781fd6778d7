//! Workstream identifiers and descriptor parsing.
//!
//! A workstream descriptor is a markdown file with YAML frontmatter and
//! named sections. The core consumes the frontmatter, the "Scope Files"
//! list, and the "Verification Commands" list; the Goal and Acceptance
//! Criteria narratives are captured verbatim for the agent and are opaque
//! here.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod descriptor;
mod id;

pub use descriptor::{WorkstreamDoc, WorkstreamStatus, parse_descriptor, parse_descriptor_file};
pub use id::{FeatureId, WorkstreamId};

use sdp_error::{ErrorCode, Result, SdpError};
use std::path::{Component, Path, PathBuf};

/// Resolve a repo-relative scope path inside `root`.
///
/// # Errors
///
/// `SCOPE_PATH_ESCAPE` for `..` traversal and for absolute paths outside
/// the project root (an absolute path *inside* root is re-rooted).
pub fn resolve_in_root(root: &Path, candidate: &str) -> Result<PathBuf> {
    let path = Path::new(candidate);
    if path
        .components()
        .any(|c| matches!(c, Component::ParentDir))
    {
        return Err(escape(candidate, "parent traversal"));
    }
    if path.is_absolute() {
        return match path.strip_prefix(root) {
            Ok(rel) => Ok(root.join(rel)),
            Err(_) => Err(escape(candidate, "absolute path outside project root")),
        };
    }
    Ok(root.join(path))
}

fn escape(candidate: &str, why: &str) -> SdpError {
    SdpError::new(
        ErrorCode::ScopePathEscape,
        format!("scope path '{candidate}' escapes the project root: {why}"),
    )
    .with_context("path", candidate)
}
