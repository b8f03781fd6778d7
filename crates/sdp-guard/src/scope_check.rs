//! Retrospective scope check over what a commit actually touched.

use crate::{Allowlist, ScopeMatcher};
use sdp_config::SdpPaths;
use sdp_error::Result;
use sdp_workstream::{WorkstreamId, parse_descriptor_file};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// Classification of one changed-files set against a workstream's scope.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeReport {
    /// Workstream the check ran against.
    pub ws_id: String,
    /// `true` iff `violations` is empty.
    pub pass: bool,
    /// Changed files inside the declared scope.
    pub in_scope: Vec<String>,
    /// Changed files permitted only via the allowlist.
    pub warnings: Vec<String>,
    /// Changed files outside scope and allowlist.
    pub violations: Vec<String>,
}

/// Check the files changed by the last commit (or the staged set when
/// `use_cached`) against a workstream's declared scope.
///
/// Every changed file is classified exactly once: in-scope, allowlisted
/// warning, or violation. The check passes iff there are no violations.
pub fn check_scope(root: &Path, ws_id: &WorkstreamId, use_cached: bool) -> Result<ScopeReport> {
    let paths = SdpPaths::new(root);
    let doc = parse_descriptor_file(&paths.descriptor_file(ws_id.as_str()))?;
    let matcher = ScopeMatcher::compile(&doc.scope_files)?;
    let allowlist = Allowlist::load(&paths)?;

    let changed = if use_cached {
        sdp_git::files_staged(root)?
    } else {
        sdp_git::files_changed_last_commit(root)?
    };
    debug!(ws_id = %ws_id, files = changed.len(), use_cached, "retrospective scope check");

    let mut report = ScopeReport {
        ws_id: ws_id.to_string(),
        ..ScopeReport::default()
    };
    for file in changed {
        if matcher.matches(&file) {
            report.in_scope.push(file);
        } else if allowlist.matches(&file) {
            report.warnings.push(file);
        } else {
            report.violations.push(file);
        }
    }
    report.pass = report.violations.is_empty();
    Ok(report)
}
