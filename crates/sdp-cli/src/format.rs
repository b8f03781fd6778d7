//! Table rendering for CLI output.

use sdp_guard::{Finding, FindingStatus, GuardState, ScopeReport};
use sdp_verify::VerificationResult;
use sdp_worktree::WorktreeListing;

const PASS: &str = "PASS";
const FAIL: &str = "FAIL";

/// Per-check verification table.
pub fn verification_table(result: &VerificationResult) -> String {
    let mut out = String::new();
    out.push_str(&format!("Verification: {}\n\n", result.ws_id));

    let name_width = result
        .checks
        .iter()
        .map(|c| c.name.len())
        .max()
        .unwrap_or(4)
        .max(5);
    out.push_str(&format!("  {:<name_width$}  RESULT  DETAIL\n", "CHECK"));
    for check in &result.checks {
        let verdict = if check.passed { PASS } else { FAIL };
        out.push_str(&format!(
            "  {:<name_width$}  {:<6}  {}\n",
            check.name, verdict, check.message
        ));
    }
    out.push_str(&format!(
        "\n{} ({} checks, {} ms)\n",
        if result.passed { PASS } else { FAIL },
        result.checks.len(),
        result.elapsed_ms
    ));
    out
}

/// Guard state summary.
pub fn guard_status(state: &GuardState) -> String {
    let mut out = format!(
        "guard active for {} (since {})\nscope:\n",
        state.active_ws, state.activated_at
    );
    for pattern in &state.scope_patterns {
        out.push_str(&format!("  - {pattern}\n"));
    }
    out
}

/// Retrospective scope-check report.
pub fn scope_report(report: &ScopeReport) -> String {
    let mut out = format!(
        "scope check for {}: {}\n",
        report.ws_id,
        if report.pass { PASS } else { FAIL }
    );
    for file in &report.in_scope {
        out.push_str(&format!("  in-scope   {file}\n"));
    }
    for file in &report.warnings {
        out.push_str(&format!("  allowlist  {file}\n"));
    }
    for file in &report.violations {
        out.push_str(&format!("  VIOLATION  {file}\n"));
    }
    out
}

/// Findings listing.
pub fn findings_table(findings: &[Finding]) -> String {
    if findings.is_empty() {
        return "no findings\n".to_string();
    }
    let mut out = format!("  {:<8}  {:<4}  {:<8}  {:<10}  TITLE\n", "ID", "PRI", "STATUS", "FEATURE");
    for finding in findings {
        let id = &finding.id.to_string()[..8];
        let status = match finding.status {
            FindingStatus::Open => "open",
            FindingStatus::Resolved => "resolved",
        };
        out.push_str(&format!(
            "  {id:<8}  {:<4}  {status:<8}  {:<10}  {}\n",
            finding.priority.to_string(),
            finding.feature,
            finding.title
        ));
    }
    out
}

/// Worktree listing with session identity.
pub fn worktree_table(listings: &[WorktreeListing]) -> String {
    let mut out = format!("  {:<40}  {:<20}  {:<8}  SESSION\n", "PATH", "BRANCH", "FEATURE");
    for listing in listings {
        let branch = listing.entry.branch.as_deref().unwrap_or("(detached)");
        let (feature, session) = match &listing.session {
            Some(s) => (s.feature_id.as_str(), "ok"),
            None => ("-", "-"),
        };
        out.push_str(&format!(
            "  {:<40}  {branch:<20}  {feature:<8}  {session}\n",
            listing.entry.path.display().to_string()
        ));
    }
    out
}
