//! Descriptor parsing: YAML frontmatter plus named markdown sections.

use crate::{FeatureId, WorkstreamId};
use sdp_error::{ErrorCode, Result, SdpError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;

/// Workstream lifecycle status, as declared in frontmatter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkstreamStatus {
    /// Not yet started.
    Open,
    /// Currently being executed.
    InProgress,
    /// Finished and integrated.
    Closed,
    /// Waiting on something outside the workstream.
    Blocked,
}

impl fmt::Display for WorkstreamStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Open => "open",
            Self::InProgress => "in_progress",
            Self::Closed => "closed",
            Self::Blocked => "blocked",
        };
        f.write_str(s)
    }
}

/// Raw frontmatter shape; validated into [`WorkstreamDoc`].
#[derive(Debug, Deserialize)]
struct Frontmatter {
    ws_id: String,
    title: String,
    status: WorkstreamStatus,
    feature_id: String,
    #[serde(default)]
    depends_on: Vec<String>,
    #[serde(default)]
    coverage_threshold: Option<f64>,
}

/// A parsed workstream descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkstreamDoc {
    /// Validated workstream id; matches the filename prefix.
    pub ws_id: WorkstreamId,
    /// Human title.
    pub title: String,
    /// Declared status.
    pub status: WorkstreamStatus,
    /// Feature this workstream belongs to.
    pub feature_id: FeatureId,
    /// Workstreams that must complete first. Always within the same
    /// feature; cross-feature references are rejected at parse time.
    pub depends_on: BTreeSet<WorkstreamId>,
    /// Coverage gate, 0–100. Zero disables the coverage check.
    pub coverage_threshold: f64,
    /// Repo-relative paths this workstream may modify, in declaration order.
    pub scope_files: Vec<String>,
    /// Verification commands, in declaration order.
    pub verification_commands: Vec<String>,
    /// Goal narrative, verbatim. Opaque to the core.
    pub goal: String,
    /// Acceptance-criteria narrative, verbatim. Opaque to the core.
    pub acceptance_criteria: String,
}

/// Parse a descriptor file, checking the filename prefix against `ws_id`.
pub fn parse_descriptor_file(path: &Path) -> Result<WorkstreamDoc> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        SdpError::from(e).with_context("file", path.display().to_string())
    })?;
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default();
    let doc = parse_descriptor(&raw)?;
    if doc.ws_id.as_str() != stem {
        return Err(SdpError::new(
            ErrorCode::FrontmatterInvalid,
            format!(
                "ws_id '{}' does not match descriptor filename '{stem}'",
                doc.ws_id
            ),
        )
        .with_context("file", path.display().to_string()));
    }
    Ok(doc)
}

/// Parse descriptor markdown.
pub fn parse_descriptor(raw: &str) -> Result<WorkstreamDoc> {
    let (frontmatter, body) = split_frontmatter(raw)?;
    let fm: Frontmatter = serde_yaml::from_str(frontmatter).map_err(|e| {
        SdpError::new(ErrorCode::FrontmatterInvalid, format!("frontmatter: {e}"))
    })?;

    let ws_id = WorkstreamId::parse(&fm.ws_id)?;
    let feature_id = FeatureId::parse(&fm.feature_id)?;

    if fm.title.trim().is_empty() {
        return Err(SdpError::new(
            ErrorCode::FrontmatterInvalid,
            "frontmatter: title must not be empty",
        ));
    }

    let coverage_threshold = fm.coverage_threshold.unwrap_or(0.0);
    if !(0.0..=100.0).contains(&coverage_threshold) {
        return Err(SdpError::new(
            ErrorCode::FrontmatterInvalid,
            format!("coverage_threshold {coverage_threshold} is outside 0..=100"),
        ));
    }

    let mut depends_on = BTreeSet::new();
    for dep in &fm.depends_on {
        let dep_id = WorkstreamId::parse(dep)?;
        if dep_id.feature_number() != ws_id.feature_number() {
            return Err(SdpError::new(
                ErrorCode::DependencyUnknown,
                format!(
                    "depends_on '{dep_id}' belongs to feature {} but this workstream is in {}",
                    dep_id.feature_number(),
                    ws_id.feature_number()
                ),
            )
            .with_context("ws_id", ws_id.as_str())
            .with_context("dependency", dep_id.as_str()));
        }
        if dep_id == ws_id {
            return Err(SdpError::new(
                ErrorCode::DependencyCycle,
                format!("workstream '{ws_id}' depends on itself"),
            ));
        }
        depends_on.insert(dep_id);
    }

    Ok(WorkstreamDoc {
        ws_id,
        title: fm.title,
        status: fm.status,
        feature_id,
        depends_on,
        coverage_threshold,
        scope_files: section_bullets(body, "scope files"),
        verification_commands: section_bullets(body, "verification commands"),
        goal: section_text(body, "goal"),
        acceptance_criteria: section_text(body, "acceptance criteria"),
    })
}

/// Split `raw` into the YAML between the leading `---` fences and the rest.
fn split_frontmatter(raw: &str) -> Result<(&str, &str)> {
    let rest = raw
        .strip_prefix("---")
        .and_then(|r| r.strip_prefix(['\n', '\r']))
        .ok_or_else(|| {
            SdpError::new(
                ErrorCode::FrontmatterInvalid,
                "descriptor does not start with a --- frontmatter fence",
            )
        })?;
    let close = rest.find("\n---").ok_or_else(|| {
        SdpError::new(
            ErrorCode::FrontmatterInvalid,
            "frontmatter fence is never closed",
        )
    })?;
    let frontmatter = &rest[..close];
    let body = rest[close + 4..].trim_start_matches(['-']).trim_start();
    Ok((frontmatter, body))
}

/// Lines of the section headed `## <heading>` (case-insensitive), up to the
/// next `##` heading.
fn section_lines<'a>(body: &'a str, heading: &str) -> Vec<&'a str> {
    let mut in_section = false;
    let mut lines = Vec::new();
    for line in body.lines() {
        if let Some(h) = line.strip_prefix("##") {
            let h = h.trim_start_matches('#').trim();
            in_section = h.eq_ignore_ascii_case(heading);
            continue;
        }
        if in_section {
            lines.push(line);
        }
    }
    lines
}

/// Back-ticked bullet entries of a section, in order.
fn section_bullets(body: &str, heading: &str) -> Vec<String> {
    section_lines(body, heading)
        .into_iter()
        .filter_map(|line| {
            let item = line.trim().strip_prefix('-')?.trim();
            let inner = item.strip_prefix('`')?;
            let end = inner.find('`')?;
            Some(inner[..end].to_string())
        })
        .filter(|s| !s.is_empty())
        .collect()
}

/// Verbatim text of a section, trimmed.
fn section_text(body: &str, heading: &str) -> String {
    section_lines(body, heading).join("\n").trim().to_string()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
