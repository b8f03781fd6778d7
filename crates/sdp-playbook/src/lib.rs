//! Structured recovery playbooks keyed by SDP error codes.
//!
//! A playbook is an operator-facing recovery procedure: a short "fast path"
//! of one to three steps that resolves the common case, and an optional
//! "deep path" for when the fast path does not. The [`PlaybookRegistry`]
//! holds a built-in catalogue covering every [`ErrorCode`], plus one default
//! playbook per [`ErrorClass`] used as a fallback for codes registered by
//! downstream crates.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod registry;

pub use registry::{PlaybookRegistry, global};

use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Severity
// ---------------------------------------------------------------------------

/// Operator-facing severity of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    /// Stop-the-line: integrity or security is at risk.
    P0,
    /// Blocks the current feature; fix before continuing.
    P1,
    /// Degraded but workable; fix when convenient.
    P2,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::P0 => "P0",
            Self::P1 => "P1",
            Self::P2 => "P2",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Steps & playbooks
// ---------------------------------------------------------------------------

/// One step of a recovery procedure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaybookStep {
    /// 1-based position within its path.
    pub order: u8,
    /// What the operator should do.
    pub description: String,
    /// Verbatim command to run, if one applies.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    /// What the operator should observe when the step worked.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected: Option<String>,
}

impl PlaybookStep {
    /// Create a step with just a description.
    pub fn new(order: u8, description: impl Into<String>) -> Self {
        Self {
            order,
            description: description.into(),
            command: None,
            expected: None,
        }
    }

    /// Attach a verbatim command.
    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    /// Attach an expected outcome.
    pub fn with_expected(mut self, expected: impl Into<String>) -> Self {
        self.expected = Some(expected.into());
        self
    }
}

/// A structured recovery procedure.
///
/// Invariants enforced by [`Playbook::new`]: the fast path has one to three
/// steps; the deep path has at most six.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Playbook {
    /// One-line human title, used as the error headline.
    pub title: String,
    /// Severity of the failure this playbook recovers from.
    pub severity: Severity,
    /// Ordered steps that resolve the common case.
    pub fast_path: Vec<PlaybookStep>,
    /// Ordered steps for the uncommon case.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deep_path: Vec<PlaybookStep>,
    /// References to related documentation.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub related_docs: Vec<String>,
}

impl Playbook {
    /// Maximum number of fast-path steps.
    pub const MAX_FAST_STEPS: usize = 3;
    /// Maximum number of deep-path steps.
    pub const MAX_DEEP_STEPS: usize = 6;

    /// Construct a playbook, checking the path-length invariants.
    ///
    /// Returns `None` if the fast path is empty or longer than three steps,
    /// or the deep path is longer than six.
    pub fn new(
        title: impl Into<String>,
        severity: Severity,
        fast_path: Vec<PlaybookStep>,
        deep_path: Vec<PlaybookStep>,
    ) -> Option<Self> {
        if fast_path.is_empty() || fast_path.len() > Self::MAX_FAST_STEPS {
            return None;
        }
        if deep_path.len() > Self::MAX_DEEP_STEPS {
            return None;
        }
        Some(Self {
            title: title.into(),
            severity,
            fast_path,
            deep_path,
            related_docs: Vec::new(),
        })
    }

    /// Attach related documentation references.
    pub fn with_docs(mut self, docs: Vec<String>) -> Self {
        self.related_docs = docs;
        self
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
