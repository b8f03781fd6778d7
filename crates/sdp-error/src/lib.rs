//! Unified error taxonomy with stable error codes for the SDP engine.
//!
//! Every SDP error carries an [`ErrorCode`] (a machine-readable, stable
//! string tag), a human-readable message, an optional cause chain, and
//! arbitrary key-value context. Two errors are of the same kind iff their
//! codes match. Use the builder returned by [`SdpError::new`] to construct
//! errors fluently.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// ErrorClass
// ---------------------------------------------------------------------------

/// Broad family that an [`ErrorCode`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Missing tools, permissions, broken host state.
    Environment,
    /// Malformed identifiers, documents, or integrity violations.
    Protocol,
    /// Blocked or cyclic workstream dependencies.
    Dependency,
    /// Quality gates and scope rules that did not hold.
    Validation,
    /// Command execution, timeouts, and internal failures.
    Runtime,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Environment => "environment",
            Self::Protocol => "protocol",
            Self::Dependency => "dependency",
            Self::Validation => "validation",
            Self::Runtime => "runtime",
        };
        f.write_str(s)
    }
}

impl ErrorClass {
    /// All classes, for exhaustive catalogue construction.
    pub const ALL: &[ErrorClass] = &[
        ErrorClass::Environment,
        ErrorClass::Protocol,
        ErrorClass::Dependency,
        ErrorClass::Validation,
        ErrorClass::Runtime,
    ];
}

// ---------------------------------------------------------------------------
// ErrorCode
// ---------------------------------------------------------------------------

/// Machine-readable, stable error code.
///
/// Each variant serialises to a `SCREAMING_SNAKE_CASE` string that is
/// guaranteed not to change across patch releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // -- Environment --
    /// A required external tool is not installed or not on PATH.
    ToolMissing,
    /// The filesystem or a tool refused access.
    PermissionDenied,
    /// An IO operation failed for a reason that may be transient.
    IoFailed,

    // -- Protocol --
    /// Workstream identifier does not match the `PP-FFF-SS` shape.
    WsIdInvalid,
    /// Feature identifier does not match `FNNN` or `F-SLUG`.
    FeatureIdInvalid,
    /// Descriptor frontmatter is missing or malformed.
    FrontmatterInvalid,
    /// The evidence chain has a hash mismatch.
    HashChainBroken,
    /// A session document failed tamper detection.
    SessionCorrupted,
    /// A checkpoint document failed to parse.
    CheckpointCorrupted,
    /// Guard activation attempted while a guard is already active.
    GuardAlreadyActive,
    /// Guard operation attempted with no active guard state.
    GuardNotActive,
    /// A document failed validation against its published schema.
    SchemaViolation,

    // -- Dependency --
    /// A workstream's dependencies are not yet complete.
    WsBlocked,
    /// The dependency graph contains a cycle.
    DependencyCycle,
    /// `depends_on` references a workstream outside the feature.
    DependencyUnknown,

    // -- Validation --
    /// Measured coverage is below the configured threshold.
    CoverageBelowThreshold,
    /// The test suite failed.
    TestFailed,
    /// The linter reported problems.
    LintFailed,
    /// The build failed.
    BuildFailed,
    /// A commit touched files outside the declared scope.
    ScopeViolation,
    /// A scope path escapes the project root.
    ScopePathEscape,
    /// A command was refused by the secure subprocess layer.
    CommandRejected,
    /// A source file exceeds the configured size limit.
    FileTooLarge,

    // -- Runtime --
    /// A subprocess exited non-zero.
    CommandFailed,
    /// An operation exceeded its timeout.
    Timeout,
    /// The CI loop exhausted its iteration budget.
    CiMaxIterations,
    /// The CI loop escalated to an operator.
    Escalated,
    /// Catch-all for unexpected internal errors.
    Internal,
}

impl ErrorCode {
    /// All error codes, in stable order, for exhaustive iteration.
    pub const ALL: &[ErrorCode] = &[
        ErrorCode::ToolMissing,
        ErrorCode::PermissionDenied,
        ErrorCode::IoFailed,
        ErrorCode::WsIdInvalid,
        ErrorCode::FeatureIdInvalid,
        ErrorCode::FrontmatterInvalid,
        ErrorCode::HashChainBroken,
        ErrorCode::SessionCorrupted,
        ErrorCode::CheckpointCorrupted,
        ErrorCode::GuardAlreadyActive,
        ErrorCode::GuardNotActive,
        ErrorCode::SchemaViolation,
        ErrorCode::WsBlocked,
        ErrorCode::DependencyCycle,
        ErrorCode::DependencyUnknown,
        ErrorCode::CoverageBelowThreshold,
        ErrorCode::TestFailed,
        ErrorCode::LintFailed,
        ErrorCode::BuildFailed,
        ErrorCode::ScopeViolation,
        ErrorCode::ScopePathEscape,
        ErrorCode::CommandRejected,
        ErrorCode::FileTooLarge,
        ErrorCode::CommandFailed,
        ErrorCode::Timeout,
        ErrorCode::CiMaxIterations,
        ErrorCode::Escalated,
        ErrorCode::Internal,
    ];

    /// Returns the broad [`ErrorClass`] this code belongs to.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::ToolMissing | Self::PermissionDenied | Self::IoFailed => ErrorClass::Environment,

            Self::WsIdInvalid
            | Self::FeatureIdInvalid
            | Self::FrontmatterInvalid
            | Self::HashChainBroken
            | Self::SessionCorrupted
            | Self::CheckpointCorrupted
            | Self::GuardAlreadyActive
            | Self::GuardNotActive
            | Self::SchemaViolation => ErrorClass::Protocol,

            Self::WsBlocked | Self::DependencyCycle | Self::DependencyUnknown => {
                ErrorClass::Dependency
            }

            Self::CoverageBelowThreshold
            | Self::TestFailed
            | Self::LintFailed
            | Self::BuildFailed
            | Self::ScopeViolation
            | Self::ScopePathEscape
            | Self::CommandRejected
            | Self::FileTooLarge => ErrorClass::Validation,

            Self::CommandFailed
            | Self::Timeout
            | Self::CiMaxIterations
            | Self::Escalated
            | Self::Internal => ErrorClass::Runtime,
        }
    }

    /// Whether an operation failing with this code may be retried.
    ///
    /// Retryability is an attribute of the taxonomy, not of call sites:
    /// `IO_FAILED` and `TIMEOUT` are transient by nature. `COMMAND_FAILED`
    /// is retryable only when the error carries a `transient` context flag
    /// (see [`SdpError::is_retryable`]).
    pub fn retryable(&self) -> bool {
        matches!(self, Self::IoFailed | Self::Timeout)
    }

    /// Stable `&'static str` representation of the code (e.g.
    /// `"SESSION_CORRUPTED"`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ToolMissing => "TOOL_MISSING",
            Self::PermissionDenied => "PERMISSION_DENIED",
            Self::IoFailed => "IO_FAILED",
            Self::WsIdInvalid => "WS_ID_INVALID",
            Self::FeatureIdInvalid => "FEATURE_ID_INVALID",
            Self::FrontmatterInvalid => "FRONTMATTER_INVALID",
            Self::HashChainBroken => "HASH_CHAIN_BROKEN",
            Self::SessionCorrupted => "SESSION_CORRUPTED",
            Self::CheckpointCorrupted => "CHECKPOINT_CORRUPTED",
            Self::GuardAlreadyActive => "GUARD_ALREADY_ACTIVE",
            Self::GuardNotActive => "GUARD_NOT_ACTIVE",
            Self::SchemaViolation => "SCHEMA_VIOLATION",
            Self::WsBlocked => "WS_BLOCKED",
            Self::DependencyCycle => "DEPENDENCY_CYCLE",
            Self::DependencyUnknown => "DEPENDENCY_UNKNOWN",
            Self::CoverageBelowThreshold => "COVERAGE_BELOW_THRESHOLD",
            Self::TestFailed => "TEST_FAILED",
            Self::LintFailed => "LINT_FAILED",
            Self::BuildFailed => "BUILD_FAILED",
            Self::ScopeViolation => "SCOPE_VIOLATION",
            Self::ScopePathEscape => "SCOPE_PATH_ESCAPE",
            Self::CommandRejected => "COMMAND_REJECTED",
            Self::FileTooLarge => "FILE_TOO_LARGE",
            Self::CommandFailed => "COMMAND_FAILED",
            Self::Timeout => "TIMEOUT",
            Self::CiMaxIterations => "CI_MAX_ITERATIONS",
            Self::Escalated => "ESCALATED",
            Self::Internal => "INTERNAL",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// SdpError
// ---------------------------------------------------------------------------

/// Unified SDP error.
///
/// Carries a stable [`ErrorCode`], a human-readable message, an optional
/// source error for cause-chaining, and arbitrary structured context.
///
/// # Builder usage
///
/// ```
/// use sdp_error::{ErrorCode, SdpError};
///
/// let err = SdpError::new(ErrorCode::Timeout, "verification timed out")
///     .with_context("ws_id", "00-070-01")
///     .with_context("timeout_ms", 60_000);
/// ```
pub struct SdpError {
    /// Machine-readable error code.
    pub code: ErrorCode,
    /// Human-readable description.
    pub message: String,
    /// Optional underlying cause.
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
    /// Arbitrary structured context for diagnostics.
    pub context: BTreeMap<String, serde_json::Value>,
}

impl SdpError {
    /// Create a new error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            source: None,
            context: BTreeMap::new(),
        }
    }

    /// Shorthand for an [`ErrorCode::Internal`] error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message)
    }

    /// Attach a key-value pair to the diagnostic context.
    ///
    /// The value is converted via [`serde_json::to_value`]; if serialisation
    /// fails, the entry is silently skipped.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    /// Attach an underlying cause.
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Shorthand for `self.code.class()`.
    pub fn class(&self) -> ErrorClass {
        self.code.class()
    }

    /// Whether this error instance may be retried.
    ///
    /// Extends [`ErrorCode::retryable`] with the `transient` context flag:
    /// a `COMMAND_FAILED` tagged `transient=true` (lock contention, flaky
    /// network) is retryable even though the code itself is not.
    pub fn is_retryable(&self) -> bool {
        if self.code.retryable() {
            return true;
        }
        self.code == ErrorCode::CommandFailed
            && self.context.get("transient") == Some(&serde_json::Value::Bool(true))
    }
}

impl From<std::io::Error> for SdpError {
    fn from(err: std::io::Error) -> Self {
        let code = match err.kind() {
            std::io::ErrorKind::PermissionDenied => ErrorCode::PermissionDenied,
            _ => ErrorCode::IoFailed,
        };
        SdpError::new(code, err.to_string()).with_source(err)
    }
}

impl fmt::Debug for SdpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("SdpError");
        d.field("code", &self.code);
        d.field("message", &self.message);
        if let Some(ref src) = self.source {
            d.field("source", &src.to_string());
        }
        if !self.context.is_empty() {
            d.field("context", &self.context);
        }
        d.finish()
    }
}

impl fmt::Display for SdpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code.as_str(), self.message)?;
        if !self.context.is_empty() {
            // Deterministic output thanks to BTreeMap.
            if let Ok(ctx) = serde_json::to_string(&self.context) {
                write!(f, " {ctx}")?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for SdpError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Convenience alias used throughout the engine crates.
pub type Result<T> = std::result::Result<T, SdpError>;

// ---------------------------------------------------------------------------
// Serialization support
// ---------------------------------------------------------------------------

/// Serialisable snapshot of an [`SdpError`] (without the opaque source).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SdpErrorDto {
    /// Error code.
    pub code: ErrorCode,
    /// Derived error class.
    pub class: ErrorClass,
    /// Human-readable message.
    pub message: String,
    /// Structured context.
    pub context: BTreeMap<String, serde_json::Value>,
    /// String representation of the source error, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_message: Option<String>,
}

impl From<&SdpError> for SdpErrorDto {
    fn from(err: &SdpError) -> Self {
        Self {
            code: err.code,
            class: err.class(),
            message: err.message.clone(),
            context: err.context.clone(),
            source_message: err.source.as_ref().map(|s| s.to_string()),
        }
    }
}

impl From<SdpErrorDto> for SdpError {
    fn from(dto: SdpErrorDto) -> Self {
        Self {
            code: dto.code,
            message: dto.message,
            source: None,
            context: dto.context,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
