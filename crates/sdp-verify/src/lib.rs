//! Contract-based workstream verification.
//!
//! The engine composes three injected seams (a coverage checker, a path
//! validator, and a command runner) so tests can swap any of them for a
//! double. Verification walks the workstream descriptor: scope files must
//! exist inside the project root, verification commands must pass under the
//! secure subprocess layer, and coverage must meet the workstream's
//! threshold. Every check contributes one [`CheckResult`]; the overall
//! verdict is their conjunction.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod verdict;

pub use verdict::{
    AcEvidence, QualityGates, Verdict, VerdictKind, read_verdict, verdict_schema, write_verdict,
};

use sdp_config::{SdpConfig, SdpPaths, TimeoutCategory, resolve_timeout};
use sdp_error::{ErrorCode, Result, SdpError};
use sdp_exec::{ExecOutput, OUTPUT_LIMIT, safe_command, split_argv, truncate_output};
use sdp_quality::{CoverageReport, QualityChecker};
use sdp_workstream::{WorkstreamId, parse_descriptor_file, resolve_in_root};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

// ---------------------------------------------------------------------------
// Seams
// ---------------------------------------------------------------------------

/// Seam: aggregate coverage measurement.
pub trait CoverageChecker {
    /// Measure coverage, comparing against `threshold` when given.
    fn check_coverage(
        &self,
        threshold: Option<f64>,
        ctx: &CancellationToken,
    ) -> impl Future<Output = Result<CoverageReport>> + Send;
}

/// Seam: scope-path containment validation.
pub trait PathValidator {
    /// Resolve `candidate` inside `root`, rejecting escapes.
    fn validate(&self, root: &Path, candidate: &str) -> Result<PathBuf>;
}

/// Seam: verification-command execution.
pub trait CommandRunner {
    /// Run one descriptor command string in `cwd` under `timeout`.
    fn run(
        &self,
        command: &str,
        cwd: &Path,
        timeout: Duration,
        ctx: &CancellationToken,
    ) -> impl Future<Output = Result<ExecOutput>> + Send;
}

/// Production path validator: project-root containment.
#[derive(Debug, Clone, Copy, Default)]
pub struct RootPathValidator;

impl PathValidator for RootPathValidator {
    fn validate(&self, root: &Path, candidate: &str) -> Result<PathBuf> {
        resolve_in_root(root, candidate)
    }
}

/// Production command runner: secure subprocess layer.
#[derive(Debug, Clone, Copy, Default)]
pub struct SecureCommandRunner;

impl CommandRunner for SecureCommandRunner {
    async fn run(
        &self,
        command: &str,
        cwd: &Path,
        timeout: Duration,
        ctx: &CancellationToken,
    ) -> Result<ExecOutput> {
        let argv = split_argv(command);
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| SdpError::new(ErrorCode::CommandRejected, "Empty command"))?;
        let cmd = safe_command(program, args)?;
        sdp_exec::run(&cmd, cwd, timeout, ctx).await
    }
}

impl CoverageChecker for QualityChecker {
    fn check_coverage(
        &self,
        threshold: Option<f64>,
        ctx: &CancellationToken,
    ) -> impl Future<Output = Result<CoverageReport>> + Send {
        QualityChecker::check_coverage(self, threshold, ctx)
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// Outcome of one verification check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    /// Check name, e.g. `scope_file:internal/foo.go`.
    pub name: String,
    /// Whether the check passed.
    pub passed: bool,
    /// Human-readable outcome.
    pub message: String,
    /// Supporting evidence (absolute path, truncated output), if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evidence: Option<String>,
}

/// Full verification outcome for one workstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationResult {
    /// Workstream that was verified.
    pub ws_id: String,
    /// Conjunction of all checks.
    pub passed: bool,
    /// One entry per check, in execution order.
    pub checks: Vec<CheckResult>,
    /// Total elapsed wall-clock time in milliseconds.
    pub elapsed_ms: u64,
}

impl VerificationResult {
    /// Scope files that failed their existence check.
    pub fn missing_files(&self) -> Vec<&str> {
        self.checks
            .iter()
            .filter(|c| !c.passed && c.name.starts_with("scope_file:"))
            .map(|c| c.name.trim_start_matches("scope_file:"))
            .collect()
    }

    /// Verification commands that failed.
    pub fn failed_commands(&self) -> Vec<&str> {
        self.checks
            .iter()
            .filter(|c| !c.passed && c.name.starts_with("command:"))
            .map(|c| c.name.trim_start_matches("command:"))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// The verification engine, generic over its three seams.
#[derive(Debug, Clone)]
pub struct VerificationEngine<C, P, R> {
    paths: SdpPaths,
    config: SdpConfig,
    coverage: C,
    validator: P,
    runner: R,
}

impl<C, P, R> VerificationEngine<C, P, R>
where
    C: CoverageChecker,
    P: PathValidator,
    R: CommandRunner,
{
    /// Engine over a project layout with injected collaborators.
    pub fn new(paths: SdpPaths, config: SdpConfig, coverage: C, validator: P, runner: R) -> Self {
        Self {
            paths,
            config,
            coverage,
            validator,
            runner,
        }
    }

    /// Verify one workstream against its descriptor contract.
    ///
    /// Fails fast (with an error, not a failed check) when the descriptor
    /// is absent or unparseable; everything after that point is a
    /// [`CheckResult`].
    pub async fn verify(
        &self,
        ws_id: &WorkstreamId,
        ctx: &CancellationToken,
    ) -> Result<VerificationResult> {
        let start = Instant::now();
        let descriptor = self.paths.descriptor_file(ws_id.as_str());
        if !descriptor.exists() {
            return Err(SdpError::new(
                ErrorCode::IoFailed,
                format!("workstream descriptor not found: {}", descriptor.display()),
            )
            .with_context("ws_id", ws_id.as_str()));
        }
        let doc = parse_descriptor_file(&descriptor)?;
        let mut checks = Vec::new();

        // Scope files: containment first (a security check, distinct from
        // existence), then stat.
        for file in &doc.scope_files {
            checks.push(self.check_scope_file(file));
        }

        // Verification commands through the secure layer.
        let timeout = resolve_timeout(None, &self.config, TimeoutCategory::Verification);
        for command in &doc.verification_commands {
            checks.push(self.check_command(command, timeout, ctx).await);
        }

        // Coverage gate, when the workstream declares one.
        if doc.coverage_threshold > 0.0 {
            checks.push(
                self.check_coverage_gate(doc.coverage_threshold, ctx)
                    .await,
            );
        }

        let passed = checks.iter().all(|c| c.passed);
        let result = VerificationResult {
            ws_id: ws_id.to_string(),
            passed,
            checks,
            elapsed_ms: start.elapsed().as_millis().max(1) as u64,
        };
        info!(ws_id = %ws_id, passed, checks = result.checks.len(), "verification finished");
        Ok(result)
    }

    fn check_scope_file(&self, file: &str) -> CheckResult {
        let name = format!("scope_file:{file}");
        match self.validator.validate(&self.paths.root, file) {
            Err(err) => CheckResult {
                name,
                passed: false,
                message: format!("Security validation: {}", err.message),
                evidence: None,
            },
            Ok(abs) if abs.exists() => CheckResult {
                name,
                passed: true,
                message: "File exists".to_string(),
                evidence: Some(abs.display().to_string()),
            },
            Ok(_) => CheckResult {
                name,
                passed: false,
                message: "File missing".to_string(),
                evidence: None,
            },
        }
    }

    async fn check_command(
        &self,
        command: &str,
        timeout: Duration,
        ctx: &CancellationToken,
    ) -> CheckResult {
        let name = format!("command:{command}");
        if command.trim().is_empty() {
            return CheckResult {
                name,
                passed: false,
                message: "Empty command".to_string(),
                evidence: None,
            };
        }
        debug!(command, "running verification command");
        match self.runner.run(command, &self.paths.root, timeout, ctx).await {
            Ok(out) => {
                let evidence = truncate_output(&out.combined(), OUTPUT_LIMIT);
                if out.success() {
                    CheckResult {
                        name,
                        passed: true,
                        message: "Command passed".to_string(),
                        evidence: Some(evidence),
                    }
                } else {
                    CheckResult {
                        name,
                        passed: false,
                        message: format!(
                            "Command failed (exit {})",
                            out.exit_code
                                .map(|c| c.to_string())
                                .unwrap_or_else(|| "signal".to_string())
                        ),
                        evidence: Some(evidence),
                    }
                }
            }
            Err(err) => CheckResult {
                name,
                passed: false,
                message: err.message.clone(),
                evidence: None,
            },
        }
    }

    async fn check_coverage_gate(&self, threshold: f64, ctx: &CancellationToken) -> CheckResult {
        let name = "coverage".to_string();
        match self.coverage.check_coverage(Some(threshold), ctx).await {
            Ok(report) => CheckResult {
                name,
                passed: report.meets_threshold(),
                message: format!(
                    "Coverage {:.1}% (threshold {:.1}%)",
                    report.coverage_pct, report.threshold
                ),
                evidence: Some(report.report),
            },
            Err(err) => CheckResult {
                name,
                passed: false,
                message: err.message.clone(),
                evidence: None,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
