//! Language-aware quality checks: tests, lint, build, and coverage.
//!
//! The checker probes the project root for build manifests to pick a
//! canonical project type, derives the appropriate commands from a static
//! per-language map (overridable in `.sdp/config.yaml`), and runs them
//! through the secure subprocess layer under resolved timeouts. Captured
//! output is bounded to 500 bytes.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod coverage;

pub use coverage::parse_coverage_pct;

use sdp_config::{SdpConfig, TimeoutCategory, resolve_timeout};
use sdp_error::{ErrorCode, Result, SdpError};
use sdp_exec::{OUTPUT_LIMIT, safe_command, split_argv, truncate_output};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::debug;

// ---------------------------------------------------------------------------
// Project type detection
// ---------------------------------------------------------------------------

/// Canonical project-type tag, detected from build manifests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectType {
    /// `go.mod`
    Go,
    /// `pyproject.toml` or `requirements.txt`
    Python,
    /// `pom.xml` or `build.gradle`
    Java,
    /// `package.json`
    Node,
    /// `Cargo.toml`
    Rust,
}

impl ProjectType {
    /// Canonical tag used as the `tools` key in `.sdp/config.yaml`.
    pub fn tag(self) -> &'static str {
        match self {
            Self::Go => "go",
            Self::Python => "python",
            Self::Java => "java",
            Self::Node => "node",
            Self::Rust => "rust",
        }
    }
}

impl fmt::Display for ProjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Probe the project root for a build manifest. First hit wins, in the
/// documented order: Go, Python, Java, Node, Rust.
pub fn detect_project_type(root: &Path) -> Result<ProjectType> {
    let probes: &[(&[&str], ProjectType)] = &[
        (&["go.mod"], ProjectType::Go),
        (&["pyproject.toml", "requirements.txt"], ProjectType::Python),
        (&["pom.xml", "build.gradle"], ProjectType::Java),
        (&["package.json"], ProjectType::Node),
        (&["Cargo.toml"], ProjectType::Rust),
    ];
    for (files, ty) in probes {
        if files.iter().any(|f| root.join(f).exists()) {
            return Ok(*ty);
        }
    }
    Err(SdpError::new(
        ErrorCode::ToolMissing,
        "no recognised build manifest in project root",
    )
    .with_context("root", root.display().to_string()))
}

// ---------------------------------------------------------------------------
// Command map
// ---------------------------------------------------------------------------

/// Which quality gate a command serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckKind {
    /// Aggregate coverage measurement.
    Coverage,
    /// Linting.
    Lint,
    /// Compilation / build.
    Build,
    /// Test execution.
    Tests,
}

fn default_command(ty: ProjectType, kind: CheckKind) -> &'static str {
    use CheckKind::*;
    use ProjectType::*;
    match (ty, kind) {
        (Go, Coverage) => "go test ./... -cover",
        (Go, Lint) => "golangci-lint run",
        (Go, Build) => "go build ./...",
        (Go, Tests) => "go test ./...",

        (Python, Coverage) => "pytest --cov --cov-report=term",
        (Python, Lint) => "ruff check .",
        (Python, Build) => "python -m compileall .",
        (Python, Tests) => "pytest",

        (Java, Coverage) => "mvn test jacoco:report",
        (Java, Lint) => "mvn checkstyle:check",
        (Java, Build) => "mvn compile",
        (Java, Tests) => "mvn test",

        (Node, Coverage) => "npm test -- --coverage",
        (Node, Lint) => "eslint .",
        (Node, Build) => "npm run build",
        (Node, Tests) => "npm test",

        (Rust, Coverage) => "cargo llvm-cov --summary-only",
        (Rust, Lint) => "cargo clippy --all-targets",
        (Rust, Build) => "cargo build",
        (Rust, Tests) => "cargo test",
    }
}

fn override_for(config: &SdpConfig, ty: ProjectType, kind: CheckKind) -> Option<String> {
    let tools = config.tools.get(ty.tag())?;
    match kind {
        CheckKind::Coverage => tools.coverage.clone(),
        CheckKind::Lint => tools.lint.clone(),
        CheckKind::Build => tools.build.clone(),
        CheckKind::Tests => tools.test.clone(),
    }
}

// ---------------------------------------------------------------------------
// Checker
// ---------------------------------------------------------------------------

/// Outcome of one quality check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckOutcome {
    /// Whether the check passed.
    pub passed: bool,
    /// The command that ran.
    pub command: String,
    /// Combined output, truncated to 500 bytes.
    pub output: String,
}

/// Coverage measurement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverageReport {
    /// Aggregate percentage reported by the tool.
    pub coverage_pct: f64,
    /// Threshold the measurement was compared against.
    pub threshold: f64,
    /// Truncated tool output.
    pub report: String,
}

impl CoverageReport {
    /// Whether the measurement meets the threshold.
    pub fn meets_threshold(&self) -> bool {
        self.coverage_pct >= self.threshold
    }
}

/// Language-aware quality checker for one project root.
#[derive(Debug, Clone)]
pub struct QualityChecker {
    root: PathBuf,
    project_type: ProjectType,
    config: SdpConfig,
}

impl QualityChecker {
    /// Build a checker, detecting the project type.
    pub fn new(root: impl Into<PathBuf>, config: SdpConfig) -> Result<Self> {
        let root = root.into();
        let project_type = detect_project_type(&root)?;
        debug!(%project_type, root = %root.display(), "quality checker ready");
        Ok(Self {
            root,
            project_type,
            config,
        })
    }

    /// Detected project type.
    pub fn project_type(&self) -> ProjectType {
        self.project_type
    }

    /// Resolve the effective command line for a gate.
    pub fn command_for(&self, kind: CheckKind) -> String {
        override_for(&self.config, self.project_type, kind)
            .unwrap_or_else(|| default_command(self.project_type, kind).to_string())
    }

    async fn run_check(
        &self,
        kind: CheckKind,
        category: TimeoutCategory,
        ctx: &CancellationToken,
    ) -> Result<CheckOutcome> {
        let command = self.command_for(kind);
        let argv = split_argv(&command);
        let (program, args) = argv.split_first().ok_or_else(|| {
            SdpError::new(ErrorCode::CommandRejected, "Empty command")
        })?;
        let cmd = safe_command(program, args)?;
        let timeout = resolve_timeout(None, &self.config, category);
        let out = sdp_exec::run(&cmd, &self.root, timeout, ctx).await?;
        Ok(CheckOutcome {
            passed: out.success(),
            command,
            output: truncate_output(&out.combined(), OUTPUT_LIMIT),
        })
    }

    /// Run the coverage command and parse the aggregate percentage.
    ///
    /// `threshold` overrides the config default when `Some`.
    pub async fn check_coverage(
        &self,
        threshold: Option<f64>,
        ctx: &CancellationToken,
    ) -> Result<CoverageReport> {
        let outcome = self
            .run_check(CheckKind::Coverage, TimeoutCategory::Long, ctx)
            .await?;
        let threshold = threshold.unwrap_or_else(|| self.config.coverage_threshold());
        let coverage_pct = parse_coverage_pct(&outcome.output).ok_or_else(|| {
            SdpError::new(
                ErrorCode::CoverageBelowThreshold,
                "coverage output carried no recognisable percentage",
            )
            .with_context("command", outcome.command.clone())
            .with_context("output", outcome.output.clone())
        })?;
        Ok(CoverageReport {
            coverage_pct,
            threshold,
            report: outcome.output,
        })
    }

    /// Run the lint command.
    pub async fn check_lint(&self, ctx: &CancellationToken) -> Result<CheckOutcome> {
        self.run_check(CheckKind::Lint, TimeoutCategory::Default, ctx)
            .await
    }

    /// Run the build command.
    pub async fn check_build(&self, ctx: &CancellationToken) -> Result<CheckOutcome> {
        self.run_check(CheckKind::Build, TimeoutCategory::Long, ctx)
            .await
    }

    /// Run the test command.
    pub async fn check_tests(&self, ctx: &CancellationToken) -> Result<CheckOutcome> {
        self.run_check(CheckKind::Tests, TimeoutCategory::Long, ctx)
            .await
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
    fn detection_order_is_documented() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("Cargo.toml"), "[package]\n").unwrap();
        assert_eq!(detect_project_type(tmp.path()).unwrap(), ProjectType::Rust);

        // go.mod outranks Cargo.toml.
        std::fs::write(tmp.path().join("go.mod"), "module x\n").unwrap();
        assert_eq!(detect_project_type(tmp.path()).unwrap(), ProjectType::Go);
    }

    #[test]
    fn python_detected_from_either_manifest() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("requirements.txt"), "pytest\n").unwrap();
        assert_eq!(
            detect_project_type(tmp.path()).unwrap(),
            ProjectType::Python
        );
    }

    #[test]
    fn unknown_project_is_an_environment_error() {
        let tmp = TempDir::new().unwrap();
        let err = detect_project_type(tmp.path()).unwrap_err();
        assert_eq!(err.code, ErrorCode::ToolMissing);
    }

    #[test]
    fn config_overrides_replace_default_commands() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("pyproject.toml"), "[project]\n").unwrap();
        let mut config = SdpConfig::default();
        config.tools.insert(
            "python".to_string(),
            sdp_config::ToolOverrides {
                lint: Some("ruff check src".to_string()),
                ..Default::default()
            },
        );
        let checker = QualityChecker::new(tmp.path(), config).unwrap();
        assert_eq!(checker.command_for(CheckKind::Lint), "ruff check src");
        // Unoverridden gates keep the static map.
        assert_eq!(checker.command_for(CheckKind::Tests), "pytest");
    }

    #[tokio::test]
    async fn checks_run_through_the_secure_layer() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("go.mod"), "module x\n").unwrap();
        let mut config = SdpConfig::default();
        // `false` is not whitelisted; the check is rejected, not run.
        config.tools.insert(
            "go".to_string(),
            sdp_config::ToolOverrides {
                test: Some("false".to_string()),
                ..Default::default()
            },
        );
        let checker = QualityChecker::new(tmp.path(), config).unwrap();
        let err = checker
            .check_tests(&CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::CommandRejected);
    }

    #[tokio::test]
    async fn lint_outcome_reports_pass_fail() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("go.mod"), "module x\n").unwrap();
        let mut config = SdpConfig::default();
        // git --version: whitelisted and exits zero everywhere.
        config.tools.insert(
            "go".to_string(),
            sdp_config::ToolOverrides {
                lint: Some("git --version".to_string()),
                ..Default::default()
            },
        );
        let checker = QualityChecker::new(tmp.path(), config).unwrap();
        let outcome = checker.check_lint(&CancellationToken::new()).await.unwrap();
        assert!(outcome.passed);
        assert!(outcome.output.contains("git version"));
        assert!(outcome.output.len() <= OUTPUT_LIMIT + "…[truncated]".len());
    }
}
