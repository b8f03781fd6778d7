//! Command implementations for the `sdp` binary.
//!
//! Library-level so they can be tested without spawning the binary. Each
//! function returns engine errors; exit-code mapping and playbook rendering
//! happen in `main`.

use sdp_ciloop::{
    CiCheck, CompositeFixer, FixOutcome, Fixer, GhPoller, LoopConfig, LoopOutcome, RunLog,
    Supervisor, default_autofixers,
};
use sdp_config::{SdpConfig, SdpPaths, TimeoutCategory, find_project_root, resolve_timeout};
use sdp_error::{ErrorCode, Result, SdpError};
use sdp_evidence::ChainSummary;
use sdp_exec::{OUTPUT_LIMIT, safe_command, split_argv, truncate_output};
use sdp_guard::{Finding, FindingsStore, Guard, Priority, ScopeReport};
use sdp_orchestrator::{
    ExecOutcome, Executor, FsSource, Orchestrator, RetryPolicy, RunSummary, Verifier,
};
use sdp_quality::{CoverageReport, QualityChecker};
use sdp_session::Session;
use sdp_verify::{
    AcEvidence, CoverageChecker, QualityGates, RootPathValidator, SecureCommandRunner,
    VerificationEngine, VerificationResult, Verdict, VerdictKind, write_verdict,
};
use sdp_workstream::{FeatureId, WorkstreamId, parse_descriptor_file};
use sdp_worktree::{WorktreeInfo, WorktreeListing, WorktreeManager};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Test hook: a truthy value replaces the external agent runner with a
/// no-op executor.
pub const MOCK_EXECUTOR_ENV: &str = "SDP_USE_MOCK_EXECUTOR";

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

/// Resolved project context: root layout plus loaded config.
#[derive(Debug, Clone)]
pub struct Ctx {
    /// Filesystem layout.
    pub paths: SdpPaths,
    /// Loaded configuration.
    pub config: SdpConfig,
}

impl Ctx {
    /// Discover the project root from the working directory.
    pub fn discover() -> Result<Self> {
        let cwd = std::env::current_dir().map_err(SdpError::from)?;
        Self::at(&cwd)
    }

    /// Context rooted at (an ancestor of) `start`.
    pub fn at(start: &Path) -> Result<Self> {
        let root = find_project_root(start)?;
        let paths = SdpPaths::new(root);
        let config = SdpConfig::load(&paths)?;
        Ok(Self { paths, config })
    }
}

/// `sdp init`: create the `.sdp/` scaffolding. Idempotent.
pub fn init(start: &Path) -> Result<SdpPaths> {
    let root = find_project_root(start).unwrap_or_else(|_| start.to_path_buf());
    let paths = SdpPaths::new(root);
    paths.init_scaffold()?;
    Ok(paths)
}

// ---------------------------------------------------------------------------
// Guard
// ---------------------------------------------------------------------------

/// `sdp guard activate <ws_id>`.
pub fn guard_activate(ctx: &Ctx, ws_id: &str) -> Result<()> {
    let ws = WorkstreamId::parse(ws_id)?;
    Guard::new(ctx.paths.clone()).activate(&ws)?;
    Ok(())
}

/// `sdp guard deactivate`.
pub fn guard_deactivate(ctx: &Ctx) -> Result<()> {
    Guard::new(ctx.paths.clone()).deactivate()?;
    Ok(())
}

/// `sdp guard check <file>`: `Ok(true)` when the edit is allowed.
pub fn guard_check(ctx: &Ctx, file: &str) -> Result<(bool, Option<String>)> {
    let decision = Guard::new(ctx.paths.clone()).check(file)?;
    Ok((decision.allowed, decision.reason))
}

/// `sdp guard status`.
pub fn guard_status(ctx: &Ctx) -> Result<Option<sdp_guard::GuardState>> {
    Guard::new(ctx.paths.clone()).status()
}

/// `sdp guard check-scope <ws_id> [--cached]`.
pub fn guard_check_scope(ctx: &Ctx, ws_id: &str, use_cached: bool) -> Result<ScopeReport> {
    let ws = WorkstreamId::parse(ws_id)?;
    sdp_guard::check_scope(&ctx.paths.root, &ws, use_cached)
}

/// `sdp guard finding add …`.
pub fn finding_add(
    ctx: &Ctx,
    feature: &str,
    area: &str,
    title: &str,
    priority: Priority,
    beads_ref: Option<String>,
) -> Result<Finding> {
    FindingsStore::new(&ctx.paths).add(feature, area, title, priority, beads_ref)
}

/// `sdp guard finding resolve <id>`.
pub fn finding_resolve(ctx: &Ctx, id: &str) -> Result<Finding> {
    FindingsStore::new(&ctx.paths).resolve(id)
}

/// `sdp guard finding list [--all]`.
pub fn finding_list(ctx: &Ctx, all: bool) -> Result<Vec<Finding>> {
    FindingsStore::new(&ctx.paths).list(all)
}

/// `sdp guard finding clear`.
pub fn finding_clear(ctx: &Ctx) -> Result<()> {
    FindingsStore::new(&ctx.paths).clear()
}

// ---------------------------------------------------------------------------
// Verify
// ---------------------------------------------------------------------------

/// Coverage seam that degrades gracefully when the project has no
/// recognisable build manifest: the error surfaces only if a coverage gate
/// actually runs.
pub struct OptionalCoverage(Option<QualityChecker>);

impl OptionalCoverage {
    /// Probe the project; `None` when no manifest is recognised.
    pub fn probe(root: &Path, config: &SdpConfig) -> Self {
        Self(QualityChecker::new(root, config.clone()).ok())
    }
}

impl CoverageChecker for OptionalCoverage {
    async fn check_coverage(
        &self,
        threshold: Option<f64>,
        ctx: &CancellationToken,
    ) -> Result<CoverageReport> {
        match &self.0 {
            Some(checker) => checker.check_coverage(threshold, ctx).await,
            None => Err(SdpError::new(
                ErrorCode::ToolMissing,
                "coverage gate declared but no recognised build manifest",
            )),
        }
    }
}

/// `sdp verify <ws_id>`.
pub async fn verify(ctx: &Ctx, ws_id: &str, cancel: &CancellationToken) -> Result<VerificationResult> {
    let ws = WorkstreamId::parse(ws_id)?;
    let engine = VerificationEngine::new(
        ctx.paths.clone(),
        ctx.config.clone(),
        OptionalCoverage::probe(&ctx.paths.root, &ctx.config),
        RootPathValidator,
        SecureCommandRunner,
    );
    engine.verify(&ws, cancel).await
}

// ---------------------------------------------------------------------------
// Orchestrate
// ---------------------------------------------------------------------------

/// Executor that shells out to the configured external agent runner.
///
/// The command template comes from `agent_runner` in `.sdp/config.yaml`;
/// `{ws_id}` is substituted. With `SDP_USE_MOCK_EXECUTOR` set, execution is
/// a successful no-op (test hook).
pub struct ShellExecutor {
    root: PathBuf,
    template: Option<String>,
    timeout: Duration,
    /// The most recent execution summary, shared with the verifier so the
    /// verdict's `existing_work_summary` reflects what the agent reported.
    summary: Arc<Mutex<String>>,
}

impl ShellExecutor {
    fn new(ctx: &Ctx, summary: Arc<Mutex<String>>) -> Self {
        Self {
            root: ctx.paths.root.clone(),
            template: ctx.config.agent_runner.clone(),
            timeout: resolve_timeout(None, &ctx.config, TimeoutCategory::Long),
            summary,
        }
    }
}

impl Executor for ShellExecutor {
    async fn execute(
        &self,
        doc: &sdp_workstream::WorkstreamDoc,
        cancel: &CancellationToken,
    ) -> Result<ExecOutcome> {
        if std::env::var(MOCK_EXECUTOR_ENV).is_ok_and(|v| v == "1" || v == "true") {
            let summary = format!("mock execution of {}", doc.ws_id);
            *self.summary.lock().expect("summary lock") = summary.clone();
            return Ok(ExecOutcome {
                commit: None,
                summary,
            });
        }

        let template = self.template.as_deref().ok_or_else(|| {
            SdpError::new(
                ErrorCode::ToolMissing,
                "no agent_runner configured in .sdp/config.yaml",
            )
        })?;
        let command = template.replace("{ws_id}", doc.ws_id.as_str());
        let argv = split_argv(&command);
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| SdpError::new(ErrorCode::CommandRejected, "Empty command"))?;
        let cmd = safe_command(program, args)?;
        let out = sdp_exec::run(&cmd, &self.root, self.timeout, cancel).await?;
        if !out.success() {
            return Err(SdpError::new(
                ErrorCode::CommandFailed,
                format!("agent runner exited {:?}", out.exit_code),
            )
            .with_context("command", command)
            .with_context("stderr", truncate_output(&out.stderr, OUTPUT_LIMIT)));
        }
        let summary = truncate_output(&out.stdout, OUTPUT_LIMIT);
        *self.summary.lock().expect("summary lock") = summary.clone();
        Ok(ExecOutcome {
            commit: sdp_git::head_commit(&self.root).ok(),
            summary,
        })
    }
}

/// Verifier that runs the verification engine and persists a verdict
/// artifact on every verdict, PASS or FAIL.
pub struct CliVerifier {
    ctx: Ctx,
    summary: Arc<Mutex<String>>,
}

impl Verifier for CliVerifier {
    async fn verify(&self, ws_id: &WorkstreamId, cancel: &CancellationToken) -> Result<bool> {
        let result = verify(&self.ctx, ws_id.as_str(), cancel).await?;
        let doc = parse_descriptor_file(&self.ctx.paths.descriptor_file(ws_id.as_str()))?;

        let coverage = result
            .checks
            .iter()
            .find(|c| c.name == "coverage")
            .map(|c| c.passed);
        let coverage_pct = result
            .checks
            .iter()
            .find(|c| c.name == "coverage")
            .and_then(|c| c.message.split('%').next())
            .and_then(|m| m.rsplit(' ').next())
            .and_then(|v| v.parse::<f64>().ok())
            .unwrap_or(0.0);
        let commands_pass = result
            .checks
            .iter()
            .filter(|c| c.name.starts_with("command:"))
            .all(|c| c.passed);
        let files_ok = result
            .checks
            .iter()
            .filter(|c| c.name.starts_with("scope_file:"))
            .all(|c| c.passed);

        let mut summary = self.summary.lock().expect("summary lock").clone();
        if summary.trim().is_empty() {
            summary = "No pre-existing implementation was reported by the executor.".to_string();
        }

        let verdict = Verdict {
            ws_id: ws_id.to_string(),
            feature_id: doc.feature_id.to_string(),
            verdict: if result.passed {
                VerdictKind::Pass
            } else {
                VerdictKind::Fail
            },
            commit: sdp_git::head_commit(&self.ctx.paths.root).unwrap_or_default(),
            quality_gates: QualityGates {
                tests_pass: commands_pass,
                lint_clean: commands_pass,
                coverage_pct,
                coverage_threshold: doc.coverage_threshold,
                max_file_loc: max_scope_file_loc(&self.ctx.paths.root, &doc.scope_files),
                build_ok: files_ok && commands_pass,
                vet_ok: commands_pass,
            },
            ac_evidence: ac_evidence_from(&doc, &result),
            existing_work_summary: summary,
        };
        write_verdict(&self.ctx.paths, &verdict)?;

        Ok(result.passed)
    }
}

fn ac_evidence_from(
    doc: &sdp_workstream::WorkstreamDoc,
    result: &VerificationResult,
) -> Vec<AcEvidence> {
    let evidence = format!(
        "{} of {} verification checks passed",
        result.checks.iter().filter(|c| c.passed).count(),
        result.checks.len()
    );
    doc.acceptance_criteria
        .lines()
        .filter_map(|line| line.trim().strip_prefix('-'))
        .map(|ac| AcEvidence {
            ac: ac.trim().to_string(),
            met: result.passed,
            evidence: evidence.clone(),
        })
        .collect()
}

fn max_scope_file_loc(root: &Path, scope_files: &[String]) -> u64 {
    scope_files
        .iter()
        .filter_map(|f| std::fs::read_to_string(root.join(f)).ok())
        .map(|content| content.lines().count() as u64)
        .max()
        .unwrap_or(0)
}

/// `sdp orchestrate <feature_id>` / `orchestrate resume <feature_id>`.
pub async fn orchestrate(
    ctx: &Ctx,
    feature_id: &str,
    cancel: &CancellationToken,
) -> Result<RunSummary> {
    let feature = FeatureId::parse(feature_id)?;
    let summary_cell = Arc::new(Mutex::new(String::new()));
    let branch = sdp_git::current_branch(&ctx.paths.root).unwrap_or_else(|_| "main".to_string());
    let retry = RetryPolicy {
        max_retries: ctx.config.max_retries(),
        ..RetryPolicy::default()
    };
    let orchestrator = Orchestrator::new(
        ctx.paths.clone(),
        FsSource::new(ctx.paths.clone()),
        ShellExecutor::new(ctx, Arc::clone(&summary_cell)),
        CliVerifier {
            ctx: ctx.clone(),
            summary: summary_cell,
        },
        retry,
        whoami(),
        branch,
    );
    orchestrator.run(&feature, cancel).await
}

fn whoami() -> String {
    std::env::var("USER").unwrap_or_else(|_| "sdp".to_string())
}

// ---------------------------------------------------------------------------
// Worktree & session
// ---------------------------------------------------------------------------

/// `sdp worktree create <feature_id>`.
pub fn worktree_create(
    ctx: &Ctx,
    feature_id: &str,
    branch: Option<&str>,
    base: Option<&str>,
) -> Result<WorktreeInfo> {
    let feature = FeatureId::parse(feature_id)?;
    let repo = sdp_git::repo_root(&ctx.paths.root)?;
    WorktreeManager::new(repo, whoami()).create(feature.as_str(), branch, base, true)
}

/// `sdp worktree delete <feature_id>`.
pub fn worktree_delete(ctx: &Ctx, feature_id: &str) -> Result<()> {
    let feature = FeatureId::parse(feature_id)?;
    let repo = sdp_git::repo_root(&ctx.paths.root)?;
    WorktreeManager::new(repo, whoami()).delete(feature.as_str())
}

/// `sdp worktree list`.
pub fn worktree_list(ctx: &Ctx) -> Result<Vec<WorktreeListing>> {
    let repo = sdp_git::repo_root(&ctx.paths.root)?;
    WorktreeManager::new(repo, whoami()).list()
}

/// `sdp session init <feature_id>`.
pub fn session_init(ctx: &Ctx, feature_id: &str) -> Result<Session> {
    let feature = FeatureId::parse(feature_id)?;
    let branch = sdp_git::current_branch(&ctx.paths.root)?;
    let remote =
        sdp_git::current_remote(&ctx.paths.root)?.unwrap_or_else(|| "origin".to_string());
    let session =
        Session::init(feature.as_str(), &ctx.paths.root, &whoami()).sync(&branch, &remote);
    session.save(&ctx.paths.root)?;
    Ok(session)
}

/// `sdp session sync`: re-pin to the current branch/remote.
pub fn session_sync(ctx: &Ctx) -> Result<Session> {
    let session = Session::load(&ctx.paths.root)?;
    let branch = sdp_git::current_branch(&ctx.paths.root)?;
    let remote =
        sdp_git::current_remote(&ctx.paths.root)?.unwrap_or_else(|| "origin".to_string());
    let synced = session.sync(&branch, &remote);
    synced.save(&ctx.paths.root)?;
    Ok(synced)
}

/// `sdp session repair --feature <F>`: operator-supervised rebuild.
pub fn session_repair(ctx: &Ctx, feature_id: &str) -> Result<Session> {
    let feature = FeatureId::parse(feature_id)?;
    let branch = sdp_git::current_branch(&ctx.paths.root)?;
    let remote =
        sdp_git::current_remote(&ctx.paths.root)?.unwrap_or_else(|| "origin".to_string());
    Session::repair(&ctx.paths.root, feature.as_str(), &branch, &remote, &whoami())
}

// ---------------------------------------------------------------------------
// CI loop
// ---------------------------------------------------------------------------

/// Inner fixer behind the deterministic registry.
///
/// With an `agent_runner` configured it shells out to the (LLM-backed)
/// repair agent; without one it escalates, so the loop never spins on a
/// failure class nothing can repair.
pub struct AgentFixer {
    root: PathBuf,
    template: Option<String>,
    timeout: Duration,
}

impl Fixer for AgentFixer {
    async fn fix(&self, checks: &[CiCheck], cancel: &CancellationToken) -> Result<FixOutcome> {
        let names: Vec<&str> = checks.iter().map(|c| c.name.as_str()).collect();
        let Some(template) = self.template.as_deref() else {
            return Ok(FixOutcome::Escalate {
                reason: format!("no deterministic fix for failing checks: {}", names.join(", ")),
            });
        };
        let argv = split_argv(template);
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| SdpError::new(ErrorCode::CommandRejected, "Empty command"))?;
        let cmd = safe_command(program, args)?;
        let out = sdp_exec::run(&cmd, &self.root, self.timeout, cancel).await?;
        if !out.success() {
            return Ok(FixOutcome::Escalate {
                reason: format!("agent fixer exited {:?}", out.exit_code),
            });
        }
        let status = sdp_git::run_git(&self.root, &["status", "--porcelain"])?;
        if status.trim().is_empty() {
            Ok(FixOutcome::NoFix)
        } else {
            sdp_git::run_git(&self.root, &["add", "-A"])?;
            sdp_git::run_git(
                &self.root,
                &["commit", "-m", "fix(ci): agent repair for failing checks"],
            )?;
            Ok(FixOutcome::Fixed {
                description: "agent repair committed".to_string(),
            })
        }
    }
}

/// `sdp ci-loop --pr <n> --feature <F> [--max-iter N]`.
pub async fn ci_loop(
    ctx: &Ctx,
    pr: u64,
    feature_id: &str,
    max_iter: Option<u32>,
    cancel: &CancellationToken,
) -> Result<LoopOutcome> {
    let feature = FeatureId::parse(feature_id)?;
    let config = LoopConfig {
        max_iter: max_iter.unwrap_or(ctx.config.ci.max_iter),
        poll_delay: sdp_config::parse_duration(&ctx.config.ci.poll_delay)
            .unwrap_or(Duration::from_secs(30)),
        retry_delay: sdp_config::parse_duration(&ctx.config.ci.retry_delay)
            .unwrap_or(Duration::from_secs(15)),
        ..LoopConfig::default()
    };
    let run_log = RunLog::open(ctx.paths.runs_file(feature.as_str()))?;
    let fixer_log = RunLog::open(ctx.paths.runs_file(feature.as_str()))?;
    let default_timeout = resolve_timeout(None, &ctx.config, TimeoutCategory::Default);
    let inner = AgentFixer {
        root: ctx.paths.root.clone(),
        template: ctx.config.agent_runner.clone(),
        timeout: resolve_timeout(None, &ctx.config, TimeoutCategory::Long),
    };
    let fixer = CompositeFixer::new(
        ctx.paths.root.clone(),
        default_autofixers(),
        inner,
        fixer_log,
        default_timeout,
    );
    let poller = GhPoller::new(ctx.paths.root.clone(), default_timeout);
    let supervisor = Supervisor::new(ctx.paths.clone(), poller, fixer, run_log, config);
    supervisor.run(pr, feature.as_str(), cancel).await
}

// ---------------------------------------------------------------------------
// Evidence & doctor
// ---------------------------------------------------------------------------

/// One traced evidence chain.
#[derive(Debug, Clone)]
pub struct TraceOutcome {
    /// Chain file name (feature id).
    pub feature: String,
    /// Verification summary.
    pub summary: ChainSummary,
}

/// `sdp log trace [--verify] [--feature F]`.
///
/// Without `--feature`, every chain under `.sdp/evidence/` is walked.
/// Verification always happens (a broken chain must never print as
/// healthy); `--verify` only changes how much detail the caller prints.
pub fn log_trace(ctx: &Ctx, feature: Option<&str>) -> Result<Vec<TraceOutcome>> {
    let mut outcomes = Vec::new();
    let files: Vec<PathBuf> = match feature {
        Some(f) => vec![ctx.paths.evidence_file(f)],
        None => {
            let dir = ctx.paths.evidence_dir();
            let mut files = Vec::new();
            if dir.is_dir() {
                for entry in std::fs::read_dir(&dir).map_err(SdpError::from)? {
                    let path = entry.map_err(SdpError::from)?.path();
                    if path.extension().and_then(|e| e.to_str()) == Some("jsonl") {
                        files.push(path);
                    }
                }
            }
            files.sort();
            files
        }
    };
    for file in files {
        let feature = file
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("unknown")
            .to_string();
        let summary = sdp_evidence::verify_chain(&file)?;
        outcomes.push(TraceOutcome { feature, summary });
    }
    Ok(outcomes)
}

/// One doctor probe.
#[derive(Debug, Clone)]
pub struct DoctorCheck {
    /// Probe name.
    pub name: String,
    /// Whether the environment passed it.
    pub healthy: bool,
    /// Detail line.
    pub detail: String,
}

/// `sdp doctor`: environment diagnostics.
pub async fn doctor(ctx: &Ctx, cancel: &CancellationToken) -> Vec<DoctorCheck> {
    let mut checks = Vec::new();

    let git = match safe_command("git", &["--version".to_string()]) {
        Ok(cmd) => {
            match sdp_exec::run(&cmd, &ctx.paths.root, Duration::from_secs(5), cancel).await {
                Ok(out) if out.success() => (true, out.stdout.trim().to_string()),
                Ok(out) => (false, format!("git exited {:?}", out.exit_code)),
                Err(err) => (false, err.message),
            }
        }
        Err(err) => (false, err.message),
    };
    checks.push(DoctorCheck {
        name: "git".to_string(),
        healthy: git.0,
        detail: git.1,
    });

    let scaffold = ctx.paths.sdp_dir().is_dir();
    checks.push(DoctorCheck {
        name: "scaffold".to_string(),
        healthy: scaffold,
        detail: if scaffold {
            format!("{} present", ctx.paths.sdp_dir().display())
        } else {
            "run `sdp init`".to_string()
        },
    });

    let session_file = ctx.paths.session_file();
    if session_file.exists() {
        let (healthy, detail) = match Session::load(&ctx.paths.root) {
            Ok(session) => (true, format!("pinned to {}", session.expected_branch)),
            Err(err) => (false, err.message),
        };
        checks.push(DoctorCheck {
            name: "session".to_string(),
            healthy,
            detail,
        });
    }

    match log_trace(ctx, None) {
        Ok(outcomes) => {
            for outcome in outcomes {
                checks.push(DoctorCheck {
                    name: format!("evidence:{}", outcome.feature),
                    healthy: true,
                    detail: format!("{} records, chain intact", outcome.summary.records),
                });
            }
        }
        Err(err) => checks.push(DoctorCheck {
            name: "evidence".to_string(),
            healthy: false,
            detail: err.message,
        }),
    }

    info!(checks = checks.len(), "doctor finished");
    checks
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
