//! Dependency-ordered workstream execution with checkpoint resume.
//!
//! The orchestrator loads a feature's workstream descriptors, pins a
//! deterministic topological `execution_order` in the checkpoint, and
//! drives each workstream through activate → execute → deactivate →
//! verify. Retryable executor failures back off exponentially (±25%
//! jitter) up to a bound; verification failures retry on the same budget
//! and finally mark the workstream blocked. The order is never recomputed
//! on resume; re-planning requires deleting the checkpoint.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod graph;
mod source;

pub use graph::execution_order;
pub use source::{FsSource, MemSource, WorkstreamSource};

use sdp_checkpoint::{Checkpoint, CheckpointStore, FeatureStatus};
use sdp_config::SdpPaths;
use sdp_error::{ErrorCode, Result, SdpError};
use sdp_evidence::EvidenceLog;
use sdp_guard::Guard;
use sdp_workstream::{FeatureId, WorkstreamDoc, WorkstreamId};
use std::collections::BTreeMap;
use std::future::Future;
use std::time::{Duration, SystemTime};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// Seams
// ---------------------------------------------------------------------------

/// What an executor reports after driving one workstream to completion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutcome {
    /// Commit produced by the execution, if any.
    pub commit: Option<String>,
    /// Free-form execution summary.
    pub summary: String,
}

/// Seam: drives a single workstream to completion (the external agent
/// runner).
pub trait Executor {
    /// Execute one workstream.
    fn execute(
        &self,
        doc: &WorkstreamDoc,
        ctx: &CancellationToken,
    ) -> impl Future<Output = Result<ExecOutcome>> + Send;
}

/// Seam: post-execution verification.
pub trait Verifier {
    /// Verify one workstream; `Ok(true)` is a PASS verdict.
    fn verify(
        &self,
        ws_id: &WorkstreamId,
        ctx: &CancellationToken,
    ) -> impl Future<Output = Result<bool>> + Send;
}

// ---------------------------------------------------------------------------
// Retry policy
// ---------------------------------------------------------------------------

/// Bounded exponential backoff with jitter.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the initial attempt.
    pub max_retries: u32,
    /// Base delay for attempt zero.
    pub base_delay: Duration,
    /// Delay cap.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (zero-indexed), with ±25%
    /// jitter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = 2u64.saturating_pow(attempt);
        let nominal = (self.base_delay.as_millis() as u64).saturating_mul(exp);
        let capped = nominal.min(self.max_delay.as_millis() as u64);
        if capped == 0 {
            return Duration::ZERO;
        }
        // Clock-derived jitter in [-25%, +25%].
        let nanos = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .subsec_nanos() as u64;
        let span = capped / 2;
        let jitter = if span > 0 {
            (nanos.wrapping_mul(attempt as u64 + 1)) % span
        } else {
            0
        };
        Duration::from_millis(capped - span / 2 + jitter)
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Summary of an orchestration run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// Final feature status.
    pub status: FeatureStatus,
    /// Workstreams completed across all runs of this feature.
    pub completed: Vec<String>,
    /// Workstreams recorded as failed.
    pub failed: Vec<String>,
}

/// The workstream orchestrator, generic over its seams.
pub struct Orchestrator<S, E, V> {
    paths: SdpPaths,
    source: S,
    executor: E,
    verifier: V,
    store: CheckpointStore,
    retry: RetryPolicy,
    agent_id: String,
    branch: String,
}

impl<S, E, V> Orchestrator<S, E, V>
where
    S: WorkstreamSource,
    E: Executor,
    V: Verifier,
{
    /// Orchestrator over a project layout.
    pub fn new(
        paths: SdpPaths,
        source: S,
        executor: E,
        verifier: V,
        retry: RetryPolicy,
        agent_id: impl Into<String>,
        branch: impl Into<String>,
    ) -> Self {
        let store = CheckpointStore::new(paths.checkpoints_dir());
        Self {
            paths,
            source,
            executor,
            verifier,
            store,
            retry,
            agent_id: agent_id.into(),
            branch: branch.into(),
        }
    }

    /// Run (or resume) a feature.
    ///
    /// Resume is idempotent: ids already in `completed_ws` are skipped, the
    /// pinned `execution_order` is reused, and a fully-completed feature
    /// returns success without touching anything.
    pub async fn run(&self, feature: &FeatureId, ctx: &CancellationToken) -> Result<RunSummary> {
        let docs = self.source.load_feature(feature)?;
        if docs.is_empty() {
            return Err(SdpError::new(
                ErrorCode::IoFailed,
                format!("no workstream descriptors found for {feature}"),
            ));
        }
        let by_id: BTreeMap<&WorkstreamId, &WorkstreamDoc> =
            docs.iter().map(|d| (&d.ws_id, d)).collect();

        let mut checkpoint = match self.store.load(feature.as_str())? {
            Some(cp) => {
                if cp.status == FeatureStatus::Completed {
                    info!(%feature, "feature already completed; resume is a no-op");
                    return Ok(summary(&cp));
                }
                info!(%feature, completed = cp.completed_ws.len(), "resuming from checkpoint");
                cp
            }
            None => {
                // Cycles are fatal before anything runs.
                let order = execution_order(&docs)?;
                let order: Vec<String> = order.into_iter().map(String::from).collect();
                let mut cp = Checkpoint::new(feature.as_str(), &self.agent_id, &self.branch, order);
                self.store.save(&mut cp)?;
                cp
            }
        };

        let evidence = EvidenceLog::open(self.paths.evidence_file(feature.as_str()))?;
        let guard = Guard::new(self.paths.clone());
        let order = checkpoint.execution_order.clone();

        for ws_raw in &order {
            if checkpoint.is_completed(ws_raw) {
                continue;
            }
            let ws_id = WorkstreamId::parse(ws_raw)?;
            let doc = *by_id.get(&ws_id).ok_or_else(|| {
                SdpError::new(
                    ErrorCode::IoFailed,
                    format!("descriptor for pinned workstream '{ws_id}' is gone; delete the checkpoint to re-plan"),
                )
            })?;

            // Dependencies are earlier in the pinned order; any one not
            // completed means a previous run failed it.
            if let Some(dep) = doc
                .depends_on
                .iter()
                .find(|d| !checkpoint.is_completed(d.as_str()))
            {
                checkpoint.status = FeatureStatus::Blocked;
                self.store.save(&mut checkpoint)?;
                evidence.append(
                    "ws_blocked",
                    Some(ws_id.as_str()),
                    Some(feature.as_str()),
                    serde_json::json!({"unmet_dependency": dep.as_str()}),
                )?;
                return Err(SdpError::new(
                    ErrorCode::WsBlocked,
                    format!("workstream '{ws_id}' is blocked on incomplete '{dep}'"),
                )
                .with_context("ws_id", ws_id.as_str())
                .with_context("dependency", dep.as_str()));
            }

            self.run_workstream(&ws_id, doc, feature, &guard, &evidence, &mut checkpoint, ctx)
                .await?;
        }

        checkpoint.status = FeatureStatus::Completed;
        self.store.save(&mut checkpoint)?;
        evidence.append(
            "feature_completed",
            None,
            Some(feature.as_str()),
            serde_json::json!({"workstreams": checkpoint.completed_ws.len()}),
        )?;
        info!(%feature, "feature completed");
        Ok(summary(&checkpoint))
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_workstream(
        &self,
        ws_id: &WorkstreamId,
        doc: &WorkstreamDoc,
        feature: &FeatureId,
        guard: &Guard,
        evidence: &EvidenceLog,
        checkpoint: &mut Checkpoint,
        ctx: &CancellationToken,
    ) -> Result<()> {
        let mut attempt: u32 = 0;
        loop {
            guard.activate_with(ws_id, doc.scope_files.clone())?;
            let executed = self.executor.execute(doc, ctx).await;
            guard.deactivate()?;

            match executed {
                Err(err) if err.is_retryable() && attempt < self.retry.max_retries => {
                    warn!(%ws_id, attempt, %err, "retryable executor failure; backing off");
                    evidence.append(
                        "ws_retry",
                        Some(ws_id.as_str()),
                        Some(feature.as_str()),
                        serde_json::json!({"attempt": attempt, "error": err.code.as_str()}),
                    )?;
                    self.sleep(self.retry.delay_for(attempt), ctx).await?;
                    attempt += 1;
                    continue;
                }
                Err(err) => {
                    checkpoint.mark_failed(ws_id.as_str());
                    checkpoint.status = FeatureStatus::Failed;
                    self.store.save(checkpoint)?;
                    evidence.append(
                        "ws_failed",
                        Some(ws_id.as_str()),
                        Some(feature.as_str()),
                        serde_json::json!({"error": err.code.as_str(), "message": err.message}),
                    )?;
                    return Err(err);
                }
                Ok(outcome) => {
                    let passed = self.verifier.verify(ws_id, ctx).await?;
                    if passed {
                        evidence.append(
                            "ws_completed",
                            Some(ws_id.as_str()),
                            Some(feature.as_str()),
                            serde_json::json!({
                                "attempts": attempt + 1,
                                "commit": outcome.commit,
                            }),
                        )?;
                        checkpoint.mark_completed(ws_id.as_str());
                        self.store.save(checkpoint)?;
                        info!(%ws_id, "workstream completed");
                        return Ok(());
                    }
                    if attempt < self.retry.max_retries {
                        warn!(%ws_id, attempt, "verification failed; retrying");
                        evidence.append(
                            "ws_retry",
                            Some(ws_id.as_str()),
                            Some(feature.as_str()),
                            serde_json::json!({"attempt": attempt, "error": "verification_failed"}),
                        )?;
                        self.sleep(self.retry.delay_for(attempt), ctx).await?;
                        attempt += 1;
                        continue;
                    }
                    checkpoint.mark_failed(ws_id.as_str());
                    checkpoint.status = FeatureStatus::Blocked;
                    self.store.save(checkpoint)?;
                    evidence.append(
                        "ws_blocked",
                        Some(ws_id.as_str()),
                        Some(feature.as_str()),
                        serde_json::json!({"attempts": attempt + 1, "error": "verification_failed"}),
                    )?;
                    return Err(SdpError::new(
                        ErrorCode::WsBlocked,
                        format!(
                            "workstream '{ws_id}' blocked: verification failed {} times",
                            attempt + 1
                        ),
                    )
                    .with_context("ws_id", ws_id.as_str())
                    .with_context("attempts", attempt + 1));
                }
            }
        }
    }

    /// Cancellation-aware sleep: never a bare timer.
    async fn sleep(&self, delay: Duration, ctx: &CancellationToken) -> Result<()> {
        tokio::select! {
            () = tokio::time::sleep(delay) => Ok(()),
            () = ctx.cancelled() => Err(SdpError::new(
                ErrorCode::Timeout,
                "orchestration cancelled",
            )
            .with_context("cancelled", true)),
        }
    }
}

fn summary(cp: &Checkpoint) -> RunSummary {
    RunSummary {
        status: cp.status,
        completed: cp.completed_ws.clone(),
        failed: cp.failed_ws.clone(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use sdp_workstream::parse_descriptor;
    use std::sync::Mutex;
    use tempfile::TempDir;

    fn doc(ws: &str, deps: &[&str]) -> WorkstreamDoc {
        let deps_yaml = if deps.is_empty() {
            String::new()
        } else {
            let items: Vec<String> = deps.iter().map(|d| format!("  - {d}")).collect();
            format!("depends_on:\n{}\n", items.join("\n"))
        };
        let raw = format!(
            "---\nws_id: {ws}\ntitle: t\nstatus: open\nfeature_id: F070\n{deps_yaml}---\n\n## Scope Files\n\n- `src/x.rs`\n"
        );
        parse_descriptor(&raw).unwrap()
    }

    /// Executor scripted per-workstream with a queue of outcomes.
    #[derive(Default)]
    struct FakeExecutor {
        script: Mutex<BTreeMap<String, Vec<Result<ExecOutcome>>>>,
        calls: Mutex<Vec<String>>,
    }

    impl FakeExecutor {
        fn script_ws(&self, ws: &str, outcomes: Vec<Result<ExecOutcome>>) {
            self.script.lock().unwrap().insert(ws.to_string(), outcomes);
        }
    }

    impl Executor for FakeExecutor {
        async fn execute(
            &self,
            doc: &WorkstreamDoc,
            _ctx: &CancellationToken,
        ) -> Result<ExecOutcome> {
            self.calls.lock().unwrap().push(doc.ws_id.to_string());
            let mut script = self.script.lock().unwrap();
            match script.get_mut(doc.ws_id.as_str()) {
                Some(queue) if !queue.is_empty() => queue.remove(0),
                _ => Ok(ExecOutcome::default()),
            }
        }
    }

    /// Verifier scripted with per-workstream pass/fail sequences.
    #[derive(Default)]
    struct FakeVerifier {
        script: Mutex<BTreeMap<String, Vec<bool>>>,
    }

    impl FakeVerifier {
        fn script_ws(&self, ws: &str, verdicts: Vec<bool>) {
            self.script.lock().unwrap().insert(ws.to_string(), verdicts);
        }
    }

    impl Verifier for FakeVerifier {
        async fn verify(&self, ws_id: &WorkstreamId, _ctx: &CancellationToken) -> Result<bool> {
            let mut script = self.script.lock().unwrap();
            Ok(match script.get_mut(ws_id.as_str()) {
                Some(queue) if !queue.is_empty() => queue.remove(0),
                _ => true,
            })
        }
    }

    fn orchestrator(
        tmp: &TempDir,
        docs: Vec<WorkstreamDoc>,
    ) -> Orchestrator<MemSource, FakeExecutor, FakeVerifier> {
        let paths = SdpPaths::new(tmp.path());
        paths.init_scaffold().unwrap();
        let retry = RetryPolicy {
            max_retries: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        };
        Orchestrator::new(
            paths,
            MemSource::new(docs),
            FakeExecutor::default(),
            FakeVerifier::default(),
            retry,
            "test-agent",
            "feat/f070",
        )
    }

    fn feature() -> FeatureId {
        FeatureId::parse("F070").unwrap()
    }

    #[tokio::test]
    async fn runs_workstreams_in_topological_order() {
        let tmp = TempDir::new().unwrap();
        let orch = orchestrator(
            &tmp,
            vec![
                doc("00-070-02", &["00-070-01"]),
                doc("00-070-01", &[]),
                doc("00-070-03", &["00-070-02"]),
            ],
        );
        let summary = orch.run(&feature(), &CancellationToken::new()).await.unwrap();

        assert_eq!(summary.status, FeatureStatus::Completed);
        assert_eq!(
            summary.completed,
            vec!["00-070-01", "00-070-02", "00-070-03"]
        );
        assert_eq!(
            *orch.executor.calls.lock().unwrap(),
            vec!["00-070-01", "00-070-02", "00-070-03"]
        );
        // Evidence chain is intact and linearises the run.
        let chain = sdp_evidence::verify_chain(&orch.paths.evidence_file("F070")).unwrap();
        assert_eq!(chain.records, 4); // 3 completions + feature_completed
    }

    #[tokio::test]
    async fn cycle_is_fatal_before_any_execution() {
        let tmp = TempDir::new().unwrap();
        let orch = orchestrator(
            &tmp,
            vec![doc("00-070-01", &["00-070-02"]), doc("00-070-02", &["00-070-01"])],
        );
        let err = orch.run(&feature(), &CancellationToken::new()).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::DependencyCycle);
        assert!(orch.executor.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn retryable_failure_backs_off_then_succeeds() {
        let tmp = TempDir::new().unwrap();
        let orch = orchestrator(&tmp, vec![doc("00-070-01", &[])]);
        orch.executor.script_ws(
            "00-070-01",
            vec![
                Err(SdpError::new(ErrorCode::IoFailed, "transient")),
                Ok(ExecOutcome::default()),
            ],
        );
        let summary = orch.run(&feature(), &CancellationToken::new()).await.unwrap();
        assert_eq!(summary.status, FeatureStatus::Completed);
        assert_eq!(orch.executor.calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn non_retryable_failure_fails_the_feature() {
        let tmp = TempDir::new().unwrap();
        let orch = orchestrator(&tmp, vec![doc("00-070-01", &[]), doc("00-070-02", &[])]);
        orch.executor.script_ws(
            "00-070-01",
            vec![Err(SdpError::new(ErrorCode::ScopeViolation, "out of scope"))],
        );
        let err = orch.run(&feature(), &CancellationToken::new()).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::ScopeViolation);

        let cp = orch.store.load("F070").unwrap().unwrap();
        assert_eq!(cp.status, FeatureStatus::Failed);
        assert_eq!(cp.failed_ws, vec!["00-070-01"]);
        // The second workstream never started.
        assert_eq!(orch.executor.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn exhausted_verification_marks_blocked() {
        let tmp = TempDir::new().unwrap();
        let orch = orchestrator(&tmp, vec![doc("00-070-01", &[])]);
        orch.verifier
            .script_ws("00-070-01", vec![false, false, false]);
        let err = orch.run(&feature(), &CancellationToken::new()).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::WsBlocked);
        // Initial attempt + max_retries.
        assert_eq!(orch.executor.calls.lock().unwrap().len(), 3);

        let cp = orch.store.load("F070").unwrap().unwrap();
        assert_eq!(cp.status, FeatureStatus::Blocked);
    }

    #[tokio::test]
    async fn resume_skips_completed_workstreams() {
        let tmp = TempDir::new().unwrap();
        let docs = vec![doc("00-070-01", &[]), doc("00-070-02", &["00-070-01"])];

        // First run: second workstream blocks.
        let orch = orchestrator(&tmp, docs.clone());
        orch.verifier
            .script_ws("00-070-02", vec![false, false, false]);
        orch.run(&feature(), &CancellationToken::new()).await.unwrap_err();
        assert_eq!(orch.executor.calls.lock().unwrap().len(), 4);

        // Second run resumes: only the blocked workstream re-executes.
        let orch2 = orchestrator(&tmp, docs);
        let summary = orch2.run(&feature(), &CancellationToken::new()).await.unwrap();
        assert_eq!(summary.status, FeatureStatus::Completed);
        assert_eq!(*orch2.executor.calls.lock().unwrap(), vec!["00-070-02"]);
    }

    #[tokio::test]
    async fn resume_of_completed_feature_is_a_noop() {
        let tmp = TempDir::new().unwrap();
        let docs = vec![doc("00-070-01", &[])];
        let orch = orchestrator(&tmp, docs.clone());
        orch.run(&feature(), &CancellationToken::new()).await.unwrap();

        let orch2 = orchestrator(&tmp, docs);
        let summary = orch2.run(&feature(), &CancellationToken::new()).await.unwrap();
        assert_eq!(summary.status, FeatureStatus::Completed);
        assert!(orch2.executor.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unmet_dependency_in_pinned_order_blocks() {
        let tmp = TempDir::new().unwrap();
        let docs = vec![doc("00-070-01", &[]), doc("00-070-02", &["00-070-01"])];
        let orch = orchestrator(&tmp, docs);

        // A checkpoint whose pinned order jumps straight to the dependent
        // workstream (descriptors were re-planned without deleting it).
        let mut cp = Checkpoint::new(
            "F070",
            "test-agent",
            "feat/f070",
            vec!["00-070-02".to_string()],
        );
        orch.store.save(&mut cp).unwrap();

        let err = orch.run(&feature(), &CancellationToken::new()).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::WsBlocked);
        assert!(orch.executor.calls.lock().unwrap().is_empty());

        let cp = orch.store.load("F070").unwrap().unwrap();
        assert_eq!(cp.status, FeatureStatus::Blocked);
    }

    #[tokio::test]
    async fn cancellation_surfaces_during_backoff() {
        let tmp = TempDir::new().unwrap();
        let orch = orchestrator(&tmp, vec![doc("00-070-01", &[])]);
        orch.executor.script_ws(
            "00-070-01",
            vec![Err(SdpError::new(ErrorCode::IoFailed, "transient"))],
        );
        let ctx = CancellationToken::new();
        ctx.cancel();
        let err = orch.run(&feature(), &ctx).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::Timeout);
        assert_eq!(err.context["cancelled"], serde_json::json!(true));
    }

    #[test]
    fn backoff_grows_and_caps() {
        let policy = RetryPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
        };
        let d0 = policy.delay_for(0);
        let d4 = policy.delay_for(4);
        // Nominal 100ms and 1600ms, each within ±25%.
        assert!(d0 >= Duration::from_millis(75) && d0 <= Duration::from_millis(125));
        assert!(d4 >= Duration::from_millis(1200) && d4 <= Duration::from_millis(2000));
        // Far past the cap, the delay stays near 30 s.
        let d20 = policy.delay_for(20);
        assert!(d20 <= Duration::from_millis(37_500));
        assert!(d20 >= Duration::from_millis(22_500));
    }
}
