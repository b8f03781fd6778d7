//! Post-push CI supervision: poll, autofix, escalate.
//!
//! The supervisor polls a pull request's CI until it is green, an operator
//! must take over, or the per-feature iteration budget runs out. Red runs
//! go to the fixer; the composite fixer tries a registry of deterministic
//! autofixers (lint, format, type hints) against the failing check classes
//! before consulting the inner LLM-backed fixer. Every decision is logged
//! through an injected decision logger and the per-feature run log.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod autofix;
mod poller;
mod runlog;

pub use autofix::{AutofixCommand, CompositeFixer, default_autofixers};
pub use poller::{GhPoller, classify_check};
pub use runlog::RunLog;

use sdp_checkpoint::{CheckpointStore, Phase};
use sdp_config::SdpPaths;
use sdp_error::{ErrorCode, Result, SdpError};
use sdp_evidence::EvidenceLog;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// CI status model
// ---------------------------------------------------------------------------

/// Failure class of one CI check, used to route autofixers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// Linter findings.
    Lint,
    /// Formatting drift.
    Format,
    /// Missing or wrong type annotations.
    TypeHints,
    /// Test failures.
    Test,
    /// Compilation / build failures.
    Build,
    /// Anything unrecognised.
    Other,
}

/// One failing CI check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CiCheck {
    /// Check name as reported by CI.
    pub name: String,
    /// Routed failure class.
    pub class: FailureClass,
}

/// Observed CI state for a pull request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CiStatus {
    /// All checks pass.
    Green,
    /// At least one check failed.
    Red(Vec<CiCheck>),
    /// Checks are still running.
    Pending,
}

/// Seam: queries CI state for a pull request.
pub trait CiPoller {
    /// One status poll.
    fn poll(
        &self,
        pr: u64,
        ctx: &CancellationToken,
    ) -> impl Future<Output = Result<CiStatus>> + Send;
}

/// What a fixer did about a red run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FixOutcome {
    /// A fix was committed; re-poll.
    Fixed {
        /// What the fix was.
        description: String,
    },
    /// Nothing applicable; burn the iteration and re-poll.
    NoFix,
    /// The fixer declines; hand off to an operator.
    Escalate {
        /// Why the loop should stop.
        reason: String,
    },
}

/// Seam: repairs a red CI run.
pub trait Fixer {
    /// Attempt to fix the given failing checks.
    fn fix(
        &self,
        checks: &[CiCheck],
        ctx: &CancellationToken,
    ) -> impl Future<Output = Result<FixOutcome>> + Send;
}

/// Seam: records every loop decision.
pub trait DecisionLogger {
    /// Record one decision.
    fn log(&self, kind: &str, payload: serde_json::Value);
}

// ---------------------------------------------------------------------------
// Supervisor
// ---------------------------------------------------------------------------

/// Terminal outcome of a supervision run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopOutcome {
    /// CI went green.
    Green {
        /// Iterations consumed, counting the final green poll.
        iterations: u32,
    },
    /// The iteration budget ran out while CI was still red.
    MaxIter,
    /// An operator must take over.
    Escalated {
        /// Why.
        reason: String,
    },
}

impl LoopOutcome {
    /// The documented process exit code: 0 green, 1 escalated, 2 budget.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Green { .. } => 0,
            Self::Escalated { .. } => 1,
            Self::MaxIter => 2,
        }
    }
}

/// Tuning knobs for the supervision loop.
#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// Iteration budget (red polls handled) per feature.
    pub max_iter: u32,
    /// Delay between polls after a fix.
    pub poll_delay: Duration,
    /// Delay before re-polling a pending result.
    pub retry_delay: Duration,
    /// Pending re-polls tolerated before the poll counts as failed.
    pub max_pending_retries: u32,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_iter: 5,
            poll_delay: Duration::from_secs(30),
            retry_delay: Duration::from_secs(15),
            max_pending_retries: 20,
        }
    }
}

/// The CI-loop supervisor.
pub struct Supervisor<P, F, L> {
    paths: SdpPaths,
    poller: P,
    fixer: F,
    logger: L,
    config: LoopConfig,
}

impl<P, F, L> Supervisor<P, F, L>
where
    P: CiPoller,
    F: Fixer,
    L: DecisionLogger,
{
    /// Supervisor over a project layout.
    pub fn new(paths: SdpPaths, poller: P, fixer: F, logger: L, config: LoopConfig) -> Self {
        Self {
            paths,
            poller,
            fixer,
            logger,
            config,
        }
    }

    /// Supervise one pull request until green, escalated, or
    /// budget-exhausted.
    pub async fn run(
        &self,
        pr: u64,
        feature_id: &str,
        ctx: &CancellationToken,
    ) -> Result<LoopOutcome> {
        self.cleanup_orphan_tmp();
        self.enter_ci_phase(feature_id, pr)?;
        let evidence = EvidenceLog::open(self.paths.evidence_file(feature_id))?;

        let mut iter: u32 = 0;
        loop {
            let status = self.poll_until_settled(pr, ctx).await?;
            match status {
                CiStatus::Green => {
                    self.logger
                        .log("ci_green", serde_json::json!({"pr": pr, "iterations": iter}));
                    evidence.append(
                        "ci_green",
                        None,
                        Some(feature_id),
                        serde_json::json!({"pr": pr, "iterations": iter}),
                    )?;
                    info!(pr, iter, "CI green");
                    return Ok(LoopOutcome::Green { iterations: iter });
                }
                CiStatus::Red(checks) => {
                    if iter >= self.config.max_iter {
                        self.logger.log(
                            "ci_max_iter",
                            serde_json::json!({"pr": pr, "iterations": iter}),
                        );
                        evidence.append(
                            "ci_max_iter",
                            None,
                            Some(feature_id),
                            serde_json::json!({"pr": pr, "iterations": iter}),
                        )?;
                        warn!(pr, iter, "iteration budget exhausted");
                        return Ok(LoopOutcome::MaxIter);
                    }
                    iter += 1;
                    let names: Vec<&str> = checks.iter().map(|c| c.name.as_str()).collect();
                    self.logger.log(
                        "ci_red",
                        serde_json::json!({"pr": pr, "iteration": iter, "checks": names}),
                    );

                    match self.fixer.fix(&checks, ctx).await? {
                        FixOutcome::Fixed { description } => {
                            self.logger.log(
                                "fix_committed",
                                serde_json::json!({"pr": pr, "description": description}),
                            );
                            self.sleep(self.config.poll_delay, ctx).await?;
                        }
                        FixOutcome::NoFix => {
                            self.logger
                                .log("no_fix", serde_json::json!({"pr": pr, "iteration": iter}));
                            self.sleep(self.config.poll_delay, ctx).await?;
                        }
                        FixOutcome::Escalate { reason } => {
                            self.logger.log(
                                "escalated",
                                serde_json::json!({"pr": pr, "reason": reason, "checks": names}),
                            );
                            evidence.append(
                                "ci_escalated",
                                None,
                                Some(feature_id),
                                serde_json::json!({"pr": pr, "reason": reason, "checks": names}),
                            )?;
                            return Ok(LoopOutcome::Escalated { reason });
                        }
                    }
                }
                CiStatus::Pending => unreachable!("poll_until_settled never returns Pending"),
            }
        }
    }

    /// Poll, absorbing pending states up to `max_pending_retries`.
    async fn poll_until_settled(&self, pr: u64, ctx: &CancellationToken) -> Result<CiStatus> {
        let mut pending: u32 = 0;
        loop {
            match self.poller.poll(pr, ctx).await? {
                CiStatus::Pending => {
                    pending += 1;
                    if pending > self.config.max_pending_retries {
                        return Err(SdpError::new(
                            ErrorCode::Timeout,
                            format!("CI stayed pending across {pending} polls"),
                        )
                        .with_context("pr", pr));
                    }
                    self.sleep(self.config.retry_delay, ctx).await?;
                }
                settled => return Ok(settled),
            }
        }
    }

    /// Move the feature checkpoint into the CI phase, when one exists.
    fn enter_ci_phase(&self, feature_id: &str, pr: u64) -> Result<()> {
        let store = CheckpointStore::new(self.paths.checkpoints_dir());
        if let Some(mut cp) = store.load(feature_id)? {
            cp.phase = Phase::Ci;
            cp.pr_number = Some(pr);
            store.save(&mut cp)?;
        }
        Ok(())
    }

    /// Drop `.tmp` files a crashed writer left behind.
    fn cleanup_orphan_tmp(&self) {
        for dir in [
            self.paths.checkpoints_dir(),
            self.paths.verdicts_dir(),
            self.paths.runs_dir(),
            self.paths.sdp_dir(),
        ] {
            let Ok(entries) = std::fs::read_dir(&dir) else {
                continue;
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) == Some("tmp") {
                    if std::fs::remove_file(&path).is_ok() {
                        warn!(file = %path.display(), "removed orphan tmp file");
                    }
                }
            }
        }
    }

    /// Cancellation-aware sleep.
    async fn sleep(&self, delay: Duration, ctx: &CancellationToken) -> Result<()> {
        tokio::select! {
            () = tokio::time::sleep(delay) => Ok(()),
            () = ctx.cancelled() => Err(SdpError::new(
                ErrorCode::Timeout,
                "CI loop cancelled",
            )
            .with_context("cancelled", true)),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
