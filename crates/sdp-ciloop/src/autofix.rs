//! Deterministic-first fix strategy.
//!
//! Deterministic autofixers are cheap, predictable, and auditable, so they
//! always run before the inner (LLM-backed) fixer: each registered command
//! is tried against the failing check classes; if one produces a diff, it
//! is committed with an annotated message and the loop re-polls. The inner
//! fixer is consulted only when the deterministic layer yields nothing.

use crate::{CiCheck, DecisionLogger, FailureClass, FixOutcome, Fixer};
use sdp_error::Result;
use sdp_exec::{safe_command, split_argv};
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// One deterministic autofixer: a command that repairs a failure class.
#[derive(Debug, Clone)]
pub struct AutofixCommand {
    /// Short name for decision logs and commit messages.
    pub name: String,
    /// Failure classes this command can repair.
    pub classes: Vec<FailureClass>,
    /// The fix command (argv string, secure-layer rules apply).
    pub command: String,
}

/// The built-in registry: linter, formatter, type-hint inserter.
pub fn default_autofixers() -> Vec<AutofixCommand> {
    vec![
        AutofixCommand {
            name: "lint-fix".to_string(),
            classes: vec![FailureClass::Lint],
            command: "ruff check . --fix".to_string(),
        },
        AutofixCommand {
            name: "format".to_string(),
            classes: vec![FailureClass::Format],
            command: "ruff format .".to_string(),
        },
        AutofixCommand {
            name: "type-hints".to_string(),
            classes: vec![FailureClass::TypeHints],
            command: "ruff check . --fix --select ANN".to_string(),
        },
    ]
}

/// Composite fixer: deterministic registry first, inner fixer as fallback.
pub struct CompositeFixer<F, L> {
    root: PathBuf,
    autofixers: Vec<AutofixCommand>,
    inner: F,
    logger: L,
    timeout: Duration,
}

impl<F, L> CompositeFixer<F, L>
where
    F: Fixer,
    L: DecisionLogger,
{
    /// Composite over a worktree root.
    pub fn new(
        root: impl Into<PathBuf>,
        autofixers: Vec<AutofixCommand>,
        inner: F,
        logger: L,
        timeout: Duration,
    ) -> Self {
        Self {
            root: root.into(),
            autofixers,
            inner,
            logger,
            timeout,
        }
    }

    /// Run one autofix command and report whether it changed the tree.
    async fn try_autofix(
        &self,
        autofix: &AutofixCommand,
        ctx: &CancellationToken,
    ) -> Result<bool> {
        let argv = split_argv(&autofix.command);
        let Some((program, args)) = argv.split_first() else {
            return Ok(false);
        };
        let cmd = safe_command(program, args)?;
        let out = sdp_exec::run(&cmd, &self.root, self.timeout, ctx).await?;
        debug!(name = %autofix.name, exit = ?out.exit_code, "autofix ran");

        // A fix counts only if it actually produced a diff.
        let status = sdp_git::run_git(&self.root, &["status", "--porcelain"])?;
        Ok(!status.trim().is_empty())
    }

    /// Commit whatever the autofixer changed, annotated with its name.
    fn commit_fix(&self, autofix: &AutofixCommand, checks: &[CiCheck]) -> Result<String> {
        let names: Vec<&str> = checks.iter().map(|c| c.name.as_str()).collect();
        let message = format!(
            "fix(ci): {} for failing checks: {}",
            autofix.name,
            names.join(", ")
        );
        sdp_git::run_git(&self.root, &["add", "-A"])?;
        sdp_git::run_git(&self.root, &["commit", "-m", &message])?;
        Ok(message)
    }
}

impl<F, L> Fixer for CompositeFixer<F, L>
where
    F: Fixer + Sync,
    L: DecisionLogger + Sync,
{
    async fn fix(&self, checks: &[CiCheck], ctx: &CancellationToken) -> Result<FixOutcome> {
        for autofix in &self.autofixers {
            let applicable = checks.iter().any(|c| autofix.classes.contains(&c.class));
            if !applicable {
                continue;
            }
            self.logger.log(
                "autofix_attempt",
                serde_json::json!({"name": autofix.name, "command": autofix.command}),
            );
            match self.try_autofix(autofix, ctx).await {
                Ok(true) => {
                    let message = self.commit_fix(autofix, checks)?;
                    self.logger.log(
                        "autofix_committed",
                        serde_json::json!({"name": autofix.name, "message": message}),
                    );
                    info!(name = %autofix.name, "deterministic autofix committed");
                    return Ok(FixOutcome::Fixed {
                        description: message,
                    });
                }
                Ok(false) => {
                    self.logger.log(
                        "autofix_no_diff",
                        serde_json::json!({"name": autofix.name}),
                    );
                }
                Err(err) => {
                    // A broken autofixer never blocks the fallback path.
                    self.logger.log(
                        "autofix_error",
                        serde_json::json!({"name": autofix.name, "error": err.to_string()}),
                    );
                }
            }
        }

        self.logger.log(
            "fallback_fixer",
            serde_json::json!({"checks": checks.len()}),
        );
        self.inner.fix(checks, ctx).await
    }
}
