//! Production CI poller over the `gh` CLI.

use crate::{CiCheck, CiPoller, CiStatus, FailureClass};
use sdp_error::{ErrorCode, Result, SdpError};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Route a CI check name to a failure class by keyword.
pub fn classify_check(name: &str) -> FailureClass {
    let lower = name.to_ascii_lowercase();
    if lower.contains("format") || lower.contains("fmt") {
        FailureClass::Format
    } else if lower.contains("lint") || lower.contains("clippy") || lower.contains("eslint") {
        FailureClass::Lint
    } else if lower.contains("mypy") || lower.contains("type") {
        FailureClass::TypeHints
    } else if lower.contains("test") || lower.contains("pytest") {
        FailureClass::Test
    } else if lower.contains("build") || lower.contains("compile") {
        FailureClass::Build
    } else {
        FailureClass::Other
    }
}

/// One row of `gh pr checks --json name,state`.
#[derive(Debug, Deserialize)]
struct GhCheck {
    name: String,
    state: String,
}

/// Poller shelling out to `gh pr checks` (the issue tracker stays a thin
/// shell wrapper, never an HTTP client).
#[derive(Debug, Clone)]
pub struct GhPoller {
    repo_root: PathBuf,
    timeout: Duration,
}

impl GhPoller {
    /// Poller running `gh` inside `repo_root`.
    pub fn new(repo_root: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            repo_root: repo_root.into(),
            timeout,
        }
    }

    /// Interpret `gh pr checks` JSON into a [`CiStatus`].
    pub fn interpret(raw: &str) -> Result<CiStatus> {
        let checks: Vec<GhCheck> = serde_json::from_str(raw).map_err(|e| {
            SdpError::new(
                ErrorCode::CommandFailed,
                format!("unparseable gh pr checks output: {e}"),
            )
        })?;

        let mut failing = Vec::new();
        let mut pending = false;
        for check in checks {
            match check.state.to_ascii_uppercase().as_str() {
                "FAILURE" | "ERROR" | "CANCELLED" | "TIMED_OUT" => failing.push(CiCheck {
                    class: classify_check(&check.name),
                    name: check.name,
                }),
                "PENDING" | "QUEUED" | "IN_PROGRESS" | "EXPECTED" => pending = true,
                _ => {}
            }
        }
        if !failing.is_empty() {
            Ok(CiStatus::Red(failing))
        } else if pending {
            Ok(CiStatus::Pending)
        } else {
            Ok(CiStatus::Green)
        }
    }
}

impl CiPoller for GhPoller {
    async fn poll(&self, pr: u64, ctx: &CancellationToken) -> Result<CiStatus> {
        let pr_arg = pr.to_string();
        let args: Vec<String> = ["pr", "checks", &pr_arg, "--json", "name,state"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let cmd = sdp_exec::safe_command("gh", &args)?;
        let out = sdp_exec::run(&cmd, &self.repo_root, self.timeout, ctx).await?;
        debug!(pr, exit = ?out.exit_code, "polled CI");
        // gh exits non-zero when checks fail; the JSON is still on stdout.
        Self::interpret(&out.stdout)
    }
}
