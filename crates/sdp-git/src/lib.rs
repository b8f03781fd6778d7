//! Git plumbing helpers.
//!
//! Thin wrappers over the `git` binary: branch/remote queries, changed-file
//! enumeration for the retrospective scope check, and worktree porcelain.
//! Git calls are short-lived, so they run synchronously; failures carry the
//! git stderr in the error context.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use sdp_error::{ErrorCode, Result, SdpError};
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::debug;

/// Run `git <args>` in `dir` and return trimmed stdout.
///
/// # Errors
///
/// `COMMAND_FAILED` with the exit code and stderr in context; a missing git
/// binary maps to `TOOL_MISSING`.
pub fn run_git(dir: &Path, args: &[&str]) -> Result<String> {
    debug!(?args, dir = %dir.display(), "git");
    let out = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .map_err(|e| {
            let code = if e.kind() == std::io::ErrorKind::NotFound {
                ErrorCode::ToolMissing
            } else {
                ErrorCode::CommandFailed
            };
            SdpError::new(code, format!("failed to run git: {e}"))
        })?;

    if !out.status.success() {
        return Err(SdpError::new(
            ErrorCode::CommandFailed,
            format!("git {} failed", args.first().copied().unwrap_or("")),
        )
        .with_context("args", args.join(" "))
        .with_context("exit_code", out.status.code())
        .with_context("stderr", String::from_utf8_lossy(&out.stderr).trim().to_string()));
    }
    Ok(String::from_utf8_lossy(&out.stdout).trim().to_string())
}

/// Top-level directory of the repository containing `dir`.
pub fn repo_root(dir: &Path) -> Result<PathBuf> {
    run_git(dir, &["rev-parse", "--show-toplevel"]).map(PathBuf::from)
}

/// Current branch name, or `HEAD` when detached.
pub fn current_branch(dir: &Path) -> Result<String> {
    run_git(dir, &["rev-parse", "--abbrev-ref", "HEAD"])
}

/// First configured remote, if any.
pub fn current_remote(dir: &Path) -> Result<Option<String>> {
    let out = run_git(dir, &["remote"])?;
    Ok(out.lines().next().map(str::to_string))
}

/// Commit hash of `HEAD`.
pub fn head_commit(dir: &Path) -> Result<String> {
    run_git(dir, &["rev-parse", "HEAD"])
}

/// Repo-relative paths changed by the last commit.
pub fn files_changed_last_commit(dir: &Path) -> Result<Vec<String>> {
    let out = run_git(
        dir,
        &["diff-tree", "--no-commit-id", "--name-only", "-r", "HEAD"],
    )?;
    Ok(lines(&out))
}

/// Repo-relative paths currently staged in the index.
pub fn files_staged(dir: &Path) -> Result<Vec<String>> {
    let out = run_git(dir, &["diff", "--cached", "--name-only"])?;
    Ok(lines(&out))
}

fn lines(out: &str) -> Vec<String> {
    out.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

// ---------------------------------------------------------------------------
// Worktree porcelain
// ---------------------------------------------------------------------------

/// One entry of `git worktree list --porcelain`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorktreeEntry {
    /// Absolute worktree path.
    pub path: PathBuf,
    /// Checked-out branch, if not detached.
    pub branch: Option<String>,
    /// `HEAD` commit of the worktree.
    pub head: Option<String>,
}

/// Add a worktree at `path`, optionally creating `branch` from `base`.
pub fn worktree_add(
    repo: &Path,
    path: &Path,
    branch: Option<&str>,
    base: Option<&str>,
    create_branch: bool,
) -> Result<()> {
    let path_s = path.display().to_string();
    let mut args: Vec<&str> = vec!["worktree", "add"];
    if create_branch {
        if let Some(b) = branch {
            args.push("-b");
            args.push(b);
        }
    }
    args.push(&path_s);
    match (create_branch, branch, base) {
        // New branch: start point is the base (or HEAD when omitted).
        (true, _, Some(b)) => args.push(b),
        (true, _, None) => {}
        // Existing ref: check it out directly.
        (false, Some(b), _) => args.push(b),
        (false, None, Some(b)) => args.push(b),
        (false, None, None) => {}
    }
    run_git(repo, &args).map(|_| ())
}

/// Remove a worktree; `force` discards local state.
pub fn worktree_remove(repo: &Path, path: &Path, force: bool) -> Result<()> {
    let path_s = path.display().to_string();
    let mut args: Vec<&str> = vec!["worktree", "remove"];
    if force {
        args.push("--force");
    }
    args.push(&path_s);
    run_git(repo, &args).map(|_| ())
}

/// Parse `git worktree list --porcelain` into entries.
pub fn worktree_list(repo: &Path) -> Result<Vec<WorktreeEntry>> {
    let out = run_git(repo, &["worktree", "list", "--porcelain"])?;
    Ok(parse_worktree_porcelain(&out))
}

/// Porcelain format: blank-line-separated stanzas of `key value` lines.
pub fn parse_worktree_porcelain(out: &str) -> Vec<WorktreeEntry> {
    let mut entries = Vec::new();
    let mut current: Option<WorktreeEntry> = None;

    for line in out.lines() {
        let line = line.trim_end();
        if line.is_empty() {
            if let Some(e) = current.take() {
                entries.push(e);
            }
            continue;
        }
        if let Some(path) = line.strip_prefix("worktree ") {
            if let Some(e) = current.take() {
                entries.push(e);
            }
            current = Some(WorktreeEntry {
                path: PathBuf::from(path),
                branch: None,
                head: None,
            });
        } else if let Some(e) = current.as_mut() {
            if let Some(head) = line.strip_prefix("HEAD ") {
                e.head = Some(head.to_string());
            } else if let Some(branch) = line.strip_prefix("branch ") {
                e.branch = Some(
                    branch
                        .strip_prefix("refs/heads/")
                        .unwrap_or(branch)
                        .to_string(),
                );
            }
            // `bare` and `detached` markers are ignored.
        }
    }
    if let Some(e) = current.take() {
        entries.push(e);
    }
    entries
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
