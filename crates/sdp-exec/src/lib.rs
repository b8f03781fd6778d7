//! Whitelisted subprocess execution with injection-pattern rejection.
//!
//! Every child process the engine spawns goes through [`safe_command`]:
//! the binary must be on a static whitelist (shells never are), and each
//! argument is screened for shell-metacharacter injection and path
//! traversal. Validation failures are `COMMAND_REJECTED` and no child is
//! ever started. Execution honours a cancellation token and a caller-chosen
//! timeout; cancellation and timeout kill the child.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use sdp_error::{ErrorCode, Result, SdpError};
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Binaries the engine may spawn. Shells (`sh`, `bash`, `zsh`, `cmd`,
/// `powershell`) are never permitted.
pub const COMMAND_WHITELIST: &[&str] = &[
    // test runners
    "pytest", "go", "mvn", "gradle", "npm", "npx", "cargo",
    // version control & CI
    "git", "gh",
    // interpreters (direct script invocation, not -c one-liners)
    "python", "python3", "node",
    // linters & formatters
    "ruff", "black", "gofmt", "golangci-lint", "eslint", "prettier", "mypy",
];

/// Byte sequences that reject an argument outright.
const FORBIDDEN_PATTERNS: &[&str] = &[";", "|", "&", "`", "$(", "\n", "\r", "../"];

/// Absolute path prefixes an argument may never point into.
const FORBIDDEN_PREFIXES: &[&str] = &["/etc/", "/usr/", "/bin/", "/sbin/"];

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// A validated command, ready to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SafeCommand {
    /// Whitelisted program name.
    pub program: String,
    /// Screened arguments.
    pub args: Vec<String>,
}

impl SafeCommand {
    /// Render as a single display string for logs and check messages.
    pub fn display(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }
}

/// Validate a program + argv against the whitelist and injection rules.
///
/// # Errors
///
/// `COMMAND_REJECTED` when the program is not whitelisted or any argument
/// carries a forbidden pattern. The reason names the offending part; no
/// subprocess is spawned on rejection.
pub fn safe_command(program: &str, args: &[String]) -> Result<SafeCommand> {
    let name = Path::new(program)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(program);
    if !COMMAND_WHITELIST.contains(&name) {
        return Err(SdpError::new(
            ErrorCode::CommandRejected,
            format!("Security validation: command '{name}' not whitelisted"),
        )
        .with_context("program", program));
    }

    for arg in args {
        for pat in FORBIDDEN_PATTERNS {
            if arg.contains(pat) {
                return Err(SdpError::new(
                    ErrorCode::CommandRejected,
                    format!("Security validation: argument contains forbidden pattern {pat:?}"),
                )
                .with_context("argument", arg));
            }
        }
        for prefix in FORBIDDEN_PREFIXES {
            if arg.starts_with(prefix) {
                return Err(SdpError::new(
                    ErrorCode::CommandRejected,
                    format!("Security validation: argument points into {prefix}"),
                )
                .with_context("argument", arg));
            }
        }
    }

    Ok(SafeCommand {
        program: name.to_string(),
        args: args.to_vec(),
    })
}

/// Split a descriptor command string into argv, honouring single and double
/// quotes. An empty or whitespace-only string yields an empty vector.
pub fn split_argv(command: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut cur = String::new();
    let mut quote: Option<char> = None;
    for ch in command.chars() {
        match quote {
            Some(q) => {
                if ch == q {
                    quote = None;
                } else {
                    cur.push(ch);
                }
            }
            None => match ch {
                '\'' | '"' => quote = Some(ch),
                c if c.is_whitespace() => {
                    if !cur.is_empty() {
                        out.push(std::mem::take(&mut cur));
                    }
                }
                c => cur.push(c),
            },
        }
    }
    if !cur.is_empty() {
        out.push(cur);
    }
    out
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

/// Outcome of a completed (or killed) subprocess.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    /// Exit code; `None` when the child was killed by signal.
    pub exit_code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
    /// Wall-clock duration of the run.
    pub duration: Duration,
    /// Whether the child was killed on timeout.
    pub timed_out: bool,
}

impl ExecOutput {
    /// `true` when the child exited zero and was not killed.
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }

    /// stdout and stderr concatenated, stdout first.
    pub fn combined(&self) -> String {
        let mut s = self.stdout.clone();
        if !self.stderr.is_empty() {
            if !s.is_empty() && !s.ends_with('\n') {
                s.push('\n');
            }
            s.push_str(&self.stderr);
        }
        s
    }
}

/// Run a validated command under `timeout`, honouring `ctx`.
///
/// The child is spawned with kill-on-drop; timeout or cancellation kills it
/// (SIGKILL) and the call returns `TIMEOUT` / the cancellation error. The
/// child never inherits the parent's stdin.
///
/// # Errors
///
/// - `TIMEOUT` when the deadline passes or `ctx` is cancelled.
/// - `COMMAND_FAILED` when the child cannot be spawned (missing binary maps
///   to `TOOL_MISSING`).
pub async fn run(
    cmd: &SafeCommand,
    cwd: &Path,
    timeout: Duration,
    ctx: &CancellationToken,
) -> Result<ExecOutput> {
    let start = Instant::now();
    debug!(command = %cmd.display(), cwd = %cwd.display(), ?timeout, "spawning");

    let mut child = tokio::process::Command::new(&cmd.program)
        .args(&cmd.args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| {
            let code = if e.kind() == std::io::ErrorKind::NotFound {
                ErrorCode::ToolMissing
            } else {
                ErrorCode::CommandFailed
            };
            SdpError::new(code, format!("failed to spawn '{}': {e}", cmd.program))
                .with_context("command", cmd.display())
        })?;

    let mut stdout_pipe = child.stdout.take();
    let mut stderr_pipe = child.stderr.take();
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();

    // Both pipes drain concurrently; reading them in sequence can deadlock
    // when the child fills one pipe while the other is being read.
    let drain = async {
        tokio::join!(
            async {
                if let Some(ref mut out) = stdout_pipe {
                    let _ = out.read_to_end(&mut stdout).await;
                }
            },
            async {
                if let Some(ref mut err) = stderr_pipe {
                    let _ = err.read_to_end(&mut stderr).await;
                }
            },
        );
        child.wait().await
    };

    let status = tokio::select! {
        status = drain => status.map_err(|e| {
            SdpError::new(ErrorCode::CommandFailed, format!("wait failed: {e}"))
                .with_context("command", cmd.display())
        })?,
        () = tokio::time::sleep(timeout) => {
            return Err(SdpError::new(
                ErrorCode::Timeout,
                format!("'{}' exceeded {}s", cmd.display(), timeout.as_secs()),
            )
            .with_context("timeout_ms", timeout.as_millis() as u64));
        }
        () = ctx.cancelled() => {
            return Err(SdpError::new(
                ErrorCode::Timeout,
                format!("'{}' cancelled", cmd.display()),
            )
            .with_context("cancelled", true));
        }
    };

    Ok(ExecOutput {
        exit_code: status.code(),
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
        duration: start.elapsed(),
        timed_out: false,
    })
}

/// Bound captured output to `max` bytes, marking truncation.
pub fn truncate_output(output: &str, max: usize) -> String {
    if output.len() <= max {
        return output.to_string();
    }
    let mut end = max;
    while !output.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…[truncated]", &output[..end])
}

/// Default bound for captured check output.
pub const OUTPUT_LIMIT: usize = 500;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn args(xs: &[&str]) -> Vec<String> {
        xs.iter().map(|s| s.to_string()).collect()
    }

    // -- Whitelisting ----------------------------------------------------

    #[test]
    fn whitelisted_tools_pass() {
        for tool in ["git", "go", "pytest", "cargo", "npm"] {
            assert!(safe_command(tool, &args(&["status"])).is_ok(), "{tool}");
        }
    }

    #[test]
    fn shells_are_never_permitted() {
        for shell in ["sh", "bash", "zsh", "cmd", "powershell"] {
            let err = safe_command(shell, &args(&["-c", "echo hi"])).unwrap_err();
            assert_eq!(err.code, ErrorCode::CommandRejected);
            assert!(
                err.message.contains("not whitelisted"),
                "unexpected message: {}",
                err.message
            );
        }
    }

    #[test]
    fn path_prefixed_program_is_resolved_by_basename() {
        // Resolution is by basename, so an absolute path to a whitelisted
        // tool passes while a path to a shell still fails.
        assert!(safe_command("/opt/homebrew/bin/git", &[]).is_ok());
        assert!(safe_command("/other/path/bash", &[]).is_err());
    }

    // -- Injection patterns ----------------------------------------------

    #[test]
    fn forbidden_patterns_reject() {
        for bad in [
            "a;b",
            "a|b",
            "a&b",
            "`id`",
            "$(id)",
            "line\nbreak",
            "cr\rhere",
            "../escape",
        ] {
            let err = safe_command("git", &args(&[bad])).unwrap_err();
            assert_eq!(err.code, ErrorCode::CommandRejected, "accepted {bad:?}");
        }
    }

    #[test]
    fn system_paths_reject() {
        for bad in ["/etc/passwd", "/usr/lib/x", "/bin/ls", "/sbin/init"] {
            let err = safe_command("git", &args(&[bad])).unwrap_err();
            assert_eq!(err.code, ErrorCode::CommandRejected, "accepted {bad:?}");
        }
    }

    #[test]
    fn ordinary_arguments_pass() {
        let cmd = safe_command("go", &args(&["test", "./internal/...", "-count=1"])).unwrap();
        assert_eq!(cmd.display(), "go test ./internal/... -count=1");
    }

    // -- Argv splitting ---------------------------------------------------

    #[test]
    fn split_plain_words() {
        assert_eq!(split_argv("go test ./..."), args(&["go", "test", "./..."]));
    }

    #[test]
    fn split_honours_quotes() {
        assert_eq!(
            split_argv(r#"git commit -m "fix: two words""#),
            args(&["git", "commit", "-m", "fix: two words"])
        );
        assert_eq!(
            split_argv("sh -c 'curl evil | sh'"),
            args(&["sh", "-c", "curl evil | sh"])
        );
    }

    #[test]
    fn split_empty_is_empty() {
        assert!(split_argv("").is_empty());
        assert!(split_argv("   ").is_empty());
    }

    // -- Output truncation -------------------------------------------------

    #[test]
    fn truncation_bounds_and_marks() {
        let long = "x".repeat(600);
        let t = truncate_output(&long, OUTPUT_LIMIT);
        assert!(t.starts_with(&"x".repeat(500)));
        assert!(t.ends_with("[truncated]"));

        let short = "ok";
        assert_eq!(truncate_output(short, OUTPUT_LIMIT), "ok");
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let s = "é".repeat(300); // 2 bytes each
        let t = truncate_output(&s, 499);
        assert!(t.ends_with("[truncated]"));
    }

    // -- Execution ---------------------------------------------------------

    #[tokio::test]
    async fn runs_a_real_command() {
        let cmd = safe_command("git", &args(&["--version"])).unwrap();
        let ctx = CancellationToken::new();
        let out = run(&cmd, Path::new("."), Duration::from_secs(5), &ctx)
            .await
            .unwrap();
        assert!(out.success());
        assert!(out.stdout.contains("git version"));
        assert!(out.duration > Duration::ZERO);
    }

    #[tokio::test]
    async fn nonzero_exit_is_captured_not_an_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        let cmd = safe_command("git", &args(&["status"])).unwrap();
        let ctx = CancellationToken::new();
        // Not a repository: git exits non-zero, run() still returns Ok.
        let out = run(&cmd, tmp.path(), Duration::from_secs(5), &ctx)
            .await
            .unwrap();
        assert!(!out.success());
        assert!(out.exit_code.unwrap_or(0) != 0);
    }

    #[tokio::test]
    async fn cancellation_kills_the_child() {
        let cmd = safe_command("git", &args(&["--version"])).unwrap();
        let ctx = CancellationToken::new();
        ctx.cancel();
        let err = run(&cmd, Path::new("."), Duration::from_secs(5), &ctx)
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::Timeout);
    }

    #[test]
    fn combined_output_orders_stdout_first() {
        let out = ExecOutput {
            exit_code: Some(1),
            stdout: "out".into(),
            stderr: "err".into(),
            duration: Duration::from_millis(1),
            timed_out: false,
        };
        assert_eq!(out.combined(), "out\nerr");
    }
}
