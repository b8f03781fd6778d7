//! Playbook registry: built-in catalogue plus per-class fallbacks.

use crate::{Playbook, PlaybookStep, Severity};
use sdp_error::{ErrorClass, ErrorCode};
use std::collections::BTreeMap;
use std::sync::OnceLock;

/// Registry mapping error codes (and class fallbacks) to playbooks.
///
/// Lookup order: exact code match, then the class default, then `None`.
/// The process-wide registry returned by [`global`] is initialised once with
/// the built-in catalogue and is immutable afterwards; downstream crates
/// that need extra entries compose their own registry with [`register`]
/// before handing it out.
///
/// [`register`]: PlaybookRegistry::register
#[derive(Debug, Clone, Default)]
pub struct PlaybookRegistry {
    by_code: BTreeMap<ErrorCode, Playbook>,
    by_class: BTreeMap<ErrorClass, Playbook>,
}

impl PlaybookRegistry {
    /// An empty registry with no catalogue.
    pub fn empty() -> Self {
        Self::default()
    }

    /// A registry pre-populated with the built-in catalogue.
    pub fn builtin() -> Self {
        let mut reg = Self::empty();
        install_builtin(&mut reg);
        reg
    }

    /// Register (or replace) the playbook for an exact code.
    pub fn register(&mut self, code: ErrorCode, playbook: Playbook) {
        self.by_code.insert(code, playbook);
    }

    /// Register (or replace) the fallback playbook for a class.
    pub fn register_class_default(&mut self, class: ErrorClass, playbook: Playbook) {
        self.by_class.insert(class, playbook);
    }

    /// Look up the playbook for a code: exact match, else class default.
    pub fn lookup(&self, code: ErrorCode) -> Option<&Playbook> {
        self.by_code
            .get(&code)
            .or_else(|| self.by_class.get(&code.class()))
    }

    /// The fallback playbook for a class, if registered.
    pub fn class_default(&self, class: ErrorClass) -> Option<&Playbook> {
        self.by_class.get(&class)
    }
}

/// The process-wide built-in registry.
pub fn global() -> &'static PlaybookRegistry {
    static REGISTRY: OnceLock<PlaybookRegistry> = OnceLock::new();
    REGISTRY.get_or_init(PlaybookRegistry::builtin)
}

fn step(order: u8, description: &str) -> PlaybookStep {
    PlaybookStep::new(order, description)
}

fn fast(steps: Vec<PlaybookStep>) -> Vec<PlaybookStep> {
    debug_assert!((1..=Playbook::MAX_FAST_STEPS).contains(&steps.len()));
    steps
}

// expect() fires only if a catalogue entry violates the path-length invariants.
fn book(
    title: &str,
    severity: Severity,
    fast_path: Vec<PlaybookStep>,
    deep_path: Vec<PlaybookStep>,
) -> Playbook {
    Playbook::new(title, severity, fast_path, deep_path).expect("built-in playbook shape")
}

#[allow(clippy::too_many_lines)]
fn install_builtin(reg: &mut PlaybookRegistry) {
    // -- Class defaults --------------------------------------------------

    reg.register_class_default(
        ErrorClass::Environment,
        book(
            "Environment problem",
            Severity::P1,
            fast(vec![
                step(1, "Run environment diagnostics").with_command("sdp doctor"),
                step(2, "Fix the reported issue and re-run the failed command"),
            ]),
            vec![],
        ),
    );
    reg.register_class_default(
        ErrorClass::Protocol,
        book(
            "Protocol violation",
            Severity::P1,
            fast(vec![
                step(1, "Inspect the offending document or identifier"),
                step(2, "Correct it to match the documented shape and retry"),
            ]),
            vec![],
        ),
    );
    reg.register_class_default(
        ErrorClass::Dependency,
        book(
            "Dependency problem",
            Severity::P1,
            fast(vec![
                step(1, "Review the feature's workstream dependency graph"),
                step(2, "Complete or re-plan the blocking workstreams"),
            ]),
            vec![],
        ),
    );
    reg.register_class_default(
        ErrorClass::Validation,
        book(
            "Quality gate failed",
            Severity::P2,
            fast(vec![
                step(1, "Read the captured check output for the failing gate"),
                step(2, "Fix the underlying issue and re-verify").with_command("sdp verify <ws_id>"),
            ]),
            vec![],
        ),
    );
    reg.register_class_default(
        ErrorClass::Runtime,
        book(
            "Runtime failure",
            Severity::P2,
            fast(vec![
                step(1, "Re-run the failed command with --verbose for the full error"),
                step(2, "If the failure is transient, simply retry"),
            ]),
            vec![],
        ),
    );

    // -- Environment -----------------------------------------------------

    reg.register(
        ErrorCode::ToolMissing,
        book(
            "A required tool is not installed",
            Severity::P1,
            fast(vec![
                step(1, "Check which tool is missing").with_command("sdp doctor"),
                step(2, "Install it with your platform package manager"),
                step(3, "Confirm it resolves on PATH")
                    .with_command("command -v <tool>")
                    .with_expected("prints the tool path"),
            ]),
            vec![],
        ),
    );
    reg.register(
        ErrorCode::PermissionDenied,
        book(
            "Permission denied",
            Severity::P1,
            fast(vec![
                step(1, "Check ownership of the .sdp directory").with_command("ls -la .sdp"),
                step(2, "Restore ownership/modes (dirs 0755, files 0644) and retry"),
            ]),
            vec![],
        ),
    );
    reg.register(
        ErrorCode::IoFailed,
        book(
            "Filesystem IO failed",
            Severity::P2,
            fast(vec![
                step(1, "Retry the operation; transient IO errors usually clear"),
                step(2, "Check free disk space").with_command("df -h ."),
            ]),
            vec![],
        ),
    );

    // -- Protocol ----------------------------------------------------------

    reg.register(
        ErrorCode::WsIdInvalid,
        book(
            "Workstream id is malformed",
            Severity::P2,
            fast(vec![step(
                1,
                "Use the PP-FFF-SS shape, e.g. 00-070-01 (two, three, two digits)",
            )]),
            vec![],
        ),
    );
    reg.register(
        ErrorCode::FeatureIdInvalid,
        book(
            "Feature id is malformed",
            Severity::P2,
            fast(vec![step(
                1,
                "Use FNNN (e.g. F070) or F-SLUG (e.g. F-checkout) for feature ids",
            )]),
            vec![],
        ),
    );
    reg.register(
        ErrorCode::FrontmatterInvalid,
        book(
            "Workstream descriptor frontmatter is malformed",
            Severity::P1,
            fast(vec![
                step(1, "Open the descriptor and check the YAML block between the --- fences"),
                step(
                    2,
                    "Ensure ws_id, title, status and feature_id are present and well-formed",
                ),
            ]),
            vec![step(
                1,
                "Validate the YAML in isolation with any YAML linter to find the parse error",
            )],
        ),
    );
    reg.register(
        ErrorCode::HashChainBroken,
        book(
            "Evidence chain integrity is broken",
            Severity::P0,
            fast(vec![
                step(1, "Locate the first broken record")
                    .with_command("sdp log trace --verify")
                    .with_expected("reports the line number and kind of the break"),
                step(2, "Do not append further events until the chain is repaired"),
            ]),
            vec![
                step(1, "Back up the evidence file before any repair"),
                step(2, "Copy the valid prefix into a fresh log (supervised repair)"),
                step(3, "Record the incident and the discarded suffix out of band"),
            ],
        )
        .with_docs(vec!["docs/evidence-chain.md".into()]),
    );
    reg.register(
        ErrorCode::SessionCorrupted,
        book(
            "Session failed tamper detection",
            Severity::P0,
            fast(vec![
                step(1, "Refuse to trust the worktree identity; stop agent work"),
                step(2, "Rebuild the session with the correct identity")
                    .with_command("sdp session repair")
                    .with_expected("subsequent loads succeed"),
            ]),
            vec![
                step(1, "Diff the on-disk session against the expected branch/remote"),
                step(2, "Investigate how the file changed without a hash recompute"),
            ],
        ),
    );
    reg.register(
        ErrorCode::CheckpointCorrupted,
        book(
            "Checkpoint file is corrupt",
            Severity::P1,
            fast(vec![
                step(1, "Back up the corrupt file")
                    .with_command("cp .sdp/checkpoints/<feature>.json .sdp/checkpoints/<feature>.json.bak"),
                step(2, "Delete it and re-run orchestration from a clean plan"),
            ]),
            vec![],
        ),
    );
    reg.register(
        ErrorCode::GuardAlreadyActive,
        book(
            "A guard is already active",
            Severity::P2,
            fast(vec![
                step(1, "See which workstream holds the guard").with_command("sdp guard status"),
                step(2, "Deactivate it explicitly before activating another")
                    .with_command("sdp guard deactivate"),
            ]),
            vec![],
        ),
    );
    reg.register(
        ErrorCode::GuardNotActive,
        book(
            "No guard is active",
            Severity::P2,
            fast(vec![step(1, "Activate the guard for the workstream you are editing")
                .with_command("sdp guard activate <ws_id>")]),
            vec![],
        ),
    );
    reg.register(
        ErrorCode::SchemaViolation,
        book(
            "Document failed schema validation",
            Severity::P1,
            fast(vec![
                step(1, "Compare the rejected document against the published schema"),
                step(2, "Fix the writer; schema-invalid documents are never persisted"),
            ]),
            vec![],
        ),
    );

    // -- Dependency --------------------------------------------------------

    reg.register(
        ErrorCode::WsBlocked,
        book(
            "Workstream is blocked on incomplete dependencies",
            Severity::P1,
            fast(vec![
                step(1, "List the incomplete dependencies in the checkpoint"),
                step(2, "Finish or unblock them, then resume")
                    .with_command("sdp orchestrate resume <feature_id>"),
            ]),
            vec![],
        ),
    );
    reg.register(
        ErrorCode::DependencyCycle,
        book(
            "Workstream dependency graph has a cycle",
            Severity::P0,
            fast(vec![
                step(1, "Identify the cycle named in the error context"),
                step(2, "Break it by removing one depends_on edge, then re-plan"),
            ]),
            vec![step(
                1,
                "Delete the feature checkpoint before re-running; execution order is pinned",
            )],
        ),
    );
    reg.register(
        ErrorCode::DependencyUnknown,
        book(
            "depends_on references a workstream outside this feature",
            Severity::P1,
            fast(vec![step(
                1,
                "Split the cross-feature dependency into its own workstream inside the feature",
            )]),
            vec![],
        ),
    );

    // -- Validation --------------------------------------------------------

    reg.register(
        ErrorCode::CoverageBelowThreshold,
        book(
            "Coverage below threshold",
            Severity::P2,
            fast(vec![
                step(1, "Read the coverage report attached to the verdict"),
                step(2, "Add tests for the uncovered paths and re-verify")
                    .with_command("sdp verify <ws_id>"),
            ]),
            vec![],
        ),
    );
    reg.register(
        ErrorCode::TestFailed,
        book(
            "Tests failed",
            Severity::P1,
            fast(vec![
                step(1, "Run the failing suite locally with the captured command"),
                step(2, "Fix the regression and re-verify").with_command("sdp verify <ws_id>"),
            ]),
            vec![],
        ),
    );
    reg.register(
        ErrorCode::LintFailed,
        book(
            "Lint reported problems",
            Severity::P2,
            fast(vec![
                step(1, "Run the linter with autofix where available"),
                step(2, "Commit the fixes and re-verify"),
            ]),
            vec![],
        ),
    );
    reg.register(
        ErrorCode::BuildFailed,
        book(
            "Build failed",
            Severity::P1,
            fast(vec![
                step(1, "Reproduce the build locally with the captured command"),
                step(2, "Fix the compile error and re-verify"),
            ]),
            vec![],
        ),
    );
    reg.register(
        ErrorCode::ScopeViolation,
        book(
            "Commit touched files outside the declared scope",
            Severity::P1,
            fast(vec![
                step(1, "List the violating paths")
                    .with_command("sdp guard check-scope <ws_id>"),
                step(2, "Revert the out-of-scope edits or extend the workstream scope"),
            ]),
            vec![step(
                1,
                "If the files belong to another workstream, move the edits there instead",
            )],
        ),
    );
    reg.register(
        ErrorCode::ScopePathEscape,
        book(
            "Scope path escapes the project root",
            Severity::P0,
            fast(vec![step(
                1,
                "Remove the .. traversal or absolute path from the descriptor's Scope Files",
            )]),
            vec![],
        ),
    );
    reg.register(
        ErrorCode::CommandRejected,
        book(
            "Command refused by the secure subprocess layer",
            Severity::P1,
            fast(vec![
                step(1, "Check the rejection reason: non-whitelisted binary or injection pattern"),
                step(2, "Rewrite the verification command as a plain argv of a permitted tool"),
            ]),
            vec![],
        ),
    );
    reg.register(
        ErrorCode::FileTooLarge,
        book(
            "Source file exceeds the size limit",
            Severity::P2,
            fast(vec![step(1, "Split the file along module boundaries and re-verify")]),
            vec![],
        ),
    );

    // -- Runtime -----------------------------------------------------------

    reg.register(
        ErrorCode::CommandFailed,
        book(
            "Subprocess exited non-zero",
            Severity::P2,
            fast(vec![
                step(1, "Read the captured combined output in the error context"),
                step(2, "Re-run the command directly in the worktree to reproduce"),
            ]),
            vec![],
        ),
    );
    reg.register(
        ErrorCode::Timeout,
        book(
            "Operation timed out",
            Severity::P2,
            fast(vec![
                step(1, "Retry; timeouts are retryable by taxonomy"),
                step(2, "Raise the category timeout if the operation is legitimately slow")
                    .with_command("SDP_TIMEOUT_VERIFICATION=120s sdp verify <ws_id>"),
            ]),
            vec![],
        ),
    );
    reg.register(
        ErrorCode::CiMaxIterations,
        book(
            "CI loop exhausted its iteration budget",
            Severity::P1,
            fast(vec![
                step(1, "Inspect the run log for the repeating failure class"),
                step(2, "Fix the failure manually, push, and re-run the loop")
                    .with_command("sdp ci-loop --pr <n> --feature <F>"),
            ]),
            vec![step(
                1,
                "If the failure is flaky, quarantine the test before burning more iterations",
            )],
        ),
    );
    reg.register(
        ErrorCode::Escalated,
        book(
            "CI loop escalated to an operator",
            Severity::P1,
            fast(vec![
                step(1, "Open the escalation issue created with the failing-check names"),
                step(2, "Resolve it manually; the loop declined to auto-fix"),
            ]),
            vec![],
        ),
    );
    reg.register(
        ErrorCode::Internal,
        book(
            "Unexpected internal error",
            Severity::P1,
            fast(vec![
                step(1, "Re-run with --verbose and capture the full output"),
                step(2, "File a bug with the error context attached"),
            ]),
            vec![],
        ),
    );
}
