//! The `sdp` binary: spec-driven development protocol engine.

#![deny(unsafe_code)]

use clap::{Parser, Subcommand, ValueEnum};
use sdp_cli::commands::{self, Ctx};
use sdp_cli::{format, report};
use sdp_error::{ErrorCode, SdpError};
use sdp_guard::Priority;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Exit code for diagnosed failures.
const EXIT_FAILURE: i32 = 1;
/// Exit code for exhausted budgets (e.g. CI max iterations).
const EXIT_BUDGET: i32 = 2;

#[derive(Parser, Debug)]
#[command(name = "sdp", version, about = "Spec-driven development protocol engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output: deep-path playbook steps and error context.
    #[arg(long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create the .sdp scaffolding in the current project. Idempotent.
    Init,

    /// Manage the per-worktree scope guard.
    Guard {
        #[command(subcommand)]
        command: GuardCommands,
    },

    /// Run the verification engine for one workstream.
    Verify {
        /// Workstream id (PP-FFF-SS).
        ws_id: String,
    },

    /// Run or resume the workstream orchestrator.
    Orchestrate {
        #[command(subcommand)]
        command: OrchestrateCommands,
    },

    /// Manage feature worktrees.
    Worktree {
        #[command(subcommand)]
        command: WorktreeCommands,
    },

    /// Manage the worktree session pin.
    Session {
        #[command(subcommand)]
        command: SessionCommands,
    },

    /// Watch a pull request's CI, autofixing deterministically.
    CiLoop {
        /// Pull request number.
        #[arg(long)]
        pr: u64,
        /// Feature the PR belongs to.
        #[arg(long)]
        feature: String,
        /// Iteration budget override.
        #[arg(long)]
        max_iter: Option<u32>,
    },

    /// Inspect the evidence chain.
    Log {
        #[command(subcommand)]
        command: LogCommands,
    },

    /// Environment diagnostics.
    Doctor,
}

#[derive(Subcommand, Debug)]
enum GuardCommands {
    /// Activate the guard for a workstream.
    Activate {
        /// Workstream id (PP-FFF-SS).
        ws_id: String,
    },
    /// Deactivate the guard.
    Deactivate,
    /// Ask whether a file may be edited under the active guard.
    Check {
        /// Repo-relative file path.
        file: String,
    },
    /// Show the active guard, if any.
    Status,
    /// Retrospectively check a commit against a workstream's scope.
    CheckScope {
        /// Workstream id (PP-FFF-SS).
        ws_id: String,
        /// Inspect the staged changes instead of the last commit.
        #[arg(long)]
        cached: bool,
    },
    /// Manage review findings.
    Finding {
        #[command(subcommand)]
        command: FindingCommands,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum PriorityArg {
    P0,
    P1,
    P2,
    P3,
}

impl From<PriorityArg> for Priority {
    fn from(arg: PriorityArg) -> Self {
        match arg {
            PriorityArg::P0 => Priority::P0,
            PriorityArg::P1 => Priority::P1,
            PriorityArg::P2 => Priority::P2,
            PriorityArg::P3 => Priority::P3,
        }
    }
}

#[derive(Subcommand, Debug)]
enum FindingCommands {
    /// Record a new finding.
    Add {
        /// Feature the finding belongs to.
        #[arg(long)]
        feature: String,
        /// Area of the codebase or process.
        #[arg(long)]
        area: String,
        /// One-line summary.
        #[arg(long)]
        title: String,
        /// Priority (P0/P1 block deployment gates).
        #[arg(long, value_enum, default_value_t = PriorityArg::P2)]
        priority: PriorityArg,
        /// External tracker reference.
        #[arg(long)]
        beads_ref: Option<String>,
    },
    /// Resolve a finding by id (prefix accepted).
    Resolve {
        /// Finding id.
        id: String,
    },
    /// List findings.
    List {
        /// Include resolved findings.
        #[arg(long)]
        all: bool,
    },
    /// Remove every finding.
    Clear,
}

#[derive(Subcommand, Debug)]
enum OrchestrateCommands {
    /// Resume a feature from its checkpoint.
    Resume {
        /// Feature id (FNNN or F-SLUG).
        feature_id: String,
    },
    /// Run a feature (`sdp orchestrate <feature_id>`).
    #[command(external_subcommand)]
    Run(Vec<String>),
}

#[derive(Subcommand, Debug)]
enum WorktreeCommands {
    /// Create a feature worktree with a pinned session.
    Create {
        /// Feature id.
        feature_id: String,
        /// Branch name (defaults to feature/<id>).
        #[arg(long)]
        branch: Option<String>,
        /// Base ref for the new branch.
        #[arg(long)]
        base: Option<String>,
    },
    /// Delete a feature worktree and its session.
    Delete {
        /// Feature id.
        feature_id: String,
    },
    /// List worktrees with their sessions.
    List,
}

#[derive(Subcommand, Debug)]
enum SessionCommands {
    /// Pin the current worktree to a feature.
    Init {
        /// Feature id.
        feature_id: String,
    },
    /// Re-pin to the current branch and remote.
    Sync,
    /// Operator-supervised rebuild of a corrupted session.
    Repair {
        /// Feature id to pin.
        #[arg(long)]
        feature: String,
    },
}

#[derive(Subcommand, Debug)]
enum LogCommands {
    /// Walk the evidence chain.
    Trace {
        /// Recompute and check every hash link (always done; prints detail).
        #[arg(long)]
        verify: bool,
        /// Restrict to one feature's chain.
        #[arg(long)]
        feature: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cancel = CancellationToken::new();
    let exit = match run(cli.command, cli.verbose, &cancel).await {
        Ok(code) => code,
        Err(err) => {
            eprint!("{}", report::render_error(&err, cli.verbose));
            if err.code == ErrorCode::CiMaxIterations {
                EXIT_BUDGET
            } else {
                EXIT_FAILURE
            }
        }
    };
    std::process::exit(exit);
}

#[allow(clippy::too_many_lines)]
async fn run(
    command: Commands,
    verbose: bool,
    cancel: &CancellationToken,
) -> Result<i32, SdpError> {
    match command {
        Commands::Init => {
            let cwd = std::env::current_dir().map_err(SdpError::from)?;
            let paths = commands::init(&cwd)?;
            println!("initialised {}", paths.sdp_dir().display());
            Ok(0)
        }

        Commands::Guard { command } => guard(command),

        Commands::Verify { ws_id } => {
            let ctx = Ctx::discover()?;
            let result = commands::verify(&ctx, &ws_id, cancel).await?;
            print!("{}", format::verification_table(&result));
            Ok(if result.passed { 0 } else { 1 })
        }

        Commands::Orchestrate { command } => {
            let feature_id = match command {
                OrchestrateCommands::Resume { feature_id } => feature_id,
                OrchestrateCommands::Run(args) => args.into_iter().next().ok_or_else(|| {
                    SdpError::new(
                        ErrorCode::FeatureIdInvalid,
                        "usage: sdp orchestrate <feature_id>",
                    )
                })?,
            };
            let ctx = Ctx::discover()?;
            let summary = commands::orchestrate(&ctx, &feature_id, cancel).await?;
            println!(
                "feature {}: {:?} ({} completed, {} failed)",
                feature_id,
                summary.status,
                summary.completed.len(),
                summary.failed.len()
            );
            Ok(0)
        }

        Commands::Worktree { command } => {
            let ctx = Ctx::discover()?;
            match command {
                WorktreeCommands::Create {
                    feature_id,
                    branch,
                    base,
                } => {
                    let info = commands::worktree_create(
                        &ctx,
                        &feature_id,
                        branch.as_deref(),
                        base.as_deref(),
                    )?;
                    println!(
                        "created {} on {} (session {})",
                        info.worktree_path.display(),
                        info.branch_name,
                        info.session_file.display()
                    );
                }
                WorktreeCommands::Delete { feature_id } => {
                    commands::worktree_delete(&ctx, &feature_id)?;
                    println!("deleted worktree for {feature_id}");
                }
                WorktreeCommands::List => {
                    let listings = commands::worktree_list(&ctx)?;
                    print!("{}", format::worktree_table(&listings));
                }
            }
            Ok(0)
        }

        Commands::Session { command } => {
            let ctx = Ctx::discover()?;
            match command {
                SessionCommands::Init { feature_id } => {
                    let session = commands::session_init(&ctx, &feature_id)?;
                    println!(
                        "session pinned: {} on {} ({})",
                        session.feature_id, session.expected_branch, session.hash
                    );
                }
                SessionCommands::Sync => {
                    let session = commands::session_sync(&ctx)?;
                    println!(
                        "session synced: {} on {}",
                        session.feature_id, session.expected_branch
                    );
                }
                SessionCommands::Repair { feature } => {
                    let session = commands::session_repair(&ctx, &feature)?;
                    println!("session repaired: {}", session.feature_id);
                }
            }
            Ok(0)
        }

        Commands::CiLoop {
            pr,
            feature,
            max_iter,
        } => {
            let ctx = Ctx::discover()?;
            let outcome = commands::ci_loop(&ctx, pr, &feature, max_iter, cancel).await?;
            match &outcome {
                sdp_ciloop::LoopOutcome::Green { iterations } => {
                    println!("CI green after {iterations} iteration(s)");
                }
                sdp_ciloop::LoopOutcome::MaxIter => {
                    println!("CI still red after the iteration budget; operator attention needed");
                }
                sdp_ciloop::LoopOutcome::Escalated { reason } => {
                    println!("escalated: {reason}");
                }
            }
            Ok(outcome.exit_code())
        }

        Commands::Log { command } => {
            let LogCommands::Trace { verify, feature } = command;
            let ctx = Ctx::discover()?;
            let outcomes = commands::log_trace(&ctx, feature.as_deref())?;
            if outcomes.is_empty() {
                println!("no evidence chains recorded");
            }
            for outcome in &outcomes {
                if verify {
                    println!(
                        "{}: {} records, chain intact (head {})",
                        outcome.feature,
                        outcome.summary.records,
                        if outcome.summary.head.is_empty() {
                            "-"
                        } else {
                            &outcome.summary.head[..12]
                        }
                    );
                } else {
                    println!("{}: {} records", outcome.feature, outcome.summary.records);
                }
            }
            Ok(0)
        }

        Commands::Doctor => {
            let ctx = Ctx::discover()?;
            let checks = commands::doctor(&ctx, cancel).await;
            let mut healthy = true;
            for check in &checks {
                let mark = if check.healthy { "ok " } else { "FAIL" };
                println!("  [{mark}] {:<18} {}", check.name, check.detail);
                healthy &= check.healthy;
            }
            if verbose && healthy {
                println!("\nall checks healthy");
            }
            Ok(if healthy { 0 } else { 1 })
        }
    }
}

fn guard(command: GuardCommands) -> Result<i32, SdpError> {
    let ctx = Ctx::discover()?;
    match command {
        GuardCommands::Activate { ws_id } => {
            commands::guard_activate(&ctx, &ws_id)?;
            println!("guard activated for {ws_id}");
            Ok(0)
        }
        GuardCommands::Deactivate => {
            commands::guard_deactivate(&ctx)?;
            println!("guard deactivated");
            Ok(0)
        }
        GuardCommands::Check { file } => {
            let (allowed, reason) = commands::guard_check(&ctx, &file)?;
            match (allowed, reason) {
                (true, None) => println!("allowed: {file}"),
                (true, Some(reason)) => println!("allowed: {file} ({reason})"),
                (false, reason) => {
                    println!("blocked: {}", reason.unwrap_or_else(|| file.clone()));
                    return Ok(1);
                }
            }
            Ok(0)
        }
        GuardCommands::Status => match commands::guard_status(&ctx)? {
            Some(state) => {
                print!("{}", format::guard_status(&state));
                Ok(0)
            }
            None => {
                println!("no active guard");
                Ok(1)
            }
        },
        GuardCommands::CheckScope { ws_id, cached } => {
            let report = commands::guard_check_scope(&ctx, &ws_id, cached)?;
            print!("{}", format::scope_report(&report));
            Ok(if report.pass { 0 } else { 1 })
        }
        GuardCommands::Finding { command } => match command {
            FindingCommands::Add {
                feature,
                area,
                title,
                priority,
                beads_ref,
            } => {
                let finding = commands::finding_add(
                    &ctx,
                    &feature,
                    &area,
                    &title,
                    priority.into(),
                    beads_ref,
                )?;
                println!("finding {} recorded ({})", finding.id, finding.priority);
                Ok(0)
            }
            FindingCommands::Resolve { id } => {
                let finding = commands::finding_resolve(&ctx, &id)?;
                println!("finding {} resolved", finding.id);
                Ok(0)
            }
            FindingCommands::List { all } => {
                let findings = commands::finding_list(&ctx, all)?;
                print!("{}", format::findings_table(&findings));
                Ok(0)
            }
            FindingCommands::Clear => {
                commands::finding_clear(&ctx)?;
                println!("findings cleared");
                Ok(0)
            }
        },
    }
}
