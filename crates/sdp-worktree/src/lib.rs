//! Git worktree lifecycle with pinned sessions.
//!
//! Every SDP worktree carries a session document pinning its identity; a
//! worktree without a valid session is an invalid state. `create` therefore
//! rolls the worktree back when the session cannot be persisted, and
//! `delete` removes the session before asking git to drop the tree.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use sdp_error::{Result, SdpError};
use sdp_git::{WorktreeEntry, worktree_add, worktree_list, worktree_remove};
use sdp_session::Session;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Result of a successful worktree creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorktreeInfo {
    /// Absolute path of the new worktree.
    pub worktree_path: PathBuf,
    /// Branch checked out in the worktree.
    pub branch_name: String,
    /// Path of the persisted session file.
    pub session_file: PathBuf,
}

/// A worktree paired with its session (best-effort; `None` for worktrees
/// without SDP state).
#[derive(Debug, Clone)]
pub struct WorktreeListing {
    /// The git worktree entry.
    pub entry: WorktreeEntry,
    /// The session, when present and valid.
    pub session: Option<Session>,
}

/// Manager over `git worktree` for one main repository.
#[derive(Debug, Clone)]
pub struct WorktreeManager {
    repo_root: PathBuf,
    created_by: String,
}

impl WorktreeManager {
    /// Manager for the repository at `repo_root`.
    pub fn new(repo_root: impl Into<PathBuf>, created_by: impl Into<String>) -> Self {
        Self {
            repo_root: repo_root.into(),
            created_by: created_by.into(),
        }
    }

    /// Conventional worktree location: `<parent-of-main-repo>/sdp-<feature>`.
    pub fn path_for(&self, feature_id: &str) -> PathBuf {
        let parent = self
            .repo_root
            .parent()
            .unwrap_or_else(|| Path::new("."));
        parent.join(format!("sdp-{feature_id}"))
    }

    /// Create a worktree for a feature and pin its session.
    ///
    /// `branch` defaults to `feature/<feature_id>`; with `create_branch` the
    /// branch is created from `base` (or `HEAD`). If the session cannot be
    /// saved the worktree is removed again with `--force`; a worktree
    /// without a valid session must not survive.
    pub fn create(
        &self,
        feature_id: &str,
        branch: Option<&str>,
        base: Option<&str>,
        create_branch: bool,
    ) -> Result<WorktreeInfo> {
        let branch_name = branch
            .map(str::to_string)
            .unwrap_or_else(|| format!("feature/{feature_id}"));
        let path = self.path_for(feature_id);

        worktree_add(
            &self.repo_root,
            &path,
            Some(&branch_name),
            base,
            create_branch,
        )?;

        let remote = sdp_git::current_remote(&self.repo_root)?
            .unwrap_or_else(|| "origin".to_string());
        let session =
            Session::init(feature_id, &path, &self.created_by).sync(&branch_name, &remote);
        let session_file = match session.save(&path) {
            Ok(file) => file,
            Err(err) => {
                warn!(worktree = %path.display(), %err, "session save failed; rolling worktree back");
                if let Err(rm) = worktree_remove(&self.repo_root, &path, true) {
                    warn!(worktree = %path.display(), %rm, "rollback itself failed");
                }
                return Err(SdpError::new(
                    err.code,
                    format!("worktree rolled back: {}", err.message),
                )
                .with_context("worktree", path.display().to_string()));
            }
        };

        info!(worktree = %path.display(), branch = %branch_name, "worktree created");
        Ok(WorktreeInfo {
            worktree_path: path,
            branch_name,
            session_file,
        })
    }

    /// Delete a feature's worktree.
    ///
    /// The session file goes first (best-effort; a failure is logged but
    /// does not stop the removal), then the worktree itself.
    pub fn delete(&self, feature_id: &str) -> Result<()> {
        let path = self.path_for(feature_id);
        let session_file = path.join(sdp_session::SESSION_FILE);
        if let Err(err) = std::fs::remove_file(&session_file) {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!(file = %session_file.display(), %err, "session file removal failed");
            }
        }
        worktree_remove(&self.repo_root, &path, false)?;
        info!(worktree = %path.display(), "worktree deleted");
        Ok(())
    }

    /// List worktrees, pairing each with its session when one loads.
    pub fn list(&self) -> Result<Vec<WorktreeListing>> {
        let entries = worktree_list(&self.repo_root)?;
        Ok(entries
            .into_iter()
            .map(|entry| {
                let session = Session::load(&entry.path).ok();
                WorktreeListing { entry, session }
            })
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    /// Main repo in its own subdirectory so worktrees land beside it.
    fn fixture() -> (TempDir, WorktreeManager) {
        let tmp = TempDir::new().unwrap();
        let repo = tmp.path().join("main");
        std::fs::create_dir_all(&repo).unwrap();
        sdp_git::run_git(&repo, &["init", "-q", "-b", "main"]).unwrap();
        std::fs::write(repo.join("README.md"), "baseline\n").unwrap();
        sdp_git::run_git(&repo, &["add", "-A"]).unwrap();
        sdp_git::run_git(
            &repo,
            &[
                "-c",
                "user.name=sdp",
                "-c",
                "user.email=sdp@local",
                "commit",
                "-qm",
                "baseline",
            ],
        )
        .unwrap();
        let mgr = WorktreeManager::new(&repo, "test-operator");
        (tmp, mgr)
    }

    #[test]
    fn create_places_worktree_beside_main_repo() {
        let (tmp, mgr) = fixture();
        let info = mgr.create("F070", None, None, true).unwrap();
        assert_eq!(info.worktree_path, tmp.path().join("sdp-F070"));
        assert_eq!(info.branch_name, "feature/F070");
        assert!(info.session_file.exists());

        let session = Session::load(&info.worktree_path).unwrap();
        assert_eq!(session.feature_id, "F070");
        assert_eq!(session.expected_branch, "feature/F070");
        assert_eq!(session.created_by, "test-operator");
    }

    #[test]
    fn create_with_explicit_branch() {
        let (_tmp, mgr) = fixture();
        let info = mgr.create("F071", Some("feat/custom"), None, true).unwrap();
        assert_eq!(info.branch_name, "feat/custom");
        let session = Session::load(&info.worktree_path).unwrap();
        assert_eq!(session.expected_branch, "feat/custom");
    }

    #[test]
    fn delete_removes_session_and_worktree() {
        let (_tmp, mgr) = fixture();
        let info = mgr.create("F072", None, None, true).unwrap();
        assert!(info.worktree_path.exists());

        mgr.delete("F072").unwrap();
        assert!(!info.worktree_path.exists());
        assert_eq!(mgr.list().unwrap().len(), 1);
    }

    #[test]
    fn list_pairs_sessions_with_worktrees() {
        let (_tmp, mgr) = fixture();
        mgr.create("F073", None, None, true).unwrap();

        let listings = mgr.list().unwrap();
        assert_eq!(listings.len(), 2);
        // The main repo has no session; the feature worktree does.
        let with_session: Vec<_> = listings.iter().filter(|l| l.session.is_some()).collect();
        assert_eq!(with_session.len(), 1);
        assert_eq!(
            with_session[0].session.as_ref().unwrap().feature_id,
            "F073"
        );
    }

    #[test]
    fn duplicate_create_fails_cleanly() {
        let (_tmp, mgr) = fixture();
        mgr.create("F074", None, None, true).unwrap();
        assert!(mgr.create("F074", None, None, true).is_err());
    }
}
