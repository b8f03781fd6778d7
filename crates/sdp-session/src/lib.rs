//! Cryptographically-pinned worktree session documents.
//!
//! A session pins a worktree's identity (feature, branch, remote) under a
//! SHA-256 hash so an agent resuming after context compaction cannot
//! silently drift to the wrong branch. The hash covers the canonical JSON
//! of every field except `hash` itself, in fixed declaration order, with
//! RFC 3339 UTC timestamps stored as strings, byte-identical across
//! platforms. A session whose recomputed hash differs from the stored one
//! is *corrupted* and is refused; proceeding requires an explicit
//! [`Session::repair`].

#![deny(unsafe_code)]
#![warn(missing_docs)]

use chrono::{SecondsFormat, Utc};
use sdp_error::{ErrorCode, Result, SdpError};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Current session document version.
pub const SESSION_VERSION: &str = "1";

/// Relative location of the session file inside a worktree.
pub const SESSION_FILE: &str = ".sdp/session.json";

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// A per-worktree identity pin.
///
/// Field order is load-bearing: the canonical form hashed into `hash` is the
/// serde serialisation of these fields (minus `hash`) in declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Document version.
    pub version: String,
    /// Absolute path of the worktree this session pins.
    pub worktree_path: String,
    /// Feature the worktree exists for.
    pub feature_id: String,
    /// Branch the worktree must stay on.
    pub expected_branch: String,
    /// Remote the branch tracks.
    pub expected_remote: String,
    /// RFC 3339 UTC creation timestamp.
    pub created_at: String,
    /// Who created the session (operator or agent identity).
    pub created_by: String,
    /// `sha256:` + hex SHA-256 of the canonical JSON of the other fields.
    pub hash: String,
}

/// The hashed portion of a session, in the same field order.
#[derive(Serialize)]
struct CanonicalFields<'a> {
    version: &'a str,
    worktree_path: &'a str,
    feature_id: &'a str,
    expected_branch: &'a str,
    expected_remote: &'a str,
    created_at: &'a str,
    created_by: &'a str,
}

impl Session {
    /// Construct a fresh session for a worktree, hashed and timestamped now.
    pub fn init(feature_id: &str, worktree_path: &Path, created_by: &str) -> Self {
        let mut session = Self {
            version: SESSION_VERSION.to_string(),
            worktree_path: worktree_path.display().to_string(),
            feature_id: feature_id.to_string(),
            expected_branch: String::new(),
            expected_remote: "origin".to_string(),
            created_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            created_by: created_by.to_string(),
            hash: String::new(),
        };
        session.hash = session.compute_hash();
        session
    }

    /// Canonical JSON of all fields except `hash`.
    fn canonical(&self) -> String {
        serde_json::to_string(&CanonicalFields {
            version: &self.version,
            worktree_path: &self.worktree_path,
            feature_id: &self.feature_id,
            expected_branch: &self.expected_branch,
            expected_remote: &self.expected_remote,
            created_at: &self.created_at,
            created_by: &self.created_by,
        })
        .expect("session fields always serialise")
    }

    /// Recompute the hash over the current field values.
    pub fn compute_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.canonical().as_bytes());
        let digest = hasher.finalize();
        let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
        format!("sha256:{hex}")
    }

    /// Returns a copy with updated branch/remote and a fresh hash. Does not
    /// write.
    pub fn sync(&self, branch: &str, remote: &str) -> Self {
        let mut next = self.clone();
        next.expected_branch = branch.to_string();
        next.expected_remote = remote.to_string();
        next.hash = next.compute_hash();
        next
    }

    /// Write the session to `<worktree>/.sdp/session.json` atomically.
    ///
    /// The `.sdp` directory is created 0755 if absent; the file lands 0644
    /// via write-temp-then-rename.
    pub fn save(&self, worktree_path: &Path) -> Result<PathBuf> {
        let file = worktree_path.join(SESSION_FILE);
        let dir = file.parent().expect("session file has a parent");
        std::fs::create_dir_all(dir).map_err(SdpError::from)?;
        set_mode(dir, 0o755)?;

        let json = serde_json::to_string_pretty(self)
            .map_err(|e| SdpError::internal(format!("serialise session: {e}")))?;
        let tmp = file.with_extension("json.tmp");
        std::fs::write(&tmp, format!("{json}\n")).map_err(SdpError::from)?;
        set_mode(&tmp, 0o644)?;
        std::fs::rename(&tmp, &file).map_err(SdpError::from)?;
        Ok(file)
    }

    /// Load and validate the session of a worktree.
    ///
    /// # Errors
    ///
    /// - `SESSION_CORRUPTED` when a required field is empty or the
    ///   recomputed hash does not match the stored one. The session must
    ///   not be trusted; call [`Session::repair`] under supervision.
    /// - `IO_FAILED` when the file is missing or unreadable.
    pub fn load(worktree_path: &Path) -> Result<Self> {
        let file = worktree_path.join(SESSION_FILE);
        let raw = std::fs::read_to_string(&file).map_err(|e| {
            SdpError::from(e).with_context("file", file.display().to_string())
        })?;
        let session: Session = serde_json::from_str(&raw).map_err(|e| {
            SdpError::new(ErrorCode::SessionCorrupted, format!("unparseable session: {e}"))
                .with_context("file", file.display().to_string())
        })?;
        session.validate()?;
        Ok(session)
    }

    /// Field-presence and tamper checks.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("version", &self.version),
            ("worktree_path", &self.worktree_path),
            ("feature_id", &self.feature_id),
            ("created_at", &self.created_at),
            ("created_by", &self.created_by),
            ("hash", &self.hash),
        ] {
            if value.is_empty() {
                return Err(SdpError::new(
                    ErrorCode::SessionCorrupted,
                    format!("required field '{name}' is empty"),
                ));
            }
        }
        let expected = self.compute_hash();
        if self.hash != expected {
            return Err(SdpError::new(
                ErrorCode::SessionCorrupted,
                "session hash does not match its contents",
            )
            .with_context("stored", self.hash.clone())
            .with_context("computed", expected));
        }
        Ok(())
    }

    /// Unconditionally rebuild and persist a valid session with the given
    /// identity. Operator-supervised recovery only.
    pub fn repair(
        worktree_path: &Path,
        feature_id: &str,
        branch: &str,
        remote: &str,
        created_by: &str,
    ) -> Result<Self> {
        let session = Session::init(feature_id, worktree_path, created_by).sync(branch, remote);
        session.save(worktree_path)?;
        Ok(session)
    }
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).map_err(SdpError::from)
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn init_produces_a_valid_session() {
        let tmp = TempDir::new().unwrap();
        let s = Session::init("F070", tmp.path(), "operator");
        assert_eq!(s.version, SESSION_VERSION);
        assert!(s.hash.starts_with("sha256:"));
        assert!(s.validate().is_ok());
    }

    #[test]
    fn save_load_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let s = Session::init("F070", tmp.path(), "operator").sync("feat/f070", "origin");
        s.save(tmp.path()).unwrap();

        let loaded = Session::load(tmp.path()).unwrap();
        assert_eq!(loaded, s);
    }

    #[test]
    fn sync_recomputes_hash_without_writing() {
        let tmp = TempDir::new().unwrap();
        let s = Session::init("F070", tmp.path(), "operator");
        let synced = s.sync("feat/f070", "upstream");
        assert_ne!(s.hash, synced.hash);
        assert_eq!(synced.expected_branch, "feat/f070");
        assert_eq!(synced.expected_remote, "upstream");
        assert!(synced.validate().is_ok());
        // Nothing was persisted.
        assert!(!tmp.path().join(SESSION_FILE).exists());
    }

    #[test]
    fn binary_edit_without_rehash_is_detected() {
        let tmp = TempDir::new().unwrap();
        let s = Session::init("F065", tmp.path(), "operator");
        s.save(tmp.path()).unwrap();

        // Flip the feature id in place, leaving the hash stale.
        let file = tmp.path().join(SESSION_FILE);
        let raw = std::fs::read_to_string(&file).unwrap();
        std::fs::write(&file, raw.replace("F065", "F066")).unwrap();

        let err = Session::load(tmp.path()).unwrap_err();
        assert_eq!(err.code, ErrorCode::SessionCorrupted);
    }

    #[test]
    fn repair_recovers_a_tampered_session() {
        let tmp = TempDir::new().unwrap();
        let s = Session::init("F065", tmp.path(), "operator");
        s.save(tmp.path()).unwrap();
        let file = tmp.path().join(SESSION_FILE);
        let raw = std::fs::read_to_string(&file).unwrap();
        std::fs::write(&file, raw.replace("F065", "F066")).unwrap();
        assert!(Session::load(tmp.path()).is_err());

        let repaired =
            Session::repair(tmp.path(), "F066", "feat/f066", "origin", "operator").unwrap();
        assert_eq!(repaired.feature_id, "F066");

        let loaded = Session::load(tmp.path()).unwrap();
        assert_eq!(loaded.feature_id, "F066");
        assert_eq!(loaded.expected_branch, "feat/f066");
    }

    #[test]
    fn empty_required_field_is_corrupted() {
        let tmp = TempDir::new().unwrap();
        let mut s = Session::init("F070", tmp.path(), "operator");
        s.created_by = String::new();
        s.hash = s.compute_hash();
        let err = s.validate().unwrap_err();
        assert_eq!(err.code, ErrorCode::SessionCorrupted);
        assert!(err.message.contains("created_by"));
    }

    #[test]
    fn missing_session_is_an_io_error_not_corruption() {
        let tmp = TempDir::new().unwrap();
        let err = Session::load(tmp.path()).unwrap_err();
        assert_eq!(err.code, ErrorCode::IoFailed);
    }

    #[test]
    fn canonicalisation_is_stable_across_clones() {
        let tmp = TempDir::new().unwrap();
        let s = Session::init("F070", tmp.path(), "operator");
        let clone = s.clone();
        assert_eq!(s.compute_hash(), clone.compute_hash());
    }

    #[cfg(unix)]
    #[test]
    fn file_modes_are_set() {
        use std::os::unix::fs::PermissionsExt;
        let tmp = TempDir::new().unwrap();
        let s = Session::init("F070", tmp.path(), "operator");
        let file = s.save(tmp.path()).unwrap();
        let mode = std::fs::metadata(&file).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o644);
        let dir_mode = std::fs::metadata(file.parent().unwrap())
            .unwrap()
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(dir_mode, 0o755);
    }
}
