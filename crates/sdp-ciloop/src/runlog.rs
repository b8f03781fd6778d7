//! Per-feature run log: the decision trail of a CI-loop run.
//!
//! Plain JSONL, one record per decision. Unlike the evidence chain it is
//! not hash-linked; it exists so an operator can read *why* the loop did
//! what it did without walking evidence payloads.

use crate::DecisionLogger;
use chrono::{SecondsFormat, Utc};
use sdp_error::{Result, SdpError};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::warn;

/// Appender over `.sdp/runs/<feature>.jsonl`.
#[derive(Debug)]
pub struct RunLog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl RunLog {
    /// Run log at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(SdpError::from)?;
        }
        Ok(Self {
            path,
            lock: Mutex::new(()),
        })
    }

    fn append(&self, kind: &str, payload: &serde_json::Value) -> Result<()> {
        let _guard = self.lock.lock().expect("run log lock");
        let record = serde_json::json!({
            "ts": Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
            "kind": kind,
            "payload": payload,
        });
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(SdpError::from)?;
        writeln!(file, "{record}").map_err(SdpError::from)?;
        Ok(())
    }
}

impl DecisionLogger for RunLog {
    fn log(&self, kind: &str, payload: serde_json::Value) {
        // Decision logging must never take the loop down.
        if let Err(err) = self.append(kind, &payload) {
            warn!(%err, kind, "run log append failed");
        }
    }
}
