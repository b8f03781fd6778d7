//! Workstream sources: where a feature's descriptors come from.

use sdp_config::SdpPaths;
use sdp_error::{Result, SdpError};
use sdp_workstream::{FeatureId, WorkstreamDoc, parse_descriptor_file};
use tracing::debug;

/// Seam: loads every workstream descriptor of a feature.
pub trait WorkstreamSource {
    /// All descriptors belonging to `feature`.
    fn load_feature(&self, feature: &FeatureId) -> Result<Vec<WorkstreamDoc>>;
}

/// Filesystem source over `docs/workstreams/backlog/`.
#[derive(Debug, Clone)]
pub struct FsSource {
    paths: SdpPaths,
}

impl FsSource {
    /// Source over a project layout.
    pub fn new(paths: SdpPaths) -> Self {
        Self { paths }
    }
}

impl WorkstreamSource for FsSource {
    fn load_feature(&self, feature: &FeatureId) -> Result<Vec<WorkstreamDoc>> {
        let dir = self.paths.backlog_dir();
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut docs = Vec::new();
        let mut entries: Vec<_> = std::fs::read_dir(&dir)
            .map_err(SdpError::from)?
            .collect::<std::io::Result<_>>()
            .map_err(SdpError::from)?;
        entries.sort_by_key(std::fs::DirEntry::file_name);

        for entry in entries {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("md") {
                continue;
            }
            let doc = parse_descriptor_file(&path)?;
            if doc.feature_id == *feature {
                docs.push(doc);
            }
        }
        debug!(%feature, count = docs.len(), "loaded workstream descriptors");
        Ok(docs)
    }
}

/// In-memory source for tests and embedding.
#[derive(Debug, Clone, Default)]
pub struct MemSource {
    docs: Vec<WorkstreamDoc>,
}

impl MemSource {
    /// Source over a fixed document set.
    pub fn new(docs: Vec<WorkstreamDoc>) -> Self {
        Self { docs }
    }
}

impl WorkstreamSource for MemSource {
    fn load_feature(&self, feature: &FeatureId) -> Result<Vec<WorkstreamDoc>> {
        Ok(self
            .docs
            .iter()
            .filter(|d| d.feature_id == *feature)
            .cloned()
            .collect())
    }
}
