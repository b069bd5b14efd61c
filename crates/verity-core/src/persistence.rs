//! Registry and trust-anchor snapshot.
//!
//! The snapshot is a single JSON document. It is written to `<path>.tmp`
//! and renamed over the target, so a crash mid-write leaves the previous
//! snapshot intact.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::{
    fs, io,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{debug, info};

use crate::{
    proof::{TrustAnchor, TrustAnchorStore},
    registry::{NodeRecord, NodeRegistry},
};

const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SnapshotError {
    #[error("snapshot io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("snapshot encoding error: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("unsupported snapshot version {found}, expected {SNAPSHOT_VERSION}")]
    UnsupportedVersion { found: u32 },
}

impl SnapshotError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io { path: path.to_path_buf(), source }
    }
}

/// Persisted node records and trust anchors of every chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub version: u32,
    /// Unix seconds at capture time.
    pub saved_at: i64,
    pub nodes: Vec<NodeRecord>,
    pub anchors: Vec<TrustAnchor>,
}

impl Snapshot {
    #[must_use]
    pub fn capture(registry: &NodeRegistry, anchors: &TrustAnchorStore) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            saved_at: Utc::now().timestamp(),
            nodes: registry.snapshot(),
            anchors: anchors.snapshot(),
        }
    }

    /// Restores the snapshot into live state. Returns the number of node
    /// records restored.
    pub fn apply(self, registry: &NodeRegistry, anchors: &TrustAnchorStore) -> usize {
        let anchor_count = self.anchors.len();
        anchors.restore(self.anchors);
        let restored = registry.restore(self.nodes);
        info!(nodes = restored, anchors = anchor_count, "restored persisted snapshot");
        restored
    }

    /// Writes the snapshot atomically, creating parent directories.
    ///
    /// # Errors
    /// Returns [`SnapshotError`] if encoding or any filesystem step fails.
    pub fn save(&self, path: &Path) -> Result<(), SnapshotError> {
        let data = serde_json::to_vec_pretty(self)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| SnapshotError::io(parent, e))?;
        }

        let temp_path = temp_path(path);
        fs::write(&temp_path, &data).map_err(|e| SnapshotError::io(&temp_path, e))?;
        fs::rename(&temp_path, path).map_err(|e| SnapshotError::io(path, e))?;

        debug!(
            path = %path.display(),
            nodes = self.nodes.len(),
            anchors = self.anchors.len(),
            "snapshot saved"
        );
        Ok(())
    }

    /// Reads a snapshot. A missing file is `Ok(None)`.
    ///
    /// # Errors
    /// Returns [`SnapshotError`] for unreadable or undecodable files and for
    /// snapshots written by an incompatible version.
    pub fn load(path: &Path) -> Result<Option<Self>, SnapshotError> {
        let data = match fs::read(path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(SnapshotError::io(path, e)),
        };
        let snapshot: Self = serde_json::from_slice(&data)?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(SnapshotError::UnsupportedVersion { found: snapshot.version });
        }
        Ok(Some(snapshot))
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
