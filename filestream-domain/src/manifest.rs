use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::error::Result;
use super::message::ManifestPush;

// ---------------------------------------------------------------------------
// ManifestSnapshot
// ---------------------------------------------------------------------------

/// One file or directory under the job root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    // ---
    /// Relative to the root, `/`-separated.
    pub path: String,

    pub directory: bool,

    /// Bytes for files; `0` for directories.
    pub size: u64,

    /// Milliseconds since the Unix epoch, when the platform reports it.
    pub last_modified_ms: Option<u64>,

    /// Hex SHA-256 of the file contents, when checksumming is enabled.
    pub sha256: Option<String>,
}

// ---

/// A point-in-time description of the job directory.
///
/// The core never inspects it; it only hands it to the [`ManifestCodec`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestSnapshot {
    // ---
    pub entries: Vec<ManifestEntry>,
    pub file_count: u64,
    pub directory_count: u64,
    pub total_size: u64,
}

// ---

impl ManifestSnapshot {
    // ---
    /// Build a snapshot from entries, deriving the summary counters.
    pub fn from_entries(entries: Vec<ManifestEntry>) -> Self {
        // ---
        let mut snapshot = Self::default();
        for entry in &entries {
            if entry.directory {
                snapshot.directory_count += 1;
            } else {
                snapshot.file_count += 1;
                snapshot.total_size += entry.size;
            }
        }
        snapshot.entries = entries;
        snapshot
    }

    // ---

    pub fn entry(&self, path: &str) -> Option<&ManifestEntry> {
        self.entries.iter().find(|e| e.path == path)
    }
}

// ---------------------------------------------------------------------------
// ManifestService
// ---------------------------------------------------------------------------

/// Produces snapshots of a directory tree. Owns its own cache.
#[async_trait]
pub trait ManifestService: Send + Sync {
    // ---
    /// Current snapshot of `root`, possibly served from cache.
    async fn snapshot(&self, root: &Path) -> Result<Arc<ManifestSnapshot>>;

    /// Drop any cached snapshot of `root` so the next call rescans.
    async fn invalidate(&self, root: &Path);
}

// ---------------------------------------------------------------------------
// ManifestCodec
// ---------------------------------------------------------------------------

/// Converts a snapshot into the wire message pushed on the control channel.
pub trait ManifestCodec: Send + Sync {
    // ---
    fn encode(&self, job_id: &str, root: &Path, snapshot: &ManifestSnapshot) -> Result<ManifestPush>;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
