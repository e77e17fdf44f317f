//! [`DirectoryManifestService`] — walks the job directory into a
//! [`ManifestSnapshot`].
//!
//! The walk runs on the blocking pool. Snapshots are cached per root for a
//! fixed TTL; `invalidate` evicts so the next push sees fresh contents.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, SystemTime};

// ---

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::time::Instant;
use walkdir::WalkDir;

// ---

use filestream_domain::{FileStreamError, ManifestEntry, ManifestService, ManifestSnapshot, Result};

// ---------------------------------------------------------------------------
// DirectoryManifestService
// ---------------------------------------------------------------------------

struct Cached {
    // ---
    taken: Instant,
    snapshot: Arc<ManifestSnapshot>,
}

// ---

pub struct DirectoryManifestService {
    // ---
    /// Zero disables caching.
    ttl: Duration,

    /// Hash every regular file. Costly on large job directories.
    checksums: bool,

    cache: Mutex<HashMap<PathBuf, Cached>>,
}

// ---

impl DirectoryManifestService {
    // ---
    pub fn new(ttl: Duration, checksums: bool) -> Self {
        Self {
            ttl,
            checksums,
            cache: Mutex::new(HashMap::new()),
        }
    }

    // ---

    fn cached(&self, root: &Path) -> Option<Arc<ManifestSnapshot>> {
        // ---
        if self.ttl.is_zero() {
            return None;
        }
        let cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        cache
            .get(root)
            .filter(|c| c.taken.elapsed() < self.ttl)
            .map(|c| Arc::clone(&c.snapshot))
    }
}

// ---

#[async_trait]
impl ManifestService for DirectoryManifestService {
    // ---
    async fn snapshot(&self, root: &Path) -> Result<Arc<ManifestSnapshot>> {
        // ---
        if let Some(snapshot) = self.cached(root) {
            tracing::trace!(root = %root.display(), "manifest: cache hit");
            return Ok(snapshot);
        }

        let owned = root.to_path_buf();
        let checksums = self.checksums;
        let snapshot = tokio::task::spawn_blocking(move || scan(&owned, checksums))
            .await
            .map_err(|e| FileStreamError::Manifest(format!("scan task failed: {e}")))??;
        let snapshot = Arc::new(snapshot);

        tracing::debug!(
            root = %root.display(),
            files = snapshot.file_count,
            directories = snapshot.directory_count,
            bytes = snapshot.total_size,
            "manifest: scanned",
        );

        if !self.ttl.is_zero() {
            self.cache.lock().unwrap_or_else(PoisonError::into_inner).insert(
                root.to_path_buf(),
                Cached {
                    taken: Instant::now(),
                    snapshot: Arc::clone(&snapshot),
                },
            );
        }
        Ok(snapshot)
    }

    // ---

    async fn invalidate(&self, root: &Path) {
        // ---
        let removed = self
            .cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(root)
            .is_some();
        tracing::debug!(root = %root.display(), removed, "manifest: cache invalidated");
    }
}

// ---------------------------------------------------------------------------
// Directory walk
// ---------------------------------------------------------------------------

fn scan(root: &Path, checksums: bool) -> Result<ManifestSnapshot> {
    // ---
    let meta = fs::metadata(root)
        .map_err(|e| FileStreamError::Manifest(format!("{}: {e}", root.display())))?;
    if !meta.is_dir() {
        return Err(FileStreamError::Manifest(format!(
            "{} is not a directory",
            root.display()
        )));
    }

    let mut entries = Vec::new();

    for entry in WalkDir::new(root).min_depth(1).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::debug!("manifest: skipping unreadable entry: {e}");
                continue;
            }
        };

        let metadata = match entry.metadata() {
            Ok(m) => m,
            Err(_) => continue,
        };

        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };
        let path = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        let last_modified_ms = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(SystemTime::UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as u64);

        let directory = metadata.is_dir();
        let sha256 = if checksums && metadata.is_file() {
            match sha256_file(entry.path()) {
                Ok(digest) => Some(digest),
                Err(e) => {
                    tracing::debug!(%path, "manifest: checksum skipped: {e}");
                    None
                }
            }
        } else {
            None
        };

        entries.push(ManifestEntry {
            path,
            directory,
            size: if metadata.is_file() { metadata.len() } else { 0 },
            last_modified_ms,
            sha256,
        });
    }

    Ok(ManifestSnapshot::from_entries(entries))
}

// ---

fn sha256_file(path: &Path) -> io::Result<String> {
    // ---
    let mut hasher = Sha256::new();
    io::copy(&mut File::open(path)?, &mut hasher)?;
    Ok(hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    fn job_dir() -> tempfile::TempDir {
        // ---
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("logs")).unwrap();
        fs::write(dir.path().join("logs/out.txt"), b"abc").unwrap();
        fs::write(dir.path().join("run.sh"), b"#!/bin/sh\n").unwrap();
        dir
    }

    // ---

    #[tokio::test]
    async fn snapshot_lists_relative_paths() {
        // ---
        let dir = job_dir();
        let service = DirectoryManifestService::new(Duration::ZERO, false);
        let snapshot = service.snapshot(dir.path()).await.unwrap();

        let paths: Vec<&str> = snapshot.entries.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["logs", "logs/out.txt", "run.sh"]);
        assert_eq!(snapshot.directory_count, 1);
        assert_eq!(snapshot.file_count, 2);
        assert_eq!(snapshot.total_size, 13);
        assert!(snapshot.entries.iter().all(|e| e.sha256.is_none()));
    }

    // ---

    #[tokio::test]
    async fn checksums_are_hex_sha256() {
        // ---
        let dir = job_dir();
        let service = DirectoryManifestService::new(Duration::ZERO, true);
        let snapshot = service.snapshot(dir.path()).await.unwrap();

        let entry = snapshot.entry("logs/out.txt").unwrap();
        assert_eq!(
            entry.sha256.as_deref(),
            Some("ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"),
        );
        assert_eq!(snapshot.entry("logs").unwrap().sha256, None);
    }

    // ---

    #[tokio::test]
    async fn cache_serves_until_invalidated() {
        // ---
        let dir = job_dir();
        let service = DirectoryManifestService::new(Duration::from_secs(60), false);

        let first = service.snapshot(dir.path()).await.unwrap();
        fs::write(dir.path().join("new.txt"), b"x").unwrap();

        let second = service.snapshot(dir.path()).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second), "second call must hit the cache");

        service.invalidate(dir.path()).await;
        let third = service.snapshot(dir.path()).await.unwrap();
        assert!(third.entry("new.txt").is_some());
    }

    // ---

    #[tokio::test]
    async fn missing_root_is_a_manifest_error() {
        // ---
        let dir = tempfile::tempdir().unwrap();
        let service = DirectoryManifestService::new(Duration::ZERO, false);

        let err = service.snapshot(&dir.path().join("gone")).await.unwrap_err();
        assert!(matches!(err, FileStreamError::Manifest(_)), "got {err:?}");
    }
}
