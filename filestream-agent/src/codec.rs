//! [`JsonManifestCodec`] — manifest snapshot to [`ManifestPush`] bytes.

use std::path::Path;

// ---

use serde::Serialize;

// ---

use filestream_domain::{FileStreamError, ManifestCodec, ManifestPush, ManifestSnapshot, Result};

// ---------------------------------------------------------------------------
// JsonManifestCodec
// ---------------------------------------------------------------------------

/// Body of `ManifestPush.manifest`.
#[derive(Serialize)]
struct ManifestBody<'a> {
    // ---
    job_id: &'a str,
    root: String,
    #[serde(flatten)]
    snapshot: &'a ManifestSnapshot,
}

// ---

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonManifestCodec;

// ---

impl ManifestCodec for JsonManifestCodec {
    // ---
    fn encode(&self, job_id: &str, root: &Path, snapshot: &ManifestSnapshot) -> Result<ManifestPush> {
        // ---
        let body = ManifestBody {
            job_id,
            root: root.to_string_lossy().into_owned(),
            snapshot,
        };
        let manifest = serde_json::to_vec(&body).map_err(|e| FileStreamError::Codec(e.to_string()))?;

        Ok(ManifestPush {
            job_id: job_id.to_string(),
            manifest,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
