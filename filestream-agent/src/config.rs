//! Configuration for `filestream-agent`.
//!
//! [`FileStreamConfig`] is the library-level tuning of the service.
//! [`Config`] is the daemon command line; [`Config::file_stream`] maps it
//! onto a `FileStreamConfig`.
//!
//! Usage:
//!   filestream-agent --peer 10.0.0.2:5000 --cert /tmp/filestream-server.der \
//!       --job-id job-42 --job-dir /var/jobs/42

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

// ---

use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};

// ---

use filestream_domain::{BackoffConfig, DelayType, FileStreamError, Result};

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

pub const DEFAULT_MAX_CONCURRENT_TRANSFERS: usize = 5;
pub const DEFAULT_CHUNK_MAX_BYTES: usize = 1024 * 1024; // 1 MiB

/// Largest accepted `chunk_max_bytes`. Well under the QUIC frame cap, and
/// the engine allocates one buffer of this size per transfer.
pub const MAX_CHUNK_MAX_BYTES: usize = 16 * 1024 * 1024; // 16 MiB
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(15);
pub const DEFAULT_DRAIN_POLL_INTERVAL: Duration = Duration::from_secs(1);

// ---------------------------------------------------------------------------
// FileStreamConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileStreamConfig {
    // ---
    /// Manifest push cadence; also paces reconnection after a control
    /// channel error.
    pub push_backoff: BackoffConfig,

    pub max_concurrent_transfers: usize,

    /// Upper bound on the payload of one chunk.
    pub chunk_max_bytes: usize,

    /// How long `stop` waits for in-flight transfers before forcing them.
    pub drain_timeout: Duration,

    pub drain_poll_interval: Duration,

    /// Ask the transport to compress the control channel.
    pub enable_compression: bool,
}

// ---

impl Default for FileStreamConfig {
    fn default() -> Self {
        // ---
        Self {
            push_backoff: BackoffConfig::default(),
            max_concurrent_transfers: DEFAULT_MAX_CONCURRENT_TRANSFERS,
            chunk_max_bytes: DEFAULT_CHUNK_MAX_BYTES,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            drain_poll_interval: DEFAULT_DRAIN_POLL_INTERVAL,
            enable_compression: true,
        }
    }
}

// ---

impl FileStreamConfig {
    // ---
    pub fn validate(&self) -> Result<()> {
        // ---
        if self.max_concurrent_transfers == 0 {
            return Err(FileStreamError::Config(
                "max_concurrent_transfers must be at least 1".into(),
            ));
        }
        if self.chunk_max_bytes == 0 {
            return Err(FileStreamError::Config("chunk_max_bytes must be at least 1".into()));
        }
        if self.chunk_max_bytes > MAX_CHUNK_MAX_BYTES {
            return Err(FileStreamError::Config(format!(
                "chunk_max_bytes {} exceeds {MAX_CHUNK_MAX_BYTES}",
                self.chunk_max_bytes
            )));
        }

        let backoff = &self.push_backoff;
        if backoff.min_delay > backoff.max_delay {
            return Err(FileStreamError::Config(format!(
                "push min delay {:?} exceeds max delay {:?}",
                backoff.min_delay, backoff.max_delay
            )));
        }
        if backoff.factor.is_nan() || backoff.factor < 1.0 {
            return Err(FileStreamError::Config(format!(
                "push backoff factor {} must be >= 1.0",
                backoff.factor
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Parser)]
#[command(name = "filestream-agent", about = "Job directory file streaming agent")]
pub struct Config {
    // ---
    /// UDP address of the coordinating server's QUIC endpoint.
    #[arg(long)]
    pub peer: SocketAddr,

    /// TLS server name; must match the name in the server's certificate.
    #[arg(long, default_value = "filestream")]
    pub server_name: String,

    /// Path to the server's self-signed cert DER file.
    #[arg(long)]
    pub cert: PathBuf,

    /// Job identifier reported with every manifest.
    #[arg(long)]
    pub job_id: String,

    /// Job working directory served to the peer.
    #[arg(long)]
    pub job_dir: PathBuf,

    // --- push cadence
    #[arg(long, default_value_t = 1_000)]
    pub push_min_delay_ms: u64,

    #[arg(long, default_value_t = 10_000)]
    pub push_max_delay_ms: u64,

    #[arg(long, default_value_t = 1.1)]
    pub push_factor: f64,

    #[arg(long, value_enum, default_value_t = DelayTypeArg::FromPreviousExecutionBegin)]
    pub push_delay_type: DelayTypeArg,

    // --- transfers
    #[arg(long, default_value_t = DEFAULT_MAX_CONCURRENT_TRANSFERS)]
    pub max_concurrent_transfers: usize,

    #[arg(long, default_value_t = DEFAULT_CHUNK_MAX_BYTES)]
    pub chunk_max_bytes: usize,

    #[arg(long, default_value_t = DEFAULT_DRAIN_TIMEOUT.as_secs())]
    pub drain_timeout_secs: u64,

    /// Do not request compression on the control channel.
    #[arg(long)]
    pub no_compression: bool,

    // --- manifest
    /// How long a directory snapshot is reused. 0 rescans on every push.
    #[arg(long, default_value_t = 5)]
    pub manifest_ttl_secs: u64,

    /// Include a SHA-256 of every file in the manifest.
    #[arg(long)]
    pub manifest_checksums: bool,
}

// ---

impl Config {
    // ---
    pub fn file_stream(&self) -> FileStreamConfig {
        // ---
        FileStreamConfig {
            push_backoff: BackoffConfig {
                min_delay: Duration::from_millis(self.push_min_delay_ms),
                max_delay: Duration::from_millis(self.push_max_delay_ms),
                factor: self.push_factor,
                delay_type: self.push_delay_type.into(),
            },
            max_concurrent_transfers: self.max_concurrent_transfers,
            chunk_max_bytes: self.chunk_max_bytes,
            drain_timeout: Duration::from_secs(self.drain_timeout_secs),
            drain_poll_interval: DEFAULT_DRAIN_POLL_INTERVAL,
            enable_compression: !self.no_compression,
        }
    }

    // ---

    pub fn manifest_ttl(&self) -> Duration {
        Duration::from_secs(self.manifest_ttl_secs)
    }
}

// ---

/// Command-line spelling of [`DelayType`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DelayTypeArg {
    // ---
    FromPreviousScheduling,
    FromPreviousExecutionBegin,
    FromPreviousExecutionCompletion,
}

// ---

impl From<DelayTypeArg> for DelayType {
    fn from(arg: DelayTypeArg) -> Self {
        match arg {
            DelayTypeArg::FromPreviousScheduling => DelayType::FromPreviousScheduling,
            DelayTypeArg::FromPreviousExecutionBegin => DelayType::FromPreviousExecutionBegin,
            DelayTypeArg::FromPreviousExecutionCompletion => {
                DelayType::FromPreviousExecutionCompletion
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn defaults_are_valid() {
        // ---
        let config = FileStreamConfig::default();
        config.validate().unwrap();
        assert_eq!(config.max_concurrent_transfers, 5);
        assert_eq!(config.chunk_max_bytes, 1024 * 1024);
        assert_eq!(config.drain_timeout, Duration::from_secs(15));
        assert!(config.enable_compression);
    }

    // ---

    #[test]
    fn validate_rejects_bad_tuning() {
        // ---
        let zero_capacity = FileStreamConfig {
            max_concurrent_transfers: 0,
            ..Default::default()
        };
        assert!(zero_capacity.validate().is_err());

        let zero_chunk = FileStreamConfig {
            chunk_max_bytes: 0,
            ..Default::default()
        };
        assert!(zero_chunk.validate().is_err());

        let huge_chunk = FileStreamConfig {
            chunk_max_bytes: MAX_CHUNK_MAX_BYTES + 1,
            ..Default::default()
        };
        assert!(huge_chunk.validate().is_err());

        let largest_chunk = FileStreamConfig {
            chunk_max_bytes: MAX_CHUNK_MAX_BYTES,
            ..Default::default()
        };
        largest_chunk.validate().unwrap();

        let mut inverted = FileStreamConfig::default();
        inverted.push_backoff.min_delay = Duration::from_secs(20);
        assert!(inverted.validate().is_err());

        let mut shrinking = FileStreamConfig::default();
        shrinking.push_backoff.factor = 0.5;
        assert!(shrinking.validate().is_err());
    }

    // ---

    #[test]
    fn partial_json_falls_back_to_defaults() {
        // ---
        let config: FileStreamConfig =
            serde_json::from_str(r#"{"max_concurrent_transfers": 2, "enable_compression": false}"#)
                .unwrap();
        assert_eq!(config.max_concurrent_transfers, 2);
        assert!(!config.enable_compression);
        assert_eq!(config.chunk_max_bytes, DEFAULT_CHUNK_MAX_BYTES);
    }

    // ---

    #[test]
    fn command_line_maps_onto_file_stream_config() {
        // ---
        let cfg = Config::parse_from([
            "filestream-agent",
            "--peer",
            "127.0.0.1:5000",
            "--cert",
            "/tmp/server.der",
            "--job-id",
            "job-1",
            "--job-dir",
            "/tmp/job",
            "--max-concurrent-transfers",
            "2",
            "--push-delay-type",
            "from-previous-scheduling",
            "--no-compression",
        ]);

        let fs = cfg.file_stream();
        fs.validate().unwrap();
        assert_eq!(fs.max_concurrent_transfers, 2);
        assert_eq!(fs.push_backoff.delay_type, DelayType::FromPreviousScheduling);
        assert_eq!(fs.push_backoff.min_delay, Duration::from_secs(1));
        assert!(!fs.enable_compression);
    }
}
