//! Filestream agent core.
//!
//! Keeps one control channel open to the coordinating server, pushes
//! manifests of the job directory on a backoff schedule, and serves
//! file-fetch requests on dedicated, ack-gated transfer channels.
//!
//! # Structure
//!
//! - [`admission_gate`] — [`AdmissionGate`], bounded permits over transfers
//! - [`transfer`]       — [`TransferEngine`], one request start to finish
//! - [`control`]        — control channel actor (lifecycle, pushes, admission)
//! - [`service`]        — [`FileStreamService`], the public facade
//! - [`manifest`]       — [`DirectoryManifestService`] (walkdir + TTL cache)
//! - [`codec`]          — [`JsonManifestCodec`]
//! - [`scheduler`]      — [`TokioScheduler`]
//! - [`config`]         — [`FileStreamConfig`] and the daemon [`Config`]

mod admission_gate;
mod codec;
mod config;
mod control;
mod manifest;
mod scheduler;
mod service;
mod transfer;

// Gateway re-exports; siblings import via super::Symbol
pub use admission_gate::{AdmissionGate, DrainOutcome, TransferPermit};
pub use codec::JsonManifestCodec;
pub use config::{
    // ---
    Config,
    DelayTypeArg,
    FileStreamConfig,
    DEFAULT_CHUNK_MAX_BYTES,
    DEFAULT_DRAIN_POLL_INTERVAL,
    DEFAULT_DRAIN_TIMEOUT,
    DEFAULT_MAX_CONCURRENT_TRANSFERS,
    MAX_CHUNK_MAX_BYTES,
};
pub use manifest::DirectoryManifestService;
pub use scheduler::TokioScheduler;
pub use service::{FileStreamDeps, FileStreamService};
pub use transfer::{TransferEngine, TransferHandle, TransferRegistry, TransferRequest};
