//! Core traits and types for the filestream agent.
//!
//! This crate defines the vocabulary of the system. All other crates depend
//! on `filestream-domain` and speak its types. No I/O lives here.
//!
//! # Structure
//!
//! - [`error`]     — [`FileStreamError`] and [`Result<T>`] alias
//! - [`message`]   — wire messages for the control and transfer channels
//! - [`transport`] — [`ChannelSink`], [`FileStreamSession`], [`FileStreamTransport`] traits
//! - [`manifest`]  — [`ManifestSnapshot`], [`ManifestService`], [`ManifestCodec`]
//! - [`backoff`]   — [`BackoffTrigger`] (exponential delay with a ceiling)
//! - [`scheduler`] — [`Scheduler`] trait and [`ScheduledHandle`]

mod backoff;
mod error;
mod manifest;
mod message;
mod scheduler;
mod transport;

// --- error
pub use error::{FileStreamError, Result};

// --- message
pub use message::{
    // ---
    ChannelEvent,
    ChunkAck,
    FileChunk,
    FileFetchRequest,
    ManifestPush,
    ServerControlMsg,
};

// --- transport
pub use transport::{
    // ---
    ChannelSink,
    ControlChannel,
    ControlSinkPtr,
    FileStreamSession,
    FileStreamSessionPtr,
    FileStreamTransport,
    InboundRx,
    TransferChannel,
    TransferSinkPtr,
};

// --- manifest
pub use manifest::{
    // ---
    ManifestCodec,
    ManifestEntry,
    ManifestService,
    ManifestSnapshot,
};

// --- backoff
pub use backoff::{BackoffConfig, BackoffTrigger, DelayType, Trigger};

// --- scheduler
pub use scheduler::{ScheduledHandle, ScheduledTask, Scheduler, SchedulerPtr};
