use std::path::PathBuf;

use thiserror::Error;

// ---

#[derive(Debug, Error)]
pub enum FileStreamError {
    // ---
    #[error("transport error: {0}")]
    Transport(String),

    #[error("channel closed")]
    ChannelClosed,

    #[error("codec error: {0}")]
    Codec(String),

    #[error("manifest error: {0}")]
    Manifest(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    #[error("interrupted: {0}")]
    Interrupted(String),

    #[error("unexpected end of file {} at offset {offset}", path.display())]
    UnexpectedEof { path: PathBuf, offset: u64 },

    #[error("scheduler error: {0}")]
    Scheduler(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

// ---

pub type Result<T> = std::result::Result<T, FileStreamError>;
