//! Error types for `filestream-quic`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum QuicError {
    // ---
    #[error("TLS error: {0}")]
    Tls(String),

    #[error("QUIC connection error: {0}")]
    Connection(#[from] quinn::ConnectionError),

    #[error("QUIC connect error: {0}")]
    Connect(#[from] quinn::ConnectError),

    #[error("QUIC endpoint error: {0}")]
    Endpoint(String),

    #[error("framing error: {0}")]
    Framing(String),

    #[error("stream I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Bridge to filestream_domain::FileStreamError
// ---------------------------------------------------------------------------

impl From<QuicError> for filestream_domain::FileStreamError {
    // ---
    fn from(e: QuicError) -> Self {
        match e {
            QuicError::Framing(msg) => filestream_domain::FileStreamError::Codec(msg),
            other => filestream_domain::FileStreamError::Transport(other.to_string()),
        }
    }
}
