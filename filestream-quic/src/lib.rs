//! QUIC transport for the filestream agent.
//!
//! Implements [`filestream_domain::FileStreamTransport`] using the `quinn`
//! crate. Every control or transfer channel is one bidirectional QUIC
//! stream carrying length-prefixed frames (see [`framing`]).
//!
//! # Quick start
//!
//! ```ignore
//! // --- coordinating server ---
//! use filestream_quic::{CertBundle, QuicTransport};
//!
//! let bundle      = CertBundle::generate("filestream")?;
//! bundle.export_cert(Path::new("server.der"))?;
//! let transport   = QuicTransport::server(&bundle, "0.0.0.0:5000".parse()?)?;
//! let mut sess_rx = transport.listen();
//!
//! // --- agent ---
//! use filestream_domain::FileStreamTransport;
//! use filestream_quic::{PinnedCert, QuicTransport};
//!
//! let pinned    = PinnedCert::from_der_file(Path::new("server.der"), "filestream")?;
//! let transport = QuicTransport::client(pinned)?;
//! let session   = transport.connect("192.168.1.2:5000".parse()?).await?;
//! ```

mod error;
pub mod framing;
mod session;
mod tls;
mod transport;

pub use error::QuicError;
pub use framing::{ChannelHeader, WireMessage};
pub use session::{spawn_reader, AcceptedChannel, QuicSession, QuicSink};
pub use tls::{CertBundle, PinnedCert, ALPN};
pub use transport::{QuicTransport, KEEP_ALIVE_INTERVAL, MAX_IDLE_TIMEOUT};
