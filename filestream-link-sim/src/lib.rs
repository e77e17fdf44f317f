//! In-process mock transport for filestream unit and integration testing.
//!
//! [`LinkSimTransport`] implements [`filestream_domain::FileStreamTransport`]
//! using tokio channels instead of sockets. Each session comes with a
//! [`LinkSimPeer`] that plays the coordinating server: it sees every channel
//! the agent opens, issues file requests, acknowledges chunks, and can tear
//! channels down with an error or a clean completion.
//!
//! [`LinkSimConfig`] injects open failures.
//!
//! # Quick start
//!
//! ```rust
//! use filestream_link_sim::{LinkSimConfig, LinkSimTransport};
//!
//! let (session, peer) = LinkSimTransport::new(LinkSimConfig::perfect())
//!     .connected_pair();
//! ```

mod config;
mod peer;
mod session;
mod sink;
mod transport;

// --- public API
pub use config::LinkSimConfig;
pub use peer::{LinkSimPeer, PeerControlChannel, PeerTransferChannel, TransferOutcome};
pub use session::LinkSimSession;
pub use transport::LinkSimTransport;

pub(crate) use sink::LinkSimSink;
