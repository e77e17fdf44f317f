use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::error::Result;
use super::message::{ChannelEvent, ChunkAck, FileChunk, ManifestPush, ServerControlMsg};

// ---------------------------------------------------------------------------
// ChannelSink
// ---------------------------------------------------------------------------

/// Outbound half of a bidirectional channel.
///
/// `complete` and `fail` are the two terminal signals the remote side
/// observes as [`ChannelEvent::Completed`] and [`ChannelEvent::Error`].
/// After either one the sink must not be used again.
///
/// `#[async_trait]` keeps the trait dyn-compatible so the agent can hold
/// `Box<dyn ChannelSink<_>>` regardless of transport.
#[async_trait]
pub trait ChannelSink<T: Send + 'static>: Send {
    // ---
    /// Deliver one message. Ordered with respect to other sends on this sink.
    async fn send(&mut self, msg: T) -> Result<()>;

    /// Normal completion.
    async fn complete(&mut self) -> Result<()>;

    /// Error completion carrying a human-readable reason.
    async fn fail(&mut self, reason: &str) -> Result<()>;
}

// ---

pub type ControlSinkPtr = Box<dyn ChannelSink<ManifestPush>>;
pub type TransferSinkPtr = Box<dyn ChannelSink<FileChunk>>;

/// Inbound notifications for one channel, in delivery order.
pub type InboundRx<T> = mpsc::UnboundedReceiver<ChannelEvent<T>>;

// ---------------------------------------------------------------------------
// Channel pairs
// ---------------------------------------------------------------------------

/// The long-lived channel: manifests out, file requests in.
pub struct ControlChannel {
    // ---
    pub sink: ControlSinkPtr,
    pub inbound: InboundRx<ServerControlMsg>,
}

// ---

/// One per accepted file request: chunks out, acknowledgements in.
pub struct TransferChannel {
    // ---
    pub sink: TransferSinkPtr,
    pub inbound: InboundRx<ChunkAck>,
}

// ---------------------------------------------------------------------------
// FileStreamSession
// ---------------------------------------------------------------------------

/// A live connection to the coordinating peer.
///
/// Ordering is guaranteed within a channel and independent across channels.
#[async_trait]
pub trait FileStreamSession: Send + Sync {
    // ---
    /// Open the control channel. `compression` is a request; transports that
    /// cannot compress ignore it.
    async fn open_control(&self, compression: bool) -> Result<ControlChannel>;

    /// Open a dedicated transfer channel.
    async fn open_transfer(&self) -> Result<TransferChannel>;
}

// ---

/// Convenience type alias for a shared [`FileStreamSession`].
pub type FileStreamSessionPtr = Arc<dyn FileStreamSession>;

// ---------------------------------------------------------------------------
// FileStreamTransport
// ---------------------------------------------------------------------------

/// Factory for sessions.
///
/// Implementations: `filestream_quic::QuicTransport`, `filestream_link_sim::LinkSimTransport`.
#[async_trait]
pub trait FileStreamTransport: Send + Sync {
    // ---
    type Session: FileStreamSession + 'static;

    /// Connect to the coordinating peer.
    async fn connect(&self, remote: SocketAddr) -> Result<Self::Session>;
}
