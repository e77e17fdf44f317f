//! [`QuicSession`] — a live QUIC connection implementing [`FileStreamSession`].
//!
//! Each channel is one bidirectional QUIC stream. The outbound half is wrapped
//! in a [`QuicSink`]; the inbound half is drained by a reader task that turns
//! frames into [`ChannelEvent`]s.

use std::marker::PhantomData;

// ---

use async_trait::async_trait;
use tokio::sync::mpsc;

// ---

use filestream_domain::{
    // ---
    ChannelEvent,
    ChannelSink,
    ChunkAck,
    ControlChannel,
    FileChunk,
    FileStreamError,
    FileStreamSession,
    InboundRx,
    ManifestPush,
    Result,
    ServerControlMsg,
    TransferChannel,
};

// ---

use crate::error::QuicError;
use crate::framing::{
    // ---
    read_frame,
    read_header,
    write_frame,
    write_header,
    ChannelHeader,
    Frame,
    WireMessage,
    KIND_ERROR,
    KIND_MESSAGE,
};

// ---------------------------------------------------------------------------
// QuicSession
// ---------------------------------------------------------------------------

/// A live QUIC connection to the coordinating server.
pub struct QuicSession {
    // ---
    conn: quinn::Connection,
}

// ---

impl QuicSession {
    // ---
    pub fn new(conn: quinn::Connection) -> Self {
        Self { conn }
    }

    // ---

    pub fn remote_address(&self) -> std::net::SocketAddr {
        self.conn.remote_address()
    }

    // ---

    /// Server side: wait for the agent to open its next channel and read
    /// the channel header.
    pub async fn accept_channel(&self) -> Result<AcceptedChannel> {
        // ---
        let (send, mut recv) = self.conn.accept_bi().await.map_err(QuicError::Connection)?;
        let header = read_header(&mut recv).await?;
        Ok(AcceptedChannel { header, send, recv })
    }

    // ---

    pub fn close(&self) {
        self.conn.close(quinn::VarInt::from_u32(0), b"closed");
    }
}

// ---

#[async_trait]
impl FileStreamSession for QuicSession {
    // ---
    async fn open_control(&self, compression: bool) -> Result<ControlChannel> {
        // ---
        let (mut send, recv) = self.conn.open_bi().await.map_err(QuicError::Connection)?;
        write_header(&mut send, ChannelHeader::Control { compression }).await?;

        Ok(ControlChannel {
            sink: Box::new(QuicSink::<ManifestPush>::new(send)),
            inbound: spawn_reader::<ServerControlMsg>(recv),
        })
    }

    // ---

    async fn open_transfer(&self) -> Result<TransferChannel> {
        // ---
        let (mut send, recv) = self.conn.open_bi().await.map_err(QuicError::Connection)?;
        write_header(&mut send, ChannelHeader::Transfer).await?;

        Ok(TransferChannel {
            sink: Box::new(QuicSink::<FileChunk>::new(send)),
            inbound: spawn_reader::<ChunkAck>(recv),
        })
    }
}

// ---------------------------------------------------------------------------
// AcceptedChannel
// ---------------------------------------------------------------------------

/// A channel opened by the remote side, header already consumed.
pub struct AcceptedChannel {
    // ---
    pub header: ChannelHeader,
    pub send: quinn::SendStream,
    pub recv: quinn::RecvStream,
}

// ---------------------------------------------------------------------------
// QuicSink
// ---------------------------------------------------------------------------

/// Outbound half of a channel. `complete` finishes the QUIC stream;
/// `fail` writes an error frame first.
pub struct QuicSink<T> {
    // ---
    send: quinn::SendStream,
    closed: bool,
    _msg: PhantomData<fn(T)>,
}

// ---

impl<T> QuicSink<T> {
    // ---
    pub fn new(send: quinn::SendStream) -> Self {
        Self {
            send,
            closed: false,
            _msg: PhantomData,
        }
    }

    // ---

    fn finish(&mut self) -> Result<()> {
        self.send
            .finish()
            .map_err(|e| FileStreamError::Transport(e.to_string()))
    }
}

// ---

#[async_trait]
impl<T: WireMessage> ChannelSink<T> for QuicSink<T> {
    // ---
    async fn send(&mut self, msg: T) -> Result<()> {
        // ---
        if self.closed {
            return Err(FileStreamError::ChannelClosed);
        }
        let payload = msg.encode()?;
        write_frame(&mut self.send, KIND_MESSAGE, &payload).await?;
        Ok(())
    }

    // ---

    async fn complete(&mut self) -> Result<()> {
        // ---
        if self.closed {
            return Err(FileStreamError::ChannelClosed);
        }
        self.closed = true;
        self.finish()
    }

    // ---

    async fn fail(&mut self, reason: &str) -> Result<()> {
        // ---
        if self.closed {
            return Err(FileStreamError::ChannelClosed);
        }
        self.closed = true;
        write_frame(&mut self.send, KIND_ERROR, reason.as_bytes()).await?;
        self.finish()
    }
}

// ---------------------------------------------------------------------------
// Inbound reader
// ---------------------------------------------------------------------------

/// Relay frames from `recv` as channel events until a terminal one.
pub fn spawn_reader<T: WireMessage>(mut recv: quinn::RecvStream) -> InboundRx<T> {
    // ---
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        loop {
            let event = match read_frame(&mut recv).await {
                Ok(Some(Frame {
                    kind: KIND_MESSAGE,
                    payload,
                })) => match T::decode(&payload) {
                    Ok(msg) => ChannelEvent::Message(msg),
                    Err(e) => ChannelEvent::Error(e.to_string()),
                },
                Ok(Some(Frame {
                    kind: KIND_ERROR,
                    payload,
                })) => ChannelEvent::Error(String::from_utf8_lossy(&payload).into_owned()),
                Ok(Some(frame)) => {
                    ChannelEvent::Error(format!("unexpected frame kind {}", frame.kind))
                }
                Ok(None) => ChannelEvent::Completed,
                Err(e) => ChannelEvent::Error(e.to_string()),
            };

            let terminal = event.is_terminal();
            if tx.send(event).is_err() || terminal {
                break;
            }
        }
        tracing::trace!("quic: channel reader exit");
    });

    rx
}
