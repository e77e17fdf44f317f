use tokio::sync::mpsc;

// ---

use filestream_domain::{
    // ---
    ChannelEvent,
    ChunkAck,
    FileChunk,
    FileFetchRequest,
    ManifestPush,
    ServerControlMsg,
};

// ---------------------------------------------------------------------------
// LinkSimPeer
// ---------------------------------------------------------------------------

/// The coordinating peer's end of an in-process link.
///
/// Tests use it to observe channels the agent opens and to play the
/// server: issue file requests, acknowledge chunks, tear channels down.
pub struct LinkSimPeer {
    // ---
    control_rx: mpsc::UnboundedReceiver<PeerControlChannel>,
    transfer_rx: mpsc::UnboundedReceiver<PeerTransferChannel>,
}

// ---

impl LinkSimPeer {
    // ---
    pub(crate) fn new(
        control_rx: mpsc::UnboundedReceiver<PeerControlChannel>,
        transfer_rx: mpsc::UnboundedReceiver<PeerTransferChannel>,
    ) -> Self {
        Self {
            control_rx,
            transfer_rx,
        }
    }

    // ---

    /// Wait for the agent to open a control channel.
    /// `None` once the agent-side session is dropped.
    pub async fn next_control(&mut self) -> Option<PeerControlChannel> {
        self.control_rx.recv().await
    }

    // ---

    /// Control channel already opened, if any, without waiting.
    pub fn try_next_control(&mut self) -> Option<PeerControlChannel> {
        self.control_rx.try_recv().ok()
    }

    // ---

    /// Wait for the agent to open a transfer channel.
    pub async fn next_transfer(&mut self) -> Option<PeerTransferChannel> {
        self.transfer_rx.recv().await
    }

    // ---

    /// Transfer channel already opened, if any, without waiting.
    pub fn try_next_transfer(&mut self) -> Option<PeerTransferChannel> {
        self.transfer_rx.try_recv().ok()
    }
}

// ---------------------------------------------------------------------------
// PeerControlChannel
// ---------------------------------------------------------------------------

/// Peer end of one control channel.
pub struct PeerControlChannel {
    // ---
    /// Whether the agent asked for compression when opening.
    pub compression: bool,

    outbound: mpsc::UnboundedReceiver<ChannelEvent<ManifestPush>>,
    inbound: mpsc::UnboundedSender<ChannelEvent<ServerControlMsg>>,
}

// ---

impl PeerControlChannel {
    // ---
    pub(crate) fn new(
        compression: bool,
        outbound: mpsc::UnboundedReceiver<ChannelEvent<ManifestPush>>,
        inbound: mpsc::UnboundedSender<ChannelEvent<ServerControlMsg>>,
    ) -> Self {
        Self {
            compression,
            outbound,
            inbound,
        }
    }

    // ---

    /// Next event the agent sent. `None` once the agent dropped its sink.
    pub async fn recv(&mut self) -> Option<ChannelEvent<ManifestPush>> {
        self.outbound.recv().await
    }

    // ---

    pub fn try_recv(&mut self) -> Option<ChannelEvent<ManifestPush>> {
        self.outbound.try_recv().ok()
    }

    // ---

    /// Wait for the next manifest; a terminal event yields `None`.
    pub async fn recv_manifest(&mut self) -> Option<ManifestPush> {
        match self.outbound.recv().await? {
            ChannelEvent::Message(push) => Some(push),
            _ => None,
        }
    }

    // ---

    /// Send a raw control message. Returns `false` if the agent is gone.
    pub fn send(&self, msg: ServerControlMsg) -> bool {
        self.inbound.send(ChannelEvent::Message(msg)).is_ok()
    }

    // ---

    pub fn request(&self, req: FileFetchRequest) -> bool {
        self.send(ServerControlMsg::FileRequest(req))
    }

    // ---

    /// Tear the channel down with an error, as a broken connection would.
    pub fn fail(&self, reason: &str) -> bool {
        self.inbound.send(ChannelEvent::Error(reason.to_string())).is_ok()
    }

    // ---

    /// Close the channel cleanly from the peer side.
    pub fn complete(&self) -> bool {
        self.inbound.send(ChannelEvent::Completed).is_ok()
    }
}

// ---------------------------------------------------------------------------
// PeerTransferChannel
// ---------------------------------------------------------------------------

/// Outcome of draining one transfer channel to its end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    // ---
    /// Agent signalled normal completion.
    Completed,

    /// Agent signalled error completion with this reason.
    Failed(String),

    /// Agent dropped the channel without a terminal signal.
    Dropped,
}

// ---

/// Peer end of one transfer channel.
pub struct PeerTransferChannel {
    // ---
    outbound: mpsc::UnboundedReceiver<ChannelEvent<FileChunk>>,
    inbound: mpsc::UnboundedSender<ChannelEvent<ChunkAck>>,
}

// ---

impl PeerTransferChannel {
    // ---
    pub(crate) fn new(
        outbound: mpsc::UnboundedReceiver<ChannelEvent<FileChunk>>,
        inbound: mpsc::UnboundedSender<ChannelEvent<ChunkAck>>,
    ) -> Self {
        Self { outbound, inbound }
    }

    // ---

    pub async fn recv(&mut self) -> Option<ChannelEvent<FileChunk>> {
        self.outbound.recv().await
    }

    // ---

    pub fn try_recv(&mut self) -> Option<ChannelEvent<FileChunk>> {
        self.outbound.try_recv().ok()
    }

    // ---

    /// Acknowledge the last chunk. Returns `false` if the agent is gone.
    pub fn ack(&self) -> bool {
        self.inbound.send(ChannelEvent::Message(ChunkAck {})).is_ok()
    }

    // ---

    pub fn fail(&self, reason: &str) -> bool {
        self.inbound.send(ChannelEvent::Error(reason.to_string())).is_ok()
    }

    // ---

    pub fn complete(&self) -> bool {
        self.inbound.send(ChannelEvent::Completed).is_ok()
    }

    // ---

    /// Acknowledge every chunk as it arrives until the agent ends the
    /// channel; returns the chunks in arrival order and how it ended.
    pub async fn receive_all(&mut self) -> (Vec<FileChunk>, TransferOutcome) {
        // ---
        let mut chunks = Vec::new();
        loop {
            match self.outbound.recv().await {
                Some(ChannelEvent::Message(chunk)) => {
                    chunks.push(chunk);
                    self.ack();
                }
                Some(ChannelEvent::Completed) => return (chunks, TransferOutcome::Completed),
                Some(ChannelEvent::Error(reason)) => {
                    return (chunks, TransferOutcome::Failed(reason))
                }
                None => return (chunks, TransferOutcome::Dropped),
            }
        }
    }
}
