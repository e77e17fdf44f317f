use async_trait::async_trait;
use tokio::sync::mpsc;

// ---

use filestream_domain::{
    // ---
    ControlChannel,
    FileStreamError,
    FileStreamSession,
    Result,
    TransferChannel,
};

// ---

use super::{LinkSimConfig, LinkSimPeer, LinkSimSink, PeerControlChannel, PeerTransferChannel};

// ---------------------------------------------------------------------------
// LinkSimSession
// ---------------------------------------------------------------------------

/// Agent-side end of an in-process link. Create it together with its
/// [`LinkSimPeer`] via [`LinkSimSession::pair`] or
/// [`super::LinkSimTransport::connected_pair`].
pub struct LinkSimSession {
    // ---
    /// Hands the peer its end of every opened control channel.
    control_tx: mpsc::UnboundedSender<PeerControlChannel>,

    /// Hands the peer its end of every opened transfer channel.
    transfer_tx: mpsc::UnboundedSender<PeerTransferChannel>,

    config: LinkSimConfig,
}

// ---

impl LinkSimSession {
    // ---
    /// Create a connected (session, peer) pair sharing the given config.
    pub fn pair(config: LinkSimConfig) -> (Self, LinkSimPeer) {
        // ---
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (transfer_tx, transfer_rx) = mpsc::unbounded_channel();

        let session = LinkSimSession {
            control_tx,
            transfer_tx,
            config,
        };
        (session, LinkSimPeer::new(control_rx, transfer_rx))
    }
}

// ---

#[async_trait]
impl FileStreamSession for LinkSimSession {
    // ---
    async fn open_control(&self, compression: bool) -> Result<ControlChannel> {
        // ---
        if self.config.refuse_control {
            return Err(FileStreamError::Transport("link-sim: control channel refused".into()));
        }

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();

        self.control_tx
            .send(PeerControlChannel::new(compression, out_rx, in_tx))
            .map_err(|_| FileStreamError::Transport("link-sim: peer gone".into()))?;

        let sink = if self.config.break_control_sends {
            LinkSimSink::broken(out_tx)
        } else {
            LinkSimSink::new(out_tx)
        };
        Ok(ControlChannel {
            sink: Box::new(sink),
            inbound: in_rx,
        })
    }

    // ---

    async fn open_transfer(&self) -> Result<TransferChannel> {
        // ---
        if self.config.refuse_transfer {
            return Err(FileStreamError::Transport("link-sim: transfer channel refused".into()));
        }

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();

        self.transfer_tx
            .send(PeerTransferChannel::new(out_rx, in_tx))
            .map_err(|_| FileStreamError::Transport("link-sim: peer gone".into()))?;

        Ok(TransferChannel {
            sink: Box::new(LinkSimSink::new(out_tx)),
            inbound: in_rx,
        })
    }
}
