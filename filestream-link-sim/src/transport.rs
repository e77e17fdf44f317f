use std::net::SocketAddr;
use std::sync::Mutex;

use async_trait::async_trait;

use filestream_domain::{FileStreamTransport, Result};

use super::config::LinkSimConfig;
use super::peer::LinkSimPeer;
use super::session::LinkSimSession;

// ---------------------------------------------------------------------------
// LinkSimTransport
// ---------------------------------------------------------------------------

/// In-process mock transport. Does not use real sockets.
///
/// For simple unit tests, prefer [`LinkSimTransport::connected_pair`].
/// `connect` is provided so code written against [`FileStreamTransport`]
/// can run unchanged; the peer of the most recent `connect` is retrieved
/// with [`LinkSimTransport::take_peer`].
pub struct LinkSimTransport {
    // ---
    config: LinkSimConfig,
    last_peer: Mutex<Option<LinkSimPeer>>,
}

// ---

impl LinkSimTransport {
    // ---
    pub fn new(config: LinkSimConfig) -> Self {
        Self {
            config,
            last_peer: Mutex::new(None),
        }
    }

    // ---

    /// Create a directly-connected pair without going through `connect`.
    pub fn connected_pair(&self) -> (LinkSimSession, LinkSimPeer) {
        LinkSimSession::pair(self.config.clone())
    }

    // ---

    /// Peer end of the session returned by the last `connect`.
    pub fn take_peer(&self) -> Option<LinkSimPeer> {
        self.last_peer
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take()
    }
}

// ---

#[async_trait]
impl FileStreamTransport for LinkSimTransport {
    // ---
    type Session = LinkSimSession;

    async fn connect(&self, _remote: SocketAddr) -> Result<Self::Session> {
        // ---
        let (session, peer) = LinkSimSession::pair(self.config.clone());
        *self
            .last_peer
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(peer);
        Ok(session)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
