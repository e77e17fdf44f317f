//! [`QuicTransport`]: one quinn endpoint, in either the agent (client) or
//! coordinating server role.
//!
//! An agent holds a single connection for the life of a job, with long quiet
//! stretches between manifest pushes. Both roles therefore send keep-alives
//! well inside the idle timeout.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use filestream_domain::{FileStreamError, FileStreamTransport, Result};

use crate::error::QuicError;
use crate::session::QuicSession;
use crate::tls::{CertBundle, PinnedCert};

pub const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(5);
pub const MAX_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Depth of the queue between the accept loop and [`QuicTransport::listen`].
const ACCEPT_QUEUE_DEPTH: usize = 16;

fn transport_config() -> Result<Arc<quinn::TransportConfig>> {
    // ---
    let idle = quinn::IdleTimeout::try_from(MAX_IDLE_TIMEOUT)
        .map_err(|e| QuicError::Endpoint(e.to_string()))?;

    let mut cfg = quinn::TransportConfig::default();
    cfg.keep_alive_interval(Some(KEEP_ALIVE_INTERVAL))
        .max_idle_timeout(Some(idle));
    Ok(Arc::new(cfg))
}

// ---------------------------------------------------------------------------
// QuicTransport
// ---------------------------------------------------------------------------

enum Role {
    // ---
    Server,
    Client(PinnedCert),
}

pub struct QuicTransport {
    // ---
    endpoint: quinn::Endpoint,
    role: Role,
}

impl QuicTransport {
    // ---
    /// Coordinating-server side, bound to `bind_addr`.
    pub fn server(bundle: &CertBundle, bind_addr: SocketAddr) -> Result<Self> {
        // ---
        let crypto = quinn::crypto::rustls::QuicServerConfig::try_from(bundle.server_config()?)
            .map_err(|e| QuicError::Tls(e.to_string()))?;
        let mut server = quinn::ServerConfig::with_crypto(Arc::new(crypto));
        server.transport_config(transport_config()?);

        let endpoint = quinn::Endpoint::server(server, bind_addr)
            .map_err(|e| QuicError::Endpoint(e.to_string()))?;

        Ok(Self {
            endpoint,
            role: Role::Server,
        })
    }

    // ---

    /// Agent side, trusting only `pinned`.
    pub fn client(pinned: PinnedCert) -> Result<Self> {
        // ---
        let crypto = quinn::crypto::rustls::QuicClientConfig::try_from(pinned.client_config()?)
            .map_err(|e| QuicError::Tls(e.to_string()))?;
        let mut client = quinn::ClientConfig::new(Arc::new(crypto));
        client.transport_config(transport_config()?);

        let mut endpoint = quinn::Endpoint::client(SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)))
            .map_err(|e| QuicError::Endpoint(e.to_string()))?;
        endpoint.set_default_client_config(client);

        Ok(Self {
            endpoint,
            role: Role::Client(pinned),
        })
    }

    // ---

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.endpoint.local_addr()
    }

    // ---

    /// Server side: each completed handshake arrives as a session. Failed
    /// handshakes are logged and skipped.
    pub fn listen(&self) -> mpsc::Receiver<QuicSession> {
        // ---
        let endpoint = self.endpoint.clone();
        let (tx, rx) = mpsc::channel(ACCEPT_QUEUE_DEPTH);

        tokio::spawn(async move {
            while let Some(incoming) = endpoint.accept().await {
                let remote = incoming.remote_address();
                let tx = tx.clone();
                tokio::spawn(async move {
                    match incoming.await {
                        Ok(conn) => {
                            tracing::debug!(%remote, "quic: accepted");
                            tx.send(QuicSession::new(conn)).await.ok();
                        }
                        Err(e) => tracing::warn!(%remote, "quic: handshake failed: {e}"),
                    }
                });
            }
            tracing::debug!("quic: accept loop exit");
        });

        rx
    }

    // ---

    /// Close every connection on the endpoint and wait for the peer to see
    /// it, so the last stream frames are not lost on exit.
    pub async fn shutdown(&self) {
        self.endpoint.close(quinn::VarInt::from_u32(0), b"shutdown");
        self.endpoint.wait_idle().await;
    }
}

// ---

#[async_trait]
impl FileStreamTransport for QuicTransport {
    // ---
    type Session = QuicSession;

    async fn connect(&self, remote: SocketAddr) -> Result<QuicSession> {
        // ---
        let Role::Client(pinned) = &self.role else {
            return Err(FileStreamError::Transport("server endpoint cannot connect".into()));
        };

        let conn = self
            .endpoint
            .connect(remote, pinned.server_name())
            .map_err(QuicError::Connect)?
            .await
            .map_err(QuicError::Connection)?;

        tracing::debug!(%remote, server_name = pinned.server_name(), "quic: connected");
        Ok(QuicSession::new(conn))
    }
}
