//! Certificate pinning between the agent and the coordinating server.
//!
//! The server runs on a self-signed identity ([`CertBundle`]). Its DER
//! certificate reaches the agent out of band and becomes the only root the
//! agent trusts ([`PinnedCert`]). Both sides speak TLS 1.3 with the ring
//! provider and require [`ALPN`].

use std::path::Path;
use std::sync::Arc;

use rustls::crypto::ring;
use rustls_pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};

use crate::error::QuicError;

/// ALPN protocol id spoken on every connection.
pub const ALPN: &[u8] = b"filestream/1";

fn tls_err(e: impl std::fmt::Display) -> QuicError {
    QuicError::Tls(e.to_string())
}

// ---------------------------------------------------------------------------
// CertBundle
// ---------------------------------------------------------------------------

/// The server's self-signed identity.
pub struct CertBundle {
    // ---
    server_name: String,
    pub cert_der: CertificateDer<'static>,
    key_der: PrivatePkcs8KeyDer<'static>,
}

impl CertBundle {
    // ---
    /// Agents must connect with the same `server_name`.
    pub fn generate(server_name: impl Into<String>) -> Result<Self, QuicError> {
        // ---
        let server_name = server_name.into();
        let certified = rcgen::generate_simple_self_signed(vec![server_name.clone()]).map_err(tls_err)?;

        Ok(Self {
            server_name,
            cert_der: certified.cert.der().clone(),
            key_der: PrivatePkcs8KeyDer::from(certified.key_pair.serialize_der()),
        })
    }

    // ---

    /// Write the certificate, never the key, for agents to pin.
    pub fn export_cert(&self, path: &Path) -> Result<(), QuicError> {
        std::fs::write(path, self.cert_der.as_ref())?;
        Ok(())
    }

    // ---

    /// What an agent needs to trust this server.
    pub fn pinned(&self) -> PinnedCert {
        PinnedCert::new(self.server_name.clone(), self.cert_der.clone())
    }

    // ---

    pub(crate) fn server_config(&self) -> Result<rustls::ServerConfig, QuicError> {
        // ---
        let mut cfg = rustls::ServerConfig::builder_with_provider(Arc::new(ring::default_provider()))
            .with_protocol_versions(&[&rustls::version::TLS13])
            .map_err(tls_err)?
            .with_no_client_auth()
            .with_single_cert(
                vec![self.cert_der.clone()],
                PrivateKeyDer::Pkcs8(self.key_der.clone_key()),
            )
            .map_err(tls_err)?;
        cfg.alpn_protocols = vec![ALPN.to_vec()];
        Ok(cfg)
    }
}

// ---------------------------------------------------------------------------
// PinnedCert
// ---------------------------------------------------------------------------

/// The single certificate an agent trusts and the name it was issued for.
#[derive(Debug, Clone)]
pub struct PinnedCert {
    // ---
    server_name: String,
    der: CertificateDer<'static>,
}

impl PinnedCert {
    // ---
    pub fn new(server_name: impl Into<String>, der: CertificateDer<'static>) -> Self {
        Self {
            server_name: server_name.into(),
            der,
        }
    }

    // ---

    /// Load a DER file written by [`CertBundle::export_cert`].
    pub fn from_der_file(path: &Path, server_name: impl Into<String>) -> Result<Self, QuicError> {
        // ---
        let bytes = std::fs::read(path)?;
        if bytes.is_empty() {
            return Err(QuicError::Tls(format!("{} is empty", path.display())));
        }
        Ok(Self::new(server_name, CertificateDer::from(bytes)))
    }

    // ---

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    // ---

    pub(crate) fn client_config(&self) -> Result<rustls::ClientConfig, QuicError> {
        // ---
        let mut roots = rustls::RootCertStore::empty();
        roots.add(self.der.clone()).map_err(tls_err)?;

        let mut cfg = rustls::ClientConfig::builder_with_provider(Arc::new(ring::default_provider()))
            .with_protocol_versions(&[&rustls::version::TLS13])
            .map_err(tls_err)?
            .with_root_certificates(Arc::new(roots))
            .with_no_client_auth();
        cfg.alpn_protocols = vec![ALPN.to_vec()];
        Ok(cfg)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn exported_cert_pins_the_same_identity() {
        // ---
        let bundle = CertBundle::generate("filestream").unwrap();
        let dir = std::env::temp_dir().join(format!("filestream-tls-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("server.der");

        bundle.export_cert(&path).unwrap();
        let pinned = PinnedCert::from_der_file(&path, "filestream").unwrap();
        std::fs::remove_dir_all(&dir).ok();

        assert_eq!(pinned.server_name(), "filestream");
        assert_eq!(pinned.der, bundle.cert_der);
        assert_eq!(pinned.client_config().unwrap().alpn_protocols, vec![ALPN.to_vec()]);
        assert_eq!(bundle.server_config().unwrap().alpn_protocols, vec![ALPN.to_vec()]);
    }

    #[test]
    fn empty_cert_file_is_rejected() {
        // ---
        let path = std::env::temp_dir().join(format!("filestream-empty-{}.der", std::process::id()));
        std::fs::write(&path, b"").unwrap();
        let result = PinnedCert::from_der_file(&path, "filestream");
        std::fs::remove_file(&path).ok();
        assert!(matches!(result, Err(QuicError::Tls(_))));
    }

    #[test]
    fn missing_cert_file_is_an_io_error() {
        let result = PinnedCert::from_der_file(Path::new("/nonexistent/server.der"), "filestream");
        assert!(matches!(result, Err(QuicError::Io(_))));
    }
}
