//! Transport credentials.
//!
//! Credentials are built once at startup and shared read-only across every
//! connection attempt. Certificate parsing is delegated to `native-tls`.

use crate::peer::WireError;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_native_tls::TlsStream;

/// Client side credentials: the roots trusted when dialing a peer.
#[derive(Clone)]
pub struct ClientCredentials {
    connector: Arc<tokio_native_tls::TlsConnector>,
}

impl ClientCredentials {
    /// Trust the PEM encoded certificate in `path` in addition to the system roots.
    pub fn from_pem_file(path: &Path) -> Result<Self, WireError> {
        let pem = std::fs::read(path)?;
        Self::from_pem(&pem)
    }

    /// Trust the PEM encoded certificate in `pem` in addition to the system roots.
    pub fn from_pem(pem: &[u8]) -> Result<Self, WireError> {
        let cert = native_tls::Certificate::from_pem(pem)?;
        let connector = native_tls::TlsConnector::builder()
            .add_root_certificate(cert)
            .build()?;
        Ok(Self {
            connector: Arc::new(connector.into()),
        })
    }

    /// Run the client handshake over an established stream.
    pub async fn connect<S>(&self, domain: &str, stream: S) -> Result<TlsStream<S>, WireError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        Ok(self.connector.connect(domain, stream).await?)
    }
}

impl fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCredentials").finish_non_exhaustive()
    }
}

/// Server side credentials: the certificate chain and key presented to peers.
#[derive(Clone)]
pub struct ServerCredentials {
    acceptor: Arc<tokio_native_tls::TlsAcceptor>,
}

impl ServerCredentials {
    /// Load a PEM certificate chain and a PKCS#8 PEM private key.
    pub fn from_pem_files(cert_path: &Path, key_path: &Path) -> Result<Self, WireError> {
        let cert = std::fs::read(cert_path)?;
        let key = std::fs::read(key_path)?;
        let identity = native_tls::Identity::from_pkcs8(&cert, &key)?;
        let acceptor = native_tls::TlsAcceptor::new(identity)?;
        Ok(Self {
            acceptor: Arc::new(acceptor.into()),
        })
    }

    /// Run the server handshake over an accepted stream.
    pub async fn accept<S>(&self, stream: S) -> Result<TlsStream<S>, WireError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        Ok(self.acceptor.accept(stream).await?)
    }
}

impl fmt::Debug for ServerCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerCredentials").finish_non_exhaustive()
    }
}
