//! Outbound side of the wire protocol.
//!
//! The delivery worker only depends on the [`PeerTransport`] /
//! [`PeerConnection`] contract: "open a connection to this endpoint within a
//! timeout" and "deliver this message over it". [`TcpTransport`] implements
//! that contract over TCP, optionally wrapped in TLS. Connections are not
//! pooled; each call to [`PeerTransport::connect`] dials a fresh one.

use crate::message::*;
use crate::peer::{read_message, write_message, WireError};
use crate::tls::ClientCredentials;

use async_trait::async_trait;
use relayq_types::Message;
use std::fmt;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::debug;

/// A dialable network location.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parse `host:port` (IPv6 hosts in brackets, e.g. `[::1]:10000`).
    pub fn parse(s: &str) -> Result<Self, WireError> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| WireError::InvalidEndpoint(format!("missing port in '{s}'")))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(WireError::InvalidEndpoint(format!("missing host in '{s}'")));
        }
        let port = port
            .parse::<u16>()
            .map_err(|e| WireError::InvalidEndpoint(format!("bad port in '{s}': {e}")))?;
        Ok(Self::new(host, port))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Opens connections to remote queue managers.
#[async_trait]
pub trait PeerTransport: Send + Sync + 'static {
    /// Establish a connection, giving up after `timeout`.
    async fn connect(
        &self,
        endpoint: &Endpoint,
        timeout: Duration,
    ) -> Result<Box<dyn PeerConnection>, WireError>;
}

/// A single established connection to a remote queue manager.
#[async_trait]
pub trait PeerConnection: Send {
    /// Ask the remote node to admit `message`, giving up after `timeout`.
    ///
    /// A full remote buffer surfaces as [`WireError::Capacity`].
    async fn queue_message(&mut self, message: &Message, timeout: Duration)
        -> Result<(), WireError>;
}

/// Byte stream a connection runs over (plain TCP or TLS).
trait PeerStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> PeerStream for T {}

/// TCP implementation of [`PeerTransport`].
#[derive(Debug, Clone, Default)]
pub struct TcpTransport {
    tls: Option<ClientCredentials>,
    tls_domain: Option<String>,
}

impl TcpTransport {
    /// Dial peers over plain TCP.
    pub fn insecure() -> Self {
        Self::default()
    }

    /// Dial peers over TLS, verifying them against `credentials`.
    ///
    /// The server name checked is `tls_domain` when given, else the endpoint host.
    pub fn secure(credentials: ClientCredentials, tls_domain: Option<String>) -> Self {
        Self {
            tls: Some(credentials),
            tls_domain,
        }
    }

    pub fn is_secure(&self) -> bool {
        self.tls.is_some()
    }

    /// Dial `endpoint` and return the concrete connection type.
    pub async fn dial(
        &self,
        endpoint: &Endpoint,
        timeout: Duration,
    ) -> Result<TcpConnection, WireError> {
        let dial = async {
            let tcp = TcpStream::connect((endpoint.host.as_str(), endpoint.port)).await?;
            tcp.set_nodelay(true)?;
            let stream: Box<dyn PeerStream> = match &self.tls {
                Some(credentials) => {
                    let domain = self.tls_domain.as_deref().unwrap_or(&endpoint.host);
                    Box::new(credentials.connect(domain, tcp).await?)
                }
                None => Box::new(tcp),
            };
            Ok::<_, WireError>(stream)
        };

        let stream = tokio::time::timeout(timeout, dial)
            .await
            .map_err(|_| WireError::Timeout {
                operation: "connect",
                after: timeout,
            })??;

        debug!(endpoint = %endpoint, tls = self.is_secure(), "Connected to peer");
        Ok(TcpConnection {
            stream,
            endpoint: endpoint.clone(),
        })
    }
}

#[async_trait]
impl PeerTransport for TcpTransport {
    async fn connect(
        &self,
        endpoint: &Endpoint,
        timeout: Duration,
    ) -> Result<Box<dyn PeerConnection>, WireError> {
        let conn = self.dial(endpoint, timeout).await?;
        Ok(Box::new(conn))
    }
}

/// An established TCP (or TLS) connection.
pub struct TcpConnection {
    stream: Box<dyn PeerStream>,
    endpoint: Endpoint,
}

impl TcpConnection {
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Check liveness; returns the remote node's identity.
    pub async fn ping(&mut self, timeout: Duration) -> Result<String, WireError> {
        match self.call(WireRequest::Ping, timeout).await? {
            WireResponse::Pong { node_id } => Ok(node_id),
            other => Err(WireError::UnexpectedResponse(format!("{other:?}"))),
        }
    }

    /// Send one request and wait for the matching response.
    async fn call(
        &mut self,
        request: WireRequest,
        timeout: Duration,
    ) -> Result<WireResponse, WireError> {
        let msg = WireMessage::request(request);
        let exchange = async {
            write_message(&mut self.stream, &msg).await?;
            read_message(&mut self.stream).await
        };
        let response = tokio::time::timeout(timeout, exchange)
            .await
            .map_err(|_| WireError::Timeout {
                operation: "call",
                after: timeout,
            })??;

        if response.id != msg.id {
            return Err(WireError::UnexpectedResponse(format!(
                "response id {} does not match request id {}",
                response.id, msg.id
            )));
        }
        match response.kind {
            WireMessageKind::Response(resp) => Ok(resp),
            WireMessageKind::Request(_) => Err(WireError::UnexpectedResponse(
                "peer answered with a request".to_string(),
            )),
        }
    }
}

#[async_trait]
impl PeerConnection for TcpConnection {
    async fn queue_message(
        &mut self,
        message: &Message,
        timeout: Duration,
    ) -> Result<(), WireError> {
        let request = WireRequest::QueueMessage {
            message: message.clone(),
        };
        match self.call(request, timeout).await? {
            WireResponse::Queued => Ok(()),
            WireResponse::CapacityExceeded(err) => Err(WireError::Capacity(err)),
            WireResponse::Error { code, message } => Err(WireError::Remote { code, message }),
            other => Err(WireError::UnexpectedResponse(format!("{other:?}"))),
        }
    }
}
