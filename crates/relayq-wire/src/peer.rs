//! QueueServer: inbound TCP listener for the relayq wire protocol.
//!
//! A [`QueueServer`] binds a local TCP listener and accepts connections from
//! other queue managers (and from local producers). Each connection, after an
//! optional TLS handshake, enters a request/response loop until the peer
//! hangs up or the server shuts down.
//!
//! The [`QueueHandler`] trait abstracts the node's admission entry point so
//! this crate does not depend on the node engine.

use crate::message::*;
use crate::tls::ServerCredentials;

use relayq_types::{AdmissionError, CapacityError, Message};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Errors from the wire protocol layer.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("TLS error: {0}")]
    Tls(#[from] native_tls::Error),
    #[error("Connection closed")]
    ConnectionClosed,
    #[error("Message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: u32, max: u32 },
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),
    #[error(transparent)]
    Capacity(#[from] CapacityError),
    #[error("Remote error {code}: {message}")]
    Remote { code: i32, message: String },
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),
}

/// Configuration for a QueueServer.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the listener on.
    pub listen_addr: SocketAddr,
    /// Present when inbound connections must complete a TLS handshake.
    pub tls: Option<ServerCredentials>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            tls: None,
        }
    }
}

/// Trait for the node to handle incoming requests.
///
/// Admission never blocks, so the handler is synchronous.
pub trait QueueHandler: Send + Sync + 'static {
    /// Identity reported in `Pong`.
    fn node_id(&self) -> &str;

    /// Admit a message into the send or deliver buffer.
    fn queue_message(&self, message: Message) -> Result<(), AdmissionError>;
}

/// The inbound listener of a queue manager.
pub struct QueueServer {
    /// Actual bound address (useful when binding to port 0).
    local_addr: SocketAddr,
}

impl QueueServer {
    /// Bind the configured address and start accepting connections.
    ///
    /// The accept loop and every connection loop stop when `shutdown` flips
    /// to `true`.
    pub async fn start(
        config: ServerConfig,
        handler: Arc<dyn QueueHandler>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<(Arc<Self>, tokio::task::JoinHandle<()>), WireError> {
        let listener = TcpListener::bind(config.listen_addr).await?;
        let local_addr = listener.local_addr()?;

        info!(
            addr = %local_addr,
            node_id = handler.node_id(),
            tls = config.tls.is_some(),
            "Queue manager listening"
        );

        let server = Arc::new(Self { local_addr });
        let accept_handle = tokio::spawn(async move {
            Self::accept_loop(listener, config.tls, handler, shutdown).await;
        });

        Ok((server, accept_handle))
    }

    /// Get the actual bound address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept loop, run in a spawned task.
    async fn accept_loop(
        listener: TcpListener,
        tls: Option<ServerCredentials>,
        handler: Arc<dyn QueueHandler>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            let accepted = tokio::select! {
                biased;
                _ = shutdown_signalled(&mut shutdown) => {
                    info!("Queue manager listener: shutdown signal received");
                    break;
                }
                accepted = listener.accept() => accepted,
            };
            match accepted {
                Ok((stream, addr)) => {
                    debug!(peer = %addr, "Accepted connection");
                    let tls = tls.clone();
                    let handler = Arc::clone(&handler);
                    let mut shutdown = shutdown.clone();
                    tokio::spawn(async move {
                        tokio::select! {
                            biased;
                            _ = shutdown_signalled(&mut shutdown) => {
                                debug!(peer = %addr, "Closing inbound connection on shutdown");
                            }
                            result = Self::handle_inbound(stream, tls, &*handler) => {
                                if let Err(e) = result {
                                    debug!(peer = %addr, error = %e, "Inbound connection ended");
                                }
                            }
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "Accept error");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }

    /// Handle a single inbound connection: optional TLS handshake, then the request loop.
    async fn handle_inbound(
        stream: TcpStream,
        tls: Option<ServerCredentials>,
        handler: &dyn QueueHandler,
    ) -> Result<(), WireError> {
        match tls {
            Some(credentials) => {
                let mut stream = credentials.accept(stream).await?;
                connection_loop(&mut stream, handler).await
            }
            None => {
                let mut stream = stream;
                connection_loop(&mut stream, handler).await
            }
        }
    }
}

/// Resolves once `shutdown` holds `true`, including when it already did
/// before this call. A dropped sender counts as shutdown.
async fn shutdown_signalled(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

/// Read/answer loop for an established connection.
async fn connection_loop<S>(stream: &mut S, handler: &dyn QueueHandler) -> Result<(), WireError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        let msg = match read_message(stream).await {
            Ok(m) => m,
            Err(WireError::ConnectionClosed) => return Ok(()),
            Err(e) => return Err(e),
        };

        match msg.kind {
            WireMessageKind::Request(request) => {
                let response = handle_request(request, handler);
                write_message(stream, &WireMessage::response(msg.id, response)).await?;
            }
            // We don't expect to receive responses on the server side
            WireMessageKind::Response(_) => {
                warn!(id = %msg.id, "Unexpected response message on inbound connection");
            }
        }
    }
}

/// Handle a single request and produce the response.
fn handle_request(request: WireRequest, handler: &dyn QueueHandler) -> WireResponse {
    match request {
        WireRequest::Ping => WireResponse::Pong {
            node_id: handler.node_id().to_string(),
        },
        WireRequest::QueueMessage { message } => {
            if message.destination_id.is_empty() {
                return WireResponse::Error {
                    code: 400,
                    message: "destination_id must not be empty".to_string(),
                };
            }
            match handler.queue_message(message) {
                Ok(()) => WireResponse::Queued,
                Err(AdmissionError::Capacity(e)) => WireResponse::CapacityExceeded(e),
                Err(e @ AdmissionError::ShuttingDown { .. }) => WireResponse::Error {
                    code: 503,
                    message: e.to_string(),
                },
            }
        }
    }
}

/// Write a framed message (4-byte length + JSON) to a stream.
pub async fn write_message<W>(writer: &mut W, msg: &WireMessage) -> Result<(), WireError>
where
    W: AsyncWrite + Unpin,
{
    let bytes = encode_message(msg)?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

/// Read a framed message (4-byte length + JSON) from a stream.
pub async fn read_message<R>(reader: &mut R) -> Result<WireMessage, WireError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; 4];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(WireError::ConnectionClosed);
        }
        Err(e) => return Err(WireError::Io(e)),
    }

    let len = decode_length(&header);
    if len > MAX_MESSAGE_SIZE {
        return Err(WireError::MessageTooLarge {
            size: len,
            max: MAX_MESSAGE_SIZE,
        });
    }

    let mut body = vec![0u8; len as usize];
    reader.read_exact(&mut body).await?;

    let msg = decode_message(&body)?;
    Ok(msg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use relayq_types::QueueKind;
    use std::sync::Mutex;

    /// Minimal QueueHandler for testing: admits up to `capacity` messages,
    /// and nothing once `closed` is set.
    struct TestHandler {
        admitted: Mutex<Vec<Message>>,
        capacity: usize,
        closed: std::sync::atomic::AtomicBool,
    }

    impl TestHandler {
        fn new(capacity: usize) -> Self {
            Self {
                admitted: Mutex::new(Vec::new()),
                capacity,
                closed: std::sync::atomic::AtomicBool::new(false),
            }
        }
    }

    impl QueueHandler for TestHandler {
        fn node_id(&self) -> &str {
            "server"
        }

        fn queue_message(&self, message: Message) -> Result<(), AdmissionError> {
            if self.closed.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(AdmissionError::ShuttingDown {
                    node_id: "server".to_string(),
                });
            }
            let mut admitted = self.admitted.lock().unwrap();
            if admitted.len() >= self.capacity {
                return Err(CapacityError::new(
                    "server",
                    admitted.len(),
                    self.capacity,
                    QueueKind::Send,
                )
                .into());
            }
            admitted.push(message);
            Ok(())
        }
    }

    async fn start_server(
        handler: Arc<TestHandler>,
    ) -> (Arc<QueueServer>, watch::Sender<bool>, tokio::task::JoinHandle<()>) {
        let (tx, rx) = watch::channel(false);
        let (server, task) = QueueServer::start(ServerConfig::default(), handler, rx)
            .await
            .unwrap();
        (server, tx, task)
    }

    async fn roundtrip(addr: SocketAddr, request: WireRequest) -> WireMessage {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let msg = WireMessage::request(request);
        write_message(&mut stream, &msg).await.unwrap();
        let response = read_message(&mut stream).await.unwrap();
        assert_eq!(response.id, msg.id);
        response
    }

    #[tokio::test]
    async fn test_ping_returns_node_id() {
        let (server, _tx, _task) = start_server(Arc::new(TestHandler::new(1))).await;
        let response = roundtrip(server.local_addr(), WireRequest::Ping).await;
        match response.kind {
            WireMessageKind::Response(WireResponse::Pong { node_id }) => {
                assert_eq!(node_id, "server");
            }
            other => panic!("Expected Pong, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_queue_message_admitted_then_rejected() {
        let handler = Arc::new(TestHandler::new(1));
        let (server, _tx, _task) = start_server(handler.clone()).await;

        let request = || WireRequest::QueueMessage {
            message: Message::new(b"hello".to_vec(), "elsewhere"),
        };

        let first = roundtrip(server.local_addr(), request()).await;
        assert!(matches!(
            first.kind,
            WireMessageKind::Response(WireResponse::Queued)
        ));

        let second = roundtrip(server.local_addr(), request()).await;
        match second.kind {
            WireMessageKind::Response(WireResponse::CapacityExceeded(err)) => {
                assert_eq!(err.queue_length, 1);
                assert_eq!(err.queue_capacity, 1);
            }
            other => panic!("Expected CapacityExceeded, got {other:?}"),
        }

        let admitted = handler.admitted.lock().unwrap();
        assert_eq!(admitted.len(), 1);
        assert_eq!(admitted[0].payload, b"hello");
    }

    #[tokio::test]
    async fn test_empty_destination_rejected() {
        let handler = Arc::new(TestHandler::new(10));
        let (server, _tx, _task) = start_server(handler.clone()).await;

        let response = roundtrip(
            server.local_addr(),
            WireRequest::QueueMessage {
                message: Message::new(b"x".to_vec(), ""),
            },
        )
        .await;
        match response.kind {
            WireMessageKind::Response(WireResponse::Error { code, .. }) => assert_eq!(code, 400),
            other => panic!("Expected Error(400), got {other:?}"),
        }
        assert!(handler.admitted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_multiple_requests_on_one_connection() {
        let handler = Arc::new(TestHandler::new(10));
        let (server, _tx, _task) = start_server(handler.clone()).await;

        let mut stream = TcpStream::connect(server.local_addr()).await.unwrap();
        for i in 0..3u8 {
            let msg = WireMessage::request(WireRequest::QueueMessage {
                message: Message::new(vec![i], "elsewhere"),
            });
            write_message(&mut stream, &msg).await.unwrap();
            let response = read_message(&mut stream).await.unwrap();
            assert_eq!(response.id, msg.id);
        }
        let payloads: Vec<Vec<u8>> = handler
            .admitted
            .lock()
            .unwrap()
            .iter()
            .map(|m| m.payload.clone())
            .collect();
        assert_eq!(payloads, vec![vec![0], vec![1], vec![2]]);
    }

    #[tokio::test]
    async fn test_eof_before_header_is_connection_closed() {
        let mut stream = tokio_test::io::Builder::new().build();
        assert!(matches!(
            read_message(&mut stream).await,
            Err(WireError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let mut stream = tokio_test::io::Builder::new()
            .read(&(MAX_MESSAGE_SIZE + 1).to_be_bytes())
            .build();
        match read_message(&mut stream).await {
            Err(WireError::MessageTooLarge { size, max }) => {
                assert_eq!(size, MAX_MESSAGE_SIZE + 1);
                assert_eq!(max, MAX_MESSAGE_SIZE);
            }
            other => panic!("Expected MessageTooLarge, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_accept_loop_stops_on_shutdown() {
        let (_server, tx, task) = start_server(Arc::new(TestHandler::new(1))).await;
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("accept loop should stop")
            .unwrap();
    }

    #[tokio::test]
    async fn test_accept_loop_stops_when_signalled_before_start() {
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();
        let (_server, task) = QueueServer::start(
            ServerConfig::default(),
            Arc::new(TestHandler::new(1)),
            rx,
        )
        .await
        .unwrap();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("accept loop should see the earlier signal")
            .unwrap();
    }

    #[tokio::test]
    async fn test_open_connection_closed_on_shutdown() {
        let (server, tx, _task) = start_server(Arc::new(TestHandler::new(10))).await;

        let mut stream = TcpStream::connect(server.local_addr()).await.unwrap();
        let msg = WireMessage::request(WireRequest::Ping);
        write_message(&mut stream, &msg).await.unwrap();
        read_message(&mut stream).await.unwrap();

        tx.send(true).unwrap();
        let next = tokio::time::timeout(Duration::from_secs(5), read_message(&mut stream))
            .await
            .expect("server should hang up");
        assert!(next.is_err());
    }

    #[tokio::test]
    async fn test_closed_handler_answers_503() {
        let handler = Arc::new(TestHandler::new(10));
        let (server, _tx, _task) = start_server(handler.clone()).await;
        handler
            .closed
            .store(true, std::sync::atomic::Ordering::SeqCst);

        let response = roundtrip(
            server.local_addr(),
            WireRequest::QueueMessage {
                message: Message::new(b"late".to_vec(), "elsewhere"),
            },
        )
        .await;
        match response.kind {
            WireMessageKind::Response(WireResponse::Error { code, message }) => {
                assert_eq!(code, 503);
                assert!(message.contains("shutting down"));
            }
            other => panic!("Expected Error(503), got {other:?}"),
        }
        assert!(handler.admitted.lock().unwrap().is_empty());
    }
}
