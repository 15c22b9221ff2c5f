//! The queue manager node.
//!
//! A [`Node`] owns two bounded buffers. Admission ([`Node::queue_message`])
//! puts messages addressed to this node into the deliver buffer and every
//! other message into the send buffer, rejecting immediately when the chosen
//! buffer is full, and refusing everything once the node is shutting down.
//! A background send worker forwards the send buffer to
//! remote nodes. The deliver buffer is either drained by an attached
//! [`LocalConsumer`] or read by the application through [`Node::recv`].

use crate::backoff::Backoff;
use crate::buffer::BoundedBuffer;
use crate::consumer::LocalConsumer;
use crate::dead_letter::{AbandonReason, DeadLetter, DeadLetterSink, LogDeadLetters};
use crate::resolver::{AddressResolver, StaticResolver};
use crate::retry::RetryPolicy;
use crate::supervisor::{wait_for_shutdown, Supervisor};
use crate::transfer::Forwarder;
use crate::worker::{DeliverWorker, SendWorker};

use relayq_types::{
    AdmissionError, CapacityError, Message, NodeConfig, QueueKind, RelayError, RelayResult,
};
use relayq_wire::{ClientCredentials, PeerTransport, QueueHandler, TcpTransport};
use std::fmt;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// A running queue manager.
pub struct Node {
    config: NodeConfig,
    send_buffer: Arc<BoundedBuffer<Message>>,
    deliver_buffer: Arc<BoundedBuffer<Message>>,
    dead_letters: Arc<dyn DeadLetterSink>,
    supervisor: Supervisor,
    workers: Mutex<Vec<JoinHandle<()>>>,
    push_mode: bool,
}

/// Assembles a [`Node`], overriding any of its default collaborators.
pub struct NodeBuilder {
    config: NodeConfig,
    transport: Option<Arc<dyn PeerTransport>>,
    resolver: Option<Arc<dyn AddressResolver>>,
    dead_letters: Option<Arc<dyn DeadLetterSink>>,
    consumer: Option<Arc<dyn LocalConsumer>>,
    rng_seed: Option<u64>,
}

impl NodeBuilder {
    pub fn new(config: NodeConfig) -> Self {
        Self {
            config,
            transport: None,
            resolver: None,
            dead_letters: None,
            consumer: None,
            rng_seed: None,
        }
    }

    /// Dial peers through `transport` instead of TCP.
    pub fn transport(mut self, transport: Arc<dyn PeerTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Resolve destinations with `resolver` instead of the config's `peers` table.
    pub fn resolver(mut self, resolver: Arc<dyn AddressResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Hand abandoned messages to `sink` instead of logging them.
    pub fn dead_letters(mut self, sink: Arc<dyn DeadLetterSink>) -> Self {
        self.dead_letters = Some(sink);
        self
    }

    /// Push deliveries to `consumer` instead of holding them for [`Node::recv`].
    pub fn consumer(mut self, consumer: Arc<dyn LocalConsumer>) -> Self {
        self.consumer = Some(consumer);
        self
    }

    /// Seed the backoff jitter, for reproducible runs.
    pub fn rng_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }

    /// Validate the configuration, build the node and spawn its workers.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(self) -> RelayResult<Arc<Node>> {
        let config = self.config;
        config.validate()?;

        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(default_transport(&config)?),
        };
        let resolver = match self.resolver {
            Some(resolver) => resolver,
            None => Arc::new(StaticResolver::from_config(&config)?),
        };
        let dead_letters = self
            .dead_letters
            .unwrap_or_else(|| Arc::new(LogDeadLetters));
        let (send_backoff, deliver_backoff) = match self.rng_seed {
            Some(seed) => (
                Backoff::from_seed(seed),
                Backoff::from_seed(seed.wrapping_add(1)),
            ),
            None => (Backoff::from_entropy(), Backoff::from_entropy()),
        };

        let policy = RetryPolicy {
            maximum_backoff: config.maximum_backoff(),
            ceiling: config.backoff_ceiling,
        };
        let send_buffer = Arc::new(BoundedBuffer::new(config.send_buffer_capacity));
        let deliver_buffer = Arc::new(BoundedBuffer::new(config.delivery_buffer_capacity));
        let supervisor = Supervisor::new();

        let mut workers = Vec::with_capacity(2);
        let forwarder = Forwarder::new(
            transport,
            resolver,
            config.dial_timeout(),
            config.call_timeout(),
            policy,
        );
        workers.push(tokio::spawn(
            SendWorker {
                buffer: Arc::clone(&send_buffer),
                forwarder,
                backoff: send_backoff,
                dead_letters: Arc::clone(&dead_letters),
                shutdown: supervisor.subscribe(),
            }
            .run(),
        ));

        let push_mode = self.consumer.is_some();
        if let Some(consumer) = self.consumer {
            workers.push(tokio::spawn(
                DeliverWorker {
                    buffer: Arc::clone(&deliver_buffer),
                    consumer,
                    policy,
                    backoff: deliver_backoff,
                    dead_letters: Arc::clone(&dead_letters),
                    shutdown: supervisor.subscribe(),
                }
                .run(),
            ));
        }

        info!(
            node_id = %config.node_id,
            send_capacity = config.send_buffer_capacity,
            deliver_capacity = config.delivery_buffer_capacity,
            tls = config.tls_enabled,
            ceiling = ?config.backoff_ceiling,
            push_mode,
            "Queue manager started"
        );

        Ok(Arc::new(Node {
            config,
            send_buffer,
            deliver_buffer,
            dead_letters,
            supervisor,
            workers: Mutex::new(workers),
            push_mode,
        }))
    }
}

/// TCP transport, secured with the configured trust roots when TLS is enabled.
fn default_transport(config: &NodeConfig) -> RelayResult<TcpTransport> {
    if !config.tls_enabled {
        return Ok(TcpTransport::insecure());
    }
    let path = config.key_file_path.as_deref().ok_or_else(|| {
        RelayError::Config("tls specified, but missing path to pem file".to_string())
    })?;
    let credentials = ClientCredentials::from_pem_file(path)
        .map_err(|e| RelayError::Credentials(format!("{}: {e}", path.display())))?;
    Ok(TcpTransport::secure(credentials, config.tls_domain.clone()))
}

impl Node {
    pub fn builder(config: NodeConfig) -> NodeBuilder {
        NodeBuilder::new(config)
    }

    /// Start a node with the default collaborators.
    pub fn start(config: NodeConfig) -> RelayResult<Arc<Node>> {
        NodeBuilder::new(config).start()
    }

    pub fn node_id(&self) -> &str {
        &self.config.node_id
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// Admit a message into the deliver buffer (when addressed to this node)
    /// or the send buffer. Never blocks.
    ///
    /// Once [`Node::shutdown`] has begun nothing drains the buffers, so every
    /// message is refused with [`AdmissionError::ShuttingDown`].
    pub fn queue_message(&self, message: Message) -> Result<(), AdmissionError> {
        if self.supervisor.is_shutting_down() {
            debug!(destination = %message.destination_id, "Message refused, shutting down");
            return Err(AdmissionError::ShuttingDown {
                node_id: self.config.node_id.clone(),
            });
        }
        let (buffer, kind) = if message.destination_id == self.config.node_id {
            (&self.deliver_buffer, QueueKind::Deliver)
        } else {
            (&self.send_buffer, QueueKind::Send)
        };

        debug!(
            destination = %message.destination_id,
            queue = %kind,
            payload_bytes = message.payload.len(),
            "Queueing message"
        );
        buffer.try_push(message).map_err(|full| {
            let err = CapacityError::new(&self.config.node_id, full.len, buffer.capacity(), kind);
            debug!(error = %err, "Message rejected");
            err.into()
        })
    }

    /// Number of messages resident in one of the buffers.
    pub fn queue_len(&self, kind: QueueKind) -> usize {
        match kind {
            QueueKind::Send => self.send_buffer.len(),
            QueueKind::Deliver => self.deliver_buffer.len(),
        }
    }

    /// Take the next message addressed to this node, waiting for one.
    ///
    /// Returns `None` once the node is shutting down, and always when a
    /// [`LocalConsumer`] is attached, since the consumer owns the inbox then.
    pub async fn recv(&self) -> Option<Message> {
        if self.push_mode {
            return None;
        }
        let mut shutdown = self.supervisor.subscribe();
        tokio::select! {
            biased;
            _ = wait_for_shutdown(&mut shutdown) => None,
            message = self.deliver_buffer.pop() => Some(message),
        }
    }

    /// Take the next message addressed to this node if one is waiting.
    pub fn try_recv(&self) -> Option<Message> {
        if self.push_mode {
            return None;
        }
        self.deliver_buffer.try_pop()
    }

    /// Receiver that flips to `true` when the node shuts down.
    pub fn subscribe_shutdown(&self) -> watch::Receiver<bool> {
        self.supervisor.subscribe()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.supervisor.is_shutting_down()
    }

    /// Stop the workers and hand every message still waiting in the send
    /// buffer (and, in push mode, the deliver buffer) to the dead-letter sink.
    ///
    /// A transfer in progress is cancelled and its message dead-lettered.
    pub async fn shutdown(&self) {
        self.supervisor.shutdown();

        let workers: Vec<_> = self
            .workers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();
        for worker in workers {
            if let Err(e) = worker.await {
                warn!(error = %e, "Worker task failed");
            }
        }

        let mut leftovers: Vec<_> = self
            .send_buffer
            .drain()
            .into_iter()
            .map(|m| (m, QueueKind::Send))
            .collect();
        if self.push_mode {
            leftovers.extend(
                self.deliver_buffer
                    .drain()
                    .into_iter()
                    .map(|m| (m, QueueKind::Deliver)),
            );
        }
        let drained = leftovers.len();
        for (message, kind) in leftovers {
            self.dead_letters
                .abandon(DeadLetter::new(message, kind, AbandonReason::Shutdown))
                .await;
        }
        info!(node_id = %self.config.node_id, drained, "Queue manager stopped");
    }
}

impl QueueHandler for Node {
    fn node_id(&self) -> &str {
        Node::node_id(self)
    }

    fn queue_message(&self, message: Message) -> Result<(), AdmissionError> {
        Node::queue_message(self, message)
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("node_id", &self.config.node_id)
            .field("send_len", &self.send_buffer.len())
            .field("deliver_len", &self.deliver_buffer.len())
            .field("push_mode", &self.push_mode)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumer::ChannelConsumer;
    use crate::dead_letter::MemoryDeadLetters;
    use async_trait::async_trait;
    use relayq_wire::{Endpoint, PeerConnection, WireError};
    use std::path::PathBuf;
    use std::time::Duration;

    /// Transport whose connects never complete, so the send worker holds
    /// exactly one message and never drains the rest.
    struct Stalled;

    #[async_trait]
    impl PeerTransport for Stalled {
        async fn connect(
            &self,
            _endpoint: &Endpoint,
            _timeout: Duration,
        ) -> Result<Box<dyn PeerConnection>, WireError> {
            std::future::pending().await
        }
    }

    fn config(id: &str, send: usize, deliver: usize) -> NodeConfig {
        NodeConfig {
            node_id: id.to_string(),
            send_buffer_capacity: send,
            delivery_buffer_capacity: deliver,
            ..NodeConfig::default()
        }
    }

    #[tokio::test]
    async fn test_invalid_config_fails_fast() {
        let err = Node::start(config("", 1, 1)).unwrap_err();
        assert!(matches!(err, RelayError::Config(_)));

        let err = Node::start(config("a", 0, 1)).unwrap_err();
        assert!(matches!(err, RelayError::Config(ref m) if m.contains("send buffer")));
    }

    #[tokio::test]
    async fn test_tls_with_unreadable_pem_is_credentials_error() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = NodeConfig {
            tls_enabled: true,
            key_file_path: Some(dir.path().join("missing.pem")),
            ..config("a", 1, 1)
        };
        let err = Node::start(cfg).unwrap_err();
        assert!(matches!(err, RelayError::Credentials(ref m) if m.contains("missing.pem")));

        let cfg = NodeConfig {
            tls_enabled: true,
            key_file_path: Some(PathBuf::new()),
            ..config("a", 1, 1)
        };
        assert!(matches!(Node::start(cfg), Err(RelayError::Config(_))));
    }

    #[tokio::test]
    async fn test_self_addressed_messages_fill_deliver_buffer() {
        let node = Node::start(config("node-a", 5, 2)).unwrap();

        node.queue_message(Message::new(b"1".to_vec(), "node-a")).unwrap();
        node.queue_message(Message::new(b"2".to_vec(), "node-a")).unwrap();
        let err = node
            .queue_message(Message::new(b"3".to_vec(), "node-a"))
            .unwrap_err();

        assert_eq!(
            err,
            AdmissionError::Capacity(CapacityError::new("node-a", 2, 2, QueueKind::Deliver))
        );
        assert_eq!(node.queue_len(QueueKind::Deliver), 2);
        assert_eq!(node.queue_len(QueueKind::Send), 0);

        assert_eq!(node.try_recv().unwrap().payload, b"1");
        assert_eq!(node.recv().await.unwrap().payload, b"2");
        assert!(node.try_recv().is_none());
        node.shutdown().await;
    }

    #[tokio::test]
    async fn test_send_buffer_rejects_when_worker_is_stuck() {
        let dead = Arc::new(MemoryDeadLetters::default());
        let node = Node::builder(config("node-a", 3, 1))
            .transport(Arc::new(Stalled))
            .dead_letters(dead.clone())
            .rng_seed(1)
            .start()
            .unwrap();

        // The worker takes the first message and hangs on it.
        node.queue_message(Message::new(b"0".to_vec(), "node-b")).unwrap();
        for _ in 0..100 {
            if node.queue_len(QueueKind::Send) == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(node.queue_len(QueueKind::Send), 0);

        for i in 1..=3u8 {
            node.queue_message(Message::new(vec![i], "node-b")).unwrap();
        }
        let err = match node.queue_message(Message::new(b"4".to_vec(), "node-b")) {
            Err(AdmissionError::Capacity(err)) => err,
            other => panic!("Expected a capacity rejection, got {other:?}"),
        };
        assert_eq!(err.queue_kind, QueueKind::Send);
        assert_eq!(err.queue_length, 3);
        assert_eq!(err.queue_capacity, 3);
        assert_eq!(
            err.to_string(),
            "Queue manager: node-a - Send queue full, length: 3 capacity: 3"
        );

        // Shutdown cancels the in-flight transfer and drains the rest.
        node.shutdown().await;
        let letters = dead.letters();
        assert_eq!(letters.len(), 4);
        assert!(letters.iter().all(|l| l.reason == AbandonReason::Shutdown));
        assert_eq!(letters[0].message.payload, b"0");
        assert_eq!(letters[0].attempts, 1);
        assert_eq!(letters[3].attempts, 0);
    }

    #[tokio::test]
    async fn test_push_mode_hands_messages_to_consumer() {
        let (consumer, mut rx) = ChannelConsumer::channel(8);
        let node = Node::builder(config("node-a", 1, 4))
            .consumer(Arc::new(consumer))
            .start()
            .unwrap();

        node.queue_message(Message::new(b"hi".to_vec(), "node-a")).unwrap();
        let got = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got.payload, b"hi");
        assert!(node.try_recv().is_none());
        assert!(node.recv().await.is_none());
        node.shutdown().await;
    }

    #[tokio::test]
    async fn test_recv_returns_none_after_shutdown() {
        let node = Node::start(config("node-a", 1, 1)).unwrap();
        let waiter = {
            let node = Arc::clone(&node);
            tokio::spawn(async move { node.recv().await })
        };
        tokio::task::yield_now().await;
        node.shutdown().await;
        assert!(node.is_shutting_down());
        let got = tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn test_node_serves_as_queue_handler() {
        let node = Node::start(config("node-a", 1, 1)).unwrap();
        let handler: Arc<dyn QueueHandler> = node.clone();
        assert_eq!(handler.node_id(), "node-a");
        handler
            .queue_message(Message::new(b"x".to_vec(), "node-a"))
            .unwrap();
        assert_eq!(node.queue_len(QueueKind::Deliver), 1);
        node.shutdown().await;
    }

    #[tokio::test]
    async fn test_admission_refused_after_shutdown() {
        let dead = Arc::new(MemoryDeadLetters::default());
        let node = Node::builder(config("node-a", 4, 4))
            .transport(Arc::new(Stalled))
            .dead_letters(dead.clone())
            .start()
            .unwrap();
        node.shutdown().await;

        for destination in ["node-b", "node-a"] {
            let err = node
                .queue_message(Message::new(b"late".to_vec(), destination))
                .unwrap_err();
            assert_eq!(
                err,
                AdmissionError::ShuttingDown {
                    node_id: "node-a".to_string()
                }
            );
        }
        assert_eq!(node.queue_len(QueueKind::Send), 0);
        assert_eq!(node.queue_len(QueueKind::Deliver), 0);
        assert!(dead.is_empty());
    }

    #[tokio::test]
    async fn test_push_mode_keeps_admitting_past_capacity() {
        let (consumer, mut rx) = ChannelConsumer::channel(2);
        let node = Node::builder(config("node-a", 1, 2))
            .consumer(Arc::new(consumer))
            .start()
            .unwrap();

        for i in 0..10u8 {
            node.queue_message(Message::new(vec![i], "node-a")).unwrap();
            let got = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(got.payload, vec![i]);
        }
        node.shutdown().await;
    }
}
