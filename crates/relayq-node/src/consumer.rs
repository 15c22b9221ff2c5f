//! Local consumers of the deliver buffer.

use async_trait::async_trait;
use relayq_types::Message;
use thiserror::Error;
use tokio::sync::mpsc;

/// Why a local consumer did not take a message.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConsumerError {
    /// Temporarily unable to accept; the worker retries with backoff.
    #[error("consumer is applying backpressure")]
    Backpressure,
    /// Will never accept this message; it goes to the dead-letter sink.
    #[error("consumer rejected message: {0}")]
    Rejected(String),
}

/// Receives messages addressed to this node.
#[async_trait]
pub trait LocalConsumer: Send + Sync + 'static {
    async fn consume(&self, message: &Message) -> Result<(), ConsumerError>;
}

/// Forwards messages into a bounded tokio channel.
#[derive(Debug, Clone)]
pub struct ChannelConsumer {
    tx: mpsc::Sender<Message>,
}

impl ChannelConsumer {
    pub fn new(tx: mpsc::Sender<Message>) -> Self {
        Self { tx }
    }

    /// Create a consumer together with the receiving end of its channel.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }
}

#[async_trait]
impl LocalConsumer for ChannelConsumer {
    async fn consume(&self, message: &Message) -> Result<(), ConsumerError> {
        self.tx.try_send(message.clone()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => ConsumerError::Backpressure,
            mpsc::error::TrySendError::Closed(_) => {
                ConsumerError::Rejected("receiver dropped".to_string())
            }
        })
    }
}
