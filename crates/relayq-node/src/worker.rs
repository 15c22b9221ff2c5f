//! Long-lived background workers draining the node's buffers.
//!
//! The send worker forwards each message from the send buffer to its
//! destination node. The deliver worker hands each message from the deliver
//! buffer to a [`LocalConsumer`]. Both process one message at a time, in
//! FIFO order, and both stop at their next suspension point on shutdown.

use crate::backoff::Backoff;
use crate::buffer::BoundedBuffer;
use crate::consumer::{ConsumerError, LocalConsumer};
use crate::dead_letter::{AbandonReason, DeadLetter, DeadLetterSink};
use crate::retry::{retry_with_backoff, RetryOutcome, RetryPolicy};
use crate::supervisor::wait_for_shutdown;
use crate::transfer::{Forwarder, TransferError};

use relayq_types::{Message, QueueKind};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Drains the send buffer, forwarding every message to its destination.
pub struct SendWorker {
    pub buffer: Arc<BoundedBuffer<Message>>,
    pub forwarder: Forwarder,
    pub backoff: Backoff,
    pub dead_letters: Arc<dyn DeadLetterSink>,
    pub shutdown: watch::Receiver<bool>,
}

impl SendWorker {
    pub async fn run(mut self) {
        info!("Send worker started");
        loop {
            let message = tokio::select! {
                biased;
                _ = wait_for_shutdown(&mut self.shutdown) => break,
                message = self.buffer.pop() => message,
            };
            debug!(
                destination = %message.destination_id,
                remaining = self.buffer.len(),
                "Took message from send buffer"
            );

            let result = self
                .forwarder
                .transfer(&message, &mut self.backoff, &mut self.shutdown)
                .await;

            if let Err(e) = result {
                let reason = match &e {
                    TransferError::Abandoned { .. } => AbandonReason::BackoffExhausted,
                    TransferError::Cancelled { .. } => AbandonReason::Shutdown,
                };
                warn!(
                    destination = %message.destination_id,
                    error = %e,
                    "Could not forward message"
                );
                let mut letter = DeadLetter::new(message, QueueKind::Send, reason)
                    .with_attempts(e.attempts());
                if let Some(last) = e.last_error() {
                    letter = letter.with_error(last);
                }
                self.dead_letters.abandon(letter).await;
            }
        }
        info!("Send worker stopped");
    }
}

/// Drains the deliver buffer into a local consumer.
pub struct DeliverWorker {
    pub buffer: Arc<BoundedBuffer<Message>>,
    pub consumer: Arc<dyn LocalConsumer>,
    pub policy: RetryPolicy,
    pub backoff: Backoff,
    pub dead_letters: Arc<dyn DeadLetterSink>,
    pub shutdown: watch::Receiver<bool>,
}

impl DeliverWorker {
    pub async fn run(mut self) {
        info!("Deliver worker started");
        loop {
            let message = tokio::select! {
                biased;
                _ = wait_for_shutdown(&mut self.shutdown) => break,
                message = self.buffer.pop() => message,
            };

            let consumer = &self.consumer;
            let outcome = retry_with_backoff(
                &self.policy,
                &mut self.backoff,
                &mut self.shutdown,
                || consumer.consume(&message),
                |e| matches!(e, ConsumerError::Backpressure),
            )
            .await;

            let (reason, attempts, last_error) = match outcome {
                RetryOutcome::Success { attempts, .. } => {
                    debug!(attempts, "Delivered message to local consumer");
                    continue;
                }
                RetryOutcome::Exhausted {
                    last_error,
                    attempts,
                } => {
                    let reason = match last_error {
                        ConsumerError::Rejected(_) => AbandonReason::Rejected,
                        ConsumerError::Backpressure => AbandonReason::BackoffExhausted,
                    };
                    (reason, attempts, Some(last_error))
                }
                RetryOutcome::Cancelled {
                    last_error,
                    attempts,
                } => (AbandonReason::Shutdown, attempts, last_error),
            };

            warn!(reason = %reason, attempts, "Local consumer did not take message");
            let mut letter =
                DeadLetter::new(message, QueueKind::Deliver, reason).with_attempts(attempts);
            if let Some(e) = last_error {
                letter = letter.with_error(e);
            }
            self.dead_letters.abandon(letter).await;
        }
        info!("Deliver worker stopped");
    }
}
