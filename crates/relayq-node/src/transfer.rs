//! Forwarding one message to its destination node.
//!
//! A transfer moves through `Connecting -> Sending -> Success`. A failed
//! attempt moves it to `BackingOff` and then back to `Connecting`, until
//! either the retry budget runs out (`Abandoned`) or the node shuts down.
//! Every attempt opens a fresh connection and drops it after the call.

use crate::backoff::Backoff;
use crate::resolver::AddressResolver;
use crate::retry::{retry_with_backoff, RetryOutcome, RetryPolicy};

use relayq_types::Message;
use relayq_wire::{PeerTransport, WireError};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// States of a single transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    Connecting,
    Sending,
    BackingOff,
    Success,
    Abandoned,
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransferState::Connecting => "connecting",
            TransferState::Sending => "sending",
            TransferState::BackingOff => "backing_off",
            TransferState::Success => "success",
            TransferState::Abandoned => "abandoned",
        };
        f.write_str(s)
    }
}

/// A failed attempt, tagged with the state it failed in.
#[derive(Debug, Error)]
#[error("{state}: {source}")]
pub struct AttemptError {
    pub state: TransferState,
    #[source]
    pub source: WireError,
}

/// Why a transfer did not succeed.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("abandoned after {attempts} attempts: {last_error}")]
    Abandoned {
        attempts: u64,
        last_error: AttemptError,
    },
    #[error("cancelled by shutdown after {attempts} attempts")]
    Cancelled {
        attempts: u64,
        last_error: Option<AttemptError>,
    },
}

impl TransferError {
    pub fn attempts(&self) -> u64 {
        match self {
            TransferError::Abandoned { attempts, .. } | TransferError::Cancelled { attempts, .. } => {
                *attempts
            }
        }
    }

    pub fn last_error(&self) -> Option<&AttemptError> {
        match self {
            TransferError::Abandoned { last_error, .. } => Some(last_error),
            TransferError::Cancelled { last_error, .. } => last_error.as_ref(),
        }
    }
}

/// Forwards messages to remote nodes over a [`PeerTransport`].
#[derive(Clone)]
pub struct Forwarder {
    transport: Arc<dyn PeerTransport>,
    resolver: Arc<dyn AddressResolver>,
    dial_timeout: Duration,
    call_timeout: Duration,
    policy: RetryPolicy,
}

impl Forwarder {
    pub fn new(
        transport: Arc<dyn PeerTransport>,
        resolver: Arc<dyn AddressResolver>,
        dial_timeout: Duration,
        call_timeout: Duration,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            transport,
            resolver,
            dial_timeout,
            call_timeout,
            policy,
        }
    }

    /// Deliver `message` to its destination, retrying until success, the
    /// retry budget runs out, or shutdown. Returns the number of attempts.
    pub async fn transfer(
        &self,
        message: &Message,
        backoff: &mut Backoff,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<u64, TransferError> {
        let outcome = retry_with_backoff(
            &self.policy,
            backoff,
            shutdown,
            || self.attempt(message),
            |_| true,
        )
        .await;

        match outcome {
            RetryOutcome::Success { attempts, .. } => {
                info!(
                    destination = %message.destination_id,
                    attempts,
                    state = %TransferState::Success,
                    "Message transferred"
                );
                Ok(attempts)
            }
            RetryOutcome::Exhausted {
                last_error,
                attempts,
            } => {
                warn!(
                    destination = %message.destination_id,
                    attempts,
                    state = %TransferState::Abandoned,
                    error = %last_error,
                    "Transfer abandoned"
                );
                Err(TransferError::Abandoned {
                    attempts,
                    last_error,
                })
            }
            RetryOutcome::Cancelled {
                last_error,
                attempts,
            } => Err(TransferError::Cancelled {
                attempts,
                last_error,
            }),
        }
    }

    /// One attempt: resolve, connect, call.
    async fn attempt(&self, message: &Message) -> Result<(), AttemptError> {
        let connecting = |source| AttemptError {
            state: TransferState::Connecting,
            source,
        };

        let endpoint = self
            .resolver
            .resolve(&message.destination_id)
            .map_err(connecting)?;
        debug!(
            destination = %message.destination_id,
            endpoint = %endpoint,
            state = %TransferState::Connecting,
            "Dialing peer"
        );
        let mut conn = self
            .transport
            .connect(&endpoint, self.dial_timeout)
            .await
            .map_err(connecting)?;

        debug!(
            destination = %message.destination_id,
            state = %TransferState::Sending,
            "Sending message"
        );
        conn.queue_message(message, self.call_timeout)
            .await
            .map_err(|source| AttemptError {
                state: TransferState::Sending,
                source,
            })
    }
}

impl fmt::Debug for Forwarder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Forwarder")
            .field("dial_timeout", &self.dial_timeout)
            .field("call_timeout", &self.call_timeout)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}
