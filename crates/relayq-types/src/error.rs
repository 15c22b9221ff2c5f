//! Shared error types for relayq.

use crate::message::QueueKind;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Returned when the send or deliver buffer is full at admission time.
///
/// The length and capacity are the values observed when the message was
/// rejected. This error is a backpressure signal: the caller may retry
/// later, the node itself is unaffected.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error(
    "Queue manager: {node_id} - {queue_kind} queue full, length: {queue_length} capacity: {queue_capacity}"
)]
pub struct CapacityError {
    /// Identity of the node that rejected the message.
    pub node_id: String,
    /// Observed number of resident messages.
    pub queue_length: usize,
    /// Fixed capacity of the buffer.
    pub queue_capacity: usize,
    /// Which buffer was full.
    pub queue_kind: QueueKind,
}

impl CapacityError {
    /// Build a capacity error for the given buffer.
    pub fn new(
        node_id: impl Into<String>,
        queue_length: usize,
        queue_capacity: usize,
        queue_kind: QueueKind,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            queue_length,
            queue_capacity,
            queue_kind,
        }
    }
}

/// Why a node refused to admit a message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdmissionError {
    /// The target buffer is full. Retrying later may succeed.
    #[error(transparent)]
    Capacity(#[from] CapacityError),

    /// The node has stopped its workers and no longer takes messages.
    #[error("Queue manager: {node_id} is shutting down")]
    ShuttingDown { node_id: String },
}

/// Startup error for relayq: configuration and credentials.
#[derive(Error, Debug)]
pub enum RelayError {
    /// The configuration is missing or invalid. Always fatal at startup.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Transport credentials could not be built.
    #[error("Credential error: {0}")]
    Credentials(String),
}

/// Alias for Result with RelayError.
pub type RelayResult<T> = Result<T, RelayError>;
