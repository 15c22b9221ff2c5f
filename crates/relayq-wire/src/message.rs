//! Wire protocol message types.
//!
//! All communication between queue managers uses JSON-framed messages
//! over TCP. Each message is prefixed with a 4-byte big-endian length header.

use relayq_types::{CapacityError, Message};
use serde::{Deserialize, Serialize};

/// A wire protocol message (envelope).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireMessage {
    /// Unique envelope ID. Responses echo the ID of their request.
    pub id: String,
    /// Message variant.
    #[serde(flatten)]
    pub kind: WireMessageKind,
}

/// The different kinds of wire messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WireMessageKind {
    /// Request from one peer to another.
    #[serde(rename = "request")]
    Request(WireRequest),
    /// Response to a request.
    #[serde(rename = "response")]
    Response(WireResponse),
}

/// Request messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method")]
pub enum WireRequest {
    /// Ask the remote queue manager to admit a message.
    #[serde(rename = "queue_message")]
    QueueMessage {
        /// The message to admit.
        message: Message,
    },
    /// Ping to check if the peer is alive.
    #[serde(rename = "ping")]
    Ping,
}

/// Response messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method")]
pub enum WireResponse {
    /// The message was admitted into one of the remote buffers.
    #[serde(rename = "queued")]
    Queued,
    /// The remote buffer was full.
    #[serde(rename = "capacity_exceeded")]
    CapacityExceeded(CapacityError),
    /// Pong response.
    #[serde(rename = "pong")]
    Pong {
        /// Identity of the answering node.
        node_id: String,
    },
    /// Error response.
    #[serde(rename = "error")]
    Error {
        /// Error code.
        code: i32,
        /// Error message.
        message: String,
    },
}

impl WireMessage {
    /// Build a request envelope with a fresh ID.
    pub fn request(request: WireRequest) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind: WireMessageKind::Request(request),
        }
    }

    /// Build the response to the request with ID `id`.
    pub fn response(id: impl Into<String>, response: WireResponse) -> Self {
        Self {
            id: id.into(),
            kind: WireMessageKind::Response(response),
        }
    }
}

/// Maximum single message size (16 MB).
pub const MAX_MESSAGE_SIZE: u32 = 16 * 1024 * 1024;

/// Encode a wire message to bytes (4-byte big-endian length + JSON).
pub fn encode_message(msg: &WireMessage) -> Result<Vec<u8>, serde_json::Error> {
    let json = serde_json::to_vec(msg)?;
    let len = json.len() as u32;
    let mut bytes = Vec::with_capacity(4 + json.len());
    bytes.extend_from_slice(&len.to_be_bytes());
    bytes.extend_from_slice(&json);
    Ok(bytes)
}

/// Decode the length prefix from a 4-byte header.
pub fn decode_length(header: &[u8; 4]) -> u32 {
    u32::from_be_bytes(*header)
}

/// Parse a JSON body into a WireMessage.
pub fn decode_message(body: &[u8]) -> Result<WireMessage, serde_json::Error> {
    serde_json::from_slice(body)
}
