//! The unit of transfer between queue managers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A message travelling through the relay fabric.
///
/// The payload is opaque to every node. `destination_id` names the node the
/// message is meant for; nodes other than the destination only forward it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Opaque payload bytes (base64 encoded on the wire).
    #[serde(with = "payload_base64")]
    pub payload: Vec<u8>,
    /// Identity of the receiving node.
    pub destination_id: String,
}

impl Message {
    /// Build a message for `destination_id`.
    pub fn new(payload: impl Into<Vec<u8>>, destination_id: impl Into<String>) -> Self {
        Self {
            payload: payload.into(),
            destination_id: destination_id.into(),
        }
    }
}

/// The two buffers a queue manager owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QueueKind {
    /// Outgoing messages awaiting forwarding to a remote node.
    Send,
    /// Messages addressed to this node awaiting local consumption.
    Deliver,
}

impl fmt::Display for QueueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Send => write!(f, "Send"),
            Self::Deliver => write!(f, "Deliver"),
        }
    }
}

mod payload_base64 {
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        base64::engine::general_purpose::STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
