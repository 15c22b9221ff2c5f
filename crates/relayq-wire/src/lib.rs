//! relayq wire protocol: queue-manager to queue-manager RPC.
//!
//! Queue managers exchange length-prefixed JSON envelopes over TCP,
//! optionally wrapped in TLS.
//!
//! ## Architecture
//!
//! - **QueueServer**: inbound listener that answers `QueueMessage` and `Ping`
//! - **QueueHandler**: trait through which the server hands messages to a node
//! - **PeerTransport / PeerConnection**: the outbound call contract used by
//!   the delivery worker; [`TcpTransport`] is the network implementation
//! - **WireMessage**: JSON-framed protocol envelopes

pub mod client;
pub mod message;
pub mod peer;
pub mod tls;

pub use client::{Endpoint, PeerConnection, PeerTransport, TcpConnection, TcpTransport};
pub use message::{WireMessage, WireMessageKind, WireRequest, WireResponse};
pub use peer::{QueueHandler, QueueServer, ServerConfig, WireError};
pub use tls::{ClientCredentials, ServerCredentials};
