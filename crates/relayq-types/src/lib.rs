//! Core types for the relayq queue manager.
//!
//! This crate defines the data shared by the node engine, the wire protocol
//! and the command-line bootstrap: the relayed [`message::Message`], the
//! typed admission failures [`error::CapacityError`] and
//! [`error::AdmissionError`], and the validated
//! [`config::NodeConfig`]. It contains no networking or scheduling logic.

pub mod config;
pub mod error;
pub mod message;

pub use config::{BackoffCeiling, NodeConfig};
pub use error::{AdmissionError, CapacityError, RelayError, RelayResult};
pub use message::{Message, QueueKind};
