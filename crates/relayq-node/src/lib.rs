//! The relayq queue manager engine.
//!
//! Bounded send/deliver buffers, non-blocking admission, and the background
//! workers that forward messages to remote nodes with jittered backoff or
//! hand them to a local consumer. Messages a worker gives up on go to a
//! [`DeadLetterSink`].

pub mod backoff;
pub mod buffer;
pub mod config;
pub mod consumer;
pub mod dead_letter;
pub mod node;
pub mod resolver;
pub mod retry;
pub mod supervisor;
pub mod transfer;
pub mod worker;

pub use backoff::Backoff;
pub use buffer::BoundedBuffer;
pub use config::load_config;
pub use consumer::{ChannelConsumer, ConsumerError, LocalConsumer};
pub use dead_letter::{AbandonReason, DeadLetter, DeadLetterSink, LogDeadLetters, MemoryDeadLetters};
pub use node::{Node, NodeBuilder};
pub use resolver::{AddressResolver, IdentityAsHost, StaticResolver};
pub use transfer::{Forwarder, TransferError, TransferState};
