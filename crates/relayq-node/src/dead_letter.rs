//! Where abandoned messages go.
//!
//! A message is never re-enqueued and never reported back to whoever queued
//! it. Once a worker gives up, the message is handed to a [`DeadLetterSink`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use relayq_types::{Message, QueueKind};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Mutex;
use tracing::error;

/// Why a message was abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbandonReason {
    /// Retries ran past the backoff ceiling.
    BackoffExhausted,
    /// The local consumer refused the message.
    Rejected,
    /// The node shut down with the message still pending.
    Shutdown,
}

impl fmt::Display for AbandonReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbandonReason::BackoffExhausted => write!(f, "backoff exhausted"),
            AbandonReason::Rejected => write!(f, "rejected"),
            AbandonReason::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// An abandoned message and what happened to it.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub message: Message,
    /// Buffer the message was taken from.
    pub queue: QueueKind,
    pub reason: AbandonReason,
    /// Delivery attempts made (0 if never attempted).
    pub attempts: u64,
    /// The most recent error, if any attempt failed.
    pub last_error: Option<String>,
    pub abandoned_at: DateTime<Utc>,
}

impl DeadLetter {
    pub fn new(message: Message, queue: QueueKind, reason: AbandonReason) -> Self {
        Self {
            message,
            queue,
            reason,
            attempts: 0,
            last_error: None,
            abandoned_at: Utc::now(),
        }
    }

    pub fn with_attempts(mut self, attempts: u64) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn with_error(mut self, error: impl fmt::Display) -> Self {
        self.last_error = Some(error.to_string());
        self
    }
}

/// Receives messages the node has given up on.
#[async_trait]
pub trait DeadLetterSink: Send + Sync + 'static {
    async fn abandon(&self, letter: DeadLetter);
}

/// Logs every dead letter at error level and drops it.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogDeadLetters;

#[async_trait]
impl DeadLetterSink for LogDeadLetters {
    async fn abandon(&self, letter: DeadLetter) {
        error!(
            destination = %letter.message.destination_id,
            queue = %letter.queue,
            reason = %letter.reason,
            attempts = letter.attempts,
            last_error = letter.last_error.as_deref().unwrap_or("none"),
            payload_bytes = letter.message.payload.len(),
            "Message abandoned"
        );
    }
}

/// Keeps the most recent dead letters in memory, evicting the oldest.
#[derive(Debug)]
pub struct MemoryDeadLetters {
    letters: Mutex<VecDeque<DeadLetter>>,
    limit: usize,
}

impl MemoryDeadLetters {
    pub fn new(limit: usize) -> Self {
        Self {
            letters: Mutex::new(VecDeque::with_capacity(limit.min(1024))),
            limit,
        }
    }

    /// Snapshot of the retained dead letters, oldest first.
    pub fn letters(&self) -> Vec<DeadLetter> {
        self.letters
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.letters.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryDeadLetters {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[async_trait]
impl DeadLetterSink for MemoryDeadLetters {
    async fn abandon(&self, letter: DeadLetter) {
        LogDeadLetters.abandon(letter.clone()).await;
        let mut letters = self.letters.lock().unwrap_or_else(|e| e.into_inner());
        if self.limit == 0 {
            return;
        }
        if letters.len() >= self.limit {
            letters.pop_front();
        }
        letters.push_back(letter);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn letter(n: u8) -> DeadLetter {
        DeadLetter::new(
            Message::new(vec![n], "peer"),
            QueueKind::Send,
            AbandonReason::BackoffExhausted,
        )
    }

    #[test]
    fn test_builder_fields() {
        let l = letter(1).with_attempts(4).with_error("connection refused");
        assert_eq!(l.attempts, 4);
        assert_eq!(l.last_error.as_deref(), Some("connection refused"));
        assert_eq!(l.reason.to_string(), "backoff exhausted");
        assert!(l.abandoned_at <= Utc::now());
    }

    #[tokio::test]
    async fn test_memory_sink_keeps_latest() {
        let sink = MemoryDeadLetters::new(2);
        for n in 0..3 {
            sink.abandon(letter(n)).await;
        }
        let payloads: Vec<_> = sink
            .letters()
            .into_iter()
            .map(|l| l.message.payload)
            .collect();
        assert_eq!(payloads, vec![vec![1], vec![2]]);
    }

    #[tokio::test]
    async fn test_zero_limit_retains_nothing() {
        let sink = MemoryDeadLetters::new(0);
        sink.abandon(letter(9)).await;
        assert!(sink.is_empty());
    }
}
