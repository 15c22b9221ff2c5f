//! Jittered linear backoff and the ceiling that bounds a retry loop.
//!
//! The delay before retry `n` is `n` milliseconds plus a uniform jitter in
//! `[0, 1000)` milliseconds. The jitter dominates, which keeps a crowd of
//! workers from hammering a recovering peer in lockstep.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use relayq_types::BackoffCeiling;
use std::time::Duration;
use tokio::time::Instant;

/// Upper bound (exclusive) of the random jitter added to every delay, in ms.
pub const JITTER_MS: u64 = 1000;

/// Per-worker backoff state. Owns its random source.
#[derive(Debug, Clone)]
pub struct Backoff {
    attempt: u64,
    rng: StdRng,
}

impl Backoff {
    /// Create a backoff drawing jitter from `rng`.
    pub fn new(rng: StdRng) -> Self {
        Self { attempt: 1, rng }
    }

    /// Deterministic backoff for reproducible runs.
    pub fn from_seed(seed: u64) -> Self {
        Self::new(StdRng::seed_from_u64(seed))
    }

    /// Backoff seeded from OS entropy.
    pub fn from_entropy() -> Self {
        Self::new(StdRng::from_entropy())
    }

    /// The attempt counter the next delay will be based on.
    pub fn attempt(&self) -> u64 {
        self.attempt
    }

    /// Compute the next delay and advance the attempt counter.
    pub fn next_delay(&mut self) -> Duration {
        let jitter = self.rng.gen_range(0..JITTER_MS);
        let delay = Duration::from_millis(self.attempt.saturating_add(jitter));
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    /// Start over for a new message.
    pub fn reset(&mut self) {
        self.attempt = 1;
    }
}

/// Time budget of one retry loop, started when the loop begins.
#[derive(Debug, Clone, Copy)]
pub struct RetryBudget {
    ceiling: BackoffCeiling,
    maximum: Duration,
    started: Instant,
}

impl RetryBudget {
    pub fn start(ceiling: BackoffCeiling, maximum: Duration) -> Self {
        Self::started_at(ceiling, maximum, Instant::now())
    }

    pub fn started_at(ceiling: BackoffCeiling, maximum: Duration, started: Instant) -> Self {
        Self {
            ceiling,
            maximum,
            started,
        }
    }

    /// Elapsed time as the ceiling policy measures it.
    ///
    /// `Unbounded` measures `start - now`, which saturates to zero for any
    /// `now` after the start, so it never exceeds the maximum.
    pub fn elapsed_at(&self, now: Instant) -> Duration {
        match self.ceiling {
            BackoffCeiling::Enforced => now.saturating_duration_since(self.started),
            BackoffCeiling::Unbounded => self.started.saturating_duration_since(now),
        }
    }

    pub fn exhausted_at(&self, now: Instant) -> bool {
        self.elapsed_at(now) > self.maximum
    }

    /// Whether the loop should give up now.
    pub fn exhausted(&self) -> bool {
        self.exhausted_at(Instant::now())
    }
}
