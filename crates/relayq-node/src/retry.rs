//! Retry loop shared by the send and deliver workers.
//!
//! Unlike a fixed attempt count, the loop is bounded by a [`RetryBudget`]
//! (wall time since the first attempt) and by the node's shutdown signal,
//! which is observed both while an attempt is in flight and while sleeping.

use crate::backoff::{Backoff, RetryBudget};
use crate::supervisor::wait_for_shutdown;

use relayq_types::BackoffCeiling;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Bounds of a retry loop.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Give up once retrying has taken longer than this.
    pub maximum_backoff: Duration,
    /// How elapsed time is measured against `maximum_backoff`.
    pub ceiling: BackoffCeiling,
}

/// Result of a retry loop.
#[derive(Debug)]
pub enum RetryOutcome<T, E> {
    /// The operation succeeded.
    Success {
        result: T,
        /// Total number of attempts made (1 = first try succeeded).
        attempts: u64,
    },
    /// The ceiling tripped, or the error was not retryable.
    Exhausted { last_error: E, attempts: u64 },
    /// Shutdown was requested before the operation succeeded.
    Cancelled {
        /// Error of the last finished attempt, if any finished.
        last_error: Option<E>,
        attempts: u64,
    },
}

/// Run `operation` until it succeeds, the budget runs out, or shutdown.
///
/// The backoff counter is reset before the first attempt. `should_retry`
/// decides whether an error is worth another attempt at all.
pub async fn retry_with_backoff<F, Fut, T, E, P>(
    policy: &RetryPolicy,
    backoff: &mut Backoff,
    shutdown: &mut watch::Receiver<bool>,
    mut operation: F,
    should_retry: P,
) -> RetryOutcome<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: Display,
{
    let budget = RetryBudget::start(policy.ceiling, policy.maximum_backoff);
    backoff.reset();
    let mut attempts = 0u64;
    let mut last_error = None;

    loop {
        attempts += 1;
        let result = tokio::select! {
            biased;
            _ = wait_for_shutdown(shutdown) => {
                return RetryOutcome::Cancelled { last_error, attempts };
            }
            result = operation() => result,
        };

        let err = match result {
            Ok(result) => {
                if attempts > 1 {
                    debug!(attempts, "Retry succeeded");
                }
                return RetryOutcome::Success { result, attempts };
            }
            Err(err) => err,
        };

        if !should_retry(&err) {
            debug!(attempts, error = %err, "Error is not retryable, giving up");
            return RetryOutcome::Exhausted {
                last_error: err,
                attempts,
            };
        }
        if budget.exhausted() {
            warn!(
                attempts,
                maximum_backoff_ms = policy.maximum_backoff.as_millis() as u64,
                error = %err,
                "Maximum backoff reached"
            );
            return RetryOutcome::Exhausted {
                last_error: err,
                attempts,
            };
        }

        let delay = backoff.next_delay();
        debug!(
            attempts,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "Backing off before next attempt"
        );
        last_error = Some(err);

        tokio::select! {
            biased;
            _ = wait_for_shutdown(shutdown) => {
                return RetryOutcome::Cancelled { last_error, attempts };
            }
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
