//! Retries with bounded exponential backoff.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::Error;

/// Transient faults get retried with jittered exponential backoff; store
/// errors never do.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(2),
        }
    }
}

fn is_transient(err: &Error) -> bool {
    matches!(err, Error::Transport(transport) if transport.is_transient())
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (zero-based), with jitter.
    fn backoff(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.max_delay);
        // 50-100% of the exponential step, so concurrent retries spread out.
        let millis = exp.as_millis() as u64;
        let jittered = millis / 2 + rand::rng().random_range(0..=millis / 2 + 1);
        Duration::from_millis(jittered)
    }

    /// Run `op` until it succeeds, fails hard, runs out of attempts, or is
    /// cancelled. Only transport faults the predicate deems transient are
    /// retried.
    pub async fn run<T, F, Fut>(&self, cancel: &CancellationToken, mut op: F) -> Result<T, Error>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, Error>>,
    {
        let mut attempt = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if is_transient(&err) && attempt + 1 < self.max_attempts => {
                    let delay = self.backoff(attempt);
                    attempt += 1;
                    debug!(
                        "transient store fault, retry {}/{} in {:?}: {}",
                        attempt, self.max_attempts, delay, err
                    );
                    tokio::select! {
                        _ = sleep(delay) => {}
                        _ = cancel.cancelled() => return Err(Error::Cancelled),
                    }
                }
                Err(err) => return Err(err),
            }
        }
    }
}
