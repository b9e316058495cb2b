//! Exponential backoff used to pace a worker while its circuit is open.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use courier_common::BackoffSettings;

/// Delay for a given attempt: `min(2^attempt * base, max)`.
pub fn delay_for_attempt(attempt: u32, base: Duration, max: Duration) -> Duration {
    let base_ms = base.as_millis().min(u64::MAX as u128) as u64;
    let factor = 2u64.checked_pow(attempt).unwrap_or(u64::MAX);
    let delay_ms = base_ms.saturating_mul(factor);
    Duration::from_millis(delay_ms).min(max)
}

/// Per-worker backoff generator.
///
/// Owned by exactly one worker. The counter is atomic only because the
/// breaker's transition listener resets it from whichever task closed the
/// circuit.
#[derive(Debug)]
pub struct ExponentialBackoff {
    attempts: AtomicU32,
    base: Duration,
    max: Duration,
}

impl ExponentialBackoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            attempts: AtomicU32::new(0),
            base,
            max,
        }
    }

    pub fn from_settings(settings: &BackoffSettings) -> Self {
        Self::new(
            Duration::from_millis(settings.base_delay_ms),
            Duration::from_millis(settings.max_delay_ms),
        )
    }

    /// The delay the next call to [`backoff`](Self::backoff) will sleep for
    pub fn next_delay(&self) -> Duration {
        delay_for_attempt(self.attempts(), self.base, self.max)
    }

    /// Sleep for the current delay, then bump the attempt counter.
    pub async fn backoff(&self) {
        tokio::time::sleep(self.next_delay()).await;
        let _ = self.attempts.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
            Some(n.saturating_add(1))
        });
    }

    pub fn reset(&self) {
        self.attempts.store(0, Ordering::SeqCst);
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::from_settings(&BackoffSettings::default())
    }
}
