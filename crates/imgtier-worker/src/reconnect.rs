//! Backoff for opening the task channel.
//!
//! The worker opens its channel at startup and again whenever the broker
//! connection drops.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::warn;

/// Exponentially growing waits between attempts to open the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    /// Wait before the first retry
    pub initial: Duration,
    /// Upper bound for any single wait
    pub ceiling: Duration,
    /// Attempts after the first; zero tries exactly once
    pub retries: u32,
}

impl Backoff {
    pub const DEFAULT_INITIAL: Duration = Duration::from_millis(500);
    pub const DEFAULT_CEILING: Duration = Duration::from_secs(10);

    pub fn new(retries: u32) -> Self {
        Self {
            initial: Self::DEFAULT_INITIAL,
            ceiling: Self::DEFAULT_CEILING,
            retries,
        }
    }

    pub fn with_initial(mut self, initial: Duration) -> Self {
        self.initial = initial;
        self
    }

    /// Wait before retry number `retry`, counting from 1.
    pub fn delay(&self, retry: u32) -> Duration {
        let doublings = retry.saturating_sub(1).min(31);
        self.initial
            .saturating_mul(1u32 << doublings)
            .min(self.ceiling)
    }

    fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        (1..=self.retries).map(|retry| self.delay(retry))
    }
}

/// Every attempt failed.
#[derive(Debug)]
pub struct GaveUp<E> {
    /// Error from the last attempt
    pub error: E,
    pub attempts: u32,
}

/// Call `open` until it succeeds or `backoff` runs out of retries.
pub async fn with_backoff<T, E, F, Fut>(backoff: &Backoff, what: &str, mut open: F) -> Result<T, GaveUp<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let mut delays = backoff.delays();
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        let error = match open().await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        let Some(delay) = delays.next() else {
            return Err(GaveUp { error, attempts });
        };
        warn!(
            channel = what,
            attempt = attempts,
            delay_ms = delay.as_millis() as u64,
            "Open failed, backing off: {}",
            error
        );
        tokio::time::sleep(delay).await;
    }
}
