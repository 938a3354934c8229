//! Retry logic with exponential backoff
//!
//! Used by the HTTP API client for transient failures (429, 5xx, timeouts,
//! refused connections). Finalization itself is never retried on top of this.
//!
//! # Example
//!
//! ```no_run
//! use attachment_transfer::retry::{IsRetryable, with_retry};
//! use attachment_transfer::config::RetryConfig;
//!
//! #[derive(Debug)]
//! enum MyError {
//!     Transient,
//!     Permanent,
//! }
//!
//! impl std::fmt::Display for MyError {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         write!(f, "{:?}", self)
//!     }
//! }
//!
//! impl IsRetryable for MyError {
//!     fn is_retryable(&self) -> bool {
//!         matches!(self, MyError::Transient)
//!     }
//! }
//!
//! # async fn example() -> Result<(), MyError> {
//! let config = RetryConfig::default();
//! with_retry(&config, || async {
//!     // Your operation here
//!     Ok::<_, MyError>(())
//! }).await?;
//! # Ok(())
//! # }
//! ```

use crate::config::RetryConfig;
use crate::error::Error;
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (timeouts, throttling, server errors) return `true`.
/// Permanent failures (bad request, conflict, local bookkeeping) return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            Error::Network(e) => e.is_timeout() || e.is_connect(),
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::NotConnected
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::Interrupted
            ),
            // Throttled or server-side trouble
            Error::UnacceptableStatus { code } => *code == 429 || (500..600).contains(code),
            Error::Config { .. }
            | Error::Build(_)
            | Error::Transport(_)
            | Error::TimedOut { .. }
            | Error::Finalize(_)
            | Error::Database(_)
            | Error::Sqlx(_)
            | Error::Serialization(_)
            | Error::InvalidUrl(_)
            | Error::ShuttingDown
            | Error::Other(_) => false,
        }
    }
}

/// Delays between attempts: grows by `backoff_multiplier` up to `max_delay`
#[derive(Clone, Debug)]
pub struct Backoff {
    next: Duration,
    max: Duration,
    multiplier: f64,
    jitter: bool,
    remaining: u32,
}

impl Backoff {
    /// Schedule for `config`; yields at most `max_attempts` delays
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            next: config.initial_delay,
            max: config.max_delay,
            multiplier: config.backoff_multiplier,
            jitter: config.jitter,
            remaining: config.max_attempts,
        }
    }
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;

        let base = self.next;
        self.next = Duration::from_secs_f64(base.as_secs_f64() * self.multiplier).min(self.max);
        Some(if self.jitter { add_jitter(base) } else { base })
    }
}

/// Run `operation` until it succeeds, fails permanently or the backoff
/// schedule is used up; the last error is returned
pub async fn with_retry<F, Fut, T, E>(config: &RetryConfig, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let mut backoff = Backoff::new(config);
    let mut attempt: u32 = 1;

    loop {
        let error = match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!(attempt, "Request succeeded after retry");
                }
                return Ok(value);
            }
            Err(error) => error,
        };

        if !error.is_retryable() {
            tracing::debug!(error = %error, "Request failed permanently");
            return Err(error);
        }

        let Some(delay) = backoff.next() else {
            tracing::error!(error = %error, attempts = attempt, "Giving up after retries");
            return Err(error);
        };

        tracing::warn!(
            error = %error,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "Request failed, retrying"
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

/// Stretch `delay` by a random factor in `[1, 2]`
fn add_jitter(delay: Duration) -> Duration {
    let factor: f64 = rand::thread_rng().gen_range(1.0..=2.0);
    delay.mul_f64(factor)
}
