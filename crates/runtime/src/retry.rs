//! Bounded connect retries.
//!
//! Debuggees take a moment to open their debug port after spawn, so the first
//! few connection attempts are expected to fail.

use std::future::Future;
use std::time::Duration;

use crate::error::{Error, Result};

/// How many times to try and how long to wait between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
	pub max_attempts: u32,
	pub backoff: Duration,
}

impl RetryPolicy {
	pub const DEFAULT_BACKOFF: Duration = Duration::from_millis(500);

	pub const fn new(max_attempts: u32, backoff: Duration) -> Self {
		Self {
			max_attempts,
			backoff,
		}
	}
}

impl Default for RetryPolicy {
	fn default() -> Self {
		Self::new(5, Self::DEFAULT_BACKOFF)
	}
}

/// Calls `attempt` with the 1-based attempt number until it succeeds or the
/// policy is exhausted.
///
/// Makes exactly `max_attempts` calls (at least one) and sleeps `backoff`
/// between them, never after the last one.
pub async fn connect_with_retry<T, F, Fut>(policy: RetryPolicy, mut attempt: F) -> Result<T>
where
	F: FnMut(u32) -> Fut,
	Fut: Future<Output = Result<T>>,
{
	let max_attempts = policy.max_attempts.max(1);
	let mut last_error = None;

	for n in 1..=max_attempts {
		match attempt(n).await {
			Ok(value) => {
				if n > 1 {
					tracing::debug!(attempt = n, "connected after retry");
				}
				return Ok(value);
			}
			Err(e) => {
				tracing::debug!(attempt = n, max_attempts, error = %e, "connect attempt failed");
				last_error = Some(e);
				if n < max_attempts {
					tokio::time::sleep(policy.backoff).await;
				}
			}
		}
	}

	Err(Error::ConnectionFailed {
		attempts: max_attempts,
		reason: last_error.map(|e| e.to_string()).unwrap_or_default(),
	})
}
