//! Bounded retries that respect the run deadline.

use std::future::Future;
use std::time::Duration;

/// How many attempts to make and how long to sleep between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub count: u32,
    pub interval: Duration,
}

impl RetryPolicy {
    pub const fn new(count: u32, interval: Duration) -> Self {
        Self { count, interval }
    }

    /// Policy used by element lookups and page assertions: 5 attempts, 0.5s apart.
    pub const ELEMENT: RetryPolicy = RetryPolicy::new(5, Duration::from_millis(500));

    /// One attempt, no sleeping.
    pub const ONCE: RetryPolicy = RetryPolicy::new(1, Duration::ZERO);
}

/// Result of [`retry`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryOutcome<T> {
    /// An attempt produced a value
    Success(T),
    /// Every attempt ran and none produced a value
    Exhausted,
    /// The guard turned false before an attempt
    DeadlineExceeded,
}

impl<T> RetryOutcome<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, RetryOutcome::Success(_))
    }
}

/// Run `attempt` up to `policy.count` times.
///
/// `only_if` is checked before every attempt; once it returns false no further
/// attempts are made and the outcome is [`RetryOutcome::DeadlineExceeded`].
/// An attempt that returns `None` is a failure; the next one starts after
/// `policy.interval`. Attempts are numbered from 1.
pub async fn retry<T, G, F, Fut>(policy: RetryPolicy, only_if: G, mut attempt: F) -> RetryOutcome<T>
where
    G: Fn() -> bool,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Option<T>>,
{
    for n in 1..=policy.count {
        if !only_if() {
            return RetryOutcome::DeadlineExceeded;
        }
        if let Some(value) = attempt(n).await {
            return RetryOutcome::Success(value);
        }
        if n < policy.count && !policy.interval.is_zero() {
            tokio::time::sleep(policy.interval).await;
        }
    }
    RetryOutcome::Exhausted
}
