//! # Retry Executor
//!
//! Bounded exponential backoff around any fallible async operation.
//!
//! ## Overview
//!
//! The same executor wraps remote downloads and conversions; only the
//! [`RetryPolicy`] differs per operation kind. Errors decide for themselves
//! whether another attempt can help by implementing [`Classify`]:
//!
//! - [`FailureClass::Transient`]: network blips, 5xx, rate limiting, timeouts.
//!   Retried until the policy is exhausted.
//! - [`FailureClass::Terminal`]: malformed input, permanent 4xx, disk full.
//!   Surfaced after the first attempt.
//!
//! The delay before attempt `k` (k ≥ 2) is
//! `min(initial_delay × backoff_factor^(k-2), max_delay)`.
//!
//! ## Cancellation
//!
//! With a `CancellationToken` attached, the executor checks it before each
//! attempt and races it against the backoff sleep. An attempt that already
//! started is never interrupted; the caller gets the last error back with
//! [`RetryError::interrupted`] set.
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::retry::{RetryExecutor, RetryPolicy};
//!
//! let executor = RetryExecutor::new(RetryPolicy::default());
//! let body = executor
//!     .run("download", |_attempt| async { disk.download(path).await })
//!     .await?;
//! ```

use bridge_traits::BridgeError;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Whether repeating an operation may succeed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    Transient,
    Terminal,
}

impl FailureClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureClass::Transient => "transient",
            FailureClass::Terminal => "terminal",
        }
    }
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error types the executor can reason about
pub trait Classify {
    fn classify(&self) -> FailureClass;

    /// Server-requested wait before the next attempt, if any
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

impl Classify for BridgeError {
    fn classify(&self) -> FailureClass {
        if self.is_transient() {
            FailureClass::Transient
        } else {
            FailureClass::Terminal
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            BridgeError::RateLimited {
                retry_after_secs: Some(secs),
            } => Some(Duration::from_secs(*secs)),
            _ => None,
        }
    }
}

// ============================================================================
// Policy
// ============================================================================

/// Attempt budget and backoff curve for one operation kind
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one (at least 1)
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub initial_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Multiplier applied per further attempt
    pub backoff_factor: f64,
}

impl Default for RetryPolicy {
    /// Three attempts starting at two seconds
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
            backoff_factor: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn new(
        max_attempts: u32,
        initial_delay: Duration,
        max_delay: Duration,
        backoff_factor: f64,
    ) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay,
            max_delay,
            backoff_factor,
        }
    }

    /// Single attempt, no retries
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor;
        self
    }

    /// Delay before attempt `attempt` (1-based). Zero for the first attempt.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt < 2 {
            return Duration::ZERO;
        }
        let exponent = (attempt - 2).min(i32::MAX as u32) as i32;
        let factor = self.backoff_factor.max(1.0).powi(exponent);
        let secs = self.initial_delay.as_secs_f64() * factor;
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            Duration::from_secs_f64(secs)
        }
    }
}

// ============================================================================
// Error
// ============================================================================

/// Failure surfaced after the executor gave up
#[derive(Debug)]
pub struct RetryError<E> {
    /// Attempts actually made
    pub attempts: u32,
    /// Error of the final attempt
    pub last_error: E,
    /// Classification of the final error
    pub class: FailureClass,
    /// Retrying stopped because cancellation was requested
    pub interrupted: bool,
}

impl<E> RetryError<E> {
    pub fn into_inner(self) -> E {
        self.last_error
    }

    pub fn is_terminal(&self) -> bool {
        self.class == FailureClass::Terminal
    }
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (after {} attempt{}, {})",
            self.last_error,
            self.attempts,
            if self.attempts == 1 { "" } else { "s" },
            self.class
        )
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for RetryError<E> {}

// ============================================================================
// Executor
// ============================================================================

/// Runs operations under a [`RetryPolicy`]
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    policy: RetryPolicy,
    cancel: Option<CancellationToken>,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            cancel: None,
        }
    }

    /// Stop between attempts once `token` is cancelled
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|t| t.is_cancelled())
    }

    /// Wait out a backoff delay. Returns `false` if cancelled meanwhile.
    async fn backoff(&self, delay: Duration) -> bool {
        match &self.cancel {
            Some(token) => {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => true,
                    _ = token.cancelled() => false,
                }
            }
            None => {
                tokio::time::sleep(delay).await;
                true
            }
        }
    }

    /// Run `operation` until it succeeds, fails terminally, or the attempt
    /// budget is exhausted.
    ///
    /// The closure receives the 1-based attempt number. The first attempt
    /// always runs, even if cancellation was already requested.
    pub async fn run<T, E, F, Fut>(&self, op_name: &str, mut operation: F) -> Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify + fmt::Display,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let error = match operation(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(op = op_name, attempt, "Operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) => e,
            };

            let class = error.classify();
            let stop = if class == FailureClass::Terminal {
                debug!(op = op_name, attempt, "Terminal failure, not retrying");
                Some(false)
            } else if attempt >= max_attempts {
                warn!(op = op_name, attempts = attempt, "Retry budget exhausted");
                Some(false)
            } else if self.is_cancelled() {
                Some(true)
            } else {
                None
            };

            if let Some(interrupted) = stop {
                return Err(RetryError {
                    attempts: attempt,
                    last_error: error,
                    class,
                    interrupted,
                });
            }

            let mut delay = self.policy.delay_before(attempt + 1);
            if let Some(requested) = error.retry_after() {
                delay = delay.max(requested.min(self.policy.max_delay));
            }

            warn!(
                op = op_name,
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Transient failure, retrying"
            );

            if !self.backoff(delay).await {
                return Err(RetryError {
                    attempts: attempt,
                    last_error: error,
                    class,
                    interrupted: true,
                });
            }

            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio::time::Instant;

    #[derive(Debug)]
    struct TestError(FailureClass);

    impl fmt::Display for TestError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "test error ({})", self.0)
        }
    }

    impl Classify for TestError {
        fn classify(&self) -> FailureClass {
            self.0
        }
    }

    fn policy_1_2_60(attempts: u32) -> RetryPolicy {
        RetryPolicy::new(attempts, Duration::from_secs(1), Duration::from_secs(60), 2.0)
    }

    #[test]
    fn test_delay_schedule() {
        let policy = policy_1_2_60(5);
        let delays: Vec<u64> = (1..=6).map(|k| policy.delay_before(k).as_secs()).collect();
        assert_eq!(delays, vec![0, 1, 2, 4, 8, 16]);
    }

    #[test]
    fn test_delay_is_clamped() {
        let policy = policy_1_2_60(20);
        assert_eq!(policy.delay_before(8), Duration::from_secs(60));
        assert_eq!(policy.delay_before(200), Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_exhausts_attempts() {
        let executor = RetryExecutor::new(policy_1_2_60(5));
        let calls = Arc::new(AtomicU32::new(0));
        let start = Instant::now();

        let counter = calls.clone();
        let result: Result<(), _> = executor
            .run("flaky", |_| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(TestError(FailureClass::Transient))
                }
            })
            .await;

        let err = result.unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert_eq!(err.attempts, 5);
        assert!(!err.interrupted);
        // 1 + 2 + 4 + 8 between five attempts
        assert_eq!(start.elapsed(), Duration::from_secs(15));
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_failure_short_circuits() {
        let executor = RetryExecutor::new(policy_1_2_60(5));
        let calls = Arc::new(AtomicU32::new(0));
        let start = Instant::now();

        let counter = calls.clone();
        let result: Result<(), _> = executor
            .run("bad-input", |_| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(TestError(FailureClass::Terminal))
                }
            })
            .await;

        let err = result.unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(err.attempts, 1);
        assert!(err.is_terminal());
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_transient_failures() {
        let executor = RetryExecutor::new(policy_1_2_60(5));

        let value = executor
            .run("eventually", |attempt| async move {
                if attempt < 3 {
                    Err(TestError(FailureClass::Transient))
                } else {
                    Ok(attempt)
                }
            })
            .await
            .unwrap();

        assert_eq!(value, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_stops_between_attempts() {
        let token = CancellationToken::new();
        let executor = RetryExecutor::new(policy_1_2_60(5)).with_cancellation(token.clone());
        let calls = Arc::new(AtomicU32::new(0));

        let counter = calls.clone();
        let result: Result<(), _> = executor
            .run("cancelled", |_| {
                let counter = counter.clone();
                let token = token.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    token.cancel();
                    Err(TestError(FailureClass::Transient))
                }
            })
            .await;

        let err = result.unwrap_err();
        assert!(err.interrupted);
        assert_eq!(err.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_hint_extends_delay() {
        let executor = RetryExecutor::new(policy_1_2_60(2));
        let start = Instant::now();

        let result: Result<(), _> = executor
            .run("throttled", |_| async {
                Err(BridgeError::RateLimited {
                    retry_after_secs: Some(30),
                })
            })
            .await;

        assert_eq!(result.unwrap_err().attempts, 2);
        assert_eq!(start.elapsed(), Duration::from_secs(30));
    }

    #[test]
    fn test_bridge_error_classification() {
        assert_eq!(
            BridgeError::Network("reset".into()).classify(),
            FailureClass::Transient
        );
        assert_eq!(
            BridgeError::NotFound("gone".into()).classify(),
            FailureClass::Terminal
        );
    }
}
