//! Error taxonomy and retry mechanism
//!
//! Every failure that can end a reassembly job is a [`ReassemblyError`]. Errors carry
//! enough context to be rendered in the final run report, and each one knows whether
//! retrying the operation that produced it can help.
//!
//! Key features:
//! - Exponential backoff with jitter
//! - Retry classification per error (HTTP 5xx/408/429, timeouts and resets retry; the rest fail fast)
//! - Error categories used by reports and statistics

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Maximum retry attempts allowed
pub const MAX_RETRY_ATTEMPTS: u32 = 10;

/// Default base delay for exponential backoff (200ms)
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(200);

/// Maximum delay cap for exponential backoff (30 seconds)
pub const MAX_DELAY_CAP: Duration = Duration::from_secs(30);

/// Result alias used throughout the engine
pub type ReassemblyResult<T> = Result<T, ReassemblyError>;

/// Error categories surfaced in job reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCategory {
    /// Fetch failures (DNS, connection, timeout, non-2xx)
    Network,
    /// External media tool missing or exiting non-zero
    Mux,
    /// Playlist could not be fetched into a usable segment list
    Manifest,
    /// Local disk errors
    FileSystem,
    /// Invalid settings
    Configuration,
    /// The run was cancelled before the job finished
    Cancelled,
    /// Worker-level failures (panicked task)
    System,
}

/// Errors produced by fetch, mux and orchestration stages
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq)]
pub enum ReassemblyError {
    #[error("Network error for {url}: {message}")]
    Network {
        url: String,
        message: String,
        status: Option<u16>,
        retryable: bool,
    },

    #[error("Mux error: {message}")]
    Mux {
        message: String,
        exit_code: Option<i32>,
    },

    #[error("Mux error: media tool `{tool}` was not found")]
    ToolMissing { tool: String },

    #[error("Partial fragment set: fetched {fetched} of {expected} segments")]
    PartialFragmentSet { expected: usize, fetched: usize },

    #[error("Manifest error for {url}: {message}")]
    Manifest { url: String, message: String },

    #[error("File system error at {path}: {message}")]
    FileSystem { path: String, message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("{operation} timed out after {seconds}s")]
    Timeout { operation: String, seconds: u64 },

    #[error("Run cancelled")]
    Cancelled,

    #[error("Worker failure: {message}")]
    Worker { message: String },
}

impl ReassemblyError {
    /// Determine if this error type should be retried
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network { retryable, .. } => *retryable,
            Self::Timeout { .. } => true,
            _ => false,
        }
    }

    /// Get the error category for this error
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Network { .. } | Self::Timeout { .. } => ErrorCategory::Network,
            Self::Mux { .. } | Self::ToolMissing { .. } | Self::PartialFragmentSet { .. } => {
                ErrorCategory::Mux
            }
            Self::Manifest { .. } => ErrorCategory::Manifest,
            Self::FileSystem { .. } => ErrorCategory::FileSystem,
            Self::Configuration { .. } => ErrorCategory::Configuration,
            Self::Cancelled => ErrorCategory::Cancelled,
            Self::Worker { .. } => ErrorCategory::System,
        }
    }

    pub fn is_mux_error(&self) -> bool {
        matches!(self, Self::Mux { .. } | Self::ToolMissing { .. })
    }

    pub fn is_network_error(&self) -> bool {
        self.category() == ErrorCategory::Network
    }
}

/// HTTP statuses worth another attempt
pub fn status_is_retryable(code: u16) -> bool {
    code >= 500 || code == 408 || code == 429
}

/// Retry strategy configuration
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,
    /// Base delay for exponential backoff
    pub base_delay: Duration,
    /// Maximum delay cap
    pub max_delay: Duration,
    /// Backoff multiplier (typically 2.0 for exponential)
    pub backoff_multiplier: f64,
    /// Add random jitter to prevent thundering herd
    pub jitter_enabled: bool,
    /// Jitter factor (0.0 to 1.0)
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: MAX_DELAY_CAP,
            backoff_multiplier: 2.0,
            jitter_enabled: true,
            jitter_factor: 0.1,
        }
    }
}

impl RetryPolicy {
    /// Policy for `retry_attempts` retries after the initial try
    pub fn with_retries(retry_attempts: u32) -> Self {
        Self {
            max_attempts: retry_attempts.min(MAX_RETRY_ATTEMPTS) + 1,
            ..Default::default()
        }
    }
}

/// Runs an operation under a [`RetryPolicy`]
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Execute `operation` until it succeeds, fails with a non-retryable error, or the
    /// attempt budget runs out. The last error is returned unchanged.
    pub async fn execute<F, Fut, T>(&self, label: &str, mut operation: F) -> ReassemblyResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ReassemblyResult<T>>,
    {
        let start_time = Instant::now();
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            debug!("Executing attempt {} for {}", attempt, label);

            match operation().await {
                Ok(result) => return Ok(result),
                Err(error) => {
                    if !error.is_retryable() || attempt >= max_attempts {
                        if attempt > 1 {
                            warn!(
                                "{} failed after {} attempts in {:?}: {}",
                                label,
                                attempt,
                                start_time.elapsed(),
                                error
                            );
                        }
                        return Err(error);
                    }

                    let delay = self.calculate_delay(attempt);
                    warn!(
                        "Attempt {}/{} failed for {}: {}. Retrying in {:?}",
                        attempt, max_attempts, label, error, delay
                    );
                    if delay > Duration::ZERO {
                        sleep(delay).await;
                    }

                    attempt += 1;
                }
            }
        }
    }

    /// Calculate delay for the next retry attempt
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let delay_ms =
            self.policy.base_delay.as_millis() as f64 * self.policy.backoff_multiplier.powi(exponent);
        let mut delay = Duration::from_millis(delay_ms as u64);

        if delay > self.policy.max_delay {
            delay = self.policy.max_delay;
        }

        if self.policy.jitter_enabled {
            let jitter = delay.as_millis() as f64
                * self.policy.jitter_factor
                * (rand::random::<f64>() - 0.5);
            let jittered_delay = delay.as_millis() as i64 + jitter as i64;
            delay = Duration::from_millis(jittered_delay.max(0) as u64);
        }

        delay
    }
}

/// Convenience functions for creating common error types
pub mod errors {
    use super::*;

    pub fn network_error(
        url: impl Into<String>,
        message: impl Into<String>,
        retryable: bool,
    ) -> ReassemblyError {
        ReassemblyError::Network {
            url: url.into(),
            message: message.into(),
            status: None,
            retryable,
        }
    }

    pub fn http_status_error(url: impl Into<String>, status: u16) -> ReassemblyError {
        ReassemblyError::Network {
            url: url.into(),
            message: format!("HTTP status {}", status),
            status: Some(status),
            retryable: status_is_retryable(status),
        }
    }

    /// Transport failure from reqwest, attributed to the URL being fetched
    pub fn request_error(url: impl Into<String>, err: &reqwest::Error) -> ReassemblyError {
        let status = err.status().map(|s| s.as_u16());
        let retryable = match status {
            Some(code) => status_is_retryable(code),
            None => err.is_timeout() || err.is_connect() || err.is_body() || err.is_request(),
        };
        ReassemblyError::Network {
            url: url.into(),
            message: err.to_string(),
            status,
            retryable,
        }
    }

    pub fn mux_error(message: impl Into<String>, exit_code: Option<i32>) -> ReassemblyError {
        ReassemblyError::Mux {
            message: message.into(),
            exit_code,
        }
    }

    pub fn manifest_error(url: impl Into<String>, message: impl Into<String>) -> ReassemblyError {
        ReassemblyError::Manifest {
            url: url.into(),
            message: message.into(),
        }
    }

    pub fn filesystem_error(
        path: impl AsRef<std::path::Path>,
        err: impl std::fmt::Display,
    ) -> ReassemblyError {
        ReassemblyError::FileSystem {
            path: path.as_ref().display().to_string(),
            message: err.to_string(),
        }
    }

    pub fn configuration_error(message: impl Into<String>) -> ReassemblyError {
        ReassemblyError::Configuration {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(5),
            jitter_enabled: false,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_retry_executor_with_recoverable_errors() {
        let executor = RetryExecutor::new(fast_policy(3));
        let calls = Arc::new(AtomicU32::new(0));

        let result = executor
            .execute("flaky", || {
                let calls = Arc::clone(&calls);
                async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    if n < 3 {
                        Err(errors::http_status_error("http://x/a.ts", 503))
                    } else {
                        Ok("Success".to_string())
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "Success");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_executor_with_non_retryable_errors() {
        let executor = RetryExecutor::new(fast_policy(5));
        let calls = Arc::new(AtomicU32::new(0));

        let result: ReassemblyResult<()> = executor
            .execute("missing", || {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(errors::http_status_error("http://x/a.ts", 404))
                }
            })
            .await;

        assert!(matches!(
            result,
            Err(ReassemblyError::Network {
                status: Some(404),
                ..
            })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_budget_exhausted_returns_last_error() {
        let executor = RetryExecutor::new(fast_policy(2));
        let calls = Arc::new(AtomicU32::new(0));

        let result: ReassemblyResult<()> = executor
            .execute("down", || {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(errors::network_error("http://x/", "connection reset", true))
                }
            })
            .await;

        assert!(result.unwrap_err().is_network_error());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_error_categorization() {
        assert!(errors::http_status_error("u", 500).is_retryable());
        assert!(errors::http_status_error("u", 429).is_retryable());
        assert!(!errors::http_status_error("u", 403).is_retryable());

        let missing = ReassemblyError::ToolMissing {
            tool: "ffmpeg".to_string(),
        };
        assert_eq!(missing.category(), ErrorCategory::Mux);
        assert!(missing.is_mux_error());
        assert!(missing.to_string().starts_with("Mux error"));

        let partial = ReassemblyError::PartialFragmentSet {
            expected: 10,
            fetched: 8,
        };
        assert!(!partial.is_mux_error());
        assert!(!ReassemblyError::Cancelled.is_retryable());
        assert!(!errors::configuration_error("bad").is_retryable());

        let stalled = ReassemblyError::Timeout {
            operation: "GET http://x/a.mp4".to_string(),
            seconds: 30,
        };
        assert!(stalled.is_retryable());
        assert!(stalled.is_network_error());
        assert_eq!(stalled.to_string(), "GET http://x/a.mp4 timed out after 30s");
    }

    #[test]
    fn test_backoff_calculation() {
        let executor = RetryExecutor::new(RetryPolicy {
            jitter_enabled: false,
            ..Default::default()
        });

        let delay1 = executor.calculate_delay(1);
        let delay2 = executor.calculate_delay(2);
        assert_eq!(delay1, DEFAULT_BASE_DELAY);
        assert!(delay2 > delay1);
        assert!(executor.calculate_delay(40) <= MAX_DELAY_CAP);
    }

    #[test]
    fn test_with_retries_caps_attempts() {
        assert_eq!(RetryPolicy::with_retries(3).max_attempts, 4);
        assert_eq!(RetryPolicy::with_retries(99).max_attempts, MAX_RETRY_ATTEMPTS + 1);
    }
}
