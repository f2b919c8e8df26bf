//! Automatic retry with exponential backoff and jitter.
//!
//! [`RetryConfig`] is a small policy object: how many times to retry, how the
//! delay grows, and a classifier deciding which [`BackendError`]s are worth
//! retrying. The default classifier retries rate limits, timeouts, network
//! failures and 5xx responses, and never retries 4xx or auth errors.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::{BackendError, Error, Result};

/// Decides whether a failed call may be retried.
pub type Classifier = fn(&BackendError) -> bool;

/// The default classifier: [`BackendError::is_transient`].
pub fn is_transient(error: &BackendError) -> bool {
    error.is_transient()
}

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retries (0 = no retries, just fail immediately).
    pub max_retries: u32,
    /// Initial delay before the first retry.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Backoff multiplier (typically 2.0 for exponential backoff).
    pub multiplier: f64,
    /// Whether to add jitter to prevent thundering herd.
    pub jitter: bool,
    /// Which errors are transient.
    pub classifier: Classifier,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            multiplier: 2.0,
            jitter: true,
            classifier: is_transient,
        }
    }
}

impl RetryConfig {
    /// Create a config with the given number of retries. Uses sensible defaults.
    pub fn with_retries(retries: u32) -> Self {
        Self {
            max_retries: retries,
            ..Default::default()
        }
    }

    /// A policy that fails on the first error.
    pub fn none() -> Self {
        Self::with_retries(0)
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_classifier(mut self, classifier: Classifier) -> Self {
        self.classifier = classifier;
        self
    }

    /// Total attempts including the first call.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Calculate the delay for a given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let base = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = base.min(self.max_delay.as_secs_f64());

        if self.jitter {
            // Deterministic jitter keyed on the attempt number.
            let jitter_factor = match attempt % 4 {
                0 => 0.75,
                1 => 0.90,
                2 => 0.60,
                _ => 0.85,
            };
            Duration::from_secs_f64(capped * jitter_factor)
        } else {
            Duration::from_secs_f64(capped)
        }
    }

    /// Run `op` until it succeeds, fails fatally, or the retry budget runs out.
    ///
    /// `op` receives the 0-based attempt number. Fatal errors surface as
    /// [`Error::Backend`]; exhausted retries as [`Error::BackendUnavailable`].
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = std::result::Result<T, BackendError>>,
    {
        let mut attempt = 0;
        loop {
            let err = match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if !(self.classifier)(&err) {
                return Err(Error::Backend(err));
            }
            if attempt >= self.max_retries {
                return Err(Error::BackendUnavailable {
                    attempts: attempt + 1,
                    source: err,
                });
            }

            let delay = self.delay_for_attempt(attempt);
            warn!(
                op = label,
                attempt = attempt + 1,
                max_attempts = self.max_attempts(),
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Transient backend error, retrying"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}
