//! The single boundary between reduction code and the text-generation backend.
//!
//! Reducers never talk to a backend directly. They hand a [`Prompt`] to the
//! [`ModelGateway`], which
//!
//! 1. refuses prompts whose estimated size exceeds the backend's input limit
//!    ([`Error::PromptTooLarge`]); content is never silently truncated,
//! 2. enforces a per-call timeout,
//! 3. retries transient failures according to its [`RetryConfig`].
//!
//! Backends implement [`CompletionBackend`]. The trait returns a boxed future
//! so it stays object-safe and can sit behind `Arc<dyn CompletionBackend>`.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::api::client::{AnthropicClient, OpenRouterClient};
use crate::api::retry::RetryConfig;
use crate::config::{GatewayConfig, Provider};
use crate::document::TokenEstimator;
use crate::error::{BackendError, BackendErrorKind, Error, Result};

/// Default input limit when none is configured.
pub const DEFAULT_MAX_INPUT_TOKENS: usize = 100_000;

// ── Prompt ──────────────────────────────────────────────────────────

/// A fully rendered prompt: optional system instructions plus the user turn.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

impl Prompt {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
        }
    }

    pub fn user_only(user: impl Into<String>) -> Self {
        Self::new(String::new(), user)
    }
}

// ── Backend trait ───────────────────────────────────────────────────

/// Boxed future returned by [`CompletionBackend::complete`].
pub type CompletionFuture<'a> =
    Pin<Box<dyn Future<Output = std::result::Result<String, BackendError>> + Send + 'a>>;

/// A text-generation backend: prompt in, bounded text out.
///
/// Implementations perform exactly one attempt per call; retrying, timeouts
/// and size checks belong to the [`ModelGateway`].
///
/// # Example
///
/// ```
/// use tome_rs::api::{CompletionBackend, CompletionFuture, Prompt};
///
/// struct Echo;
///
/// impl CompletionBackend for Echo {
///     fn complete<'a>(&'a self, prompt: &'a Prompt, _max_output_tokens: u32) -> CompletionFuture<'a> {
///         Box::pin(async move { Ok(prompt.user.clone()) })
///     }
/// }
/// ```
pub trait CompletionBackend: Send + Sync {
    /// Human-readable label used in logs.
    fn name(&self) -> &str {
        "backend"
    }

    fn complete<'a>(&'a self, prompt: &'a Prompt, max_output_tokens: u32) -> CompletionFuture<'a>;
}

// ── Gateway ─────────────────────────────────────────────────────────

/// Retrying, size-guarded access to a [`CompletionBackend`].
///
/// Cloning is cheap; clones share the backend.
#[derive(Clone)]
pub struct ModelGateway {
    backend: Arc<dyn CompletionBackend>,
    retry: RetryConfig,
    max_input_tokens: usize,
    estimator: TokenEstimator,
    call_timeout: Option<Duration>,
}

impl std::fmt::Debug for ModelGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelGateway")
            .field("backend", &self.backend.name())
            .field("retry", &self.retry)
            .field("max_input_tokens", &self.max_input_tokens)
            .field("call_timeout", &self.call_timeout)
            .finish()
    }
}

impl ModelGateway {
    pub fn new(backend: Arc<dyn CompletionBackend>) -> Self {
        Self {
            backend,
            retry: RetryConfig::default(),
            max_input_tokens: DEFAULT_MAX_INPUT_TOKENS,
            estimator: TokenEstimator::default(),
            call_timeout: None,
        }
    }

    /// Build a gateway over an HTTP backend described by `config`.
    pub fn from_config(config: &GatewayConfig) -> Result<Self> {
        config.validate()?;
        let backend: Arc<dyn CompletionBackend> = match config.provider {
            Provider::OpenRouter => Arc::new(OpenRouterClient::from_config(config)?),
            Provider::Anthropic => Arc::new(AnthropicClient::from_config(config)?),
        };
        Ok(Self::new(backend)
            .with_retry(config.retry.clone())
            .with_max_input_tokens(config.max_input_tokens)
            .with_call_timeout(config.request_timeout))
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_max_input_tokens(mut self, limit: usize) -> Self {
        self.max_input_tokens = limit;
        self
    }

    pub fn with_estimator(mut self, estimator: TokenEstimator) -> Self {
        self.estimator = estimator;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }

    pub fn estimator(&self) -> &TokenEstimator {
        &self.estimator
    }

    pub fn max_input_tokens(&self) -> usize {
        self.max_input_tokens
    }

    pub fn retry(&self) -> &RetryConfig {
        &self.retry
    }

    /// Estimated input size of `prompt`.
    pub fn estimate(&self, prompt: &Prompt) -> usize {
        self.estimator
            .estimate_all([prompt.system.as_str(), prompt.user.as_str()])
    }

    /// Fail with [`Error::PromptTooLarge`] if `prompt` exceeds the input limit.
    pub fn check_size(&self, prompt: &Prompt) -> Result<usize> {
        let estimated = self.estimate(prompt);
        if estimated > self.max_input_tokens {
            return Err(Error::PromptTooLarge {
                estimated,
                limit: self.max_input_tokens,
            });
        }
        Ok(estimated)
    }

    /// Send `prompt` and return the generated text.
    pub async fn complete(&self, prompt: &Prompt, max_output_tokens: u32) -> Result<String> {
        let estimated = self.check_size(prompt)?;
        debug!(
            "Gateway request: backend={}, ~{} input tokens, max_output_tokens={}",
            self.backend.name(),
            estimated,
            max_output_tokens
        );

        let start = Instant::now();
        let text = self
            .retry
            .run("complete", |_| self.attempt(prompt, max_output_tokens))
            .await?;

        debug!(
            "Gateway response: {} chars in {:.1}s",
            text.len(),
            start.elapsed().as_secs_f64()
        );
        Ok(text)
    }

    async fn attempt(
        &self,
        prompt: &Prompt,
        max_output_tokens: u32,
    ) -> std::result::Result<String, BackendError> {
        let call = self.backend.complete(prompt, max_output_tokens);
        match self.call_timeout {
            Some(limit) => tokio::time::timeout(limit, call).await.map_err(|_| {
                BackendError::new(
                    BackendErrorKind::Timeout,
                    format!("no response within {:.1}s", limit.as_secs_f64()),
                )
            })?,
            None => call.await,
        }
    }
}
