//! Configuration values for the gateway, the chunker and both reducers.
//!
//! Nothing here is global: each value is built by the caller (usually the
//! CLI), validated with `validate()`, and passed into the constructor that
//! needs it. Validation runs before any backend call so bad parameters fail
//! fast with [`Error::InvalidConfiguration`].
//!
//! Defaults follow the command-line tool: a 100k-token context window,
//! 1 000-token chunks, 5 000-token selections, 2 000-token summaries,
//! 4 000-token answers, and windows of 5 with a stride of 4.
//!
//! ```
//! use tome_rs::config::PyramidConfig;
//!
//! let config = PyramidConfig::uniform(5, 4).with_concurrency(8);
//! assert!(config.validate().is_ok());
//! assert!(PyramidConfig::uniform(4, 5).validate().is_err());
//! ```

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::api::retry::RetryConfig;
use crate::document::{Chunker, TokenEstimator};
use crate::error::{Error, Result};

pub const DEFAULT_CONTEXT_WINDOW: usize = 100_000;
pub const DEFAULT_TOKENS_PER_CHUNK: usize = 1_000;
pub const DEFAULT_TOKENS_PER_SELECTION: usize = 5_000;
pub const DEFAULT_SUMMARY_TOKEN_LIMIT: usize = 2_000;
pub const DEFAULT_ANSWER_TOKEN_LIMIT: usize = 4_000;
pub const DEFAULT_WINDOW_SIZE: usize = 5;
pub const DEFAULT_STRIDE: usize = 4;
pub const DEFAULT_CONCURRENCY: usize = 4;
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

// ── Gateway ─────────────────────────────────────────────────────────

/// Which HTTP API the gateway talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    /// OpenRouter chat completions (`OPENROUTER_KEY`).
    #[default]
    OpenRouter,
    /// Anthropic messages API (`ANTHROPIC_API_KEY`).
    Anthropic,
}

impl Provider {
    /// Environment variable holding this provider's API key.
    pub fn api_key_env(&self) -> &'static str {
        match self {
            Self::OpenRouter => "OPENROUTER_KEY",
            Self::Anthropic => "ANTHROPIC_API_KEY",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OpenRouter => write!(f, "openrouter"),
            Self::Anthropic => write!(f, "anthropic"),
        }
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "openrouter" => Ok(Self::OpenRouter),
            "anthropic" => Ok(Self::Anthropic),
            other => Err(format!(
                "unknown provider '{other}' (expected 'openrouter' or 'anthropic')"
            )),
        }
    }
}

/// Everything needed to construct a [`ModelGateway`](crate::api::ModelGateway)
/// over a real HTTP backend.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub provider: Provider,
    pub model: String,
    pub api_key: String,
    /// Override the provider's endpoint URL.
    pub base_url: Option<String>,
    /// Prompts estimated above this many tokens are rejected.
    pub max_input_tokens: usize,
    /// Per-call timeout; a call that exceeds it counts as a transient failure.
    pub request_timeout: Duration,
    pub temperature: f32,
    pub retry: RetryConfig,
}

impl GatewayConfig {
    pub fn new(provider: Provider, model: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            api_key: api_key.into(),
            base_url: None,
            max_input_tokens: DEFAULT_CONTEXT_WINDOW,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            temperature: 0.0,
            retry: RetryConfig::default(),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn with_max_input_tokens(mut self, tokens: usize) -> Self {
        self.max_input_tokens = tokens;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.model.trim().is_empty() {
            return Err(Error::invalid_config("model name must not be empty"));
        }
        if self.api_key.trim().is_empty() {
            return Err(Error::invalid_config(format!(
                "missing API key (set {})",
                self.provider.api_key_env()
            )));
        }
        if self.max_input_tokens == 0 {
            return Err(Error::invalid_config("max_input_tokens must be greater than 0"));
        }
        if self.request_timeout.is_zero() {
            return Err(Error::invalid_config("request timeout must be non-zero"));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(Error::invalid_config(format!(
                "temperature {} is outside 0.0..=2.0",
                self.temperature
            )));
        }
        Ok(())
    }
}

// ── Chunking ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkingConfig {
    pub tokens_per_chunk: usize,
    /// Target size of the content handed to one summarization call.
    pub tokens_per_selection: usize,
    pub paragraph_aware: bool,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            tokens_per_chunk: DEFAULT_TOKENS_PER_CHUNK,
            tokens_per_selection: DEFAULT_TOKENS_PER_SELECTION,
            paragraph_aware: true,
        }
    }
}

impl ChunkingConfig {
    pub fn with_tokens_per_chunk(mut self, tokens: usize) -> Self {
        self.tokens_per_chunk = tokens;
        self
    }

    pub fn with_tokens_per_selection(mut self, tokens: usize) -> Self {
        self.tokens_per_selection = tokens;
        self
    }

    pub fn with_paragraph_aware(mut self, enabled: bool) -> Self {
        self.paragraph_aware = enabled;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.tokens_per_chunk == 0 {
            return Err(Error::invalid_config("tokens_per_chunk must be greater than 0"));
        }
        if self.tokens_per_selection == 0 {
            return Err(Error::invalid_config(
                "tokens_per_selection must be greater than 0",
            ));
        }
        Ok(())
    }

    /// A chunker configured from these settings.
    pub fn chunker(&self, estimator: TokenEstimator) -> Chunker {
        Chunker::new()
            .with_estimator(estimator)
            .with_paragraph_aware(self.paragraph_aware)
    }
}

// ── Pyramid ─────────────────────────────────────────────────────────

/// Window geometry for one tier of the pyramid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowConfig {
    pub window_size: usize,
    pub stride: usize,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            window_size: DEFAULT_WINDOW_SIZE,
            stride: DEFAULT_STRIDE,
        }
    }
}

impl WindowConfig {
    pub fn new(window_size: usize, stride: usize) -> Self {
        Self {
            window_size,
            stride,
        }
    }

    /// Units shared by neighbouring windows.
    pub fn overlap(&self) -> usize {
        self.window_size.saturating_sub(self.stride)
    }

    /// Requires `0 < stride <= window_size` and `window_size >= 2`. A window
    /// of one unit would never shrink a level, so the pyramid could not
    /// terminate.
    pub fn validate(&self) -> Result<()> {
        if self.window_size == 0 {
            return Err(Error::invalid_config("window_size must be greater than 0"));
        }
        if self.stride == 0 {
            return Err(Error::invalid_config("stride must be greater than 0"));
        }
        if self.stride > self.window_size {
            return Err(Error::invalid_config(format!(
                "stride ({}) must not exceed window_size ({}); windows would skip content",
                self.stride, self.window_size
            )));
        }
        if self.window_size < 2 {
            return Err(Error::invalid_config(
                "window_size must be at least 2 for the pyramid to converge",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PyramidConfig {
    /// Windows over the chunk sequence (level 1).
    pub base: WindowConfig,
    /// Windows over summaries (levels 2 and up).
    pub upper: WindowConfig,
    /// Windows summarized concurrently within one level.
    pub concurrency: usize,
    pub summary_token_limit: usize,
}

impl Default for PyramidConfig {
    fn default() -> Self {
        Self {
            base: WindowConfig::default(),
            upper: WindowConfig::default(),
            concurrency: DEFAULT_CONCURRENCY,
            summary_token_limit: DEFAULT_SUMMARY_TOKEN_LIMIT,
        }
    }
}

impl PyramidConfig {
    /// Same window geometry at every level.
    pub fn uniform(window_size: usize, stride: usize) -> Self {
        let windows = WindowConfig::new(window_size, stride);
        Self {
            base: windows,
            upper: windows,
            ..Default::default()
        }
    }

    pub fn with_base(mut self, base: WindowConfig) -> Self {
        self.base = base;
        self
    }

    pub fn with_upper(mut self, upper: WindowConfig) -> Self {
        self.upper = upper;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_summary_token_limit(mut self, tokens: usize) -> Self {
        self.summary_token_limit = tokens;
        self
    }

    /// Window geometry used to build `level` (1-based).
    pub fn windows_for_level(&self, level: usize) -> WindowConfig {
        if level <= 1 { self.base } else { self.upper }
    }

    pub fn validate(&self) -> Result<()> {
        self.base.validate()?;
        self.upper.validate()?;
        if self.concurrency == 0 {
            return Err(Error::invalid_config("concurrency must be at least 1"));
        }
        if self.summary_token_limit == 0 {
            return Err(Error::invalid_config(
                "summary_token_limit must be greater than 0",
            ));
        }
        Ok(())
    }
}

// ── Rollup ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollupConfig {
    /// Model context window shared by every stage and the final answer.
    pub context_window: usize,
    pub summary_token_limit: usize,
    /// Reserved for the answer call that follows the last stage.
    pub answer_token_limit: usize,
}

impl Default for RollupConfig {
    fn default() -> Self {
        Self {
            context_window: DEFAULT_CONTEXT_WINDOW,
            summary_token_limit: DEFAULT_SUMMARY_TOKEN_LIMIT,
            answer_token_limit: DEFAULT_ANSWER_TOKEN_LIMIT,
        }
    }
}

impl RollupConfig {
    pub fn with_context_window(mut self, tokens: usize) -> Self {
        self.context_window = tokens;
        self
    }

    pub fn with_summary_token_limit(mut self, tokens: usize) -> Self {
        self.summary_token_limit = tokens;
        self
    }

    pub fn with_answer_token_limit(mut self, tokens: usize) -> Self {
        self.answer_token_limit = tokens;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.context_window == 0 {
            return Err(Error::invalid_config("context_window must be greater than 0"));
        }
        if self.summary_token_limit == 0 {
            return Err(Error::invalid_config(
                "summary_token_limit must be greater than 0",
            ));
        }
        if self.answer_token_limit == 0 {
            return Err(Error::invalid_config(
                "answer_token_limit must be greater than 0",
            ));
        }
        let reserved = self
            .summary_token_limit
            .checked_add(self.answer_token_limit)
            .ok_or_else(|| {
                Error::invalid_config("summary_token_limit + answer_token_limit overflows")
            })?;
        if reserved >= self.context_window {
            return Err(Error::invalid_config(format!(
                "summary_token_limit ({}) + answer_token_limit ({}) must be smaller than \
                 context_window ({})",
                self.summary_token_limit, self.answer_token_limit, self.context_window
            )));
        }
        Ok(())
    }
}

// ── Answer ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerConfig {
    pub answer_token_limit: usize,
}

impl Default for AnswerConfig {
    fn default() -> Self {
        Self {
            answer_token_limit: DEFAULT_ANSWER_TOKEN_LIMIT,
        }
    }
}

impl AnswerConfig {
    pub fn new(answer_token_limit: usize) -> Self {
        Self { answer_token_limit }
    }

    pub fn validate(&self) -> Result<()> {
        if self.answer_token_limit == 0 {
            return Err(Error::invalid_config(
                "answer_token_limit must be greater than 0",
            ));
        }
        Ok(())
    }
}

/// Convert a token limit to the `u32` a backend call takes.
pub(crate) fn output_limit(tokens: usize) -> u32 {
    u32::try_from(tokens).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_invalid(result: Result<()>) -> bool {
        matches!(result, Err(Error::InvalidConfiguration(_)))
    }

    #[test]
    fn defaults_are_valid() {
        assert!(ChunkingConfig::default().validate().is_ok());
        assert!(PyramidConfig::default().validate().is_ok());
        assert!(RollupConfig::default().validate().is_ok());
        assert!(AnswerConfig::default().validate().is_ok());
    }

    #[test]
    fn window_geometry_rules() {
        assert!(WindowConfig::new(5, 4).validate().is_ok());
        assert!(WindowConfig::new(5, 5).validate().is_ok());
        assert!(is_invalid(WindowConfig::new(4, 5).validate()));
        assert!(is_invalid(WindowConfig::new(5, 0).validate()));
        assert!(is_invalid(WindowConfig::new(0, 0).validate()));
        assert!(is_invalid(WindowConfig::new(1, 1).validate()));
        assert_eq!(WindowConfig::new(5, 4).overlap(), 1);
    }

    #[test]
    fn pyramid_tiers() {
        let config = PyramidConfig::default()
            .with_base(WindowConfig::new(8, 6))
            .with_upper(WindowConfig::new(3, 2));
        assert_eq!(config.windows_for_level(1), WindowConfig::new(8, 6));
        assert_eq!(config.windows_for_level(2), WindowConfig::new(3, 2));
        assert_eq!(config.windows_for_level(7), WindowConfig::new(3, 2));
        assert!(is_invalid(config.with_concurrency(0).validate()));
    }

    #[test]
    fn rollup_reserves_room_for_the_answer() {
        let config = RollupConfig::default()
            .with_context_window(6_000)
            .with_summary_token_limit(2_000)
            .with_answer_token_limit(4_000);
        assert!(is_invalid(config.clone().validate()));
        assert!(config.with_context_window(6_001).validate().is_ok());
    }

    #[test]
    fn rollup_reserve_overflow_is_invalid() {
        let config = RollupConfig::default()
            .with_context_window(usize::MAX)
            .with_summary_token_limit(usize::MAX)
            .with_answer_token_limit(1);
        assert!(is_invalid(config.validate()));
    }

    #[test]
    fn chunking_rejects_zero_budgets() {
        assert!(is_invalid(
            ChunkingConfig::default().with_tokens_per_chunk(0).validate()
        ));
        assert!(is_invalid(
            ChunkingConfig::default()
                .with_tokens_per_selection(0)
                .validate()
        ));
    }

    #[test]
    fn gateway_requires_key_and_model() {
        let ok = GatewayConfig::new(Provider::OpenRouter, "some/model", "key");
        assert!(ok.validate().is_ok());
        assert!(is_invalid(
            GatewayConfig::new(Provider::Anthropic, "m", " ").validate()
        ));
        assert!(is_invalid(
            GatewayConfig::new(Provider::OpenRouter, "", "key").validate()
        ));
        assert!(is_invalid(ok.with_temperature(3.5).validate()));
    }

    #[test]
    fn provider_parses_case_insensitively() {
        assert_eq!("Anthropic".parse::<Provider>(), Ok(Provider::Anthropic));
        assert_eq!("openrouter".parse::<Provider>(), Ok(Provider::OpenRouter));
        assert!("other".parse::<Provider>().is_err());
        assert_eq!(Provider::Anthropic.api_key_env(), "ANTHROPIC_API_KEY");
    }
}
