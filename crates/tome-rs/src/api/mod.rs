//! Model access layer: everything between the reducers and the HTTP API.
//!
//! - [`gateway`]: [`ModelGateway`], the only way reduction code reaches a
//!   model. Guards prompt size, enforces per-call timeouts, retries.
//! - [`retry`]: [`RetryConfig`], the backoff policy object injected into the
//!   gateway (attempt budget, delay schedule, transient/fatal classifier).
//! - [`client`]: OpenRouter and Anthropic implementations of
//!   [`CompletionBackend`].

pub mod client;
pub mod gateway;
pub mod retry;

pub use client::{AnthropicClient, OpenRouterClient};
pub use gateway::{CompletionBackend, CompletionFuture, ModelGateway, Prompt};
pub use retry::RetryConfig;
