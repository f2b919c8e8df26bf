//! Query-focused reduction of documents too long for one model call.
//!
//! `tome-rs` answers a question about a long document by splitting it into
//! chunks, condensing the chunks with a language model, and asking the model
//! to answer from the condensed text. Two reduction strategies are provided:
//!
//! - **Pyramid.** Overlapping windows of chunks are summarized, then windows
//!   of those summaries, level by level, until one summary remains. Calls
//!   within a level run concurrently.
//! - **Rollup.** A single running summary is updated with each chunk in
//!   order. One call per chunk, strictly sequential, with a hard check that
//!   every stage fits the context window.
//!
//! Every model call goes through the [`ModelGateway`](api::ModelGateway),
//! which rejects oversized prompts before sending and retries transient
//! backend failures with exponential backoff.
//!
//! # Getting started
//!
//! ```ignore
//! use tome_rs::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> tome_rs::Result<()> {
//!     let api_key = std::env::var("OPENROUTER_KEY").unwrap_or_default();
//!     let gateway = ModelGateway::from_config(&GatewayConfig::new(
//!         Provider::OpenRouter,
//!         tome_rs::DEFAULT_MODEL,
//!         api_key,
//!     ))?;
//!
//!     let document = std::fs::read_to_string("report.txt")?;
//!     let sink = DirectorySink::new("output")?;
//!
//!     let output = Pipeline::new(&gateway, ChunkingConfig::default(), AnswerConfig::default())
//!         .with_event_handler(&LoggingHandler)
//!         .run(
//!             Source::new("report.txt", &document),
//!             "What were the main risks identified?",
//!             &Strategy::Pyramid(PyramidConfig::default()),
//!             &sink,
//!         )
//!         .await?;
//!
//!     println!("{}", output.answer.text);
//!     Ok(())
//! }
//! ```
//!
//! # Where to find things
//!
//! - **Split a document:** [`Chunker`](document::Chunker) and
//!   [`TokenEstimator`](document::TokenEstimator).
//! - **Call a model:** [`ModelGateway`](api::ModelGateway) over any
//!   [`CompletionBackend`](api::CompletionBackend). HTTP backends are
//!   [`OpenRouterClient`](api::OpenRouterClient) and
//!   [`AnthropicClient`](api::AnthropicClient).
//! - **Reduce step by step:** [`PyramidBuilder`](reduce::PyramidBuilder) and
//!   [`RollupBuilder`](reduce::RollupBuilder) expose `step()`, `state()` and
//!   `resume()` for callers that drive the reduction themselves.
//! - **Observe progress:** implement [`EventHandler`](reduce::EventHandler),
//!   or use [`LoggingHandler`](reduce::LoggingHandler) for tracing output.
//! - **Keep results:** [`DirectorySink`](artifacts::DirectorySink) writes every
//!   summary, metadata, and a resumable checkpoint to disk.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`document`] | Token estimation and chunking |
//! | [`api`] | Gateway, retry with backoff, HTTP backends |
//! | [`reduce`] | Window planning, prompts, pyramid, rollup, answer, events |
//! | [`artifacts`] | Output naming, metadata records, checkpoints |
//! | [`pipeline`] | Chunk → reduce → persist → answer |
//! | [`config`] | Validated configuration values and defaults |
//! | [`error`] | The [`Error`] taxonomy |

pub mod api;
pub mod artifacts;
pub mod config;
pub mod document;
pub mod error;
pub mod pipeline;
pub mod prelude;
pub mod reduce;

pub use error::{Error, Result};

// ── Constants ──────────────────────────────────────────────────────

pub const OPENROUTER_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

pub const ANTHROPIC_URL: &str = "https://api.anthropic.com/v1/messages";

pub const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Default model for OpenRouter.
pub const DEFAULT_MODEL: &str = "anthropic/claude-sonnet-4";

/// Default model for the Anthropic API.
pub const DEFAULT_ANTHROPIC_MODEL: &str = "claude-sonnet-4-20250514";
