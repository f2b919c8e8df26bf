//! Convenience re-exports for common `tome-rs` types.
//!
//! ```ignore
//! use tome_rs::prelude::*;
//! ```
//!
//! Covers running a pipeline end to end and driving either reducer by hand.
//! Prompt builders, window planning and metadata records are left out;
//! import those from their modules when needed.

// ── Core types ──────────────────────────────────────────────────────
pub use crate::{Error, Result};
pub use crate::document::{Chunk, Chunker, TokenEstimator};

// ── Model access ────────────────────────────────────────────────────
pub use crate::api::{
    AnthropicClient, CompletionBackend, CompletionFuture, ModelGateway, OpenRouterClient, Prompt,
    RetryConfig,
};

// ── Configuration ───────────────────────────────────────────────────
pub use crate::config::{
    AnswerConfig, ChunkingConfig, GatewayConfig, Provider, PyramidConfig, RollupConfig,
    WindowConfig,
};

// ── Reduction ───────────────────────────────────────────────────────
pub use crate::reduce::{
    Answer, AnswerSynthesizer, CompositeEventHandler, EventHandler, FnEventHandler,
    LoggingHandler, NoopHandler, Pyramid, PyramidBuilder, ReduceEvent, Rollup, RollupBuilder,
};

// ── Pipeline and output ─────────────────────────────────────────────
pub use crate::artifacts::{ArtifactSink, Checkpoint, DirectorySink, MemorySink, RunIdentity};
pub use crate::pipeline::{Pipeline, PipelineOutput, Reduction, Source, Strategy};
