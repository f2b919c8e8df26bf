//! Progress events emitted by the reducers and the pipeline.
//!
//! Reducers report what they are doing through [`ReduceEvent`] values handed
//! to an [`EventHandler`]. Handlers only observe; they cannot change the
//! course of a reduction.
//!
//! | Handler | Use case |
//! |---------|----------|
//! | [`NoopHandler`] | Tests or fire-and-forget runs |
//! | [`LoggingHandler`] | Structured logging via `tracing` |
//! | [`FnEventHandler`] | Quick closures for simple callbacks |
//! | [`CompositeEventHandler`] | Compose multiple handlers in order |

use tracing::{debug, info, warn};

use crate::error::{Error, ReductionStep};
use crate::reduce::window::Window;

/// Events emitted while reducing a document.
#[derive(Debug)]
pub enum ReduceEvent<'a> {
    /// The document was split into chunks.
    Chunked {
        chunks: usize,
        tokens_per_chunk: usize,
    },
    /// A pyramid level is about to be built.
    LevelStarted {
        level: usize,
        input_units: usize,
        windows: usize,
    },
    /// One window of a pyramid level was summarized.
    WindowSummarized {
        level: usize,
        window: usize,
        span: Window,
        chunk_span: Window,
        chars: usize,
    },
    /// Every window of a level is done.
    LevelCompleted { level: usize, summaries: usize },
    /// A rollup stage is about to run.
    StageStarted {
        stage: usize,
        total: usize,
        estimated_tokens: usize,
    },
    /// A rollup stage produced a new running summary.
    StageCompleted {
        stage: usize,
        total: usize,
        chars: usize,
    },
    /// A reduction step failed; completed work is kept.
    StepFailed {
        step: ReductionStep,
        error: &'a Error,
    },
    /// The answer call is about to run.
    Synthesizing { summary_chars: usize },
    /// The answer is ready.
    Answered { chars: usize },
}

/// Handler for reduction events.
///
/// ```ignore
/// struct Progress;
///
/// impl EventHandler for Progress {
///     fn on_event(&self, event: &ReduceEvent<'_>) {
///         if let ReduceEvent::LevelCompleted { level, summaries } = event {
///             println!("level {level}: {summaries} summaries");
///         }
///     }
/// }
/// ```
pub trait EventHandler: Send + Sync {
    fn on_event(&self, event: &ReduceEvent<'_>) {
        let _ = event;
    }
}

/// A handler that ignores every event.
pub struct NoopHandler;
impl EventHandler for NoopHandler {}

/// An event handler backed by a closure.
pub struct FnEventHandler<F>(F)
where
    F: Fn(&ReduceEvent<'_>) + Send + Sync;

impl<F> FnEventHandler<F>
where
    F: Fn(&ReduceEvent<'_>) + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> EventHandler for FnEventHandler<F>
where
    F: Fn(&ReduceEvent<'_>) + Send + Sync,
{
    fn on_event(&self, event: &ReduceEvent<'_>) {
        (self.0)(event)
    }
}

/// Dispatches every event to each inner handler, in registration order.
#[derive(Default)]
pub struct CompositeEventHandler {
    handlers: Vec<Box<dyn EventHandler>>,
}

impl CompositeEventHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, handler: impl EventHandler + 'static) -> Self {
        self.handlers.push(Box::new(handler));
        self
    }

    /// Add a handler only when `condition` holds.
    pub fn with_if(self, condition: bool, handler: impl EventHandler + 'static) -> Self {
        if condition { self.with(handler) } else { self }
    }
}

impl EventHandler for CompositeEventHandler {
    fn on_event(&self, event: &ReduceEvent<'_>) {
        for handler in &self.handlers {
            handler.on_event(event);
        }
    }
}

/// Logs events through `tracing`: progress at `info`, details at `debug`.
pub struct LoggingHandler;

impl EventHandler for LoggingHandler {
    fn on_event(&self, event: &ReduceEvent<'_>) {
        match event {
            ReduceEvent::Chunked {
                chunks,
                tokens_per_chunk,
            } => {
                info!("Split document into {chunks} chunk(s) of <= {tokens_per_chunk} tokens");
            }
            ReduceEvent::LevelStarted {
                level,
                input_units,
                windows,
            } => {
                info!("[level {level}] summarizing {input_units} unit(s) in {windows} window(s)");
            }
            ReduceEvent::WindowSummarized {
                level,
                window,
                span,
                chunk_span,
                chars,
            } => {
                debug!(
                    "[level {level}] window {window} (units {span}, chunks {chunk_span}): {chars} chars"
                );
            }
            ReduceEvent::LevelCompleted { level, summaries } => {
                info!("[level {level}] done: {summaries} summary(ies)");
            }
            ReduceEvent::StageStarted {
                stage,
                total,
                estimated_tokens,
            } => {
                info!("[stage {stage}/{total}] folding chunk (~{estimated_tokens} prompt tokens)");
            }
            ReduceEvent::StageCompleted { stage, total, chars } => {
                debug!("[stage {stage}/{total}] running summary: {chars} chars");
            }
            ReduceEvent::StepFailed { step, error } => {
                warn!("{step} failed: {error}");
            }
            ReduceEvent::Synthesizing { summary_chars } => {
                info!("Synthesizing answer from {summary_chars} chars of summary");
            }
            ReduceEvent::Answered { chars } => {
                info!("Answer ready ({chars} chars)");
            }
        }
    }
}
