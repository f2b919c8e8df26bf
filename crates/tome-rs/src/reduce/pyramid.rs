//! Hierarchical reduction: overlapping windows summarized level by level.
//!
//! Level 0 is the chunk sequence. Level *n* is built by planning windows over
//! the units of level *n − 1* and summarizing each window with one gateway
//! call. Levels are appended to an arena ([`Pyramid::levels`], index = level
//! − 1) and never modified afterwards, so a pyramid that fails half way still
//! holds every completed level for inspection or [resumption](PyramidBuilder::resume).
//!
//! The build is an explicit state machine: [`PyramidBuilder::state`] reports
//! the next level to build, [`PyramidBuilder::step`] builds exactly one level,
//! and [`PyramidBuilder::run`] steps until a level holds a single summary.
//!
//! Windows within a level are independent and are summarized concurrently, at
//! most [`PyramidConfig::concurrency`] at a time. Levels are strictly
//! sequential.

use futures::{StreamExt, TryStreamExt, stream};
use serde::{Deserialize, Serialize};

use crate::api::{ModelGateway, Prompt};
use crate::config::{DEFAULT_TOKENS_PER_SELECTION, PyramidConfig, output_limit};
use crate::document::Chunk;
use crate::error::{Error, ReductionStep, Result};
use crate::reduce::events::{EventHandler, NoopHandler, ReduceEvent};
use crate::reduce::prompt::{self, PromptBudget};
use crate::reduce::window::{Window, plan_windows};

// ── Artifacts ───────────────────────────────────────────────────────

/// One window's summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    /// Level this summary belongs to (1-based).
    pub level: usize,
    /// Position within its level; equals the window index.
    pub index: usize,
    /// Units of the level below that were summarized.
    pub span: Window,
    /// Chunks ultimately covered by this summary.
    pub chunk_span: Window,
    pub text: String,
    pub source_unit_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Level {
    pub number: usize,
    pub summaries: Vec<Summary>,
}

impl Level {
    pub fn len(&self) -> usize {
        self.summaries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.summaries.is_empty()
    }
}

/// The chunk sequence plus every level built over it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pyramid {
    pub chunks: Vec<Chunk>,
    pub levels: Vec<Level>,
}

impl Pyramid {
    /// Unit count per level, chunks first: e.g. `[23, 6, 2, 1]`.
    pub fn level_sizes(&self) -> Vec<usize> {
        std::iter::once(self.chunks.len())
            .chain(self.levels.iter().map(Level::len))
            .collect()
    }

    /// Number of summary levels built so far.
    pub fn depth(&self) -> usize {
        self.levels.len()
    }

    /// Level `number` (1-based).
    pub fn level(&self, number: usize) -> Option<&Level> {
        number.checked_sub(1).and_then(|i| self.levels.get(i))
    }

    pub fn is_complete(&self) -> bool {
        self.levels.last().is_some_and(|l| l.len() == 1)
    }

    /// The terminal summary, once the pyramid is complete.
    pub fn top(&self) -> Option<&Summary> {
        if self.is_complete() {
            self.levels.last().and_then(|l| l.summaries.first())
        } else {
            None
        }
    }
}

// ── Builder ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PyramidState {
    /// The given level (1-based) is the next one to build.
    NeedsLevel(usize),
    Complete,
}

/// Builds a [`Pyramid`] one level at a time.
///
/// ```ignore
/// let mut builder = PyramidBuilder::new(&gateway, PyramidConfig::uniform(5, 4), query, chunks)?
///     .with_event_handler(&LoggingHandler);
/// match builder.run().await {
///     Ok(pyramid) => println!("top: {}", pyramid.top().unwrap().text),
///     Err(err) => eprintln!("{err}; {} level(s) kept", builder.pyramid().depth()),
/// }
/// ```
pub struct PyramidBuilder<'a> {
    gateway: &'a ModelGateway,
    config: PyramidConfig,
    query: String,
    budget: PromptBudget,
    handler: &'a dyn EventHandler,
    pyramid: Pyramid,
}

impl<'a> PyramidBuilder<'a> {
    /// Fails with [`Error::InvalidConfiguration`] for bad window geometry and
    /// [`Error::EmptyDocument`] when there are no chunks. No calls are made.
    pub fn new(
        gateway: &'a ModelGateway,
        config: PyramidConfig,
        query: impl Into<String>,
        chunks: Vec<Chunk>,
    ) -> Result<Self> {
        config.validate()?;
        if chunks.is_empty() {
            return Err(Error::EmptyDocument);
        }
        let budget = PromptBudget {
            context_window: gateway.max_input_tokens(),
            tokens_per_selection: DEFAULT_TOKENS_PER_SELECTION,
            summary_token_limit: config.summary_token_limit,
        };
        Ok(Self {
            gateway,
            config,
            query: query.into(),
            budget,
            handler: &NoopHandler,
            pyramid: Pyramid {
                chunks,
                levels: Vec::new(),
            },
        })
    }

    /// Continue a pyramid from stored levels. Each stored level must match
    /// the window plan for the level below it.
    pub fn resume(
        gateway: &'a ModelGateway,
        config: PyramidConfig,
        query: impl Into<String>,
        chunks: Vec<Chunk>,
        levels: Vec<Level>,
    ) -> Result<Self> {
        let mut builder = Self::new(gateway, config, query, chunks)?;
        for level in levels {
            builder.check_stored(&level)?;
            builder.pyramid.levels.push(level);
        }
        Ok(builder)
    }

    pub fn with_event_handler(mut self, handler: &'a dyn EventHandler) -> Self {
        self.handler = handler;
        self
    }

    /// Selection size quoted to the model in the system prompt.
    pub fn with_selection_tokens(mut self, tokens: usize) -> Self {
        self.budget.tokens_per_selection = tokens;
        self
    }

    pub fn state(&self) -> PyramidState {
        if self.pyramid.is_complete() {
            PyramidState::Complete
        } else {
            PyramidState::NeedsLevel(self.pyramid.depth() + 1)
        }
    }

    pub fn pyramid(&self) -> &Pyramid {
        &self.pyramid
    }

    pub fn into_pyramid(self) -> Pyramid {
        self.pyramid
    }

    /// Build the next level. A failure leaves the pyramid unchanged.
    pub async fn step(&mut self) -> Result<PyramidState> {
        let level = match self.state() {
            PyramidState::Complete => return Ok(PyramidState::Complete),
            PyramidState::NeedsLevel(level) => level,
        };

        match self.build_level(level).await {
            Ok(built) => {
                self.handler.on_event(&ReduceEvent::LevelCompleted {
                    level,
                    summaries: built.len(),
                });
                self.pyramid.levels.push(built);
                Ok(self.state())
            }
            Err(err) => {
                if let Some(step) = err.failed_step() {
                    self.handler
                        .on_event(&ReduceEvent::StepFailed { step, error: &err });
                }
                Err(err)
            }
        }
    }

    /// Build levels until one summary remains.
    pub async fn run(&mut self) -> Result<&Pyramid> {
        while let PyramidState::NeedsLevel(_) = self.step().await? {}
        Ok(&self.pyramid)
    }

    /// `(chunk span, text)` for every unit of the level below `level`.
    fn units_below(&self, level: usize) -> Vec<(Window, &str)> {
        match level.checked_sub(2).and_then(|i| self.pyramid.levels.get(i)) {
            Some(below) => below
                .summaries
                .iter()
                .map(|s| (s.chunk_span, s.text.as_str()))
                .collect(),
            None => self
                .pyramid
                .chunks
                .iter()
                .map(|c| (Window::new(c.index, c.index + 1), c.text.as_str()))
                .collect(),
        }
    }

    async fn build_level(&self, level: usize) -> Result<Level> {
        let units = self.units_below(level);
        let windows = plan_windows(units.len(), self.config.windows_for_level(level))?;
        self.handler.on_event(&ReduceEvent::LevelStarted {
            level,
            input_units: units.len(),
            windows: windows.len(),
        });

        let system = prompt::pyramid_system(&self.budget);
        let total_chunks = self.pyramid.chunks.len();
        let max_tokens = output_limit(self.config.summary_token_limit);
        let units = &units;
        let system = &system;

        let summaries: Vec<Summary> = stream::iter(windows.into_iter().enumerate())
            .map(|(index, span)| async move {
                let members = &units[span.range()];
                let chunk_span = Window::new(
                    members.first().map_or(0, |(c, _)| c.start),
                    members.last().map_or(0, |(c, _)| c.end),
                );
                let user = if level == 1 {
                    let content: String = members.iter().map(|(_, text)| *text).collect();
                    prompt::pyramid_base(&self.query, total_chunks, chunk_span, &content)
                } else {
                    prompt::pyramid_level(
                        &self.query,
                        total_chunks,
                        level,
                        span,
                        units.len(),
                        chunk_span,
                        members,
                    )
                };

                let text = self
                    .gateway
                    .complete(&Prompt::new(system.as_str(), user), max_tokens)
                    .await
                    .map_err(|e| {
                        Error::reduction(ReductionStep::Pyramid { level, window: index }, e)
                    })?;

                self.handler.on_event(&ReduceEvent::WindowSummarized {
                    level,
                    window: index,
                    span,
                    chunk_span,
                    chars: text.len(),
                });
                Ok::<_, Error>(Summary {
                    level,
                    index,
                    span,
                    chunk_span,
                    source_unit_count: span.len(),
                    text,
                })
            })
            .buffered(self.config.concurrency)
            .try_collect()
            .await?;

        Ok(Level {
            number: level,
            summaries,
        })
    }

    fn check_stored(&self, level: &Level) -> Result<()> {
        let expected = match self.state() {
            PyramidState::Complete => {
                return Err(Error::invalid_config(format!(
                    "stored level {} lies above a complete pyramid",
                    level.number
                )));
            }
            PyramidState::NeedsLevel(n) => n,
        };
        if level.number != expected {
            return Err(Error::invalid_config(format!(
                "stored level {} found where level {expected} was expected",
                level.number
            )));
        }
        let units = self.units_below(expected);
        let windows = plan_windows(units.len(), self.config.windows_for_level(expected))?;
        let matches = windows.len() == level.summaries.len()
            && windows
                .iter()
                .zip(&level.summaries)
                .all(|(w, s)| *w == s.span && s.level == expected);
        if !matches {
            return Err(Error::invalid_config(format!(
                "stored level {expected} does not match the window plan ({} windows expected)",
                windows.len()
            )));
        }
        Ok(())
    }
}
