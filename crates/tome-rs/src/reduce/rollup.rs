//! Sequential reduction: one running summary, updated chunk by chunk.
//!
//! Stage *i* (1-based) sends the stage *i − 1* summary, chunk *i − 1* and the
//! query to the gateway and records the reply as a new [`RunningSummary`].
//! Stages are appended, never rewritten, so after a failure at stage *i* the
//! stages `1..i` remain valid. The backend keeps no state between calls; a
//! chain is [resumed](RollupBuilder::resume) by replaying the stored summary
//! text.
//!
//! Every stage must fit the model's context window together with the answer
//! call that eventually follows:
//!
//! ```text
//! est(running summary) + est(chunk) + prompt overhead <= context_window
//! ```
//!
//! Construction checks the worst case for every chunk (the running summary at
//! its cap) and fails with [`Error::ChunkExceedsContext`] before any call is
//! made; each stage checks again with the actual running summary.

use serde::{Deserialize, Serialize};

use crate::api::{ModelGateway, Prompt};
use crate::config::{RollupConfig, output_limit};
use crate::document::Chunk;
use crate::error::{Error, ReductionStep, Result};
use crate::reduce::events::{EventHandler, NoopHandler, ReduceEvent};
use crate::reduce::prompt::{self, PromptBudget};

/// Snapshot of the running summary after one stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunningSummary {
    pub stage: usize,
    pub text: String,
    pub chunks_incorporated: usize,
}

/// The chunk sequence plus every stage completed so far.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rollup {
    pub chunks: Vec<Chunk>,
    pub stages: Vec<RunningSummary>,
}

impl Rollup {
    pub fn is_complete(&self) -> bool {
        self.stages.len() == self.chunks.len()
    }

    /// The latest running summary.
    pub fn current(&self) -> Option<&RunningSummary> {
        self.stages.last()
    }

    /// The last stage's summary, once every chunk is folded in.
    pub fn final_summary(&self) -> Option<&RunningSummary> {
        if self.is_complete() {
            self.current()
        } else {
            None
        }
    }

    /// Stage `number` (1-based).
    pub fn stage(&self, number: usize) -> Option<&RunningSummary> {
        number.checked_sub(1).and_then(|i| self.stages.get(i))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollupState {
    /// The given stage (1-based) is the next one to run.
    NeedsStage(usize),
    Complete,
}

/// Folds chunks into a running summary, one stage per [`step`](Self::step).
pub struct RollupBuilder<'a> {
    gateway: &'a ModelGateway,
    config: RollupConfig,
    query: String,
    budget: PromptBudget,
    handler: &'a dyn EventHandler,
    /// Estimated tokens of everything in a stage prompt except summary and chunk.
    overhead: usize,
    rollup: Rollup,
}

impl<'a> RollupBuilder<'a> {
    /// Validates the configuration and checks that every chunk fits the
    /// context window next to a full-size running summary. No calls are made.
    pub fn new(
        gateway: &'a ModelGateway,
        config: RollupConfig,
        query: impl Into<String>,
        chunks: Vec<Chunk>,
    ) -> Result<Self> {
        config.validate()?;
        if chunks.is_empty() {
            return Err(Error::EmptyDocument);
        }
        let query = query.into();
        let budget = PromptBudget {
            context_window: config.context_window,
            tokens_per_selection: chunks
                .iter()
                .map(|c| c.approx_token_count)
                .max()
                .unwrap_or(0),
            summary_token_limit: config.summary_token_limit,
        };

        let total = chunks.len();
        let estimator = gateway.estimator();
        let system = prompt::rollup_system(&budget);
        let skeleton = prompt::rollup_update(&query, total, total, "", "", config.summary_token_limit);
        let overhead = estimator.estimate_all([system.as_str(), skeleton.as_str()]);

        for chunk in &chunks {
            let required = config
                .summary_token_limit
                .saturating_add(estimator.estimate(&chunk.text))
                .saturating_add(overhead);
            if required > config.context_window {
                return Err(Error::ChunkExceedsContext {
                    stage: chunk.index + 1,
                    chunk_index: chunk.index,
                    required,
                    context_window: config.context_window,
                });
            }
        }

        Ok(Self {
            gateway,
            config,
            query,
            budget,
            handler: &NoopHandler,
            overhead,
            rollup: Rollup {
                chunks,
                stages: Vec::new(),
            },
        })
    }

    /// Continue a chain from stored stages `1..=k`.
    pub fn resume(
        gateway: &'a ModelGateway,
        config: RollupConfig,
        query: impl Into<String>,
        chunks: Vec<Chunk>,
        stages: Vec<RunningSummary>,
    ) -> Result<Self> {
        let mut builder = Self::new(gateway, config, query, chunks)?;
        if stages.len() > builder.rollup.chunks.len() {
            return Err(Error::invalid_config(format!(
                "{} stored stages for {} chunks",
                stages.len(),
                builder.rollup.chunks.len()
            )));
        }
        for (i, stage) in stages.iter().enumerate() {
            if stage.stage != i + 1 || stage.chunks_incorporated != i + 1 {
                return Err(Error::invalid_config(format!(
                    "stored stage {} found where stage {} was expected",
                    stage.stage,
                    i + 1
                )));
            }
        }
        builder.rollup.stages = stages;
        Ok(builder)
    }

    pub fn with_event_handler(mut self, handler: &'a dyn EventHandler) -> Self {
        self.handler = handler;
        self
    }

    /// Section size quoted to the model in the system prompt. Defaults to the
    /// largest chunk estimate.
    pub fn with_selection_tokens(mut self, tokens: usize) -> Self {
        self.budget.tokens_per_selection = tokens;
        self
    }

    pub fn state(&self) -> RollupState {
        if self.rollup.is_complete() {
            RollupState::Complete
        } else {
            RollupState::NeedsStage(self.rollup.stages.len() + 1)
        }
    }

    pub fn rollup(&self) -> &Rollup {
        &self.rollup
    }

    pub fn into_rollup(self) -> Rollup {
        self.rollup
    }

    /// Estimated prompt overhead shared by every stage.
    pub fn prompt_overhead(&self) -> usize {
        self.overhead
    }

    /// Fold in the next chunk. A failure leaves earlier stages untouched.
    pub async fn step(&mut self) -> Result<RollupState> {
        let stage = match self.state() {
            RollupState::Complete => return Ok(RollupState::Complete),
            RollupState::NeedsStage(stage) => stage,
        };

        let result = self.fold(stage).await;
        let text = match result {
            Ok(text) => text,
            Err(err) => {
                let step = ReductionStep::Rollup { stage };
                self.handler
                    .on_event(&ReduceEvent::StepFailed { step, error: &err });
                return Err(err);
            }
        };

        let total = self.rollup.chunks.len();
        self.handler.on_event(&ReduceEvent::StageCompleted {
            stage,
            total,
            chars: text.len(),
        });
        self.rollup.stages.push(RunningSummary {
            stage,
            text,
            chunks_incorporated: stage,
        });
        Ok(self.state())
    }

    /// Fold in every remaining chunk.
    pub async fn run(&mut self) -> Result<&Rollup> {
        while let RollupState::NeedsStage(_) = self.step().await? {}
        Ok(&self.rollup)
    }

    async fn fold(&self, stage: usize) -> Result<String> {
        let total = self.rollup.chunks.len();
        let Some(chunk) = self.rollup.chunks.get(stage - 1) else {
            return Err(Error::invalid_config(format!("no chunk for stage {stage}")));
        };
        let current = self.rollup.current().map_or("", |s| s.text.as_str());

        let estimator = self.gateway.estimator();
        let required = estimator.estimate(current) + estimator.estimate(&chunk.text) + self.overhead;
        if required > self.config.context_window {
            return Err(Error::ChunkExceedsContext {
                stage,
                chunk_index: chunk.index,
                required,
                context_window: self.config.context_window,
            });
        }
        self.handler.on_event(&ReduceEvent::StageStarted {
            stage,
            total,
            estimated_tokens: required,
        });

        let limit = self.config.summary_token_limit;
        let user = if stage == 1 {
            prompt::rollup_first(&self.query, total, &chunk.text, limit)
        } else {
            prompt::rollup_update(&self.query, total, stage, current, &chunk.text, limit)
        };
        let prompt = Prompt::new(prompt::rollup_system(&self.budget), user);

        self.gateway
            .complete(&prompt, output_limit(limit))
            .await
            .map_err(|e| Error::reduction(ReductionStep::Rollup { stage }, e))
    }
}
