//! End-to-end orchestration: chunk → reduce → persist → answer.
//!
//! The pipeline validates every configuration value before chunking, runs the
//! chosen strategy, and always persists whatever the reduction produced, even
//! when it fails part way. Failed runs get a metadata record with status
//! `failed` and a checkpoint that [`Pipeline::with_checkpoint`] can resume
//! from. A failed answer call leaves all reduction artifacts in place.

use tracing::{info, warn};

use crate::api::ModelGateway;
use crate::artifacts::{
    ArtifactKey, ArtifactSink, Checkpoint, PyramidMetadata, RollupMetadata, RunIdentity,
    RunStatus, persist_pyramid, persist_rollup, put_json,
};
use crate::config::{AnswerConfig, ChunkingConfig, PyramidConfig, RollupConfig};
use crate::document::Chunk;
use crate::error::{Error, Result};
use crate::reduce::answer::{Answer, AnswerSynthesizer, DocumentInfo};
use crate::reduce::events::{EventHandler, NoopHandler, ReduceEvent};
use crate::reduce::pyramid::{Pyramid, PyramidBuilder};
use crate::reduce::rollup::{Rollup, RollupBuilder};

/// Which reduction to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Strategy {
    Pyramid(PyramidConfig),
    Rollup(RollupConfig),
}

impl Strategy {
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Pyramid(config) => config.validate(),
            Self::Rollup(config) => config.validate(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Pyramid(_) => "pyramid",
            Self::Rollup(_) => "rollup",
        }
    }
}

/// The document being reduced plus a label for metadata and logs.
#[derive(Debug, Clone, Copy)]
pub struct Source<'a> {
    pub label: &'a str,
    pub text: &'a str,
}

impl<'a> Source<'a> {
    pub fn new(label: &'a str, text: &'a str) -> Self {
        Self { label, text }
    }
}

/// A finished reduction of either kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reduction {
    Pyramid(Pyramid),
    Rollup(Rollup),
}

impl Reduction {
    pub fn chunks(&self) -> &[Chunk] {
        match self {
            Self::Pyramid(p) => &p.chunks,
            Self::Rollup(r) => &r.chunks,
        }
    }

    /// Text handed to the answer step.
    pub fn final_summary(&self) -> Option<&str> {
        match self {
            Self::Pyramid(p) => p.top().map(|s| s.text.as_str()),
            Self::Rollup(r) => r.final_summary().map(|s| s.text.as_str()),
        }
    }

    pub fn info(&self) -> DocumentInfo {
        match self {
            Self::Pyramid(p) => DocumentInfo::from_pyramid(p),
            Self::Rollup(r) => DocumentInfo::from_rollup(r),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub reduction: Reduction,
    pub answer: Answer,
}

/// Runs a full query over one document.
pub struct Pipeline<'a> {
    gateway: &'a ModelGateway,
    chunking: ChunkingConfig,
    answer: AnswerConfig,
    handler: &'a dyn EventHandler,
    checkpoint: Option<Checkpoint>,
}

impl<'a> Pipeline<'a> {
    pub fn new(gateway: &'a ModelGateway, chunking: ChunkingConfig, answer: AnswerConfig) -> Self {
        Self {
            gateway,
            chunking,
            answer,
            handler: &NoopHandler,
            checkpoint: None,
        }
    }

    pub fn with_event_handler(mut self, handler: &'a dyn EventHandler) -> Self {
        self.handler = handler;
        self
    }

    /// Resume from work stored by an earlier run.
    pub fn with_checkpoint(mut self, checkpoint: Checkpoint) -> Self {
        self.checkpoint = Some(checkpoint);
        self
    }

    /// Validate everything a run needs, before any chunking or backend call.
    pub fn validate(&self, strategy: &Strategy) -> Result<()> {
        self.chunking.validate()?;
        self.answer.validate()?;
        strategy.validate()?;
        match strategy {
            Strategy::Rollup(rollup)
                if self.answer.answer_token_limit > rollup.answer_token_limit =>
            {
                Err(Error::invalid_config(format!(
                    "answer_token_limit ({}) exceeds the rollup's answer reserve ({})",
                    self.answer.answer_token_limit, rollup.answer_token_limit
                )))
            }
            Strategy::Pyramid(pyramid)
                if pyramid
                    .base
                    .window_size
                    .checked_mul(self.chunking.tokens_per_chunk)
                    .is_none() =>
            {
                Err(Error::invalid_config(format!(
                    "window_size ({}) x tokens_per_chunk ({}) overflows",
                    pyramid.base.window_size, self.chunking.tokens_per_chunk
                )))
            }
            _ => Ok(()),
        }
    }

    pub async fn run(
        &self,
        source: Source<'_>,
        query: &str,
        strategy: &Strategy,
        sink: &dyn ArtifactSink,
    ) -> Result<PipelineOutput> {
        self.validate(strategy)?;
        if query.trim().is_empty() {
            return Err(Error::invalid_config("query must not be empty"));
        }

        let chunker = self.chunking.chunker(*self.gateway.estimator());
        let chunks = chunker.chunk(source.text, self.chunking.tokens_per_chunk)?;
        self.handler.on_event(&ReduceEvent::Chunked {
            chunks: chunks.len(),
            tokens_per_chunk: self.chunking.tokens_per_chunk,
        });
        info!(
            "Reducing {} ({} chunks) with the {} strategy",
            source.label,
            chunks.len(),
            strategy.name()
        );

        let reduction = match strategy {
            Strategy::Pyramid(config) => {
                Reduction::Pyramid(self.reduce_pyramid(source, query, config, chunks, sink).await?)
            }
            Strategy::Rollup(config) => {
                Reduction::Rollup(self.reduce_rollup(source, query, config, chunks, sink).await?)
            }
        };

        let Some(summary) = reduction.final_summary() else {
            return Err(Error::invalid_config("reduction finished without a summary"));
        };
        let answer = AnswerSynthesizer::new(self.gateway, self.answer.clone())?
            .with_event_handler(self.handler)
            .synthesize_with(query, summary, Some(&reduction.info()))
            .await?;
        sink.put(&ArtifactKey::FinalAnswer, &answer.text)?;

        Ok(PipelineOutput { reduction, answer })
    }

    async fn reduce_pyramid(
        &self,
        source: Source<'_>,
        query: &str,
        config: &PyramidConfig,
        chunks: Vec<Chunk>,
        sink: &dyn ArtifactSink,
    ) -> Result<Pyramid> {
        let selection = config
            .base
            .window_size
            .saturating_mul(self.chunking.tokens_per_chunk);
        if selection > self.chunking.tokens_per_selection {
            warn!(
                "A full window ({} chunks x {} tokens = {selection}) exceeds tokens_per_selection ({})",
                config.base.window_size,
                self.chunking.tokens_per_chunk,
                self.chunking.tokens_per_selection
            );
        }

        let mut builder = match self.stored(query, &chunks)? {
            Some(Checkpoint::Pyramid { levels, .. }) => {
                info!("Resuming pyramid from {} stored level(s)", levels.len());
                PyramidBuilder::resume(self.gateway, config.clone(), query, chunks, levels)?
            }
            Some(Checkpoint::Rollup { .. }) => {
                return Err(Error::invalid_config(
                    "checkpoint was written by a rollup run, not a pyramid run",
                ));
            }
            None => PyramidBuilder::new(self.gateway, config.clone(), query, chunks)?,
        }
        .with_event_handler(self.handler)
        .with_selection_tokens(self.chunking.tokens_per_selection);

        let outcome = builder.run().await.map(|_| ());
        let pyramid = builder.into_pyramid();

        let error = outcome.as_ref().err().map(ToString::to_string);
        let metadata = PyramidMetadata::describe(
            &pyramid,
            source.label,
            query,
            self.chunking.tokens_per_chunk,
            (config.base, config.upper),
            error,
        );
        let checkpoint = Checkpoint::Pyramid {
            run: RunIdentity::new(query, self.chunking.tokens_per_chunk, &pyramid.chunks),
            levels: pyramid.levels.clone(),
        };
        let persisted = persist_pyramid(sink, &pyramid)
            .and_then(|()| put_json(sink, &ArtifactKey::PyramidMetadata, &metadata))
            .and_then(|()| put_json(sink, &ArtifactKey::Checkpoint, &checkpoint));

        finish(outcome, persisted)?;
        Ok(pyramid)
    }

    async fn reduce_rollup(
        &self,
        source: Source<'_>,
        query: &str,
        config: &RollupConfig,
        chunks: Vec<Chunk>,
        sink: &dyn ArtifactSink,
    ) -> Result<Rollup> {
        let mut builder = match self.stored(query, &chunks)? {
            Some(Checkpoint::Rollup { stages, .. }) => {
                info!("Resuming rollup from {} stored stage(s)", stages.len());
                RollupBuilder::resume(self.gateway, config.clone(), query, chunks, stages)?
            }
            Some(Checkpoint::Pyramid { .. }) => {
                return Err(Error::invalid_config(
                    "checkpoint was written by a pyramid run, not a rollup run",
                ));
            }
            None => RollupBuilder::new(self.gateway, config.clone(), query, chunks)?,
        }
        .with_event_handler(self.handler)
        .with_selection_tokens(self.chunking.tokens_per_selection);

        let outcome = builder.run().await.map(|_| ());
        let rollup = builder.into_rollup();

        let metadata = RollupMetadata {
            document: source.label.to_string(),
            query: query.to_string(),
            tokens_per_chunk: self.chunking.tokens_per_chunk,
            context_window: config.context_window,
            summary_token_limit: config.summary_token_limit,
            answer_token_limit: config.answer_token_limit,
            total_chunks: rollup.chunks.len(),
            stage_count: rollup.stages.len(),
            status: if outcome.is_ok() && rollup.is_complete() {
                RunStatus::Complete
            } else {
                RunStatus::Failed
            },
            error: outcome.as_ref().err().map(ToString::to_string),
            created_at: chrono::Utc::now(),
        };
        let checkpoint = Checkpoint::Rollup {
            run: RunIdentity::new(query, self.chunking.tokens_per_chunk, &rollup.chunks),
            stages: rollup.stages.clone(),
        };
        let persisted = persist_rollup(sink, &rollup)
            .and_then(|()| put_json(sink, &ArtifactKey::RollupMetadata, &metadata))
            .and_then(|()| put_json(sink, &ArtifactKey::Checkpoint, &checkpoint));

        finish(outcome, persisted)?;
        Ok(rollup)
    }

    /// The configured checkpoint, if it was made for this query over the same
    /// chunks.
    fn stored(&self, query: &str, chunks: &[Chunk]) -> Result<Option<Checkpoint>> {
        let Some(checkpoint) = &self.checkpoint else {
            return Ok(None);
        };
        let current = RunIdentity::new(query, self.chunking.tokens_per_chunk, chunks);
        if let Some(reason) = checkpoint.run().mismatch(&current) {
            return Err(Error::invalid_config(reason));
        }
        Ok(Some(checkpoint.clone()))
    }
}

/// The reduction error wins over a persistence error; a persistence error on
/// a successful reduction is returned as is.
fn finish(outcome: Result<()>, persisted: Result<()>) -> Result<()> {
    match (outcome, persisted) {
        (Err(err), Err(persist_err)) => {
            warn!("Failed to persist partial results: {persist_err}");
            Err(err)
        }
        (Err(err), Ok(())) => Err(err),
        (Ok(()), persisted) => persisted,
    }
}
