//! Final answer from a condensed document.

use serde::{Deserialize, Serialize};

use crate::api::{ModelGateway, Prompt};
use crate::config::{AnswerConfig, output_limit};
use crate::error::{Error, Result};
use crate::reduce::events::{EventHandler, NoopHandler, ReduceEvent};
use crate::reduce::prompt;
use crate::reduce::pyramid::Pyramid;
use crate::reduce::rollup::Rollup;

/// The answer together with the text it was derived from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Answer {
    pub query: String,
    pub supporting_text: String,
    pub text: String,
}

/// How the condensed text was produced, quoted to the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentInfo {
    pub total_chunks: usize,
    pub provenance: String,
}

impl DocumentInfo {
    pub fn from_pyramid(pyramid: &Pyramid) -> Self {
        Self {
            total_chunks: pyramid.chunks.len(),
            provenance: format!("{} summary levels", pyramid.depth()),
        }
    }

    pub fn from_rollup(rollup: &Rollup) -> Self {
        Self {
            total_chunks: rollup.chunks.len(),
            provenance: format!("{} rollup stages", rollup.stages.len()),
        }
    }
}

/// Answers a query from a top pyramid summary or a final rollup summary.
pub struct AnswerSynthesizer<'a> {
    gateway: &'a ModelGateway,
    config: AnswerConfig,
    handler: &'a dyn EventHandler,
}

impl<'a> AnswerSynthesizer<'a> {
    pub fn new(gateway: &'a ModelGateway, config: AnswerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            gateway,
            config,
            handler: &NoopHandler,
        })
    }

    pub fn with_event_handler(mut self, handler: &'a dyn EventHandler) -> Self {
        self.handler = handler;
        self
    }

    pub async fn synthesize(&self, query: &str, condensed_text: &str) -> Result<Answer> {
        self.synthesize_with(query, condensed_text, None).await
    }

    /// Like [`synthesize`](Self::synthesize), telling the model how the
    /// condensed text was produced. Any gateway failure becomes
    /// [`Error::SynthesisFailed`].
    pub async fn synthesize_with(
        &self,
        query: &str,
        condensed_text: &str,
        info: Option<&DocumentInfo>,
    ) -> Result<Answer> {
        self.handler.on_event(&ReduceEvent::Synthesizing {
            summary_chars: condensed_text.len(),
        });
        let user = prompt::answer(
            query,
            info.map(|i| i.total_chunks),
            info.map_or("", |i| i.provenance.as_str()),
            condensed_text,
        );
        let system = prompt::answer_system(
            self.gateway.max_input_tokens(),
            self.config.answer_token_limit,
        );
        let text = self
            .gateway
            .complete(
                &Prompt::new(system, user),
                output_limit(self.config.answer_token_limit),
            )
            .await
            .map_err(Error::synthesis)?;

        self.handler
            .on_event(&ReduceEvent::Answered { chars: text.len() });
        Ok(Answer {
            query: query.to_string(),
            supporting_text: condensed_text.to_string(),
            text,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{CompletionBackend, CompletionFuture, RetryConfig};
    use crate::error::BackendError;
    use std::sync::{Arc, Mutex};

    struct Fixed(std::result::Result<&'static str, u16>);

    impl CompletionBackend for Fixed {
        fn complete<'a>(&'a self, _: &'a Prompt, _: u32) -> CompletionFuture<'a> {
            let result = self
                .0
                .map(str::to_string)
                .map_err(|status| BackendError::from_status(status, "nope"));
            Box::pin(async move { result })
        }
    }

    #[tokio::test]
    async fn answer_carries_query_and_support() {
        let gateway = ModelGateway::new(Arc::new(Fixed(Ok("forty-two"))));
        let synth = AnswerSynthesizer::new(&gateway, AnswerConfig::default()).unwrap();
        let answer = synth.synthesize("meaning?", "the summary").await.unwrap();
        assert_eq!(answer.query, "meaning?");
        assert_eq!(answer.supporting_text, "the summary");
        assert_eq!(answer.text, "forty-two");
    }

    #[tokio::test]
    async fn gateway_failure_becomes_synthesis_failed() {
        let gateway =
            ModelGateway::new(Arc::new(Fixed(Err(503)))).with_retry(RetryConfig::none());
        let synth = AnswerSynthesizer::new(&gateway, AnswerConfig::default()).unwrap();
        let err = synth.synthesize("q", "s").await.unwrap_err();
        match err {
            Error::SynthesisFailed { source } => {
                assert!(matches!(*source, Error::BackendUnavailable { .. }));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn zero_answer_limit_is_invalid() {
        let gateway = ModelGateway::new(Arc::new(Fixed(Ok(""))));
        assert!(matches!(
            AnswerSynthesizer::new(&gateway, AnswerConfig::new(0)),
            Err(Error::InvalidConfiguration(_))
        ));
    }

    #[derive(Default)]
    struct Capture(Mutex<Option<Prompt>>);

    impl CompletionBackend for Capture {
        fn complete<'a>(&'a self, prompt: &'a Prompt, _: u32) -> CompletionFuture<'a> {
            *self.0.lock().unwrap() = Some(prompt.clone());
            Box::pin(async { Ok("answer".to_string()) })
        }
    }

    #[tokio::test]
    async fn answer_call_sends_a_system_prompt() {
        let backend = Arc::new(Capture::default());
        let gateway = ModelGateway::new(backend.clone());
        let synth = AnswerSynthesizer::new(&gateway, AnswerConfig::new(1_500)).unwrap();
        synth.synthesize("who?", "the summary").await.unwrap();

        let sent = backend.0.lock().unwrap().clone().unwrap();
        assert!(sent.system.contains(&format!(
            "Model context window: {} tokens",
            gateway.max_input_tokens()
        )));
        assert!(sent.system.contains("at most 1500 tokens"));
        assert!(sent.user.contains("<USER_QUERY>\nwho?\n</USER_QUERY>"));
    }
}
