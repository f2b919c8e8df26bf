//! Shared stub backend for the pipeline integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tome_rs::api::{CompletionBackend, CompletionFuture, ModelGateway, Prompt, RetryConfig};
use tome_rs::config::ChunkingConfig;
use tome_rs::error::{BackendError, BackendErrorKind};

/// Answers every prompt with a deterministic digest. Prompts containing
/// `fail_on` are rejected with a non-retryable error.
pub struct StubBackend {
    pub calls: AtomicUsize,
    pub prompts: Mutex<Vec<String>>,
    pub systems: Mutex<Vec<String>>,
    fail_on: Option<&'static str>,
}

impl StubBackend {
    pub fn new() -> Arc<Self> {
        Self::failing_on(None)
    }

    pub fn failing_on(marker: Option<&'static str>) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
            systems: Mutex::new(Vec::new()),
            fail_on: marker,
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl CompletionBackend for StubBackend {
    fn name(&self) -> &str {
        "stub"
    }

    fn complete<'a>(&'a self, prompt: &'a Prompt, _: u32) -> CompletionFuture<'a> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.user.clone());
        self.systems.lock().unwrap().push(prompt.system.clone());
        let result = match self.fail_on {
            Some(marker) if prompt.user.contains(marker) => Err(BackendError::new(
                BackendErrorKind::BadRequest(400),
                "stub rejection",
            )),
            _ => Ok(format!(
                "digest of {} words",
                prompt.user.split_whitespace().count()
            )),
        };
        Box::pin(async move { result })
    }
}

pub fn gateway(backend: Arc<StubBackend>) -> ModelGateway {
    ModelGateway::new(backend).with_retry(RetryConfig::none())
}

/// `words` distinct words on one line.
pub fn document(words: usize) -> String {
    (0..words)
        .map(|i| format!("w{i:04}"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// 15-token chunks: ten words each at the default estimate.
pub fn chunking() -> ChunkingConfig {
    ChunkingConfig::default().with_tokens_per_chunk(15)
}
