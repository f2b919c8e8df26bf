//! Error taxonomy for document reduction.
//!
//! Configuration and sizing errors ([`Error::InvalidConfiguration`],
//! [`Error::EmptyDocument`], [`Error::PromptTooLarge`],
//! [`Error::ChunkExceedsContext`]) are raised before any backend call that
//! would violate them and are never retried. Backend failures are modelled
//! separately as [`BackendError`] so the retry policy can classify them as
//! transient or fatal; they only escape the gateway once retries are spent.

use std::fmt;
use thiserror::Error;

/// Result type alias using the crate error type.
pub type Result<T> = std::result::Result<T, Error>;

// ── Backend errors ──────────────────────────────────────────────────

/// Classification of a failed completion call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendErrorKind {
    /// HTTP 429 or an explicit provider rate-limit response.
    RateLimited,
    /// The call did not finish within the per-call timeout.
    Timeout,
    /// Connection refused/reset, DNS failure, broken pipe.
    Network,
    /// HTTP 5xx.
    Server(u16),
    /// HTTP 401/403.
    Auth,
    /// Any other HTTP 4xx.
    BadRequest(u16),
    /// The backend answered but the body was unusable.
    InvalidResponse,
}

impl fmt::Display for BackendErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RateLimited => write!(f, "rate limited"),
            Self::Timeout => write!(f, "timed out"),
            Self::Network => write!(f, "network error"),
            Self::Server(status) => write!(f, "server error (HTTP {status})"),
            Self::Auth => write!(f, "authentication failed"),
            Self::BadRequest(status) => write!(f, "bad request (HTTP {status})"),
            Self::InvalidResponse => write!(f, "invalid response"),
        }
    }
}

/// A single failed call to the text-generation backend.
#[derive(Debug, Clone, Error)]
#[error("{kind}: {message}")]
pub struct BackendError {
    pub kind: BackendErrorKind,
    pub message: String,
}

impl BackendError {
    pub fn new(kind: BackendErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Map an HTTP status code and response body onto a backend error.
    pub fn from_status(status: u16, body: impl Into<String>) -> Self {
        let kind = match status {
            429 => BackendErrorKind::RateLimited,
            401 | 403 => BackendErrorKind::Auth,
            408 => BackendErrorKind::Timeout,
            500..=599 => BackendErrorKind::Server(status),
            _ => BackendErrorKind::BadRequest(status),
        };
        Self::new(kind, body)
    }

    /// Whether retrying the same call could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.kind,
            BackendErrorKind::RateLimited
                | BackendErrorKind::Timeout
                | BackendErrorKind::Network
                | BackendErrorKind::Server(_)
        )
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            BackendErrorKind::Timeout
        } else if err.is_decode() {
            BackendErrorKind::InvalidResponse
        } else if let Some(status) = err.status() {
            return Self::from_status(status.as_u16(), err.to_string());
        } else {
            BackendErrorKind::Network
        };
        Self::new(kind, err.to_string())
    }
}

// ── Reduction step ──────────────────────────────────────────────────

/// Where in a reduction a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReductionStep {
    /// Window `window` (0-based) of pyramid level `level` (1-based).
    Pyramid { level: usize, window: usize },
    /// Rollup stage `stage` (1-based; stage *i* folds in chunk *i - 1*).
    Rollup { stage: usize },
}

impl fmt::Display for ReductionStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pyramid { level, window } => write!(f, "pyramid level {level}, window {window}"),
            Self::Rollup { stage } => write!(f, "rollup stage {stage}"),
        }
    }
}

// ── Crate error ─────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum Error {
    /// Bad parameters, caught before any backend call.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("document is empty")]
    EmptyDocument,

    /// An assembled prompt exceeds the backend's input limit.
    #[error("prompt too large: ~{estimated} tokens exceeds the input limit of {limit}")]
    PromptTooLarge { estimated: usize, limit: usize },

    /// A rollup stage cannot fit its running summary and next chunk.
    #[error(
        "chunk {chunk_index} does not fit the context window at stage {stage}: \
         ~{required} tokens needed, {context_window} available"
    )]
    ChunkExceedsContext {
        stage: usize,
        chunk_index: usize,
        required: usize,
        context_window: usize,
    },

    /// Transient backend failures persisted through every retry.
    #[error("backend unavailable after {attempts} attempt(s): {source}")]
    BackendUnavailable {
        attempts: u32,
        #[source]
        source: BackendError,
    },

    /// A fatal (non-retryable) backend failure.
    #[error("backend error: {0}")]
    Backend(#[source] BackendError),

    #[error("reduction failed at {step}: {source}")]
    ReductionFailed {
        step: ReductionStep,
        #[source]
        source: Box<Error>,
    },

    #[error("answer synthesis failed: {source}")]
    SynthesisFailed {
        #[source]
        source: Box<Error>,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfiguration(message.into())
    }

    pub(crate) fn reduction(step: ReductionStep, source: Error) -> Self {
        Self::ReductionFailed {
            step,
            source: Box::new(source),
        }
    }

    pub(crate) fn synthesis(source: Error) -> Self {
        Self::SynthesisFailed {
            source: Box::new(source),
        }
    }

    /// The reduction step that failed, if this is a [`Error::ReductionFailed`].
    pub fn failed_step(&self) -> Option<ReductionStep> {
        match self {
            Self::ReductionFailed { step, .. } => Some(*step),
            _ => None,
        }
    }

    /// Whether the error was raised before any backend work was attempted.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            Self::InvalidConfiguration(_)
                | Self::EmptyDocument
                | Self::PromptTooLarge { .. }
                | Self::ChunkExceedsContext { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_map_to_kinds() {
        assert_eq!(
            BackendError::from_status(429, "slow down").kind,
            BackendErrorKind::RateLimited
        );
        assert_eq!(
            BackendError::from_status(503, "").kind,
            BackendErrorKind::Server(503)
        );
        assert_eq!(BackendError::from_status(401, "").kind, BackendErrorKind::Auth);
        assert_eq!(
            BackendError::from_status(400, "").kind,
            BackendErrorKind::BadRequest(400)
        );
    }

    #[test]
    fn transient_classification() {
        assert!(BackendError::from_status(429, "").is_transient());
        assert!(BackendError::from_status(502, "").is_transient());
        assert!(BackendError::new(BackendErrorKind::Timeout, "t").is_transient());
        assert!(!BackendError::from_status(400, "").is_transient());
        assert!(!BackendError::from_status(403, "").is_transient());
        assert!(!BackendError::new(BackendErrorKind::InvalidResponse, "x").is_transient());
    }

    #[test]
    fn reduction_failure_names_the_step() {
        let err = Error::reduction(
            ReductionStep::Pyramid {
                level: 2,
                window: 1,
            },
            Error::BackendUnavailable {
                attempts: 3,
                source: BackendError::from_status(503, "overloaded"),
            },
        );
        let text = err.to_string();
        assert!(text.contains("pyramid level 2, window 1"), "{text}");
        assert!(text.contains("overloaded"), "{text}");
        assert_eq!(
            err.failed_step(),
            Some(ReductionStep::Pyramid {
                level: 2,
                window: 1
            })
        );
    }

    #[test]
    fn rollup_step_display() {
        let err = Error::reduction(
            ReductionStep::Rollup { stage: 4 },
            Error::Backend(BackendError::from_status(401, "bad key")),
        );
        assert!(err.to_string().contains("rollup stage 4"));
    }

    #[test]
    fn precondition_errors() {
        assert!(Error::EmptyDocument.is_precondition());
        assert!(Error::invalid_config("x").is_precondition());
        assert!(
            !Error::synthesis(Error::Backend(BackendError::from_status(400, ""))).is_precondition()
        );
    }
}
