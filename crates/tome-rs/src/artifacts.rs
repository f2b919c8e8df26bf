//! Persisting reduction artifacts.
//!
//! Reducers and the pipeline describe *what* to store with an [`ArtifactKey`]
//! (level/window indices, stage numbers); an [`ArtifactSink`] decides where
//! and how. [`DirectorySink`] lays artifacts out on disk:
//!
//! ```text
//! output_dir/
//! ├── level_1/window_000_chunks_1-5.txt
//! ├── level_1/window_001_chunks_5-9.txt
//! ├── level_2/window_000_chunks_1-17.txt
//! ├── summaries/summary_stage_3_of_10.txt
//! ├── pyramid_metadata.json | rollup_metadata.json
//! ├── checkpoint.json
//! ├── final_summary.txt
//! └── final_answer.txt
//! ```
//!
//! [`MemorySink`] keeps everything in a map for tests and embedding.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::WindowConfig;
use crate::document::Chunk;
use crate::error::Result;
use crate::reduce::pyramid::{Level, Pyramid};
use crate::reduce::rollup::{Rollup, RunningSummary};
use crate::reduce::window::Window;

// ── Keys ────────────────────────────────────────────────────────────

/// Identifies one artifact. Carries indices only; naming is the sink's job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ArtifactKey {
    PyramidSummary {
        level: usize,
        window: usize,
        chunk_span: Window,
    },
    PyramidMetadata,
    RollupStage {
        stage: usize,
        total: usize,
    },
    RollupMetadata,
    /// Serialized levels or stages, enough to resume a reduction.
    Checkpoint,
    FinalSummary,
    FinalAnswer,
}

/// Destination for artifacts.
pub trait ArtifactSink: Send + Sync {
    fn put(&self, key: &ArtifactKey, body: &str) -> Result<()>;
}

// ── Directory sink ──────────────────────────────────────────────────

/// Writes each artifact to its own file under a root directory.
#[derive(Debug, Clone)]
pub struct DirectorySink {
    root: PathBuf,
}

impl DirectorySink {
    /// Create the root directory if needed.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Remove every file and directory under the root.
    pub fn clear(&self) -> Result<()> {
        for entry in std::fs::read_dir(&self.root)? {
            let path = entry?.path();
            if path.is_dir() {
                std::fs::remove_dir_all(&path)?;
            } else {
                std::fs::remove_file(&path)?;
            }
        }
        Ok(())
    }

    /// Path of `key` relative to the root.
    pub fn relative_path(key: &ArtifactKey) -> PathBuf {
        match key {
            ArtifactKey::PyramidSummary {
                level,
                window,
                chunk_span,
            } => PathBuf::from(format!("level_{level}"))
                .join(format!("window_{window:03}_chunks_{chunk_span}.txt")),
            ArtifactKey::PyramidMetadata => PathBuf::from("pyramid_metadata.json"),
            ArtifactKey::RollupStage { stage, total } => PathBuf::from("summaries")
                .join(format!("summary_stage_{stage}_of_{total}.txt")),
            ArtifactKey::RollupMetadata => PathBuf::from("rollup_metadata.json"),
            ArtifactKey::Checkpoint => PathBuf::from("checkpoint.json"),
            ArtifactKey::FinalSummary => PathBuf::from("final_summary.txt"),
            ArtifactKey::FinalAnswer => PathBuf::from("final_answer.txt"),
        }
    }

    pub fn path_for(&self, key: &ArtifactKey) -> PathBuf {
        self.root.join(Self::relative_path(key))
    }

    /// Read and deserialize a JSON artifact. `None` if it was never written.
    pub fn load_json<T: DeserializeOwned>(&self, key: &ArtifactKey) -> Result<Option<T>> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(None);
        }
        let json = std::fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&json)?))
    }
}

impl ArtifactSink for DirectorySink {
    /// Atomic write: temp file next to the target, then rename into place.
    fn put(&self, key: &ArtifactKey, body: &str) -> Result<()> {
        let final_path = self.path_for(key);
        let dir = final_path.parent().unwrap_or(&self.root);
        std::fs::create_dir_all(dir)?;

        let name = final_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let tmp_path = dir.join(format!(".{name}.tmp"));
        std::fs::write(&tmp_path, body)?;
        std::fs::rename(&tmp_path, &final_path)?;
        Ok(())
    }
}

// ── Memory sink ─────────────────────────────────────────────────────

/// Keeps artifacts in memory, ordered by key.
#[derive(Debug, Default)]
pub struct MemorySink {
    entries: Mutex<BTreeMap<ArtifactKey, String>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &ArtifactKey) -> Option<String> {
        self.lock().get(key).cloned()
    }

    pub fn keys(&self) -> Vec<ArtifactKey> {
        self.lock().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<ArtifactKey, String>> {
        // A poisoned map is still a valid map.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl ArtifactSink for MemorySink {
    fn put(&self, key: &ArtifactKey, body: &str) -> Result<()> {
        self.lock().insert(key.clone(), body.to_string());
        Ok(())
    }
}

// ── Metadata records ────────────────────────────────────────────────

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Complete,
    Failed,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct WindowRecord {
    pub window: usize,
    pub span: Window,
    pub chunk_span: Window,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct LevelRecord {
    pub level: usize,
    pub windows: Vec<WindowRecord>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PyramidMetadata {
    pub document: String,
    pub query: String,
    pub tokens_per_chunk: usize,
    pub base_windows: WindowConfig,
    pub upper_windows: WindowConfig,
    pub total_chunks: usize,
    pub level_count: usize,
    /// Summaries per level, level 1 first.
    pub windows_per_level: Vec<usize>,
    pub levels: Vec<LevelRecord>,
    pub status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl PyramidMetadata {
    pub fn describe(
        pyramid: &Pyramid,
        document: &str,
        query: &str,
        tokens_per_chunk: usize,
        windows: (WindowConfig, WindowConfig),
        error: Option<String>,
    ) -> Self {
        let levels: Vec<LevelRecord> = pyramid
            .levels
            .iter()
            .map(|level| LevelRecord {
                level: level.number,
                windows: level
                    .summaries
                    .iter()
                    .map(|s| WindowRecord {
                        window: s.index,
                        span: s.span,
                        chunk_span: s.chunk_span,
                    })
                    .collect(),
            })
            .collect();
        Self {
            document: document.to_string(),
            query: query.to_string(),
            tokens_per_chunk,
            base_windows: windows.0,
            upper_windows: windows.1,
            total_chunks: pyramid.chunks.len(),
            level_count: pyramid.depth(),
            windows_per_level: pyramid.levels.iter().map(Level::len).collect(),
            levels,
            status: if error.is_none() && pyramid.is_complete() {
                RunStatus::Complete
            } else {
                RunStatus::Failed
            },
            error,
            created_at: Utc::now(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RollupMetadata {
    pub document: String,
    pub query: String,
    pub tokens_per_chunk: usize,
    pub context_window: usize,
    pub summary_token_limit: usize,
    pub answer_token_limit: usize,
    pub total_chunks: usize,
    pub stage_count: usize,
    pub status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

// ── Checkpoint ──────────────────────────────────────────────────────

/// What a checkpoint was made from. A run may only resume a checkpoint whose
/// identity matches its own.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RunIdentity {
    pub query: String,
    pub tokens_per_chunk: usize,
    pub chunk_count: usize,
    /// Lowercase hex SHA-256 over the chunk texts in order.
    pub document_digest: String,
}

impl RunIdentity {
    pub fn new(query: &str, tokens_per_chunk: usize, chunks: &[Chunk]) -> Self {
        Self {
            query: query.to_string(),
            tokens_per_chunk,
            chunk_count: chunks.len(),
            document_digest: document_digest(chunks),
        }
    }

    /// The first field that differs from `other`, described for an error.
    pub fn mismatch(&self, other: &Self) -> Option<String> {
        if self.query != other.query {
            Some(format!(
                "checkpoint was made for query {:?}, not {:?}",
                self.query, other.query
            ))
        } else if self.tokens_per_chunk != other.tokens_per_chunk
            || self.chunk_count != other.chunk_count
        {
            Some(format!(
                "checkpoint was made with {} chunks of {} tokens; this run has {} chunks of {} tokens",
                self.chunk_count, self.tokens_per_chunk, other.chunk_count, other.tokens_per_chunk
            ))
        } else if self.document_digest != other.document_digest {
            Some("checkpoint was made from a different document".to_string())
        } else {
            None
        }
    }
}

/// SHA-256 over each chunk's text, each followed by a NUL separator.
pub fn document_digest(chunks: &[Chunk]) -> String {
    let mut hasher = Sha256::new();
    for chunk in chunks {
        hasher.update(chunk.text.as_bytes());
        hasher.update([0u8]);
    }
    format!("{:x}", hasher.finalize())
}

/// Completed work, stored so a failed run can continue where it stopped.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum Checkpoint {
    Pyramid {
        run: RunIdentity,
        levels: Vec<Level>,
    },
    Rollup {
        run: RunIdentity,
        stages: Vec<RunningSummary>,
    },
}

impl Checkpoint {
    pub fn run(&self) -> &RunIdentity {
        match self {
            Self::Pyramid { run, .. } | Self::Rollup { run, .. } => run,
        }
    }
}

// ── Writers ─────────────────────────────────────────────────────────

/// Store every summary of every built level, plus the top summary when the
/// pyramid is complete.
pub fn persist_pyramid(sink: &dyn ArtifactSink, pyramid: &Pyramid) -> Result<()> {
    for level in &pyramid.levels {
        for summary in &level.summaries {
            let key = ArtifactKey::PyramidSummary {
                level: level.number,
                window: summary.index,
                chunk_span: summary.chunk_span,
            };
            sink.put(&key, &summary.text)?;
        }
    }
    if let Some(top) = pyramid.top() {
        sink.put(&ArtifactKey::FinalSummary, &top.text)?;
    }
    Ok(())
}

/// Store every completed stage, plus the final summary when all chunks are in.
pub fn persist_rollup(sink: &dyn ArtifactSink, rollup: &Rollup) -> Result<()> {
    let total = rollup.chunks.len();
    for stage in &rollup.stages {
        let key = ArtifactKey::RollupStage {
            stage: stage.stage,
            total,
        };
        sink.put(&key, &stage.text)?;
    }
    if let Some(last) = rollup.final_summary() {
        sink.put(&ArtifactKey::FinalSummary, &last.text)?;
    }
    Ok(())
}

/// Serialize `value` as pretty JSON into a `dyn` sink.
pub fn put_json(sink: &dyn ArtifactSink, key: &ArtifactKey, value: &impl Serialize) -> Result<()> {
    sink.put(key, &serde_json::to_string_pretty(value)?)
}
