//! Document preparation: token estimation and chunking.

pub mod chunker;
pub mod estimate;

pub use chunker::{Chunk, Chunker, chunk};
pub use estimate::{DEFAULT_TOKENS_PER_WORD, TokenEstimator};
