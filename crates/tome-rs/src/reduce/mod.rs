//! Reduction strategies and the answer step.
//!
//! Two interchangeable strategies turn a chunk sequence into one
//! query-focused summary:
//!
//! | Strategy | Shape | Calls for *N* chunks | Parallelism |
//! |----------|-------|----------------------|-------------|
//! | [`pyramid`] | overlapping windows, level by level | ≈ *N*/S + *N*/S² + … | windows within a level |
//! | [`rollup`] | one running summary, chunk by chunk | exactly *N* | none |
//!
//! Both are explicit state machines that append immutable snapshots (levels
//! or stages), so partial work survives a failure. [`answer`] turns the final
//! summary into an [`Answer`].

pub mod answer;
pub mod events;
pub mod prompt;
pub mod pyramid;
pub mod rollup;
pub mod window;

pub use answer::{Answer, AnswerSynthesizer, DocumentInfo};
pub use events::{
    CompositeEventHandler, EventHandler, FnEventHandler, LoggingHandler, NoopHandler, ReduceEvent,
};
pub use prompt::PromptBudget;
pub use pyramid::{Level, Pyramid, PyramidBuilder, PyramidState, Summary};
pub use rollup::{Rollup, RollupBuilder, RollupState, RunningSummary};
pub use window::{Window, plan_level_sizes, plan_windows};
