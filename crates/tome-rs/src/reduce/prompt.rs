//! Prompt rendering for both reduction strategies and the final answer.
//!
//! Every function here is pure: named parameters in, prompt text out. The
//! reducers own the decision of *what* to send; this module only decides how
//! it reads. Content blocks are wrapped in upper-case tags so the model can
//! tell instructions from document text.

use std::fmt::Write as _;

use crate::reduce::window::Window;

/// The numbers a system prompt tells the model about its working budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PromptBudget {
    pub context_window: usize,
    pub tokens_per_selection: usize,
    pub summary_token_limit: usize,
}

// ── Builder ─────────────────────────────────────────────────────────

/// Assembles a prompt from a preamble and `## `-headed sections.
///
/// Sections with empty content are skipped. Sections are joined with blank
/// lines.
///
/// ```
/// use tome_rs::reduce::prompt::PromptBuilder;
///
/// let prompt = PromptBuilder::new("Summarize.")
///     .section("Query", "Who is the narrator?")
///     .section("Notes", "")
///     .build();
/// assert!(prompt.contains("## Query\n\nWho is the narrator?"));
/// assert!(!prompt.contains("## Notes"));
/// ```
pub struct PromptBuilder {
    sections: Vec<String>,
}

impl PromptBuilder {
    pub fn new(preamble: impl Into<String>) -> Self {
        Self {
            sections: vec![preamble.into()],
        }
    }

    pub fn section(mut self, heading: &str, content: impl Into<String>) -> Self {
        let content = content.into();
        if !content.is_empty() {
            self.sections.push(format!("## {heading}\n\n{content}"));
        }
        self
    }

    /// Append a section whose body is wrapped in `<TAG>` / `</TAG>`.
    pub fn tagged(mut self, heading: &str, tag: &str, body: &str) -> Self {
        self.sections
            .push(format!("## {heading}\n\n<{tag}>\n{body}\n</{tag}>"));
        self
    }

    /// Append raw text with no heading.
    pub fn raw(mut self, text: impl Into<String>) -> Self {
        let text = text.into();
        if !text.is_empty() {
            self.sections.push(text);
        }
        self
    }

    pub fn build(self) -> String {
        self.sections.join("\n\n")
    }
}

// ── Pyramid ─────────────────────────────────────────────────────────

pub fn pyramid_system(budget: &PromptBudget) -> String {
    PromptBuilder::new(
        "You help answer a question about a document that is too long to read at once. \
         The document has been split into numbered chunks. Overlapping groups of chunks \
         are summarized, then groups of those summaries are summarized again, level by \
         level, until a single summary covers the whole document. That final summary is \
         the only thing used to answer the question.",
    )
    .section(
        "Working limits",
        format!(
            "- Model context window: {} tokens\n\
             - Each selection you receive: about {} tokens\n\
             - Each summary you write: at most {} tokens",
            budget.context_window, budget.tokens_per_selection, budget.summary_token_limit
        ),
    )
    .section(
        "How to summarize",
        "- Keep everything that could help answer the user's question: facts, names, \
         numbers, quotes, and where in the document they appear.\n\
         - Drop material that is irrelevant to the question.\n\
         - Say explicitly when a selection contains nothing relevant.\n\
         - Never invent content that is not in the text you were given.",
    )
    .build()
}

/// Level-1 prompt over a window of raw chunks.
pub fn pyramid_base(query: &str, total_chunks: usize, chunk_span: Window, content: &str) -> String {
    PromptBuilder::new(format!(
        "Summarize chunks {chunk_span} of {total_chunks} with the user's question in mind."
    ))
    .tagged("User question", "USER_QUERY", query)
    .tagged("Document content", "CHUNK_CONTENT", content)
    .build()
}

/// Prompt for level 2 and up: a window of summaries from the level below.
///
/// `summaries` pairs each summary's chunk span with its text.
pub fn pyramid_level(
    query: &str,
    total_chunks: usize,
    level: usize,
    span: Window,
    total_units: usize,
    chunk_span: Window,
    summaries: &[(Window, &str)],
) -> String {
    let mut body = String::new();
    for (i, (chunks, text)) in summaries.iter().enumerate() {
        if i > 0 {
            body.push_str("\n\n");
        }
        let _ = write!(body, "<SUMMARY chunks=\"{chunks}\">\n{text}\n</SUMMARY>");
    }

    PromptBuilder::new(format!(
        "Combine summaries {span} of {total_units} from level {below} into one level-{level} \
         summary. Together they cover chunks {chunk_span} of {total_chunks}. Neighbouring \
         summaries overlap; merge repeated material instead of listing it twice.",
        below = level.saturating_sub(1),
    ))
    .tagged("User question", "USER_QUERY", query)
    .tagged("Summaries", "SUMMARIES", &body)
    .build()
}

// ── Rollup ──────────────────────────────────────────────────────────

pub fn rollup_system(budget: &PromptBudget) -> String {
    PromptBuilder::new(
        "You help answer a question about a document that is too long to read at once. \
         You read the document one section at a time, in order, and keep a single \
         running summary. After each section you rewrite the running summary so it \
         reflects everything read so far. The final running summary is the only thing \
         used to answer the question.",
    )
    .section(
        "Working limits",
        format!(
            "- Model context window: {} tokens\n\
             - Each section you receive: about {} tokens\n\
             - The running summary: at most {} tokens",
            budget.context_window, budget.tokens_per_selection, budget.summary_token_limit
        ),
    )
    .section(
        "How to update the summary",
        "- Keep everything that could help answer the user's question.\n\
         - When the summary grows too long, compress older detail before dropping it.\n\
         - Never invent content that is not in the text you were given.",
    )
    .build()
}

/// Stage-1 prompt: there is no running summary yet.
pub fn rollup_first(
    query: &str,
    total_chunks: usize,
    content: &str,
    summary_token_limit: usize,
) -> String {
    PromptBuilder::new(format!(
        "This is section 1 of {total_chunks}. Write the first running summary, at most \
         {summary_token_limit} tokens, with the user's question in mind."
    ))
    .tagged("User question", "USER_QUERY", query)
    .tagged("Section content", "CHUNK_CONTENT", content)
    .build()
}

/// Prompt for stage 2 and up.
pub fn rollup_update(
    query: &str,
    total_chunks: usize,
    stage: usize,
    current_summary: &str,
    content: &str,
    summary_token_limit: usize,
) -> String {
    PromptBuilder::new(format!(
        "This is section {stage} of {total_chunks}; sections 1-{previous} are already \
         reflected in the running summary. Rewrite the running summary so it also covers \
         this section, in at most {summary_token_limit} tokens.",
        previous = stage.saturating_sub(1),
    ))
    .tagged("User question", "USER_QUERY", query)
    .tagged("Running summary", "CURRENT_SUMMARY", current_summary)
    .tagged("New section", "CHUNK_CONTENT", content)
    .build()
}

// ── Answer ──────────────────────────────────────────────────────────

/// System prompt for the answer call.
pub fn answer_system(context_window: usize, answer_token_limit: usize) -> String {
    PromptBuilder::new(
        "You answer a question about a long document. You never see the document \
         itself, only a summary of it that was written with the question in mind.",
    )
    .section(
        "Working limits",
        format!(
            "- Model context window: {context_window} tokens\n\
             - Your answer: at most {answer_token_limit} tokens"
        ),
    )
    .section(
        "How to answer",
        "- Answer from the summary alone.\n\
         - Quote names, numbers and places as the summary gives them.\n\
         - If the summary leaves the question open, say so.",
    )
    .build()
}

/// Final answer prompt. `provenance` describes how the summary was produced,
/// e.g. `"4 summary levels"` or `"12 rollup stages"`.
pub fn answer(query: &str, total_chunks: Option<usize>, provenance: &str, summary: &str) -> String {
    let info = match total_chunks {
        Some(n) => format!("<DOCUMENT_INFO total_chunks=\"{n}\" reduction=\"{provenance}\"/>"),
        None => String::new(),
    };
    PromptBuilder::new(
        "Answer the user's question using the document summary below. The summary was \
         condensed from the full document with this question in mind. If the summary \
         does not contain enough information, say what is missing rather than guessing.",
    )
    .raw(info)
    .tagged("User question", "USER_QUERY", query)
    .tagged("Document summary", "FINAL_SUMMARY", summary)
    .build()
}
