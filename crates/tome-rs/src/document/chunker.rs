//! Splitting a document into budgeted chunks.
//!
//! The atomic unit is a word together with the whitespace that follows it
//! (leading whitespace belongs to the first word). Chunks are runs of whole
//! units, so concatenating every chunk's text in index order reproduces the
//! document byte for byte.

use serde::{Deserialize, Serialize};

use crate::document::estimate::TokenEstimator;
use crate::error::{Error, Result};

/// One contiguous slice of the document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Position in the chunk sequence, contiguous from 0.
    pub index: usize,
    /// Byte offset of the chunk's first character in the document.
    pub start: usize,
    pub text: String,
    pub approx_token_count: usize,
}

/// A word plus its trailing whitespace, as a byte range.
#[derive(Debug, Clone, Copy)]
struct Unit {
    start: usize,
    end: usize,
    /// The trailing whitespace contains a blank line.
    paragraph_break: bool,
}

/// Splits documents into chunks whose estimated size stays within a budget.
///
/// ```
/// use tome_rs::document::Chunker;
///
/// let chunks = Chunker::new().chunk("alpha beta gamma delta", 3).unwrap();
/// assert_eq!(chunks.len(), 2);
/// assert_eq!(chunks[0].text, "alpha beta ");
/// assert_eq!(chunks[1].text, "gamma delta");
/// ```
#[derive(Debug, Clone)]
pub struct Chunker {
    estimator: TokenEstimator,
    paragraph_aware: bool,
}

impl Default for Chunker {
    fn default() -> Self {
        Self::new()
    }
}

impl Chunker {
    pub fn new() -> Self {
        Self {
            estimator: TokenEstimator::default(),
            paragraph_aware: true,
        }
    }

    pub fn with_estimator(mut self, estimator: TokenEstimator) -> Self {
        self.estimator = estimator;
        self
    }

    /// When enabled, a full chunk is cut back to the last blank line in its
    /// second half, if there is one.
    pub fn with_paragraph_aware(mut self, enabled: bool) -> Self {
        self.paragraph_aware = enabled;
        self
    }

    pub fn estimator(&self) -> &TokenEstimator {
        &self.estimator
    }

    /// Split `document` into chunks of at most `tokens_per_chunk` estimated
    /// tokens each. A single word is never split, even when its own estimate
    /// exceeds the budget.
    pub fn chunk(&self, document: &str, tokens_per_chunk: usize) -> Result<Vec<Chunk>> {
        if tokens_per_chunk == 0 {
            return Err(Error::invalid_config("tokens_per_chunk must be greater than 0"));
        }
        let units = split_units(document);
        if units.is_empty() {
            return Err(Error::EmptyDocument);
        }

        let max_words = self.max_words(tokens_per_chunk);
        let mut chunks = Vec::new();
        let mut first = 0;

        while first < units.len() {
            let mut end = (first + max_words).min(units.len());
            if self.paragraph_aware && end < units.len() {
                end = paragraph_cut(&units, first, end);
            }

            let start = units[first].start;
            let stop = units[end - 1].end;
            #[allow(clippy::string_slice)] // unit bounds come from char_indices
            let text = document[start..stop].to_string();
            chunks.push(Chunk {
                index: chunks.len(),
                start,
                approx_token_count: self.estimator.for_words(end - first),
                text,
            });
            first = end;
        }

        Ok(chunks)
    }

    /// Largest word count whose estimate fits `budget`, never less than one.
    fn max_words(&self, budget: usize) -> usize {
        let ratio = self.estimator.tokens_per_word();
        let mut words = ((budget as f64 + 1.0) / ratio).ceil().max(1.0) as usize;
        while words > 1 && self.estimator.for_words(words) > budget {
            words -= 1;
        }
        while self.estimator.for_words(words + 1) <= budget {
            words += 1;
        }
        words
    }
}

/// Chunk `document` with the default [`Chunker`].
pub fn chunk(document: &str, tokens_per_chunk: usize) -> Result<Vec<Chunk>> {
    Chunker::new().chunk(document, tokens_per_chunk)
}

/// Move `end` back to just after the last paragraph break in the second half
/// of `units[first..end]`. Returns `end` unchanged when there is none.
fn paragraph_cut(units: &[Unit], first: usize, end: usize) -> usize {
    let half = first + (end - first).div_ceil(2);
    (half..end)
        .rev()
        .find(|&cut| units[cut - 1].paragraph_break)
        .unwrap_or(end)
}

fn split_units(document: &str) -> Vec<Unit> {
    let mut word_starts = Vec::new();
    let mut prev_ws = true;
    for (idx, ch) in document.char_indices() {
        let ws = ch.is_whitespace();
        if !ws && prev_ws {
            word_starts.push(idx);
        }
        prev_ws = ws;
    }

    let mut units = Vec::with_capacity(word_starts.len());
    for (i, &word_start) in word_starts.iter().enumerate() {
        let start = if i == 0 { 0 } else { word_start };
        let end = word_starts.get(i + 1).copied().unwrap_or(document.len());
        #[allow(clippy::string_slice)] // word starts come from char_indices
        let newlines = document[word_start..end]
            .chars()
            .skip_while(|c| !c.is_whitespace())
            .filter(|&c| c == '\n')
            .count();
        units.push(Unit {
            start,
            end,
            paragraph_break: newlines >= 2,
        });
    }
    units
}
