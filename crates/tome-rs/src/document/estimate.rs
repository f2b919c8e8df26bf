//! Approximate token counting.
//!
//! Sizes are estimated from whitespace-delimited words rather than a real
//! sub-word tokenizer. The same estimator is shared by the chunker, the
//! gateway's prompt-size guard and the rollup budget so that all three agree
//! on what "fits".

/// Default tokens per word. English prose averages about 1.3 sub-word tokens
/// per word; 1.5 leaves headroom for punctuation and markup.
pub const DEFAULT_TOKENS_PER_WORD: f64 = 1.5;

/// Word-based token estimator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TokenEstimator {
    tokens_per_word: f64,
}

impl Default for TokenEstimator {
    fn default() -> Self {
        Self {
            tokens_per_word: DEFAULT_TOKENS_PER_WORD,
        }
    }
}

impl TokenEstimator {
    /// Create an estimator with a custom ratio. Non-finite or non-positive
    /// ratios fall back to [`DEFAULT_TOKENS_PER_WORD`].
    pub fn new(tokens_per_word: f64) -> Self {
        if tokens_per_word.is_finite() && tokens_per_word > 0.0 {
            Self { tokens_per_word }
        } else {
            Self::default()
        }
    }

    pub fn tokens_per_word(&self) -> f64 {
        self.tokens_per_word
    }

    /// Estimated tokens for `words` whitespace-delimited words.
    pub fn for_words(&self, words: usize) -> usize {
        (words as f64 * self.tokens_per_word).floor() as usize
    }

    /// Estimated tokens for a piece of text.
    pub fn estimate(&self, text: &str) -> usize {
        self.for_words(text.split_whitespace().count())
    }

    /// Estimated tokens for several pieces of text sent together.
    pub fn estimate_all<'a>(&self, parts: impl IntoIterator<Item = &'a str>) -> usize {
        let words = parts
            .into_iter()
            .map(|p| p.split_whitespace().count())
            .sum();
        self.for_words(words)
    }
}
