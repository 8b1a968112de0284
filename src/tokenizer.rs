//! Token counting used to stamp chunk spans and size embedding batches.
//!
//! Spans and the embedding budget are measured with the embedding model's own
//! vocabulary (`cl100k_base`) unless configured otherwise.

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use clap::ValueEnum;
use tiktoken_rs::CoreBPE;
use unicode_segmentation::UnicodeSegmentation;

/// Counts tokens in a piece of text. Implementations must be deterministic: the
/// same text always yields the same count.
pub trait TokenCounter: Send + Sync {
    /// Number of tokens `text` encodes to.
    fn count(&self, text: &str) -> Result<usize>;
}

/// Which counter the binaries build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum TokenizerKind {
    /// OpenAI `cl100k_base` BPE, the vocabulary of the `text-embedding-3` models.
    #[default]
    Cl100k,
    /// Hugging Face `tokenizer.json` given by `--tokenizer-file`.
    Hf,
    /// Unicode word segments; offline approximation for tests and dry runs.
    Words,
}

/// `cl100k_base` BPE counter.
pub struct TiktokenCounter {
    bpe: CoreBPE,
}

impl TiktokenCounter {
    /// Loads the bundled `cl100k_base` ranks.
    pub fn cl100k() -> Result<Self> {
        let bpe = tiktoken_rs::cl100k_base()
            .map_err(|err| anyhow!("failed to initialize cl100k_base tokenizer: {err}"))?;
        Ok(Self { bpe })
    }
}

impl TokenCounter for TiktokenCounter {
    fn count(&self, text: &str) -> Result<usize> {
        Ok(self.bpe.encode_ordinary(text).len())
    }
}

/// Offline tokenizer that treats every non-whitespace Unicode word boundary segment
/// (words, numbers, punctuation) as one token.
#[derive(Debug, Clone, Copy, Default)]
pub struct WordTokenizer;

impl TokenCounter for WordTokenizer {
    fn count(&self, text: &str) -> Result<usize> {
        Ok(text
            .split_word_bounds()
            .filter(|segment| !segment.trim().is_empty())
            .count())
    }
}

/// Hugging Face `tokenizer.json` backed counter.
pub struct HfTokenizer {
    inner: tokenizers::Tokenizer,
}

impl HfTokenizer {
    /// Loads a serialized tokenizer definition from disk.
    pub fn from_file(path: &Path) -> Result<Self> {
        let inner = tokenizers::Tokenizer::from_file(path)
            .map_err(|err| anyhow!("failed to load tokenizer {:?}: {err}", path))?;
        Ok(Self { inner })
    }
}

impl TokenCounter for HfTokenizer {
    fn count(&self, text: &str) -> Result<usize> {
        let encoding = self
            .inner
            .encode(text, false)
            .map_err(|err| anyhow!("tokenizer failed to encode text: {err}"))?;
        Ok(encoding.len())
    }
}

/// Builds the counter named by configuration.
pub fn load(kind: TokenizerKind, file: Option<&Path>) -> Result<Box<dyn TokenCounter>> {
    match kind {
        TokenizerKind::Cl100k => Ok(Box::new(TiktokenCounter::cl100k()?)),
        TokenizerKind::Hf => {
            let path = file.context("--tokenizer-file is required for the hf tokenizer")?;
            Ok(Box::new(HfTokenizer::from_file(path)?))
        }
        TokenizerKind::Words => Ok(Box::new(WordTokenizer)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn word_tokenizer_counts_words_and_punctuation() {
        assert_eq!(WordTokenizer.count("Revenue grew, thanks.").unwrap(), 5);
        assert_eq!(WordTokenizer.count("   ").unwrap(), 0);
    }

    #[test]
    fn load_defaults_to_cl100k() {
        let counter = load(TokenizerKind::default(), None).unwrap();
        assert_eq!(counter.count("one two three").unwrap(), 3);
        assert_eq!(counter.count("").unwrap(), 0);
    }

    #[test]
    fn cl100k_merges_subwords_differently_from_word_segments() {
        let counter = TiktokenCounter::cl100k().unwrap();
        let text = "Supercalifragilisticexpialidocious";
        assert!(counter.count(text).unwrap() > WordTokenizer.count(text).unwrap());
    }

    #[test]
    fn hf_requires_a_file() {
        assert!(load(TokenizerKind::Hf, None).is_err());
    }
}
