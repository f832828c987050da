//! Token-budgeted chunking over whitespace-delimited words.
//!
//! Each word costs the number of tokens its text plus one trailing space encodes to. Words are
//! accumulated until the next one would push the running total past `max_tokens`; the chunk is
//! then closed and the next one starts with that word. The first word of a chunk is never
//! rejected, so a single word costlier than the whole budget becomes its own oversized chunk.
//! Chunks never split a word and their words, read in order, are exactly the input's words.

use crate::error::IngestError;
use std::sync::Arc;
use tiktoken_rs::get_bpe_from_model;

pub const DEFAULT_MAX_TOKENS: usize = 300;
pub const DEFAULT_TOKENIZER_MODEL: &str = "gpt-3.5-turbo";

pub type TokenCounter = Arc<dyn Fn(&str) -> usize + Send + Sync>;

/// Token counter backed by the BPE vocabulary of the given OpenAI model.
pub fn tiktoken_counter(model: &str) -> Result<TokenCounter, IngestError> {
    let encoding = get_bpe_from_model(model).map_err(|error| IngestError::Tokenizer {
        model: model.to_string(),
        details: error.to_string(),
    })?;
    let encoding = Arc::new(encoding);

    Ok(Arc::new(move |segment: &str| {
        encoding.encode_ordinary(segment).len()
    }))
}

/// Counts one token per whitespace-delimited word, never less than one for non-empty input.
pub fn whitespace_counter() -> TokenCounter {
    Arc::new(|segment: &str| {
        let tokens = segment.split_whitespace().count();
        if tokens == 0 && !segment.is_empty() {
            1
        } else {
            tokens
        }
    })
}

#[derive(Clone)]
pub struct Chunker {
    counter: TokenCounter,
    max_tokens: usize,
}

impl std::fmt::Debug for Chunker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chunker")
            .field("max_tokens", &self.max_tokens)
            .finish_non_exhaustive()
    }
}

impl Chunker {
    pub fn new(counter: TokenCounter, max_tokens: usize) -> Result<Self, IngestError> {
        if max_tokens == 0 {
            return Err(IngestError::InvalidChunkConfig(
                "max_tokens must be greater than zero".to_string(),
            ));
        }
        Ok(Self {
            counter,
            max_tokens,
        })
    }

    /// Chunker using the tokenizer vocabulary of [`DEFAULT_TOKENIZER_MODEL`].
    pub fn for_default_model(max_tokens: usize) -> Result<Self, IngestError> {
        Self::new(tiktoken_counter(DEFAULT_TOKENIZER_MODEL)?, max_tokens)
    }

    pub fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    pub fn word_cost(&self, word: &str) -> usize {
        (self.counter)(&format!("{word} "))
    }

    /// Sum of the per-word costs of `chunk`.
    pub fn chunk_cost(&self, chunk: &str) -> usize {
        chunk.split_whitespace().map(|word| self.word_cost(word)).sum()
    }

    pub fn chunk(&self, text: &str) -> Vec<String> {
        let mut chunks = Vec::new();
        let mut current: Vec<&str> = Vec::new();
        let mut tokens = 0usize;

        for word in text.split_whitespace() {
            let cost = self.word_cost(word);
            if !current.is_empty() && tokens + cost > self.max_tokens {
                chunks.push(current.join(" "));
                current.clear();
                tokens = 0;
            }
            current.push(word);
            tokens += cost;
        }

        if !current.is_empty() {
            chunks.push(current.join(" "));
        }

        chunks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn char_counter() -> TokenCounter {
        Arc::new(|segment: &str| segment.chars().count())
    }

    const SAMPLES: [&str; 4] = [
        "Refunds are issued within 30 days. Exchanges require a receipt.",
        "  leading and\ttrailing\n\nwhitespace   collapses  ",
        "one",
        "a supercalifragilisticexpialidocious word sits between short ones here",
    ];

    #[test]
    fn empty_and_blank_text_yield_no_chunks() {
        let chunker = Chunker::new(char_counter(), 10).unwrap();
        assert!(chunker.chunk("").is_empty());
        assert!(chunker.chunk(" \n\t ").is_empty());
    }

    #[test]
    fn zero_budget_is_rejected() {
        assert!(matches!(
            Chunker::new(char_counter(), 0),
            Err(IngestError::InvalidChunkConfig(_))
        ));
    }

    #[test]
    fn chunks_close_before_exceeding_budget() {
        // Costs: "aa " = 3, "bbb " = 4, "c " = 2.
        let chunker = Chunker::new(char_counter(), 7).unwrap();
        assert_eq!(chunker.chunk("aa bbb c"), vec!["aa bbb", "c"]);
    }

    #[test]
    fn oversized_word_forms_its_own_chunk() {
        let chunker = Chunker::new(char_counter(), 5).unwrap();
        assert_eq!(
            chunker.chunk("x abcdefghij y"),
            vec!["x", "abcdefghij", "y"]
        );
    }

    #[test]
    fn chunk_costs_stay_within_budget_unless_single_word() {
        for max_tokens in [1, 4, 9, 16, 40] {
            let chunker = Chunker::new(char_counter(), max_tokens).unwrap();
            for sample in SAMPLES {
                for chunk in chunker.chunk(sample) {
                    let words = chunk.split_whitespace().count();
                    assert!(
                        chunker.chunk_cost(&chunk) <= max_tokens || words == 1,
                        "chunk {chunk:?} exceeds {max_tokens}"
                    );
                }
            }
        }
    }

    #[test]
    fn chunking_is_a_lossless_partition_of_words() {
        for max_tokens in [1, 3, 8, 300] {
            let chunker = Chunker::new(whitespace_counter(), max_tokens).unwrap();
            for sample in SAMPLES {
                let original: Vec<&str> = sample.split_whitespace().collect();
                let chunks = chunker.chunk(sample);
                let rejoined: Vec<&str> = chunks
                    .iter()
                    .flat_map(|chunk| chunk.split_whitespace())
                    .collect();
                assert_eq!(rejoined, original);
            }
        }
    }

    #[test]
    fn tiktoken_budget_keeps_short_policy_in_one_chunk() {
        let chunker = Chunker::for_default_model(DEFAULT_MAX_TOKENS).unwrap();
        let chunks = chunker.chunk(SAMPLES[0]);
        assert_eq!(chunks, vec![SAMPLES[0].to_string()]);
        assert!(chunker.word_cost("Refunds") >= 1);
    }

    #[test]
    fn tiktoken_budget_splits_long_text() {
        let chunker = Chunker::for_default_model(20).unwrap();
        let text = "policy ".repeat(100);
        let chunks = chunker.chunk(&text);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunker.chunk_cost(chunk) <= 20);
        }
    }
}
