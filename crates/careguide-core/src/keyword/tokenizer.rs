//! Unicode-aware tokenizer for the keyword index.
//!
//! - Unicode word segmentation (UAX #29)
//! - Case folding
//! - CJK runs become character unigrams plus bigrams, since Han/Kana text
//!   has no spaces to split on
//! - Optional English stemming and stop-word removal for Latin tokens

use std::collections::HashSet;

use rust_stemmers::{Algorithm, Stemmer};
use serde::{Deserialize, Serialize};
use unicode_segmentation::UnicodeSegmentation;

/// Tokenizer configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenizerConfig {
    /// Apply English stemming to Latin tokens.
    pub stemming: bool,
    /// Drop common English stop words.
    pub remove_stopwords: bool,
    /// Minimum byte length of a non-CJK token.
    pub min_token_length: usize,
}

impl Default for TokenizerConfig {
    fn default() -> Self {
        Self {
            stemming: true,
            remove_stopwords: true,
            min_token_length: 2,
        }
    }
}

pub struct Tokenizer {
    config: TokenizerConfig,
    stemmer: Option<Stemmer>,
    stopwords: HashSet<&'static str>,
}

impl Tokenizer {
    pub fn new(config: TokenizerConfig) -> Self {
        let stemmer = config
            .stemming
            .then(|| Stemmer::create(Algorithm::English));
        Self {
            config,
            stemmer,
            stopwords: default_stopwords(),
        }
    }

    /// Tokenize text into index terms.
    pub fn tokenize(&self, text: &str) -> Vec<String> {
        let mut tokens = Vec::new();
        let mut run: Vec<char> = Vec::new();
        let mut run_end = 0usize;

        for (offset, word) in text.unicode_word_indices() {
            if word.chars().all(is_cjk) {
                // UAX #29 yields one word per ideograph; glue adjacent ones
                // back into a run.
                if !run.is_empty() && offset != run_end {
                    flush_cjk_run(&mut run, &mut tokens);
                }
                run.extend(word.chars());
                run_end = offset + word.len();
                continue;
            }
            flush_cjk_run(&mut run, &mut tokens);
            if let Some(token) = self.process_token(word) {
                tokens.push(token);
            }
        }
        flush_cjk_run(&mut run, &mut tokens);

        tokens
    }

    fn process_token(&self, word: &str) -> Option<String> {
        let lower = word.to_lowercase();

        if !lower.chars().any(|c| c.is_alphabetic()) {
            return None;
        }
        if lower.len() < self.config.min_token_length {
            return None;
        }
        if self.config.remove_stopwords && self.stopwords.contains(lower.as_str()) {
            return None;
        }

        let token = match &self.stemmer {
            Some(stemmer) if lower.is_ascii() => stemmer.stem(&lower).into_owned(),
            _ => lower,
        };

        (token.len() >= self.config.min_token_length).then_some(token)
    }
}

impl Default for Tokenizer {
    fn default() -> Self {
        Self::new(TokenizerConfig::default())
    }
}

/// Emit unigrams and bigrams for a run of CJK characters.
fn flush_cjk_run(run: &mut Vec<char>, tokens: &mut Vec<String>) {
    if run.is_empty() {
        return;
    }
    tokens.extend(run.iter().map(|c| c.to_string()));
    tokens.extend(run.windows(2).map(|w| w.iter().collect::<String>()));
    run.clear();
}

/// Han, Hiragana, Katakana, and Hangul syllables.
pub fn is_cjk(c: char) -> bool {
    matches!(
        c as u32,
        0x3040..=0x309F
            | 0x30A0..=0x30FF
            | 0x3400..=0x4DBF
            | 0x4E00..=0x9FFF
            | 0xAC00..=0xD7AF
            | 0xF900..=0xFAFF
            | 0x20000..=0x2A6DF
    )
}

fn default_stopwords() -> HashSet<&'static str> {
    [
        "a", "an", "the", "in", "on", "at", "to", "of", "with", "by", "from", "as", "into",
        "and", "or", "but", "nor", "so", "yet", "i", "you", "he", "she", "it", "we", "they",
        "me", "him", "her", "us", "them", "my", "your", "his", "its", "our", "their", "this",
        "that", "these", "those", "which", "who", "whom", "what", "is", "are", "was", "were",
        "be", "been", "being", "have", "has", "had", "does", "did", "will", "would", "could",
        "should", "may", "might", "can", "than", "too", "very", "just", "also", "then", "there",
        "here", "about", "whether",
    ]
    .into_iter()
    .collect()
}
