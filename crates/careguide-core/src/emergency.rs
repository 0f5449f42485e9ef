//! Deterministic emergency detection over raw user input.
//!
//! Runs before any provider call. Matching is deliberately broad: a false
//! positive costs one canned safety message, a false negative could cost a
//! delayed trip to the emergency room.

use regex::{Regex, RegexBuilder};

use crate::error::{CoreError, CoreResult};

/// Keywords used when the configuration does not supply its own list.
pub const DEFAULT_EMERGENCY_KEYWORDS: &[&str] = &[
    "bleeding",
    "hemorrhage",
    "haemorrhage",
    "chest pain",
    "can't breathe",
    "cannot breathe",
    "difficulty breathing",
    "shortness of breath",
    "unconscious",
    "unresponsive",
    "seizure",
    "stroke",
    "suicide",
    "overdose",
    "anaphylaxis",
    "severe allergic reaction",
    "fainted",
    "passed out",
    "出血",
    "胸痛",
    "呼吸困難",
    "呼吸困难",
    "昏迷",
    "抽搐",
    "休克",
    "自殺",
    "自杀",
];

/// Case-insensitive keyword and pattern matcher.
#[derive(Debug, Clone)]
pub struct EmergencyDetector {
    keywords: Vec<String>,
    patterns: Vec<Regex>,
}

impl EmergencyDetector {
    /// Build a detector from keywords and optional regex patterns.
    ///
    /// Blank keywords are ignored. An invalid pattern fails with
    /// [`CoreError::InvalidConfiguration`].
    pub fn new<K, P>(keywords: K, patterns: P) -> CoreResult<Self>
    where
        K: IntoIterator,
        K::Item: AsRef<str>,
        P: IntoIterator,
        P::Item: AsRef<str>,
    {
        let keywords: Vec<String> = keywords
            .into_iter()
            .map(|k| normalize(k.as_ref()))
            .filter(|k| !k.is_empty())
            .collect();

        let patterns = patterns
            .into_iter()
            .map(|p| {
                RegexBuilder::new(p.as_ref())
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| {
                        CoreError::invalid_config(format!(
                            "invalid emergency pattern '{}': {}",
                            p.as_ref(),
                            e
                        ))
                    })
            })
            .collect::<CoreResult<Vec<_>>>()?;

        if keywords.is_empty() && patterns.is_empty() {
            return Err(CoreError::invalid_config(
                "emergency detector needs at least one keyword or pattern",
            ));
        }

        Ok(Self { keywords, patterns })
    }

    /// Whether the input should short-circuit to the emergency response.
    pub fn is_emergency(&self, raw_input: &str) -> bool {
        self.matched(raw_input).is_some()
    }

    /// The first keyword or pattern that fires, for logging.
    pub fn matched(&self, raw_input: &str) -> Option<&str> {
        let text = normalize(raw_input);
        if let Some(k) = self.keywords.iter().find(|k| text.contains(k.as_str())) {
            return Some(k.as_str());
        }
        self.patterns
            .iter()
            .find(|p| p.is_match(&text))
            .map(|p| p.as_str())
    }

    pub fn keyword_count(&self) -> usize {
        self.keywords.len()
    }
}

impl Default for EmergencyDetector {
    fn default() -> Self {
        Self {
            keywords: DEFAULT_EMERGENCY_KEYWORDS
                .iter()
                .map(|k| normalize(k))
                .collect(),
            patterns: Vec::new(),
        }
    }
}

/// Lowercase, fold typographic apostrophes, collapse whitespace.
fn normalize(s: &str) -> String {
    s.to_lowercase()
        .replace(['\u{2019}', '\u{2018}'], "'")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
