//! Promise detection.
//!
//! Only the last few sentences of a reply are scanned. A promise buried in
//! the middle of a long answer ("earlier I said I'll check...") is rarely a
//! live commitment; one at the end usually is.

use regex_lite::Regex;
use switchyard_core::SignalClassifier;

const PATTERNS: &[&str] = &[
    r"(?i)\bi'?ll (check|look|get back|follow up|find out|investigate|dig|verify|confirm|review|update you|let you know|report back)",
    r"(?i)\bi will (check|look|get back|follow up|find out|investigate|verify|confirm|review|update you|let you know|report back)",
    r"(?i)\blet me (check|look into|look at|find out|dig into|verify|see what)",
    r"(?i)\bgive me (a|one) (moment|minute|second|sec)\b",
    r"(?i)\bi'?m going to (check|look|find|investigate|verify|review|dig)",
    r"(?i)\bi am going to (check|look|find|investigate|verify|review|dig)",
    r"(?i)\bget back to you\b",
];

/// A promise found in assistant output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Promise {
    /// The sentence carrying the promise
    pub text: String,
}

pub struct PromiseDetector {
    patterns: Vec<Regex>,
    recency_sentences: usize,
}

impl PromiseDetector {
    pub fn new(recency_sentences: usize) -> Self {
        Self {
            patterns: PATTERNS.iter().filter_map(|p| Regex::new(p).ok()).collect(),
            recency_sentences: recency_sentences.max(1),
        }
    }

    fn is_promise(&self, sentence: &str) -> bool {
        self.patterns.iter().any(|re| re.is_match(sentence))
    }
}

impl Default for PromiseDetector {
    fn default() -> Self {
        Self::new(2)
    }
}

impl SignalClassifier<Promise> for PromiseDetector {
    fn classify(&self, text: &str) -> Option<Promise> {
        let text = text.replace(['\u{2019}', '\u{2018}'], "'");
        let sentences = split_sentences(&text);
        let start = sentences.len().saturating_sub(self.recency_sentences);
        sentences[start..]
            .iter()
            .rev()
            .find(|s| self.is_promise(s))
            .map(|s| Promise {
                text: s.to_string(),
            })
    }
}

fn split_sentences(text: &str) -> Vec<&str> {
    text.split_inclusive(['.', '!', '?', '\n'])
        .map(str::trim)
        .filter(|s| s.chars().any(char::is_alphanumeric))
        .collect()
}

/// Canonical form used to spot near-identical promises.
pub fn normalize_promise(text: &str) -> String {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
