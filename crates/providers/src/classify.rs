//! Failure classification.
//!
//! Maps a [`ProviderError`] to the [`FailureClass`] the health tracker
//! understands, and detects rate limiting hidden inside an otherwise
//! successful response.

use std::time::Duration;
use switchyard_core::{ProviderError, SignalClassifier};

use crate::health::FailureClass;

impl FailureClass {
    pub fn of(error: &ProviderError) -> Self {
        match error {
            e if e.is_rate_limit() => Self::RateLimit,
            ProviderError::Timeout(_) => Self::Timeout,
            ProviderError::EmptyResponse => Self::EmptyResponse,
            _ => Self::Other,
        }
    }
}

/// Retry hint carried by an error, as a duration.
pub fn retry_hint(error: &ProviderError) -> Option<Duration> {
    error.retry_after_secs().map(Duration::from_secs)
}

/// A response whose text reads as a rate-limit notice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitNotice {
    pub phrase: String,
}

/// Case-insensitive phrase matcher for rate-limit notices.
///
/// Only short responses are considered: a long answer that happens to
/// discuss rate limits is real content, not a notice.
pub struct RateLimitPhrases {
    phrases: Vec<String>,
    max_len: usize,
}

impl RateLimitPhrases {
    const DEFAULT_MAX_LEN: usize = 400;

    pub fn new(phrases: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            phrases: phrases
                .into_iter()
                .map(|p| p.into().to_lowercase())
                .filter(|p| !p.is_empty())
                .collect(),
            max_len: Self::DEFAULT_MAX_LEN,
        }
    }

    pub fn with_max_len(mut self, max_len: usize) -> Self {
        self.max_len = max_len;
        self
    }
}

impl SignalClassifier<RateLimitNotice> for RateLimitPhrases {
    fn classify(&self, text: &str) -> Option<RateLimitNotice> {
        let text = text.trim();
        if text.is_empty() || text.len() > self.max_len {
            return None;
        }
        let lower = text.to_lowercase();
        self.phrases
            .iter()
            .find(|p| lower.contains(p.as_str()))
            .map(|p| RateLimitNotice { phrase: p.clone() })
    }

    fn max_text_len(&self) -> Option<usize> {
        Some(self.max_len)
    }
}
