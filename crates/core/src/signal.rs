//! Pluggable text classifiers.
//!
//! Rate-limit phrasing and promise detection are heuristics. The state
//! machines consuming them only see this trait, so a heuristic can be
//! swapped without touching them.

/// Maps text to an optional signal.
pub trait SignalClassifier<S>: Send + Sync {
    fn classify(&self, text: &str) -> Option<S>;

    /// Longest text this classifier can flag. Streaming callers may release
    /// text once it has grown past this length. `None` means unbounded.
    fn max_text_len(&self) -> Option<usize> {
        None
    }
}
