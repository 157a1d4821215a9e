//! Failover invoker: ordered candidate walk with per-call timeouts.
//!
//! Every model call in the engine goes through [`FailoverInvoker::invoke`].
//! Candidates are tried strictly in order; ones cooling down or unhealthy
//! are skipped, and the rate-limited primary is only called when it holds
//! the probe slot. Outcomes feed back into the shared
//! [`ResilienceContext`].

use std::sync::Arc;
use std::time::Duration;
use switchyard_config::TierCandidate;
use switchyard_core::{
    ConversationStore, InvokeRequest, ProviderAdapter, ProviderError, ProviderOutput, StreamChunk,
};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::context::{Admission, ResilienceContext};
use crate::registry::ProviderRegistry;

/// A successful call and who answered it.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub output: ProviderOutput,
    pub provider: String,
    pub model: String,
}

/// An opened stream and who is serving it.
pub struct StreamHandle {
    pub chunks: mpsc::Receiver<Result<StreamChunk, ProviderError>>,
    pub provider: String,
    pub model: String,
}

/// One candidate that did not produce an answer.
#[derive(Debug, Clone)]
pub struct AttemptFailure {
    pub provider: String,
    pub reason: String,
}

/// Every candidate was skipped or failed.
#[derive(Debug, Clone, Error)]
#[error("all {} candidates failed; retry in ~{}s", .attempts.len(), .retry_eta.as_secs())]
pub struct Exhausted {
    pub attempts: Vec<AttemptFailure>,
    pub retry_eta: Duration,
}

pub struct FailoverInvoker {
    context: Arc<ResilienceContext>,
    registry: Arc<ProviderRegistry>,
    timeout: Duration,
    sessions: Option<Arc<dyn ConversationStore>>,
}

impl FailoverInvoker {
    pub fn new(context: Arc<ResilienceContext>, registry: Arc<ProviderRegistry>) -> Self {
        Self {
            context,
            registry,
            timeout: Duration::from_secs(90),
            sessions: None,
        }
    }

    /// Per-call provider timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Store whose session state is cleared after degenerate output.
    pub fn with_session_store(mut self, store: Arc<dyn ConversationStore>) -> Self {
        self.sessions = Some(store);
        self
    }

    pub fn context(&self) -> &Arc<ResilienceContext> {
        &self.context
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn call(
        &self,
        adapter: &Arc<dyn ProviderAdapter>,
        request: InvokeRequest,
    ) -> Result<ProviderOutput, ProviderError> {
        match tokio::time::timeout(self.timeout, adapter.invoke(request)).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout(format!(
                "Provider '{}' timed out after {}s",
                adapter.name(),
                self.timeout.as_secs()
            ))),
        }
    }

    async fn reset_session(&self, adapter: &Arc<dyn ProviderAdapter>, request: &InvokeRequest) {
        if let Err(e) = adapter.reset_session(&request.conversation_id).await {
            warn!(provider = %adapter.name(), error = %e, "Session reset failed");
        }
        if let Some(store) = &self.sessions
            && let Err(e) = store.clear_session_state(&request.conversation_id).await
        {
            warn!(error = %e, "Clearing stored session state failed");
        }
    }

    /// One candidate, including the single retry after degenerate output
    /// and the check for rate-limit phrasing.
    async fn attempt(
        &self,
        adapter: &Arc<dyn ProviderAdapter>,
        request: InvokeRequest,
    ) -> Result<ProviderOutput, ProviderError> {
        let mut output = self.call(adapter, request.clone()).await?;

        if output.is_degenerate() {
            warn!(provider = %adapter.name(), "Degenerate output, resetting session and retrying");
            self.reset_session(adapter, &request).await;
            output = self.call(adapter, request).await?;
            if output.is_degenerate() {
                return Err(ProviderError::EmptyResponse);
            }
        }

        if let Some(text) = output.text()
            && let Some(notice) = self.context.detect_rate_limit_text(text)
        {
            return Err(ProviderError::ApiError {
                status_code: 429,
                message: format!("rate-limit notice in response: '{}'", notice.phrase),
            });
        }

        Ok(output)
    }

    /// Try `candidates` in order until one answers.
    pub async fn invoke(
        &self,
        request: &InvokeRequest,
        candidates: &[TierCandidate],
    ) -> Result<Invocation, Exhausted> {
        let mut attempts = Vec::new();

        for (i, candidate) in candidates.iter().enumerate() {
            let Some(adapter) = self.registry.get(&candidate.provider) else {
                debug!(provider = %candidate.provider, "Failover: provider not registered");
                attempts.push(AttemptFailure {
                    provider: candidate.provider.clone(),
                    reason: "not configured".into(),
                });
                continue;
            };

            let admission = self.context.admit(&candidate.provider);
            if let Admission::Skip(reason) = admission {
                debug!(
                    provider = %candidate.provider,
                    reason = reason.as_str(),
                    "Failover: skipping provider"
                );
                attempts.push(AttemptFailure {
                    provider: candidate.provider.clone(),
                    reason: reason.as_str().into(),
                });
                continue;
            }

            info!(
                provider = %candidate.provider,
                model = %candidate.model,
                attempt = i + 1,
                total = candidates.len(),
                probe = admission == Admission::Probe,
                "Failover: trying provider"
            );

            let mut req = request.clone();
            req.model = candidate.model.clone();

            match self.attempt(&adapter, req).await {
                Ok(output) => {
                    self.context.record_success(&candidate.provider);
                    return Ok(Invocation {
                        output,
                        provider: candidate.provider.clone(),
                        model: candidate.model.clone(),
                    });
                }
                Err(e) => {
                    warn!(
                        provider = %candidate.provider,
                        error = %e,
                        "Failover: provider failed, trying next"
                    );
                    self.context
                        .record_failure(&candidate.provider, &e, admission);
                    attempts.push(AttemptFailure {
                        provider: candidate.provider.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        Err(Exhausted {
            retry_eta: self.context.retry_eta(candidates),
            attempts,
        })
    }

    /// Open a stream on the first candidate that accepts. Failover happens
    /// only while opening; a stream that breaks later is the caller's to
    /// recover.
    pub async fn invoke_stream(
        &self,
        request: &InvokeRequest,
        candidates: &[TierCandidate],
    ) -> Result<StreamHandle, Exhausted> {
        let mut attempts = Vec::new();

        for candidate in candidates {
            let Some(adapter) = self.registry.get(&candidate.provider) else {
                attempts.push(AttemptFailure {
                    provider: candidate.provider.clone(),
                    reason: "not configured".into(),
                });
                continue;
            };

            let admission = self.context.admit(&candidate.provider);
            if let Admission::Skip(reason) = admission {
                attempts.push(AttemptFailure {
                    provider: candidate.provider.clone(),
                    reason: reason.as_str().into(),
                });
                continue;
            }

            let mut req = request.clone();
            req.model = candidate.model.clone();

            let opened = match tokio::time::timeout(self.timeout, adapter.stream(req)).await {
                Ok(result) => result,
                Err(_) => Err(ProviderError::Timeout(format!(
                    "Provider '{}' stream timed out after {}s",
                    candidate.provider,
                    self.timeout.as_secs()
                ))),
            };

            match opened {
                Ok(chunks) => {
                    self.context.record_success(&candidate.provider);
                    return Ok(StreamHandle {
                        chunks,
                        provider: candidate.provider.clone(),
                        model: candidate.model.clone(),
                    });
                }
                Err(e) => {
                    warn!(
                        provider = %candidate.provider,
                        error = %e,
                        "Failover: provider stream failed, trying next"
                    );
                    self.context
                        .record_failure(&candidate.provider, &e, admission);
                    attempts.push(AttemptFailure {
                        provider: candidate.provider.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        Err(Exhausted {
            retry_eta: self.context.retry_eta(candidates),
            attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use switchyard_config::{HealthConfig, RateLimitConfig};
    use switchyard_core::ConversationId;

    use crate::rate_limit::RatePhase;

    /// A mock provider that always fails.
    struct FailingProvider {
        name: String,
        error: ProviderError,
        call_count: Mutex<usize>,
    }

    impl FailingProvider {
        fn new(name: &str, error: ProviderError) -> Self {
            Self {
                name: name.into(),
                error,
                call_count: Mutex::new(0),
            }
        }

        fn calls(&self) -> usize {
            *self.call_count.lock().unwrap()
        }
    }

    #[async_trait]
    impl ProviderAdapter for FailingProvider {
        fn name(&self) -> &str {
            &self.name
        }

        async fn invoke(&self, _request: InvokeRequest) -> Result<ProviderOutput, ProviderError> {
            *self.call_count.lock().unwrap() += 1;
            Err(self.error.clone())
        }
    }

    /// A mock provider that replays scripted texts, then repeats the last.
    struct TextProvider {
        name: String,
        texts: Vec<String>,
        call_count: Mutex<usize>,
        resets: Mutex<usize>,
    }

    impl TextProvider {
        fn new(name: &str, texts: &[&str]) -> Self {
            Self {
                name: name.into(),
                texts: texts.iter().map(|t| t.to_string()).collect(),
                call_count: Mutex::new(0),
                resets: Mutex::new(0),
            }
        }

        fn calls(&self) -> usize {
            *self.call_count.lock().unwrap()
        }

        fn resets(&self) -> usize {
            *self.resets.lock().unwrap()
        }
    }

    #[async_trait]
    impl ProviderAdapter for TextProvider {
        fn name(&self) -> &str {
            &self.name
        }

        async fn invoke(&self, _request: InvokeRequest) -> Result<ProviderOutput, ProviderError> {
            let mut count = self.call_count.lock().unwrap();
            let idx = (*count).min(self.texts.len() - 1);
            *count += 1;
            Ok(ProviderOutput::message(self.texts[idx].clone()))
        }

        async fn reset_session(&self, _conversation_id: &ConversationId) -> Result<(), ProviderError> {
            *self.resets.lock().unwrap() += 1;
            Ok(())
        }
    }

    /// A mock provider that hangs forever (for timeout testing).
    struct HangingProvider;

    #[async_trait]
    impl ProviderAdapter for HangingProvider {
        fn name(&self) -> &str {
            "hanging"
        }

        async fn invoke(&self, _request: InvokeRequest) -> Result<ProviderOutput, ProviderError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Err(ProviderError::EmptyResponse)
        }
    }

    fn context() -> Arc<ResilienceContext> {
        Arc::new(ResilienceContext::new(
            HealthConfig::default(),
            &RateLimitConfig::default(),
            Some("primary".into()),
        ))
    }

    fn invoker(providers: Vec<Arc<dyn ProviderAdapter>>) -> FailoverInvoker {
        let mut registry = ProviderRegistry::new();
        for p in providers {
            registry.register(p);
        }
        FailoverInvoker::new(context(), Arc::new(registry))
    }

    fn candidates(names: &[&str]) -> Vec<TierCandidate> {
        names.iter().map(|n| TierCandidate::new(*n, "m")).collect()
    }

    fn request() -> InvokeRequest {
        InvokeRequest::new(ConversationId::from("c1"), "hello", "")
    }

    #[tokio::test]
    async fn first_provider_succeeds() {
        let p1 = Arc::new(TextProvider::new("primary", &["hi there"]));
        let p2 = Arc::new(TextProvider::new("secondary", &["other"]));
        let inv = invoker(vec![p1.clone(), p2.clone()]);

        let result = inv
            .invoke(&request(), &candidates(&["primary", "secondary"]))
            .await
            .unwrap();
        assert_eq!(result.output.text(), Some("hi there"));
        assert_eq!(result.provider, "primary");
        assert_eq!(p1.calls(), 1);
        assert_eq!(p2.calls(), 0);
    }

    #[tokio::test]
    async fn falls_back_on_failure() {
        let p1 = Arc::new(FailingProvider::new(
            "primary",
            ProviderError::ApiError {
                status_code: 500,
                message: "Internal Server Error".into(),
            },
        ));
        let p2 = Arc::new(TextProvider::new("secondary", &["ok"]));
        let inv = invoker(vec![p1.clone(), p2.clone()]);

        let result = inv
            .invoke(&request(), &candidates(&["primary", "secondary"]))
            .await
            .unwrap();
        assert_eq!(result.provider, "secondary");
        assert_eq!(p1.calls(), 1);
        assert_eq!(p2.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn content_rate_limit_opens_circuit_and_fails_over() {
        let p1 = Arc::new(TextProvider::new(
            "primary",
            &["You have reached your usage limit. Try again later."],
        ));
        let p2 = Arc::new(TextProvider::new("secondary", &["real answer"]));
        let inv = invoker(vec![p1.clone(), p2.clone()]);
        let order = candidates(&["primary", "secondary"]);

        let result = inv.invoke(&request(), &order).await.unwrap();
        assert_eq!(result.output.text(), Some("real answer"));
        assert_eq!(inv.context().rate_phase(), Some(RatePhase::Limited));

        // Next request skips the primary entirely
        inv.invoke(&request(), &order).await.unwrap();
        assert_eq!(p1.calls(), 1);
        assert_eq!(p2.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn probe_after_interval_closes_circuit() {
        let p1 = Arc::new(TextProvider::new(
            "primary",
            &["Too many requests", "recovered"],
        ));
        let p2 = Arc::new(TextProvider::new("secondary", &["fallback"]));
        let inv = invoker(vec![p1.clone(), p2.clone()]);
        let order = candidates(&["primary", "secondary"]);

        inv.invoke(&request(), &order).await.unwrap();
        tokio::time::advance(Duration::from_secs(61)).await;

        let result = inv.invoke(&request(), &order).await.unwrap();
        assert_eq!(result.provider, "primary");
        assert_eq!(result.output.text(), Some("recovered"));
        assert_eq!(inv.context().rate_phase(), Some(RatePhase::Unlimited));
    }

    #[tokio::test]
    async fn degenerate_output_resets_and_retries_once() {
        let p1 = Arc::new(TextProvider::new("primary", &["   ", "second try"]));
        let inv = invoker(vec![p1.clone()]);

        let result = inv
            .invoke(&request(), &candidates(&["primary"]))
            .await
            .unwrap();
        assert_eq!(result.output.text(), Some("second try"));
        assert_eq!(p1.calls(), 2);
        assert_eq!(p1.resets(), 1);
    }

    #[tokio::test]
    async fn repeated_degenerate_output_falls_through() {
        let p1 = Arc::new(TextProvider::new("primary", &[""]));
        let p2 = Arc::new(TextProvider::new("secondary", &["fine"]));
        let inv = invoker(vec![p1.clone(), p2.clone()]);

        let result = inv
            .invoke(&request(), &candidates(&["primary", "secondary"]))
            .await
            .unwrap();
        assert_eq!(result.provider, "secondary");
        assert_eq!(p1.calls(), 2);
    }

    #[tokio::test]
    async fn timeout_triggers_fallback() {
        let p2 = Arc::new(TextProvider::new("secondary", &["ok"]));
        let inv = invoker(vec![Arc::new(HangingProvider), p2.clone()])
            .with_timeout(Duration::from_millis(50));

        let result = inv
            .invoke(&request(), &candidates(&["hanging", "secondary"]))
            .await
            .unwrap();
        assert_eq!(result.provider, "secondary");
        assert!(!inv.context().snapshot().is_available("hanging"));
    }

    #[tokio::test(start_paused = true)]
    async fn all_providers_fail_reports_eta() {
        let p1 = Arc::new(FailingProvider::new(
            "primary",
            ProviderError::RateLimited {
                retry_after_secs: 600,
            },
        ));
        let p2 = Arc::new(FailingProvider::new(
            "secondary",
            ProviderError::Timeout("slow".into()),
        ));
        let inv = invoker(vec![p1.clone(), p2.clone()]);

        let err = inv
            .invoke(&request(), &candidates(&["primary", "secondary"]))
            .await
            .unwrap_err();
        assert_eq!(err.attempts.len(), 2);
        assert_eq!(err.retry_eta, Duration::from_secs(45));
    }

    #[tokio::test]
    async fn unhealthy_candidates_are_skipped() {
        let p1 = Arc::new(FailingProvider::new(
            "flaky",
            ProviderError::Network("refused".into()),
        ));
        let p2 = Arc::new(TextProvider::new("secondary", &["ok"]));
        let inv = invoker(vec![p1.clone(), p2.clone()]);
        let order = candidates(&["flaky", "secondary"]);

        for _ in 0..5 {
            inv.invoke(&request(), &order).await.unwrap();
        }
        // Threshold is 3: the flaky provider stops being called after that
        assert_eq!(p1.calls(), 3);
        assert_eq!(p2.calls(), 5);
    }

    #[tokio::test]
    async fn unregistered_provider_is_skipped() {
        let p2 = Arc::new(TextProvider::new("secondary", &["ok"]));
        let inv = invoker(vec![p2]);
        let result = inv
            .invoke(&request(), &candidates(&["ghost", "secondary"]))
            .await
            .unwrap();
        assert_eq!(result.provider, "secondary");
    }

    #[tokio::test]
    async fn empty_candidate_list_is_exhausted() {
        let inv = invoker(vec![]);
        let err = inv.invoke(&request(), &[]).await.unwrap_err();
        assert!(err.attempts.is_empty());
    }

    #[tokio::test]
    async fn stream_opens_on_first_accepting_candidate() {
        let p1 = Arc::new(FailingProvider::new(
            "primary",
            ProviderError::Network("down".into()),
        ));
        let p2 = Arc::new(TextProvider::new("secondary", &["streamed"]));
        let inv = invoker(vec![p1, p2]);

        let mut handle = inv
            .invoke_stream(&request(), &candidates(&["primary", "secondary"]))
            .await
            .unwrap();
        assert_eq!(handle.provider, "secondary");
        let chunk = handle.chunks.recv().await.unwrap().unwrap();
        assert_eq!(chunk.content.as_deref(), Some("streamed"));
    }
}
