//! Resilience context: the one owner of provider health and the
//! rate-limit circuit.
//!
//! Created once per process and shared as `Arc<ResilienceContext>`. Locks
//! are `std::sync::Mutex` and are never held across an `.await`.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use switchyard_config::{AppConfig, HealthConfig, RateLimitConfig, TierCandidate};
use switchyard_core::{DomainEvent, EventBus, ProviderError, SignalClassifier};
use tracing::{debug, info};

use crate::classify::{RateLimitNotice, RateLimitPhrases, retry_hint};
use crate::health::{FailureClass, HealthSnapshot, HealthTracker};
use crate::rate_limit::{RateLimitMachine, RatePhase};

/// Whether a candidate may be called right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Ordinary call.
    Call,
    /// The rate-limited primary's trial call.
    Probe,
    /// Do not call.
    Skip(SkipReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    CoolingDown,
    Unhealthy,
    RateLimited,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CoolingDown => "cooling_down",
            Self::Unhealthy => "unhealthy",
            Self::RateLimited => "rate_limited",
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct ResilienceContext {
    health: Mutex<HealthTracker>,
    rate: Option<Mutex<RateLimitMachine>>,
    classifier: Arc<dyn SignalClassifier<RateLimitNotice>>,
    events: Option<Arc<EventBus>>,
    fallback_eta: Duration,
}

impl ResilienceContext {
    pub fn new(
        health: HealthConfig,
        rate_limit: &RateLimitConfig,
        primary_provider: Option<String>,
    ) -> Self {
        let fallback_eta = Duration::from_secs(health.cooldown_other_secs.max(1));
        Self {
            health: Mutex::new(HealthTracker::new(health)),
            rate: primary_provider.map(|p| Mutex::new(RateLimitMachine::new(p, rate_limit))),
            classifier: Arc::new(RateLimitPhrases::new(rate_limit.phrases.clone())),
            events: None,
            fallback_eta,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            config.health.clone(),
            &config.rate_limit,
            config.primary_provider(),
        )
    }

    /// Swap the rate-limit phrase detector.
    pub fn with_classifier(mut self, classifier: Arc<dyn SignalClassifier<RateLimitNotice>>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    fn publish(&self, event: DomainEvent) {
        if let Some(bus) = &self.events {
            bus.publish(event);
        }
    }

    fn is_primary(&self, provider: &str) -> bool {
        self.rate
            .as_ref()
            .is_some_and(|r| lock(r).provider() == provider)
    }

    pub fn primary_provider(&self) -> Option<String> {
        self.rate.as_ref().map(|r| lock(r).provider().to_string())
    }

    pub fn rate_phase(&self) -> Option<RatePhase> {
        self.rate.as_ref().map(|r| lock(r).phase())
    }

    /// Decide whether `provider` may be called. Granting a probe claims the
    /// slot, so only ask when about to call.
    pub fn admit(&self, provider: &str) -> Admission {
        if let Some(rate) = &self.rate {
            let mut rate = lock(rate);
            if rate.provider() == provider && rate.is_limited() {
                return if rate.try_begin_probe() {
                    self.publish(DomainEvent::RateLimitChanged {
                        provider: provider.to_string(),
                        phase: RatePhase::Probing.as_str().into(),
                        timestamp: chrono::Utc::now(),
                    });
                    Admission::Probe
                } else {
                    Admission::Skip(SkipReason::RateLimited)
                };
            }
        }

        let health = lock(&self.health);
        if health.cooldown_remaining(provider).is_some() {
            Admission::Skip(SkipReason::CoolingDown)
        } else if !health.is_healthy(provider) {
            Admission::Skip(SkipReason::Unhealthy)
        } else {
            Admission::Call
        }
    }

    /// A call succeeded: clear failures and close the circuit.
    pub fn record_success(&self, provider: &str) {
        let recovered = lock(&self.health).clear_failures(provider);
        if recovered {
            info!(provider = %provider, "Provider recovered");
            self.publish(DomainEvent::ProviderRecovered {
                provider: provider.to_string(),
                timestamp: chrono::Utc::now(),
            });
        }

        if let Some(rate) = &self.rate {
            let mut rate = lock(rate);
            if rate.provider() == provider && rate.record_success() {
                self.publish(DomainEvent::RateLimitChanged {
                    provider: provider.to_string(),
                    phase: RatePhase::Unlimited.as_str().into(),
                    timestamp: chrono::Utc::now(),
                });
            }
        }
    }

    /// A call failed. Rate limits on the primary go to the circuit; every
    /// other failure goes to the health tracker.
    pub fn record_failure(&self, provider: &str, error: &ProviderError, admission: Admission) {
        let class = FailureClass::of(error);
        let hint = retry_hint(error);

        if class == FailureClass::RateLimit && self.is_primary(provider) {
            if let Some(rate) = &self.rate {
                lock(rate).record_limited(hint);
            }
            self.publish(DomainEvent::RateLimitChanged {
                provider: provider.to_string(),
                phase: RatePhase::Limited.as_str().into(),
                timestamp: chrono::Utc::now(),
            });
            return;
        }

        if admission == Admission::Probe
            && let Some(rate) = &self.rate
        {
            lock(rate).record_probe_failure();
        }

        let consecutive = lock(&self.health).record_failure(provider, class, hint);
        self.publish(DomainEvent::ProviderFailed {
            provider: provider.to_string(),
            class: class.as_str().into(),
            consecutive_failures: consecutive,
            timestamp: chrono::Utc::now(),
        });
    }

    /// Check a successful response's text for rate-limit phrasing.
    pub fn detect_rate_limit_text(&self, text: &str) -> Option<RateLimitNotice> {
        let notice = self.classifier.classify(text);
        if let Some(n) = &notice {
            debug!(phrase = %n.phrase, "Rate-limit phrasing in response");
        }
        notice
    }

    /// Longest response text that can still read as a rate-limit notice.
    pub fn notice_window(&self) -> Option<usize> {
        self.classifier.max_text_len()
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        let mut snapshot = lock(&self.health).snapshot();
        if let Some(rate) = &self.rate {
            let rate = lock(rate);
            if rate.is_limited() {
                snapshot.rate_limited = Some(rate.provider().to_string());
            }
        }
        snapshot
    }

    /// Earliest moment any of `candidates` is expected back.
    pub fn retry_eta(&self, candidates: &[TierCandidate]) -> Duration {
        let health = lock(&self.health);
        let rate = self.rate.as_ref().map(|r| lock(r));

        candidates
            .iter()
            .filter_map(|c| {
                if let Some(rate) = &rate
                    && rate.provider() == c.provider
                    && let Some(reset) = rate.estimated_reset_in()
                {
                    return Some(reset);
                }
                health.cooldown_remaining(&c.provider)
            })
            .min()
            .unwrap_or(self.fallback_eta)
    }
}
