//! Per-provider health tracking.
//!
//! Each backend gets a rolling window of recent failures and an optional
//! cooldown. A provider is available when no cooldown is active and the
//! failures inside the window are below the threshold. Any success wipes
//! the slate.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::Duration;
use switchyard_config::HealthConfig;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Why a provider call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    Timeout,
    RateLimit,
    EmptyResponse,
    Other,
}

impl FailureClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::RateLimit => "rate_limit",
            Self::EmptyResponse => "empty_response",
            Self::Other => "other",
        }
    }
}

impl std::fmt::Display for FailureClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Health record for one provider.
#[derive(Debug, Clone)]
pub struct ProviderHealthState {
    pub provider: String,
    pub consecutive_failures: u32,
    pub last_failure_class: Option<FailureClass>,
    pub cooldown_until: Option<Instant>,
    pub last_success_at: Option<Instant>,
    recent_failures: VecDeque<Instant>,
}

impl ProviderHealthState {
    fn new(provider: &str) -> Self {
        Self {
            provider: provider.to_string(),
            consecutive_failures: 0,
            last_failure_class: None,
            cooldown_until: None,
            last_success_at: None,
            recent_failures: VecDeque::new(),
        }
    }

    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(&oldest) = self.recent_failures.front() {
            if now.duration_since(oldest) >= window {
                self.recent_failures.pop_front();
            } else {
                break;
            }
        }
    }

    fn cooldown_remaining(&self, now: Instant) -> Option<Duration> {
        self.cooldown_until
            .filter(|until| *until > now)
            .map(|until| until - now)
    }

    /// Failures counted inside the rolling window as of the last update.
    pub fn failures_in_window(&self) -> usize {
        self.recent_failures.len()
    }
}

/// Serializable view of one provider's health, for `status` and tier
/// selection.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderStatus {
    pub available: bool,
    pub consecutive_failures: u32,
    pub failures_in_window: usize,
    pub last_failure_class: Option<FailureClass>,
    pub cooldown_remaining_secs: Option<u64>,
}

/// Point-in-time view of every tracked provider. Providers never seen are
/// implicitly available.
#[derive(Debug, Clone, Default, Serialize)]
pub struct HealthSnapshot {
    pub providers: BTreeMap<String, ProviderStatus>,
    /// Primary provider currently behind the rate-limit circuit
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limited: Option<String>,
}

impl HealthSnapshot {
    pub fn is_available(&self, provider: &str) -> bool {
        if self.rate_limited.as_deref() == Some(provider) {
            return false;
        }
        self.providers.get(provider).is_none_or(|s| s.available)
    }

    /// Mark a provider as unavailable (tests and manual overrides).
    pub fn with_unavailable(mut self, provider: &str) -> Self {
        self.providers.insert(
            provider.to_string(),
            ProviderStatus {
                available: false,
                consecutive_failures: 0,
                failures_in_window: 0,
                last_failure_class: None,
                cooldown_remaining_secs: None,
            },
        );
        self
    }
}

/// Tracks health for all providers.
pub struct HealthTracker {
    config: HealthConfig,
    states: HashMap<String, ProviderHealthState>,
}

impl HealthTracker {
    pub fn new(config: HealthConfig) -> Self {
        Self {
            config,
            states: HashMap::new(),
        }
    }

    fn state_mut(&mut self, provider: &str) -> &mut ProviderHealthState {
        self.states
            .entry(provider.to_string())
            .or_insert_with(|| ProviderHealthState::new(provider))
    }

    /// Record a failed call. Rate limits and timeouts always cool the
    /// provider down; other classes only once the window threshold is hit.
    /// Returns the consecutive failure count.
    pub fn record_failure(
        &mut self,
        provider: &str,
        class: FailureClass,
        retry_hint: Option<Duration>,
    ) -> u32 {
        let now = Instant::now();
        let window = self.config.window();
        let threshold = self.config.failure_threshold as usize;

        let state = self.state_mut(provider);
        state.consecutive_failures += 1;
        state.last_failure_class = Some(class);
        state.recent_failures.push_back(now);
        state.prune(now, window);

        let consecutive = state.consecutive_failures;
        let crossed = state.recent_failures.len() >= threshold;

        warn!(
            provider = %provider,
            class = %class,
            consecutive_failures = consecutive,
            "Provider failure recorded"
        );

        if matches!(class, FailureClass::RateLimit | FailureClass::Timeout) || crossed {
            self.mark_cooldown(provider, class, retry_hint);
        }
        consecutive
    }

    /// Put a provider on cooldown. Duration scales with severity: explicit
    /// rate limit (hint honoured, floored at the configured value) > timeout
    /// > anything else. An existing longer cooldown is never shortened.
    pub fn mark_cooldown(&mut self, provider: &str, reason: FailureClass, hint: Option<Duration>) {
        let duration = self.cooldown_for(reason, hint);
        let until = Instant::now() + duration;
        let state = self.state_mut(provider);
        if state.cooldown_until.is_none_or(|existing| existing < until) {
            state.cooldown_until = Some(until);
        }
        debug!(
            provider = %provider,
            reason = %reason,
            cooldown_secs = duration.as_secs(),
            "Provider cooling down"
        );
    }

    fn cooldown_for(&self, reason: FailureClass, hint: Option<Duration>) -> Duration {
        match reason {
            FailureClass::RateLimit => {
                let floor = Duration::from_secs(self.config.cooldown_rate_limit_secs);
                hint.map_or(floor, |h| h.max(floor))
            }
            FailureClass::Timeout => Duration::from_secs(self.config.cooldown_timeout_secs),
            FailureClass::EmptyResponse | FailureClass::Other => {
                Duration::from_secs(self.config.cooldown_other_secs)
            }
        }
    }

    /// Full reset after a successful call. Returns whether there was
    /// anything to clear.
    pub fn clear_failures(&mut self, provider: &str) -> bool {
        let state = self.state_mut(provider);
        let had_failures = state.consecutive_failures > 0
            || state.cooldown_until.is_some()
            || !state.recent_failures.is_empty();
        state.consecutive_failures = 0;
        state.last_failure_class = None;
        state.cooldown_until = None;
        state.recent_failures.clear();
        state.last_success_at = Some(Instant::now());
        had_failures
    }

    pub fn is_healthy(&self, provider: &str) -> bool {
        let Some(state) = self.states.get(provider) else {
            return true;
        };
        let now = Instant::now();
        if state.cooldown_remaining(now).is_some() {
            return false;
        }
        let window = self.config.window();
        let in_window = state
            .recent_failures
            .iter()
            .filter(|t| now.duration_since(**t) < window)
            .count();
        in_window < self.config.failure_threshold as usize
    }

    /// Time until the provider's cooldown lapses, if one is active.
    pub fn cooldown_remaining(&self, provider: &str) -> Option<Duration> {
        self.states
            .get(provider)
            .and_then(|s| s.cooldown_remaining(Instant::now()))
    }

    pub fn state(&self, provider: &str) -> Option<&ProviderHealthState> {
        self.states.get(provider)
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        let now = Instant::now();
        let providers = self
            .states
            .values()
            .map(|s| {
                let window = self.config.window();
                let failures_in_window = s
                    .recent_failures
                    .iter()
                    .filter(|t| now.duration_since(**t) < window)
                    .count();
                (
                    s.provider.clone(),
                    ProviderStatus {
                        available: self.is_healthy(&s.provider),
                        consecutive_failures: s.consecutive_failures,
                        failures_in_window,
                        last_failure_class: s.last_failure_class,
                        cooldown_remaining_secs: s.cooldown_remaining(now).map(|d| d.as_secs()),
                    },
                )
            })
            .collect();
        HealthSnapshot {
            providers,
            rate_limited: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> HealthTracker {
        HealthTracker::new(HealthConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_provider_is_healthy() {
        let t = tracker();
        assert!(t.is_healthy("groq"));
        assert!(t.snapshot().is_available("groq"));
    }

    #[tokio::test(start_paused = true)]
    async fn other_failures_trip_at_threshold() {
        let mut t = tracker();
        t.record_failure("groq", FailureClass::Other, None);
        t.record_failure("groq", FailureClass::Other, None);
        assert!(t.is_healthy("groq"));
        assert!(t.cooldown_remaining("groq").is_none());

        t.record_failure("groq", FailureClass::Other, None);
        assert!(!t.is_healthy("groq"));
        assert_eq!(t.cooldown_remaining("groq"), Some(Duration::from_secs(20)));
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_cools_down_immediately_with_floor() {
        let mut t = tracker();
        t.record_failure("openrouter", FailureClass::RateLimit, Some(Duration::from_secs(5)));
        assert!(!t.is_healthy("openrouter"));
        assert_eq!(
            t.cooldown_remaining("openrouter"),
            Some(Duration::from_secs(120))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_hint_longer_than_floor_is_honoured() {
        let mut t = tracker();
        t.record_failure("openrouter", FailureClass::RateLimit, Some(Duration::from_secs(600)));
        assert_eq!(
            t.cooldown_remaining("openrouter"),
            Some(Duration::from_secs(600))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn severity_ordering() {
        let t = tracker();
        let rl = t.cooldown_for(FailureClass::RateLimit, None);
        let to = t.cooldown_for(FailureClass::Timeout, None);
        let other = t.cooldown_for(FailureClass::EmptyResponse, None);
        assert!(rl > to && to > other);
    }

    #[tokio::test(start_paused = true)]
    async fn cooldown_lapses() {
        let mut t = tracker();
        t.record_failure("groq", FailureClass::Timeout, None);
        assert!(!t.is_healthy("groq"));
        tokio::time::advance(Duration::from_secs(46)).await;
        assert!(t.is_healthy("groq"));
    }

    #[tokio::test(start_paused = true)]
    async fn window_forgets_old_failures() {
        let mut t = tracker();
        t.record_failure("groq", FailureClass::Other, None);
        t.record_failure("groq", FailureClass::Other, None);
        tokio::time::advance(Duration::from_secs(301)).await;
        t.record_failure("groq", FailureClass::Other, None);
        assert!(t.is_healthy("groq"));
        assert_eq!(t.state("groq").unwrap().failures_in_window(), 1);
        assert_eq!(t.state("groq").unwrap().consecutive_failures, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn success_clears_everything() {
        let mut t = tracker();
        t.record_failure("groq", FailureClass::RateLimit, None);
        assert!(t.clear_failures("groq"));
        assert!(t.is_healthy("groq"));
        let state = t.state("groq").unwrap();
        assert_eq!(state.consecutive_failures, 0);
        assert!(state.last_success_at.is_some());
        assert!(!t.clear_failures("groq"));
    }

    #[tokio::test(start_paused = true)]
    async fn snapshot_reports_cooldown() {
        let mut t = tracker();
        t.record_failure("groq", FailureClass::Timeout, None);
        let snap = t.snapshot();
        let status = &snap.providers["groq"];
        assert!(!status.available);
        assert_eq!(status.last_failure_class, Some(FailureClass::Timeout));
        assert_eq!(status.cooldown_remaining_secs, Some(45));
        assert!(!snap.is_available("groq"));
    }
}
