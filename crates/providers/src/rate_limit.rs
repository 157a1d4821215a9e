//! Rate-limit circuit for the primary provider.
//!
//! ```text
//! Unlimited ──429 / phrase──▶ Limited ──probe slot──▶ Probing
//!     ▲                          ▲                      │
//!     └──────── trial ok ────────┼──────────────────────┘
//!                                └──── trial failed ────┘
//! ```
//!
//! While limited, at most one trial call is granted per probe interval.

use serde::Serialize;
use std::time::Duration;
use switchyard_config::RateLimitConfig;
use tokio::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RatePhase {
    Unlimited,
    Limited,
    Probing,
}

impl RatePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unlimited => "unlimited",
            Self::Limited => "limited",
            Self::Probing => "probing",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RateLimitState {
    pub phase: RatePhase,
    pub limited_since: Option<Instant>,
    pub estimated_reset_at: Option<Instant>,
    pub last_probe_at: Option<Instant>,
}

impl RateLimitState {
    pub fn is_limited(&self) -> bool {
        self.phase != RatePhase::Unlimited
    }
}

/// The circuit itself. One instance, owned by the resilience context.
pub struct RateLimitMachine {
    provider: String,
    probe_interval: Duration,
    default_reset: Duration,
    state: RateLimitState,
}

impl RateLimitMachine {
    pub fn new(provider: impl Into<String>, config: &RateLimitConfig) -> Self {
        Self {
            provider: provider.into(),
            probe_interval: config.probe_interval(),
            default_reset: config.default_reset(),
            state: RateLimitState {
                phase: RatePhase::Unlimited,
                limited_since: None,
                estimated_reset_at: None,
                last_probe_at: None,
            },
        }
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn phase(&self) -> RatePhase {
        self.state.phase
    }

    pub fn state(&self) -> &RateLimitState {
        &self.state
    }

    pub fn is_limited(&self) -> bool {
        self.state.is_limited()
    }

    /// Rate-limit evidence arrived (HTTP 429 or matching phrasing). Moves to
    /// `Limited` from any phase and reschedules the reset estimate.
    pub fn record_limited(&mut self, retry_hint: Option<Duration>) {
        let now = Instant::now();
        let was = self.state.phase;
        if was == RatePhase::Unlimited {
            self.state.limited_since = Some(now);
        }
        self.state.phase = RatePhase::Limited;
        self.state.estimated_reset_at = Some(now + retry_hint.unwrap_or(self.default_reset));
        info!(
            provider = %self.provider,
            from = was.as_str(),
            reset_in_secs = retry_hint.unwrap_or(self.default_reset).as_secs(),
            "Rate-limit circuit open"
        );
    }

    /// Claim the trial slot. Granted only while `Limited`, and no sooner
    /// than one probe interval after the circuit opened or the last probe.
    ///
    /// A probe whose outcome was never reported (the caller was cancelled
    /// mid-call) is abandoned once a full interval has passed, and the slot
    /// is handed out again.
    pub fn try_begin_probe(&mut self) -> bool {
        let now = Instant::now();
        if self.state.phase == RatePhase::Probing
            && self
                .state
                .last_probe_at
                .is_none_or(|t| now.duration_since(t) >= self.probe_interval)
        {
            warn!(provider = %self.provider, "Probe never reported back, reopening slot");
            self.state.phase = RatePhase::Limited;
        }
        if self.state.phase != RatePhase::Limited {
            return false;
        }
        let reference = self.state.last_probe_at.or(self.state.limited_since);
        let due = reference.is_none_or(|t| now.duration_since(t) >= self.probe_interval);
        if due {
            self.state.phase = RatePhase::Probing;
            self.state.last_probe_at = Some(now);
            info!(provider = %self.provider, "Rate-limit probe granted");
        }
        due
    }

    /// A call to the provider succeeded. Closes the circuit from any phase.
    pub fn record_success(&mut self) -> bool {
        if self.state.phase == RatePhase::Unlimited {
            return false;
        }
        info!(provider = %self.provider, "Rate-limit circuit closed");
        self.state.phase = RatePhase::Unlimited;
        self.state.limited_since = None;
        self.state.estimated_reset_at = None;
        self.state.last_probe_at = None;
        true
    }

    /// The trial call failed for a reason other than a rate limit. Back to
    /// `Limited`; the next probe is scheduled from this attempt.
    pub fn record_probe_failure(&mut self) {
        if self.state.phase == RatePhase::Probing {
            self.state.phase = RatePhase::Limited;
        }
    }

    /// Time until the provider is expected to accept calls again.
    pub fn estimated_reset_in(&self) -> Option<Duration> {
        if !self.is_limited() {
            return None;
        }
        let now = Instant::now();
        let reset = self
            .state
            .estimated_reset_at
            .map(|at| at.saturating_duration_since(now))
            .unwrap_or(self.default_reset);
        // No call goes out before the next probe slot, whatever the hint says.
        let next_probe = self
            .state
            .last_probe_at
            .or(self.state.limited_since)
            .map(|t| (t + self.probe_interval).saturating_duration_since(now))
            .unwrap_or_default();
        Some(reset.max(next_probe))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine() -> RateLimitMachine {
        RateLimitMachine::new("openrouter", &RateLimitConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn starts_unlimited() {
        let mut m = machine();
        assert_eq!(m.phase(), RatePhase::Unlimited);
        assert!(!m.try_begin_probe());
        assert!(m.estimated_reset_in().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn probe_waits_for_interval() {
        let mut m = machine();
        m.record_limited(None);
        assert_eq!(m.phase(), RatePhase::Limited);
        assert!(!m.try_begin_probe());

        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(m.try_begin_probe());
        assert_eq!(m.phase(), RatePhase::Probing);
        // Only one trial in flight
        assert!(!m.try_begin_probe());
    }

    #[tokio::test(start_paused = true)]
    async fn at_most_one_probe_per_interval() {
        let mut m = machine();
        m.record_limited(None);
        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(m.try_begin_probe());
        m.record_probe_failure();
        assert_eq!(m.phase(), RatePhase::Limited);

        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(!m.try_begin_probe());
        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(m.try_begin_probe());
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_trial_slot_is_reclaimed_after_interval() {
        let mut m = machine();
        m.record_limited(None);
        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(m.try_begin_probe());
        // No outcome is ever recorded for this probe

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(!m.try_begin_probe());
        assert_eq!(m.phase(), RatePhase::Probing);

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(m.try_begin_probe());
        assert_eq!(m.phase(), RatePhase::Probing);
        assert_eq!(m.state().last_probe_at, Some(Instant::now()));
    }

    #[tokio::test(start_paused = true)]
    async fn probe_success_closes_circuit() {
        let mut m = machine();
        m.record_limited(Some(Duration::from_secs(30)));
        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(m.try_begin_probe());
        assert!(m.record_success());
        assert_eq!(m.phase(), RatePhase::Unlimited);
        assert!(m.state().limited_since.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limited_probe_reschedules_reset() {
        let mut m = machine();
        m.record_limited(None);
        let first_since = m.state().limited_since;
        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(m.try_begin_probe());
        m.record_limited(Some(Duration::from_secs(200)));
        assert_eq!(m.phase(), RatePhase::Limited);
        assert_eq!(m.state().limited_since, first_since);
        assert_eq!(
            m.state().estimated_reset_at,
            Some(Instant::now() + Duration::from_secs(200))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn reset_estimate_uses_hint_or_default() {
        let mut m = machine();
        m.record_limited(None);
        assert_eq!(m.estimated_reset_in(), Some(Duration::from_secs(300)));

        let mut hinted = machine();
        hinted.record_limited(Some(Duration::from_secs(90)));
        assert_eq!(hinted.estimated_reset_in(), Some(Duration::from_secs(90)));
    }

    #[tokio::test(start_paused = true)]
    async fn reset_estimate_never_before_next_probe() {
        let mut m = machine();
        m.record_limited(Some(Duration::from_secs(10)));
        assert_eq!(m.estimated_reset_in(), Some(Duration::from_secs(60)));
    }
}
