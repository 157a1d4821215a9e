//! Tier selection: which ordered list of `(provider, model)` candidates
//! serves a request.
//!
//! Selection is a pure function of the message, the caller class and a
//! health snapshot. It never calls a provider and never mutates state.

use serde::Serialize;
use std::collections::HashMap;
use switchyard_config::{AppConfig, RoutingConfig, TierCandidate};
use switchyard_core::CallerClass;

use crate::health::HealthSnapshot;

/// Why a tier was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TierReason {
    Override,
    Background,
    Complex,
    Default,
}

/// The chosen tier and its candidates, available ones first.
#[derive(Debug, Clone, Serialize)]
pub struct TierPlan {
    pub tier: String,
    pub reason: TierReason,
    pub candidates: Vec<TierCandidate>,
}

const ANALYSIS_KEYWORDS: &[&str] = &[
    "analyze",
    "analyse",
    "analysis",
    "compare",
    "comparison",
    "step by step",
    "explain why",
    "trade-off",
    "tradeoff",
    "architecture",
    "debug",
    "refactor",
    "evaluate",
    "pros and cons",
];

pub struct TierSelector {
    tiers: HashMap<String, Vec<TierCandidate>>,
    routing: RoutingConfig,
}

impl TierSelector {
    pub fn new(tiers: HashMap<String, Vec<TierCandidate>>, routing: RoutingConfig) -> Self {
        Self { tiers, routing }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(config.tiers.clone(), config.routing.clone())
    }

    pub fn select(
        &self,
        message: &str,
        caller: CallerClass,
        snapshot: &HealthSnapshot,
    ) -> TierPlan {
        let (tier, reason) = match parse_override(message) {
            Some(name) if self.tiers.contains_key(&name) => (name, TierReason::Override),
            _ if caller == CallerClass::Background => {
                (self.routing.background_tier.clone(), TierReason::Background)
            }
            _ if self.is_complex(message) => {
                (self.routing.complex_tier.clone(), TierReason::Complex)
            }
            _ => (self.routing.default_tier.clone(), TierReason::Default),
        };
        let candidates = self.ordered(&tier, snapshot);
        TierPlan {
            tier,
            reason,
            candidates,
        }
    }

    /// Plan for the cheap router tier used by hybrid chains.
    pub fn router_plan(&self, snapshot: &HealthSnapshot) -> TierPlan {
        let tier = self.routing.router_tier.clone();
        let candidates = self.ordered(&tier, snapshot);
        TierPlan {
            tier,
            reason: TierReason::Default,
            candidates,
        }
    }

    /// Candidates of `tier` with unavailable ones moved to the end, relative
    /// order preserved.
    fn ordered(&self, tier: &str, snapshot: &HealthSnapshot) -> Vec<TierCandidate> {
        let all = self.tiers.get(tier).cloned().unwrap_or_default();
        let (mut up, down): (Vec<_>, Vec<_>) = all
            .into_iter()
            .partition(|c| snapshot.is_available(&c.provider));
        up.extend(down);
        up
    }

    fn is_complex(&self, message: &str) -> bool {
        if message.chars().count() > self.routing.complexity_chars {
            return true;
        }
        if message.contains("```") {
            return true;
        }
        if message.matches('?').count() >= 2 {
            return true;
        }
        let lower = message.to_lowercase();
        ANALYSIS_KEYWORDS.iter().any(|k| lower.contains(k))
    }

    pub fn tier_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tiers.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn candidates(&self, tier: &str) -> &[TierCandidate] {
        self.tiers.get(tier).map(Vec::as_slice).unwrap_or_default()
    }
}

fn is_tier_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

/// Extract a `[tier:<name>]` or `@tier:<name>` override, lowercased.
pub fn parse_override(message: &str) -> Option<String> {
    override_span(message).map(|(_, _, name)| name)
}

/// The message with any override token removed.
pub fn strip_override(message: &str) -> String {
    match override_span(message) {
        Some((start, end, _)) => {
            let mut out = String::with_capacity(message.len());
            out.push_str(message[..start].trim_end());
            let rest = message[end..].trim_start();
            if !out.is_empty() && !rest.is_empty() {
                out.push(' ');
            }
            out.push_str(rest);
            out
        }
        None => message.to_string(),
    }
}

fn override_span(message: &str) -> Option<(usize, usize, String)> {
    let lower = message.to_ascii_lowercase();

    if let Some(start) = lower.find("[tier:") {
        let body = start + "[tier:".len();
        if let Some(close) = lower[body..].find(']') {
            let name = lower[body..body + close].trim();
            if !name.is_empty() && name.chars().all(is_tier_char) {
                return Some((start, body + close + 1, name.to_string()));
            }
        }
    }

    if let Some(start) = lower.find("@tier:") {
        let body = start + "@tier:".len();
        let len = lower[body..]
            .char_indices()
            .find(|(_, c)| !is_tier_char(*c))
            .map_or(lower.len() - body, |(i, _)| i);
        if len > 0 {
            return Some((start, body + len, lower[body..body + len].to_string()));
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn selector() -> TierSelector {
        TierSelector::from_config(&AppConfig::default())
    }

    #[test]
    fn default_tier_for_plain_message() {
        let plan = selector().select(
            "what time is it?",
            CallerClass::Interactive,
            &HealthSnapshot::default(),
        );
        assert_eq!(plan.tier, "standard");
        assert_eq!(plan.reason, TierReason::Default);
        assert_eq!(plan.candidates[0].provider, "openrouter");
    }

    #[test]
    fn override_wins_over_everything() {
        let plan = selector().select(
            "[tier:premium] hi",
            CallerClass::Background,
            &HealthSnapshot::default(),
        );
        assert_eq!(plan.tier, "premium");
        assert_eq!(plan.reason, TierReason::Override);

        let plan = selector().select(
            "hi @tier:economy please",
            CallerClass::Interactive,
            &HealthSnapshot::default(),
        );
        assert_eq!(plan.tier, "economy");
    }

    #[test]
    fn unknown_override_is_ignored() {
        let plan = selector().select(
            "[tier:platinum] hi",
            CallerClass::Interactive,
            &HealthSnapshot::default(),
        );
        assert_eq!(plan.tier, "standard");
    }

    #[test]
    fn background_caller_gets_cheapest_tier() {
        let plan = selector().select(
            "Please analyze the logs step by step",
            CallerClass::Background,
            &HealthSnapshot::default(),
        );
        assert_eq!(plan.tier, "economy");
        assert_eq!(plan.reason, TierReason::Background);
    }

    #[test]
    fn complexity_signals() {
        let s = selector();
        let snap = HealthSnapshot::default();
        let long = "word ".repeat(200);
        for msg in [
            "Compare these two designs",
            "Why does it fail? And how do I fix it?",
            "```rust\nfn main() {}\n```",
            long.as_str(),
        ] {
            let plan = s.select(msg, CallerClass::Interactive, &snap);
            assert_eq!(plan.tier, "premium", "message: {msg}");
            assert_eq!(plan.reason, TierReason::Complex);
        }
    }

    #[test]
    fn unavailable_candidates_move_to_end() {
        let snap = HealthSnapshot::default().with_unavailable("openrouter");
        let plan = selector().select("hi", CallerClass::Interactive, &snap);
        let providers: Vec<&str> = plan.candidates.iter().map(|c| c.provider.as_str()).collect();
        assert_eq!(providers, vec!["groq", "openrouter"]);
    }

    #[test]
    fn rate_limited_primary_moves_to_end() {
        let snap = HealthSnapshot {
            rate_limited: Some("openrouter".into()),
            ..HealthSnapshot::default()
        };
        let plan = selector().select("hi", CallerClass::Interactive, &snap);
        assert_eq!(plan.candidates.len(), 2);
        assert_eq!(plan.candidates[1].provider, "openrouter");
    }

    #[test]
    fn router_plan_uses_router_tier() {
        let plan = selector().router_plan(&HealthSnapshot::default());
        assert_eq!(plan.tier, "economy");
        assert_eq!(plan.candidates[0].provider, "groq");
    }

    #[test]
    fn strip_override_token() {
        assert_eq!(strip_override("[tier:premium] hello"), "hello");
        assert_eq!(strip_override("hello @tier:economy world"), "hello world");
        assert_eq!(strip_override("no token"), "no token");
        assert_eq!(parse_override("[TIER:Premium] x").as_deref(), Some("premium"));
        assert_eq!(parse_override("[tier:] x"), None);
    }
}
