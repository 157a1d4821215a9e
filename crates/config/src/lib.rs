//! Configuration loading, validation, and management for Switchyard.
//!
//! Loads configuration from `~/.switchyard/config.toml` (or the path in
//! `SWITCHYARD_CONFIG`) with environment variable overrides. Validates all
//! settings at startup.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The root configuration structure.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key (can be overridden per-provider)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Provider endpoints, keyed by provider name
    #[serde(default = "default_providers")]
    pub providers: HashMap<String, ProviderConfig>,

    /// Tiers: ordered candidate lists, keyed by tier name
    #[serde(default = "default_tiers")]
    pub tiers: HashMap<String, Vec<TierCandidate>>,

    /// Which tier serves which kind of request
    #[serde(default)]
    pub routing: RoutingConfig,

    /// Failure counting and cooldowns
    #[serde(default)]
    pub health: HealthConfig,

    /// Rate-limit circuit for the primary provider
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Tool-chain bounds and timeouts
    #[serde(default)]
    pub chain: ChainConfig,

    /// Commitment supervisor cadence and escalation ladder
    #[serde(default)]
    pub supervisor: SupervisorConfig,

    /// Conversation store
    #[serde(default)]
    pub store: StoreConfig,

    /// Tool permissions
    #[serde(default)]
    pub policy: PolicyConfig,
}

/// Redact a secret for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("providers", &self.providers)
            .field("tiers", &self.tiers)
            .field("routing", &self.routing)
            .field("health", &self.health)
            .field("rate_limit", &self.rate_limit)
            .field("chain", &self.chain)
            .field("supervisor", &self.supervisor)
            .field("store", &self.store)
            .field("policy", &self.policy)
            .finish()
    }
}

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .finish()
    }
}

/// One entry in a tier's fallback order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierCandidate {
    pub provider: String,
    pub model: String,
}

impl TierCandidate {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
        }
    }
}

fn default_providers() -> HashMap<String, ProviderConfig> {
    ["openrouter", "groq"]
        .into_iter()
        .map(|name| (name.to_string(), ProviderConfig::default()))
        .collect()
}

fn default_tiers() -> HashMap<String, Vec<TierCandidate>> {
    let mut tiers = HashMap::new();
    tiers.insert(
        "premium".to_string(),
        vec![
            TierCandidate::new("openrouter", "anthropic/claude-sonnet-4"),
            TierCandidate::new("groq", "llama-3.3-70b-versatile"),
        ],
    );
    tiers.insert(
        "standard".to_string(),
        vec![
            TierCandidate::new("openrouter", "anthropic/claude-3.5-haiku"),
            TierCandidate::new("groq", "llama-3.3-70b-versatile"),
        ],
    );
    tiers.insert(
        "economy".to_string(),
        vec![
            TierCandidate::new("groq", "llama-3.1-8b-instant"),
            TierCandidate::new("openrouter", "meta-llama/llama-3.1-8b-instruct"),
        ],
    );
    tiers
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// Tier for ordinary interactive requests
    #[serde(default = "default_tier")]
    pub default_tier: String,

    /// Tier for unattended callers
    #[serde(default = "default_background_tier")]
    pub background_tier: String,

    /// Tier for requests showing complexity signals
    #[serde(default = "default_complex_tier")]
    pub complex_tier: String,

    /// Cheap tier used for hybrid router passes
    #[serde(default = "default_background_tier")]
    pub router_tier: String,

    /// Messages longer than this count as complex
    #[serde(default = "default_complexity_chars")]
    pub complexity_chars: usize,
}

fn default_tier() -> String {
    "standard".into()
}
fn default_background_tier() -> String {
    "economy".into()
}
fn default_complex_tier() -> String {
    "premium".into()
}
fn default_complexity_chars() -> usize {
    600
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            default_tier: default_tier(),
            background_tier: default_background_tier(),
            complex_tier: default_complex_tier(),
            router_tier: default_background_tier(),
            complexity_chars: default_complexity_chars(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    /// Failures inside the window that make a provider unhealthy
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Rolling window for counting failures
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// Cooldown after an explicit rate limit (floor; retry hints may extend it)
    #[serde(default = "default_cooldown_rate_limit_secs")]
    pub cooldown_rate_limit_secs: u64,

    /// Cooldown after a timeout
    #[serde(default = "default_cooldown_timeout_secs")]
    pub cooldown_timeout_secs: u64,

    /// Cooldown after crossing the failure threshold for any other reason
    #[serde(default = "default_cooldown_other_secs")]
    pub cooldown_other_secs: u64,

    /// Per-call provider timeout
    #[serde(default = "default_provider_timeout_secs")]
    pub provider_timeout_secs: u64,
}

fn default_failure_threshold() -> u32 {
    3
}
fn default_window_secs() -> u64 {
    300
}
fn default_cooldown_rate_limit_secs() -> u64 {
    120
}
fn default_cooldown_timeout_secs() -> u64 {
    45
}
fn default_cooldown_other_secs() -> u64 {
    20
}
fn default_provider_timeout_secs() -> u64 {
    90
}

impl HealthConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs)
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            window_secs: default_window_secs(),
            cooldown_rate_limit_secs: default_cooldown_rate_limit_secs(),
            cooldown_timeout_secs: default_cooldown_timeout_secs(),
            cooldown_other_secs: default_cooldown_other_secs(),
            provider_timeout_secs: default_provider_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Provider guarded by the rate-limit circuit. Defaults to the first
    /// candidate of the default tier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_provider: Option<String>,

    /// Minimum spacing between recovery probes
    #[serde(default = "default_probe_interval_secs")]
    pub probe_interval_secs: u64,

    /// Reset estimate when the provider gives no retry hint
    #[serde(default = "default_reset_secs")]
    pub default_reset_secs: u64,

    /// Phrases that mark an otherwise successful response as rate limited
    #[serde(default = "default_phrases")]
    pub phrases: Vec<String>,
}

fn default_probe_interval_secs() -> u64 {
    60
}
fn default_reset_secs() -> u64 {
    300
}
fn default_phrases() -> Vec<String> {
    [
        "rate limit",
        "rate-limited",
        "too many requests",
        "usage limit",
        "quota exceeded",
        "exceeded your current quota",
        "try again later",
        "overloaded",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

impl RateLimitConfig {
    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }

    pub fn default_reset(&self) -> Duration {
        Duration::from_secs(self.default_reset_secs)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            primary_provider: None,
            probe_interval_secs: default_probe_interval_secs(),
            default_reset_secs: default_reset_secs(),
            phrases: default_phrases(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,

    #[serde(default = "default_max_duration_secs")]
    pub max_duration_secs: u64,

    /// Step bound for unattended callers
    #[serde(default = "default_background_max_steps")]
    pub background_max_steps: usize,

    /// Wall-clock bound for unattended callers
    #[serde(default = "default_background_max_duration_secs")]
    pub background_max_duration_secs: u64,

    /// Timeout for standard tools
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,

    /// Timeout for I/O-heavy and communication tools
    #[serde(default = "default_io_tool_timeout_secs")]
    pub io_tool_timeout_secs: u64,

    /// Cheap router between tool steps, expensive model only at the end
    #[serde(default = "default_true")]
    pub hybrid: bool,

    /// Let the router also take the first step
    #[serde(default)]
    pub router_first: bool,

    /// Transcript turns sent with each invocation
    #[serde(default = "default_history_turns")]
    pub history_turns: usize,
}

fn default_max_steps() -> usize {
    20
}
fn default_max_duration_secs() -> u64 {
    300
}
fn default_background_max_steps() -> usize {
    6
}
fn default_background_max_duration_secs() -> u64 {
    90
}
fn default_tool_timeout_secs() -> u64 {
    30
}
fn default_io_tool_timeout_secs() -> u64 {
    120
}
fn default_history_turns() -> usize {
    20
}
fn default_true() -> bool {
    true
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            max_duration_secs: default_max_duration_secs(),
            background_max_steps: default_background_max_steps(),
            background_max_duration_secs: default_background_max_duration_secs(),
            tool_timeout_secs: default_tool_timeout_secs(),
            io_tool_timeout_secs: default_io_tool_timeout_secs(),
            hybrid: true,
            router_first: false,
            history_turns: default_history_turns(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Verification cadence
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,

    /// Age at which a missing tool call is flagged
    #[serde(default = "default_no_tool_flag_secs")]
    pub no_tool_flag_secs: u64,

    /// Age at which a missing response fails the commitment
    #[serde(default = "default_fail_secs")]
    pub fail_secs: u64,

    /// Age at which an untouched commitment silently expires
    #[serde(default = "default_expire_secs")]
    pub expire_secs: u64,

    /// A substantive reply alone resolves after this age
    #[serde(default = "default_grace_secs")]
    pub grace_secs: u64,

    /// Near-identical pending promises inside this window are merged
    #[serde(default = "default_dedup_window_secs")]
    pub dedup_window_secs: u64,

    /// Minimum length of a substantive reply
    #[serde(default = "default_substantive_min_chars")]
    pub substantive_min_chars: usize,

    /// Only the last N sentences of a reply are scanned for promises
    #[serde(default = "default_recency_sentences")]
    pub recency_sentences: usize,
}

fn default_tick_secs() -> u64 {
    30
}
fn default_no_tool_flag_secs() -> u64 {
    180
}
fn default_fail_secs() -> u64 {
    300
}
fn default_expire_secs() -> u64 {
    900
}
fn default_grace_secs() -> u64 {
    120
}
fn default_dedup_window_secs() -> u64 {
    120
}
fn default_substantive_min_chars() -> usize {
    80
}
fn default_recency_sentences() -> usize {
    2
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tick_secs: default_tick_secs(),
            no_tool_flag_secs: default_no_tool_flag_secs(),
            fail_secs: default_fail_secs(),
            expire_secs: default_expire_secs(),
            grace_secs: default_grace_secs(),
            dedup_window_secs: default_dedup_window_secs(),
            substantive_min_chars: default_substantive_min_chars(),
            recency_sentences: default_recency_sentences(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// "sqlite" or "memory"
    #[serde(default = "default_store_backend")]
    pub backend: String,

    /// SQLite database path (defaults to ~/.switchyard/switchyard.db)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// Turns kept per conversation before oldest-first pruning
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,
}

fn default_store_backend() -> String {
    "sqlite".into()
}
fn default_max_turns() -> usize {
    50
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_store_backend(),
            path: None,
            max_turns: default_max_turns(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Callers treated as privileged
    #[serde(default)]
    pub admin_callers: Vec<String>,

    /// Per-tool caller allowlists. Tools not listed are open to everyone;
    /// `["*"]` allows all, an empty list denies all.
    #[serde(default)]
    pub tool_allowlist: HashMap<String, Vec<String>>,

    /// Tool-name prefixes unattended callers may never use
    #[serde(default = "default_background_blocked")]
    pub background_blocked_prefixes: Vec<String>,
}

fn default_background_blocked() -> Vec<String> {
    vec!["trade_".into(), "post_".into(), "payment_".into()]
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            admin_callers: vec![],
            tool_allowlist: HashMap::new(),
            background_blocked_prefixes: default_background_blocked(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.switchyard/config.toml).
    ///
    /// Environment overrides:
    /// - `SWITCHYARD_CONFIG`: alternative config file path
    /// - `SWITCHYARD_API_KEY`, `OPENROUTER_API_KEY`, `OPENAI_API_KEY`: API key
    /// - `SWITCHYARD_DEFAULT_TIER`: default tier
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = std::env::var("SWITCHYARD_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| Self::config_dir().join("config.toml"));
        let mut config = Self::load_from(&config_path)?;

        if config.api_key.is_none() {
            config.api_key = std::env::var("SWITCHYARD_API_KEY")
                .ok()
                .or_else(|| std::env::var("OPENROUTER_API_KEY").ok())
                .or_else(|| std::env::var("OPENAI_API_KEY").ok());
        }

        if let Ok(tier) = std::env::var("SWITCHYARD_DEFAULT_TIER") {
            config.routing.default_tier = tier;
            config.validate()?;
        }

        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".switchyard")
    }

    /// Resolved SQLite path.
    pub fn store_path(&self) -> PathBuf {
        self.store
            .path
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| Self::config_dir().join("switchyard.db"))
    }

    /// The provider guarded by the rate-limit circuit.
    pub fn primary_provider(&self) -> Option<String> {
        self.rate_limit.primary_provider.clone().or_else(|| {
            self.tiers
                .get(&self.routing.default_tier)
                .and_then(|c| c.first())
                .map(|c| c.provider.clone())
        })
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for tier in [
            &self.routing.default_tier,
            &self.routing.background_tier,
            &self.routing.complex_tier,
            &self.routing.router_tier,
        ] {
            match self.tiers.get(tier) {
                None => {
                    return Err(ConfigError::ValidationError(format!(
                        "routing references unknown tier '{tier}'"
                    )));
                }
                Some(candidates) if candidates.is_empty() => {
                    return Err(ConfigError::ValidationError(format!(
                        "tier '{tier}' has no candidates"
                    )));
                }
                Some(_) => {}
            }
        }

        if self.health.failure_threshold == 0 {
            return Err(ConfigError::ValidationError(
                "health.failure_threshold must be > 0".into(),
            ));
        }

        if self.rate_limit.probe_interval_secs == 0 {
            return Err(ConfigError::ValidationError(
                "rate_limit.probe_interval_secs must be > 0".into(),
            ));
        }

        if self.chain.max_steps == 0 || self.chain.background_max_steps == 0 {
            return Err(ConfigError::ValidationError(
                "chain step bounds must be > 0".into(),
            ));
        }

        if self.chain.background_max_steps > self.chain.max_steps
            || self.chain.background_max_duration_secs > self.chain.max_duration_secs
        {
            return Err(ConfigError::ValidationError(
                "background chain bounds must not exceed interactive bounds".into(),
            ));
        }

        let s = &self.supervisor;
        if !(s.no_tool_flag_secs < s.fail_secs && s.fail_secs < s.expire_secs) {
            return Err(ConfigError::ValidationError(
                "supervisor ladder must satisfy no_tool_flag < fail < expire".into(),
            ));
        }
        if s.grace_secs >= s.fail_secs {
            return Err(ConfigError::ValidationError(format!(
                "supervisor.grace_secs ({}) must be below fail_secs ({})",
                s.grace_secs, s.fail_secs
            )));
        }

        if !matches!(self.store.backend.as_str(), "sqlite" | "memory") {
            return Err(ConfigError::ValidationError(format!(
                "unknown store backend '{}'",
                self.store.backend
            )));
        }

        Ok(())
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            providers: default_providers(),
            tiers: default_tiers(),
            routing: RoutingConfig::default(),
            health: HealthConfig::default(),
            rate_limit: RateLimitConfig::default(),
            chain: ChainConfig::default(),
            supervisor: SupervisorConfig::default(),
            store: StoreConfig::default(),
            policy: PolicyConfig::default(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.routing.default_tier, "standard");
        assert_eq!(config.primary_provider().as_deref(), Some("openrouter"));
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.routing.default_tier, config.routing.default_tier);
        assert_eq!(parsed.tiers.len(), config.tiers.len());
        assert_eq!(parsed.chain.max_steps, 20);
    }

    #[test]
    fn unknown_tier_rejected() {
        let mut config = AppConfig::default();
        config.routing.complex_tier = "platinum".into();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("platinum"));
    }

    #[test]
    fn background_bounds_must_be_tighter() {
        let mut config = AppConfig::default();
        config.chain.background_max_steps = 50;
        assert!(config.validate().is_err());
    }

    #[test]
    fn supervisor_ladder_must_be_ordered() {
        let mut config = AppConfig::default();
        config.supervisor.fail_secs = 1000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn grace_must_end_before_failure() {
        let mut config = AppConfig::default();
        config.supervisor.grace_secs = 400;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("grace_secs"));

        config.supervisor.grace_secs = config.supervisor.fail_secs;
        assert!(config.validate().is_err());

        config.supervisor.grace_secs = 299;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = AppConfig::load_from(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.routing.default_tier, "standard");
    }

    #[test]
    fn explicit_primary_provider_wins() {
        let mut config = AppConfig::default();
        config.rate_limit.primary_provider = Some("groq".into());
        assert_eq!(config.primary_provider().as_deref(), Some("groq"));
    }

    #[test]
    fn parses_tiers_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[providers.local]
api_url = "http://localhost:11434/v1"

[[tiers.fast]]
provider = "local"
model = "llama3:8b"

[[tiers.smart]]
provider = "local"
model = "llama3:70b"

[routing]
default_tier = "smart"
background_tier = "fast"
complex_tier = "smart"
router_tier = "fast"

[chain]
max_steps = 12
"#
        )
        .unwrap();

        let config = AppConfig::load_from(file.path()).unwrap();
        assert_eq!(config.tiers["fast"][0].model, "llama3:8b");
        assert_eq!(config.chain.max_steps, 12);
        assert_eq!(config.chain.background_max_steps, 6);
        assert_eq!(config.primary_provider().as_deref(), Some("local"));
    }

    #[test]
    fn debug_redacts_keys() {
        let config = AppConfig {
            api_key: Some("sk-secret".into()),
            ..AppConfig::default()
        };
        let dbg = format!("{config:?}");
        assert!(!dbg.contains("sk-secret"));
        assert!(dbg.contains("[REDACTED]"));
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = AppConfig::default_toml();
        assert!(toml_str.contains("openrouter"));
        assert!(toml_str.contains("probe_interval_secs"));
    }
}
