//! Provider registry: adapters by name, built from configuration.

use std::collections::HashMap;
use std::sync::Arc;
use switchyard_config::AppConfig;
use switchyard_core::ProviderAdapter;
use tracing::debug;

use crate::openai_compat::OpenAiCompatProvider;

/// Adapters keyed by provider name.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn ProviderAdapter>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter under its own name. Replaces any existing one.
    pub fn register(&mut self, provider: Arc<dyn ProviderAdapter>) {
        self.providers.insert(provider.name().to_string(), provider);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ProviderAdapter>> {
        self.providers.get(name).cloned()
    }

    /// Registered provider names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.providers.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

/// Build adapters for every configured provider and every provider a tier
/// names.
pub fn build_from_config(config: &AppConfig) -> ProviderRegistry {
    let mut registry = ProviderRegistry::new();

    let mut names: Vec<&String> = config.providers.keys().collect();
    for candidates in config.tiers.values() {
        names.extend(candidates.iter().map(|c| &c.provider));
    }
    names.sort_unstable();
    names.dedup();

    for name in names {
        let provider_config = config.providers.get(name);
        let api_key = provider_config
            .and_then(|p| p.api_key.clone())
            .or_else(|| config.api_key.clone())
            .unwrap_or_default();
        let base_url = provider_config
            .and_then(|p| p.api_url.clone())
            .unwrap_or_else(|| default_base_url(name));

        debug!(provider = %name, base_url = %base_url, "Registering provider");
        registry.register(Arc::new(OpenAiCompatProvider::new(
            name.as_str(),
            base_url,
            api_key,
        )));
    }

    registry
}

/// Get the default base URL for well-known providers.
pub fn default_base_url(provider_name: &str) -> String {
    match provider_name {
        "openrouter" => "https://openrouter.ai/api/v1".into(),
        "openai" => "https://api.openai.com/v1".into(),
        "ollama" => "http://localhost:11434/v1".into(),
        "deepseek" => "https://api.deepseek.com/v1".into(),
        "groq" => "https://api.groq.com/openai/v1".into(),
        "together" => "https://api.together.xyz/v1".into(),
        "fireworks" => "https://api.fireworks.ai/inference/v1".into(),
        "mistral" => "https://api.mistral.ai/v1".into(),
        "vllm" => "http://localhost:8000/v1".into(),
        "llamacpp" | "llama.cpp" => "http://localhost:8080/v1".into(),
        _ => format!("https://{provider_name}.api.example.com/v1"),
    }
}
