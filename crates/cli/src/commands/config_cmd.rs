//! `switchyard config`: configuration file management.

use std::path::Path;

use anyhow::Context;
use switchyard_config::AppConfig;

use crate::runtime::load_config;

fn default_path() -> std::path::PathBuf {
    AppConfig::config_dir().join("config.toml")
}

pub fn init() -> anyhow::Result<()> {
    let path = default_path();
    if path.exists() {
        println!("Config already exists at {}", path.display());
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    std::fs::write(&path, AppConfig::default_toml())
        .with_context(|| format!("Failed to write {}", path.display()))?;
    println!("Wrote default config to {}", path.display());
    Ok(())
}

pub fn show() -> anyhow::Result<()> {
    let config = load_config()?;
    println!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

pub fn validate(path: Option<&Path>) -> anyhow::Result<()> {
    let config = match path {
        Some(path) => AppConfig::load_from(path)?,
        None => load_config()?,
    };

    let mut warnings = Vec::new();
    if config.api_key.is_none() && config.providers.values().all(|p| p.api_key.is_none()) {
        warnings.push("No API key set (SWITCHYARD_API_KEY, OPENROUTER_API_KEY or OPENAI_API_KEY)".to_string());
    }
    for (tier, candidates) in &config.tiers {
        for c in candidates {
            if !config.providers.contains_key(&c.provider) {
                warnings.push(format!(
                    "tier '{tier}' uses provider '{}' with no [providers] entry; the default base URL applies",
                    c.provider
                ));
            }
        }
    }

    println!("Config OK");
    for w in &warnings {
        println!("  warning: {w}");
    }
    Ok(())
}

pub fn path() {
    println!("{}", default_path().display());
}
