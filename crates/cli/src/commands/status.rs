//! `switchyard status`: routing, provider order and pending commitments.

use switchyard_config::AppConfig;
use switchyard_providers::TierSelector;

use crate::runtime::{Runtime, load_config};

pub async fn run() -> anyhow::Result<()> {
    let config = load_config()?;
    let selector = TierSelector::from_config(&config);

    println!("Switchyard Status");
    println!("=================");
    println!("  Config dir:     {}", AppConfig::config_dir().display());
    println!("  Store:          {}", config.store.backend);
    println!(
        "  Primary:        {}",
        config.primary_provider().as_deref().unwrap_or("(none)")
    );
    println!(
        "  Routing:        default={} background={} complex={} router={}",
        config.routing.default_tier,
        config.routing.background_tier,
        config.routing.complex_tier,
        config.routing.router_tier
    );
    println!(
        "  Chain bounds:   {} steps / {}s (background {} / {}s), hybrid {}",
        config.chain.max_steps,
        config.chain.max_duration_secs,
        config.chain.background_max_steps,
        config.chain.background_max_duration_secs,
        if config.chain.hybrid { "on" } else { "off" }
    );

    println!();
    println!("  Tiers (failover order):");
    for tier in selector.tier_names() {
        let order: Vec<String> = selector
            .candidates(tier)
            .iter()
            .map(|c| format!("{}/{}", c.provider, c.model))
            .collect();
        println!("    {tier:<10} {}", order.join(" -> "));
    }

    let runtime = Runtime::build(config).await?;
    let snapshot = runtime.context.snapshot();
    println!();
    if snapshot.providers.is_empty() && snapshot.rate_limited.is_none() {
        println!("  Health:         no failures recorded");
    } else {
        println!("  Health:");
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    }

    let pending = runtime.stores.commitments.pending().await?;
    println!("  Pending commitments: {}", pending.len());
    for c in pending.iter().take(10) {
        println!(
            "    [{}] {} \"{}\" (since {})",
            c.conversation_id,
            c.status,
            c.promise_text,
            c.created_at.format("%Y-%m-%d %H:%M:%S")
        );
    }

    let config_path = AppConfig::config_dir().join("config.toml");
    if !config_path.exists() {
        println!();
        println!("  No config file, using defaults. Run `switchyard config init` to create one.");
    }

    Ok(())
}
