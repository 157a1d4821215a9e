//! Wiring shared by the commands: stores, providers, tools, policy, the
//! orchestrator and the commitment supervisor.

use std::sync::Arc;

use anyhow::Context;
use switchyard_agent::{ChainEngine, Orchestrator};
use switchyard_commitments::CommitmentSupervisor;
use switchyard_config::AppConfig;
use switchyard_core::{EventBus, LogNotifier, Notifier};
use switchyard_memory::{Stores, open_stores};
use switchyard_providers::{FailoverInvoker, ResilienceContext, TierSelector, build_from_config};
use switchyard_security::ToolPolicy;
use switchyard_tools::default_registry;

pub struct Runtime {
    pub config: AppConfig,
    pub stores: Stores,
    pub context: Arc<ResilienceContext>,
    pub orchestrator: Arc<Orchestrator>,
    pub supervisor: Arc<CommitmentSupervisor>,
}

pub fn load_config() -> anyhow::Result<AppConfig> {
    AppConfig::load().context("Failed to load config")
}

impl Runtime {
    pub async fn build(config: AppConfig) -> anyhow::Result<Self> {
        let events = Arc::new(EventBus::default());
        let stores = open_stores(&config)
            .await
            .context("Failed to open stores")?;

        let context =
            Arc::new(ResilienceContext::from_config(&config).with_events(events.clone()));
        let invoker = Arc::new(
            FailoverInvoker::new(context.clone(), Arc::new(build_from_config(&config)))
                .with_timeout(config.health.provider_timeout())
                .with_session_store(stores.conversations.clone()),
        );

        let notifier: Arc<dyn Notifier> = Arc::new(LogNotifier);
        let engine = ChainEngine::new(
            invoker,
            Arc::new(TierSelector::from_config(&config)),
            Arc::new(default_registry(notifier.clone())),
            Arc::new(ToolPolicy::new(config.policy.clone())),
        )
        .with_notifier(notifier.clone())
        .with_config(config.chain.clone())
        .with_events(events.clone());

        let supervisor = Arc::new(
            CommitmentSupervisor::new(
                stores.commitments.clone(),
                stores.conversations.clone(),
                notifier,
                config.supervisor.clone(),
            )
            .with_events(events),
        );

        let mut orchestrator = Orchestrator::new(engine, stores.conversations.clone());
        if config.supervisor.enabled {
            orchestrator = orchestrator.with_supervisor(supervisor.clone());
        }

        Ok(Self {
            config,
            stores,
            context,
            orchestrator: Arc::new(orchestrator),
            supervisor,
        })
    }
}
