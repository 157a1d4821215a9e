//! Shared test helpers for chain and orchestrator tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use switchyard_config::{ChainConfig, HealthConfig, RateLimitConfig, RoutingConfig, TierCandidate};
use switchyard_core::{
    AllowAll, ConversationId, InvokeMode, InvokeRequest, NoopNotifier, Notifier, PermissionPolicy,
    ProviderAdapter, ProviderError, ProviderOutput, StreamChunk, Tool, ToolClass, ToolError,
    ToolRegistry,
};
use tokio::sync::mpsc;
use switchyard_providers::{FailoverInvoker, ProviderRegistry, ResilienceContext, TierSelector};

use crate::chain::ChainEngine;

type Responder = Box<dyn Fn(&InvokeRequest) -> Result<ProviderOutput, ProviderError> + Send + Sync>;

/// Chunks for the next `stream` call, and whether the stream then stalls.
type StreamScript = (Vec<StreamChunk>, bool);

/// A provider that answers from a script.
///
/// Each call returns the next scripted output; once the script runs out the
/// last entry repeats. Every request is recorded for assertions.
pub struct ScriptedProvider {
    name: String,
    script: Mutex<Vec<Result<ProviderOutput, ProviderError>>>,
    responder: Option<Responder>,
    delay: Option<Duration>,
    stream_script: Mutex<Option<StreamScript>>,
    requests: Mutex<Vec<InvokeRequest>>,
}

impl ScriptedProvider {
    pub fn new(name: &str, script: Vec<Result<ProviderOutput, ProviderError>>) -> Self {
        Self {
            name: name.into(),
            script: Mutex::new(script),
            responder: None,
            delay: None,
            stream_script: Mutex::new(None),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Answers computed from each request.
    pub fn responding(
        name: &str,
        f: impl Fn(&InvokeRequest) -> Result<ProviderOutput, ProviderError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            script: Mutex::new(Vec::new()),
            responder: Some(Box::new(f)),
            delay: None,
            stream_script: Mutex::new(None),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn text(name: &str, text: &str) -> Self {
        Self::new(name, vec![Ok(ProviderOutput::message(text))])
    }

    pub fn failing(name: &str, error: ProviderError) -> Self {
        Self::new(name, vec![Err(error)])
    }

    /// Sleep before every answer (the request is recorded first).
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Serve the next `stream` call from `chunks` instead of the script.
    /// With `stall` the stream stays open after the last chunk.
    pub fn with_stream(self, chunks: Vec<StreamChunk>, stall: bool) -> Self {
        *self.stream_script.lock().unwrap() = Some((chunks, stall));
        self
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn modes(&self) -> Vec<InvokeMode> {
        self.requests.lock().unwrap().iter().map(|r| r.mode).collect()
    }

    pub fn requests(&self) -> Vec<InvokeRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProviderAdapter for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, request: InvokeRequest) -> Result<ProviderOutput, ProviderError> {
        self.requests.lock().unwrap().push(request.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(responder) = &self.responder {
            return responder(&request);
        }
        let mut script = self.script.lock().unwrap();
        match script.len() {
            0 => Err(ProviderError::EmptyResponse),
            1 => script[0].clone(),
            _ => script.remove(0),
        }
    }

    async fn stream(
        &self,
        request: InvokeRequest,
    ) -> Result<mpsc::Receiver<Result<StreamChunk, ProviderError>>, ProviderError> {
        let scripted = self.stream_script.lock().unwrap().take();
        let (chunks, stall) = match scripted {
            Some(scripted) => {
                self.requests.lock().unwrap().push(request);
                scripted
            }
            None => {
                let chunk = match self.invoke(request).await? {
                    ProviderOutput::Message { text } => StreamChunk {
                        content: Some(text),
                        done: true,
                        ..Default::default()
                    },
                    ProviderOutput::ToolCall { tool, args } => StreamChunk {
                        tool_call: Some(switchyard_core::ToolCall { tool, args }),
                        done: true,
                        ..Default::default()
                    },
                };
                (vec![chunk], false)
            }
        };

        let (tx, rx) = mpsc::channel(chunks.len().max(1));
        tokio::spawn(async move {
            for chunk in chunks {
                if tx.send(Ok(chunk)).await.is_err() {
                    return;
                }
            }
            if stall {
                tokio::time::sleep(Duration::from_secs(86_400)).await;
                drop(tx);
            }
        });
        Ok(rx)
    }
}

/// A streamed text delta.
pub fn delta(text: &str, done: bool) -> StreamChunk {
    StreamChunk {
        content: Some(text.to_string()),
        done,
        ..Default::default()
    }
}

/// A tool that records its arguments and answers with a fixed payload.
pub struct RecordingTool {
    name: String,
    schema: serde_json::Value,
    class: ToolClass,
    admin_only: bool,
    delay: Option<Duration>,
    calls: Mutex<Vec<serde_json::Value>>,
}

impl RecordingTool {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.into(),
            schema: serde_json::json!({"type": "object", "properties": {}}),
            class: ToolClass::Standard,
            admin_only: false,
            delay: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_schema(mut self, schema: serde_json::Value) -> Self {
        self.schema = schema;
        self
    }

    pub fn with_class(mut self, class: ToolClass) -> Self {
        self.class = class;
        self
    }

    pub fn admin(mut self) -> Self {
        self.admin_only = true;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<serde_json::Value> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Tool for RecordingTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "test tool"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        self.schema.clone()
    }

    fn admin_only(&self) -> bool {
        self.admin_only
    }

    fn class(&self) -> ToolClass {
        self.class
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<String, ToolError> {
        self.calls.lock().unwrap().push(arguments);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(format!("{} ok", self.name))
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<(String, String)>>,
}

impl RecordingNotifier {
    pub fn texts(&self) -> Vec<String> {
        self.sent.lock().unwrap().iter().map(|(_, t)| t.clone()).collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, conversation_id: &ConversationId, text: &str) -> Result<(), String> {
        self.sent
            .lock()
            .unwrap()
            .push((conversation_id.to_string(), text.to_string()));
        Ok(())
    }
}

/// Tiers used by the fixtures: `standard` is served by `big` with `backup`
/// behind it (registered only by tests that need it), the router tier
/// `economy` by `small`.
pub fn test_tiers() -> HashMap<String, Vec<TierCandidate>> {
    let mut tiers = HashMap::new();
    tiers.insert(
        "standard".into(),
        vec![
            TierCandidate::new("big", "big-model"),
            TierCandidate::new("backup", "backup-model"),
        ],
    );
    tiers.insert("premium".into(), vec![TierCandidate::new("big", "big-model")]);
    tiers.insert("economy".into(), vec![TierCandidate::new("small", "small-model")]);
    tiers
}

pub fn expensive_candidates() -> Vec<TierCandidate> {
    vec![TierCandidate::new("big", "big-model")]
}

/// Everything a chain needs, with knobs for each test.
pub struct Fixture {
    pub providers: Vec<Arc<ScriptedProvider>>,
    pub tools: ToolRegistry,
    pub policy: Arc<dyn PermissionPolicy>,
    pub notifier: Arc<dyn Notifier>,
    pub chain: ChainConfig,
}

impl Fixture {
    pub fn new(providers: Vec<Arc<ScriptedProvider>>) -> Self {
        Self {
            providers,
            tools: ToolRegistry::new(),
            policy: Arc::new(AllowAll),
            notifier: Arc::new(NoopNotifier),
            chain: ChainConfig {
                hybrid: false,
                ..Default::default()
            },
        }
    }

    pub fn tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.register(tool);
        self
    }

    pub fn invoker(&self) -> Arc<FailoverInvoker> {
        let context = Arc::new(ResilienceContext::new(
            HealthConfig::default(),
            &RateLimitConfig::default(),
            None,
        ));
        let mut registry = ProviderRegistry::new();
        for p in &self.providers {
            registry.register(p.clone() as Arc<dyn ProviderAdapter>);
        }
        Arc::new(FailoverInvoker::new(context, Arc::new(registry)))
    }

    pub fn selector() -> Arc<TierSelector> {
        Arc::new(TierSelector::new(test_tiers(), RoutingConfig::default()))
    }

    pub fn engine(self) -> ChainEngine {
        let invoker = self.invoker();
        ChainEngine::new(invoker, Self::selector(), Arc::new(self.tools), self.policy)
            .with_notifier(self.notifier)
            .with_config(self.chain)
    }
}
