//! The tool-chain engine.
//!
//! A chain alternates between asking a model what to do next and running
//! the tool it picked, until the model answers with a message or a bound is
//! hit:
//!
//! ```text
//! AwaitingOutput ──message──▶ Terminal
//!       │
//!   tool_call
//!       ▼
//!   Executing ──result──▶ AwaitingOutput ...
//! ```
//!
//! Every tool call passes a fixed sequence of guards before it runs. Guard
//! and execution failures come back as tagged [`ToolResult`] errors: the
//! corrective ones are fed to the model, the terminal ones stop the chain.
//!
//! In hybrid mode a cheap router tier decides whether another tool call is
//! needed after each result, and the expensive tier only composes the final
//! reply.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use switchyard_config::{ChainConfig, TierCandidate};
use switchyard_core::{
    CallerClass, ConversationId, DomainEvent, EventBus, InvokeMode, InvokeRequest, NoopNotifier,
    Notifier, PermissionPolicy, ProviderOutput, ToolCall, ToolClass, ToolErrorKind, ToolExchange,
    ToolRegistry, ToolResult, Turn,
};
use switchyard_providers::{Exhausted, FailoverInvoker, Invocation, TierSelector};
use switchyard_tools::{PlaceholderGuard, normalize};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::interrupt::InterruptToken;

/// Reply returned by a chain that a newer request superseded.
pub const INTERRUPTED_NOTICE: &str =
    "Stopped: a newer request for this conversation took over before I finished.";

const PROGRESS_TIMEOUT: Duration = Duration::from_secs(5);

/// Time the summary pass gets once the wall-clock bound is spent.
pub const SUMMARY_GRACE: Duration = Duration::from_secs(10);

/// Why a chain stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalReason {
    /// The model answered with a message
    Message,
    /// Step bound reached
    ChainLimit,
    /// Wall-clock bound reached
    Timeout,
    /// A newer request for the conversation took over
    Interrupted,
    /// A permission check or hard block stopped the chain
    PolicyStop,
    /// The model produced an unusable tool call
    Malformed,
}

impl TerminalReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Message => "message",
            Self::ChainLimit => "chain_limit",
            Self::Timeout => "timeout",
            Self::Interrupted => "interrupted",
            Self::PolicyStop => "policy_stop",
            Self::Malformed => "malformed",
        }
    }
}

impl std::fmt::Display for TerminalReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Step and time bounds for one chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainBudget {
    pub max_steps: usize,
    pub max_duration: Duration,
}

impl ChainBudget {
    /// Unattended callers get the shorter background bounds.
    pub fn for_caller(config: &ChainConfig, class: CallerClass) -> Self {
        match class {
            CallerClass::Interactive => Self {
                max_steps: config.max_steps,
                max_duration: Duration::from_secs(config.max_duration_secs),
            },
            CallerClass::Background => Self {
                max_steps: config.background_max_steps,
                max_duration: Duration::from_secs(config.background_max_duration_secs),
            },
        }
    }
}

/// Mutable state of a running chain.
#[derive(Debug)]
pub struct ChainState {
    pub tool_history: Vec<ToolExchange>,
    pub steps: usize,
    pub started: Instant,
    pub budget: ChainBudget,
}

impl ChainState {
    pub fn new(budget: ChainBudget) -> Self {
        Self {
            tool_history: Vec::new(),
            steps: 0,
            started: Instant::now(),
            budget,
        }
    }

    /// Wall-clock time left before the duration bound.
    pub fn remaining(&self) -> Duration {
        self.budget.max_duration.saturating_sub(self.started.elapsed())
    }

    /// The bound that has been hit, if any.
    pub fn exceeded(&self) -> Option<TerminalReason> {
        if self.steps >= self.budget.max_steps {
            Some(TerminalReason::ChainLimit)
        } else if self.started.elapsed() >= self.budget.max_duration {
            Some(TerminalReason::Timeout)
        } else {
            None
        }
    }

    fn finish(self, reason: TerminalReason, reply: String, provider: Option<String>) -> ChainOutcome {
        ChainOutcome {
            reply,
            reason,
            steps: self.steps,
            tool_history: self.tool_history,
            provider,
        }
    }
}

/// Input to one chain run.
#[derive(Debug, Clone)]
pub struct ChainRequest {
    pub conversation_id: ConversationId,
    pub message: String,
    pub history: Vec<Turn>,
    pub caller_id: String,
    pub caller_class: CallerClass,
    /// Expensive-tier candidates, in failover order
    pub candidates: Vec<TierCandidate>,
    pub interrupt: InterruptToken,
    /// Output already obtained from the answering tier (a streamed tool
    /// call), taken as the first step instead of asking again
    pub initial: Option<Invocation>,
}

/// How a chain ended.
#[derive(Debug, Clone)]
pub struct ChainOutcome {
    pub reply: String,
    pub reason: TerminalReason,
    pub steps: usize,
    pub tool_history: Vec<ToolExchange>,
    /// Provider that produced the reply, when a model produced it
    pub provider: Option<String>,
}

impl ChainOutcome {
    /// Names of tools that ran successfully, first-use order, no repeats.
    pub fn tools_used(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for exchange in &self.tool_history {
            if exchange.result.is_ok() && !names.contains(&exchange.call.tool) {
                names.push(exchange.call.tool.clone());
            }
        }
        names
    }
}

struct StepContext<'a> {
    request: &'a ChainRequest,
    privileged: bool,
}

pub struct ChainEngine {
    invoker: Arc<FailoverInvoker>,
    selector: Arc<TierSelector>,
    tools: Arc<ToolRegistry>,
    policy: Arc<dyn PermissionPolicy>,
    notifier: Arc<dyn Notifier>,
    guard: PlaceholderGuard,
    config: ChainConfig,
    events: Option<Arc<EventBus>>,
}

impl ChainEngine {
    pub fn new(
        invoker: Arc<FailoverInvoker>,
        selector: Arc<TierSelector>,
        tools: Arc<ToolRegistry>,
        policy: Arc<dyn PermissionPolicy>,
    ) -> Self {
        Self {
            invoker,
            selector,
            tools,
            policy,
            notifier: Arc::new(NoopNotifier),
            guard: PlaceholderGuard::new(),
            config: ChainConfig::default(),
            events: None,
        }
    }

    /// Progress sink notified before each tool runs.
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_config(mut self, config: ChainConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn invoker(&self) -> &Arc<FailoverInvoker> {
        &self.invoker
    }

    pub fn selector(&self) -> &Arc<TierSelector> {
        &self.selector
    }

    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }

    pub fn policy(&self) -> &Arc<dyn PermissionPolicy> {
        &self.policy
    }

    /// Build a request for `mode` carrying the chain's accumulated state.
    pub fn build_request(
        &self,
        request: &ChainRequest,
        tool_history: &[ToolExchange],
        privileged: bool,
        mode: InvokeMode,
        feedback: Option<String>,
    ) -> InvokeRequest {
        InvokeRequest {
            conversation_id: request.conversation_id.clone(),
            message: request.message.clone(),
            history: request.history.clone(),
            tool_history: tool_history.to_vec(),
            privileged,
            model: String::new(),
            tools: if mode.offers_tools() {
                self.tools.definitions(privileged)
            } else {
                Vec::new()
            },
            mode,
            feedback,
        }
    }

    /// Run a chain to completion.
    ///
    /// Returns `Err` only when every candidate of the tier that had to
    /// answer was exhausted.
    pub async fn run(&self, request: ChainRequest) -> Result<ChainOutcome, Exhausted> {
        let privileged = self.policy.is_privileged(&request.caller_id);
        let ctx = StepContext {
            request: &request,
            privileged,
        };
        let mut state = ChainState::new(ChainBudget::for_caller(&self.config, request.caller_class));
        let mut feedback: Option<String> = None;
        let mut hybrid = self.config.hybrid;
        let mut initial = request.initial.clone();

        info!(
            conversation_id = %request.conversation_id,
            caller = %request.caller_id,
            class = request.caller_class.as_str(),
            max_steps = state.budget.max_steps,
            hybrid,
            "Starting chain"
        );

        let outcome = loop {
            if request.interrupt.is_interrupted() {
                break state.finish(TerminalReason::Interrupted, INTERRUPTED_NOTICE.into(), None);
            }
            if let Some(reason) = state.exceeded() {
                break self.forced_summary(&ctx, state, reason).await;
            }

            let (invocation, routed) = match initial.take() {
                Some(invocation) => (invocation, false),
                None => {
                    let decided = tokio::time::timeout(
                        state.remaining(),
                        self.decide(&ctx, &state, feedback.take(), &mut hybrid),
                    )
                    .await;
                    match decided {
                        Ok(decided) => decided?,
                        Err(_) => {
                            warn!(
                                conversation_id = %request.conversation_id,
                                steps = state.steps,
                                "Model call outlasted the wall-clock bound"
                            );
                            break self.forced_summary(&ctx, state, TerminalReason::Timeout).await;
                        }
                    }
                }
            };

            if request.interrupt.is_interrupted() {
                break state.finish(TerminalReason::Interrupted, INTERRUPTED_NOTICE.into(), None);
            }

            match invocation.output {
                ProviderOutput::Message { text } => {
                    if routed {
                        debug!(conversation_id = %request.conversation_id, "Router says done, composing");
                        break self.compose(&ctx, state).await?;
                    }
                    break state.finish(TerminalReason::Message, text, Some(invocation.provider));
                }
                ProviderOutput::ToolCall { tool, args } => {
                    let call = ToolCall { tool, args };
                    state.steps += 1;
                    debug!(
                        conversation_id = %request.conversation_id,
                        step = state.steps,
                        tool = %call.tool,
                        provider = %invocation.provider,
                        "Tool call"
                    );
                    let result = self.execute(&ctx, &call, state.remaining()).await;

                    if let ToolResult::Err { kind, detail } = &result {
                        if result.is_terminal() {
                            let reason = if *kind == ToolErrorKind::Malformed {
                                TerminalReason::Malformed
                            } else {
                                TerminalReason::PolicyStop
                            };
                            let reply = terminal_reply(&call.tool, *kind, detail);
                            state.tool_history.push(ToolExchange { call, result });
                            break state.finish(reason, reply, None);
                        }
                        feedback = Some(result.render());
                    }
                    state.tool_history.push(ToolExchange { call, result });
                }
            }
        };

        info!(
            conversation_id = %request.conversation_id,
            reason = %outcome.reason,
            steps = outcome.steps,
            "Chain finished"
        );
        if let Some(events) = &self.events {
            events.publish(DomainEvent::ChainFinished {
                conversation_id: request.conversation_id.to_string(),
                reason: outcome.reason.as_str().into(),
                steps: outcome.steps,
                timestamp: Utc::now(),
            });
        }
        Ok(outcome)
    }

    /// Ask the router (hybrid, after the first step) or the expensive tier
    /// what to do next. A router tier with nothing available, or a failed
    /// router pass, switches the chain to the expensive tier for good.
    async fn decide(
        &self,
        ctx: &StepContext<'_>,
        state: &ChainState,
        feedback: Option<String>,
        hybrid: &mut bool,
    ) -> Result<(Invocation, bool), Exhausted> {
        if *hybrid && (state.steps > 0 || self.config.router_first) {
            let snapshot = self.invoker.context().snapshot();
            let plan = self.selector.router_plan(&snapshot);
            if plan.candidates.iter().any(|c| snapshot.is_available(&c.provider)) {
                let request = self.build_request(
                    ctx.request,
                    &state.tool_history,
                    ctx.privileged,
                    InvokeMode::Route,
                    feedback.clone(),
                );
                match self.invoker.invoke(&request, &plan.candidates).await {
                    Ok(invocation) => return Ok((invocation, true)),
                    Err(e) => warn!(tier = %plan.tier, error = %e, "Router pass failed, using expensive tier"),
                }
            } else {
                warn!(tier = %plan.tier, "Router tier unavailable, using expensive tier");
            }
            *hybrid = false;
        }

        let request = self.build_request(
            ctx.request,
            &state.tool_history,
            ctx.privileged,
            InvokeMode::Full,
            feedback,
        );
        let invocation = self.invoker.invoke(&request, &ctx.request.candidates).await?;
        Ok((invocation, false))
    }

    /// Expensive-tier pass composing the reply from the tool history.
    async fn compose(&self, ctx: &StepContext<'_>, state: ChainState) -> Result<ChainOutcome, Exhausted> {
        let request = self.build_request(
            ctx.request,
            &state.tool_history,
            ctx.privileged,
            InvokeMode::Compose,
            None,
        );
        let composed = tokio::time::timeout(
            state.remaining(),
            self.invoker.invoke(&request, &ctx.request.candidates),
        )
        .await;
        let Ok(invocation) = composed else {
            warn!("Compose pass outlasted the wall-clock bound, summarizing instead");
            let reply = fallback_summary(&state, TerminalReason::Timeout);
            return Ok(state.finish(TerminalReason::Timeout, reply, None));
        };
        let invocation = invocation?;
        match invocation.output {
            ProviderOutput::Message { text } => {
                Ok(state.finish(TerminalReason::Message, text, Some(invocation.provider)))
            }
            ProviderOutput::ToolCall { tool, .. } => {
                warn!(tool = %tool, "Compose pass asked for a tool, summarizing instead");
                let reply = fallback_summary(&state, TerminalReason::Message);
                Ok(state.finish(TerminalReason::Message, reply, None))
            }
        }
    }

    /// One summarization pass with no tools offered, bounded by what is left
    /// of the wall clock but never less than [`SUMMARY_GRACE`]. Never fails:
    /// if the model cannot summarize in time, the history is summarized
    /// deterministically.
    async fn forced_summary(
        &self,
        ctx: &StepContext<'_>,
        state: ChainState,
        reason: TerminalReason,
    ) -> ChainOutcome {
        warn!(
            conversation_id = %ctx.request.conversation_id,
            reason = %reason,
            steps = state.steps,
            "Chain bound reached, forcing summary"
        );
        let request = self.build_request(
            ctx.request,
            &state.tool_history,
            ctx.privileged,
            InvokeMode::Summarize,
            None,
        );
        let allowed = state.remaining().max(SUMMARY_GRACE);
        let summarized =
            tokio::time::timeout(allowed, self.invoker.invoke(&request, &ctx.request.candidates)).await;
        match summarized {
            Ok(Ok(Invocation {
                output: ProviderOutput::Message { text },
                provider,
                ..
            })) if !text.trim().is_empty() => state.finish(reason, text, Some(provider)),
            Ok(Ok(_)) => {
                warn!("Summary pass returned no text, using fallback summary");
                let reply = fallback_summary(&state, reason);
                state.finish(reason, reply, None)
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Summary pass failed, using fallback summary");
                let reply = fallback_summary(&state, reason);
                state.finish(reason, reply, None)
            }
            Err(_) => {
                warn!(allowed_secs = allowed.as_secs(), "Summary pass timed out, using fallback summary");
                let reply = fallback_summary(&state, reason);
                state.finish(reason, reply, None)
            }
        }
    }

    /// Guard, then run, one tool call. The run is cut off at the tool's own
    /// timeout or at `budget_left`, whichever comes first.
    async fn execute(&self, ctx: &StepContext<'_>, call: &ToolCall, budget_left: Duration) -> ToolResult {
        let name = call.tool.as_str();
        let caller = ctx.request.caller_id.as_str();

        if !is_valid_tool_name(name) {
            return ToolResult::err(
                ToolErrorKind::Malformed,
                format!("'{}' is not a valid tool name", name.escape_debug()),
            );
        }

        let tool = self.tools.lookup(name);

        let admin_denied = tool
            .as_ref()
            .is_some_and(|t| t.admin_only() && !ctx.privileged);
        if admin_denied || !self.policy.is_tool_permitted(name, caller) {
            warn!(tool = %name, caller = %caller, "Tool call not permitted");
            return ToolResult::err(
                ToolErrorKind::PermissionDenied,
                format!("caller '{caller}' is not permitted to run '{name}'"),
            );
        }

        if let Some(explanation) = self.policy.hard_block(name, ctx.request.caller_class) {
            return ToolResult::err(ToolErrorKind::Blocked, explanation);
        }

        let Some(tool) = tool else {
            return ToolResult::err(ToolErrorKind::UnknownTool, unknown_tool_detail(name, &self.tools.names()));
        };

        let normalized = normalize(name, &call.args, &tool.parameters_schema());
        if let Some(error) = normalized.error {
            return ToolResult::err(ToolErrorKind::InvalidArguments, error);
        }

        if tool.class() == ToolClass::Communication
            && let Some(found) = self.guard.check_args(&normalized.args)
        {
            return ToolResult::err(
                ToolErrorKind::Placeholder,
                format!(
                    "the text contains the unfilled placeholder '{}'; replace it with the real value before sending",
                    found.token
                ),
            );
        }

        self.progress(&ctx.request.conversation_id, name).await;

        let class_timeout = self.tool_timeout(tool.class());
        let timeout = class_timeout.min(budget_left);
        let started = Instant::now();
        let result = match tokio::time::timeout(timeout, tool.execute(normalized.args)).await {
            Ok(Ok(payload)) => ToolResult::ok(payload),
            Ok(Err(e)) => ToolResult::err(ToolErrorKind::ExecutionFailed, e.to_string()),
            Err(_) if timeout < class_timeout => ToolResult::err(
                ToolErrorKind::Timeout,
                format!("'{name}' was cut off when the chain ran out of time"),
            ),
            Err(_) => ToolResult::err(
                ToolErrorKind::Timeout,
                format!("'{name}' did not finish within {}s", timeout.as_secs()),
            ),
        };
        let duration_ms = started.elapsed().as_millis() as u64;

        debug!(tool = %name, success = result.is_ok(), duration_ms, "Tool executed");
        if let Some(events) = &self.events {
            events.publish(DomainEvent::ToolExecuted {
                tool_name: name.to_string(),
                success: result.is_ok(),
                duration_ms,
                timestamp: Utc::now(),
            });
        }
        result
    }

    fn tool_timeout(&self, class: ToolClass) -> Duration {
        match class {
            ToolClass::Standard => Duration::from_secs(self.config.tool_timeout_secs),
            ToolClass::IoHeavy | ToolClass::Communication => {
                Duration::from_secs(self.config.io_tool_timeout_secs)
            }
        }
    }

    async fn progress(&self, conversation_id: &ConversationId, tool: &str) {
        let text = format!("Running tool {tool}…");
        match tokio::time::timeout(PROGRESS_TIMEOUT, self.notifier.notify(conversation_id, &text)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(tool = %tool, error = %e, "Progress notification failed"),
            Err(_) => debug!(tool = %tool, "Progress notification timed out"),
        }
    }
}

fn is_valid_tool_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 64
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
}

fn terminal_reply(tool: &str, kind: ToolErrorKind, detail: &str) -> String {
    match kind {
        ToolErrorKind::Malformed => {
            format!("I couldn't complete that: the model produced an unusable tool call ({detail}).")
        }
        _ => format!("I can't run '{tool}': {detail}"),
    }
}

/// "Unknown tool" feedback naming the closest registered tools.
fn unknown_tool_detail(name: &str, known: &[&str]) -> String {
    if known.is_empty() {
        return format!("unknown tool '{name}'; no tools are available");
    }
    let mut ranked: Vec<(usize, &str)> = known
        .iter()
        .map(|k| (edit_distance(&name.to_lowercase(), &k.to_lowercase()), *k))
        .collect();
    ranked.sort();
    let nearest: Vec<&str> = ranked.into_iter().take(3).map(|(_, k)| k).collect();
    format!(
        "unknown tool '{name}'. Did you mean one of: {}?",
        nearest.join(", ")
    )
}

fn edit_distance(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    for (i, ca) in a.chars().enumerate() {
        let mut curr = vec![i + 1; b.len() + 1];
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != *cb);
            curr[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        prev = curr;
    }
    prev[b.len()]
}

/// Summary built from the tool history alone.
pub fn fallback_summary(state: &ChainState, reason: TerminalReason) -> String {
    let opening = match reason {
        TerminalReason::ChainLimit => {
            format!("I hit the limit of {} steps before finishing", state.budget.max_steps)
        }
        TerminalReason::Timeout => "I ran out of time before finishing".to_string(),
        _ => "I stopped before finishing".to_string(),
    };

    if state.tool_history.is_empty() {
        return format!("{opening}, and no tools completed.");
    }

    let mut out = format!("{opening}. Here is what I got done:");
    for exchange in &state.tool_history {
        let (status, text) = match &exchange.result {
            ToolResult::Ok { payload } => ("ok", payload.as_str()),
            ToolResult::Err { detail, .. } => ("failed", detail.as_str()),
        };
        let excerpt: String = text.chars().take(160).collect();
        out.push_str(&format!("\n- {} ({status}): {excerpt}", exchange.call.tool));
    }
    out
}
