//! The request entry point.
//!
//! [`Orchestrator::handle_request`] takes a message from any caller and
//! always returns user-visible text. It registers the request with the
//! interrupt registry, stores the user turn, picks a tier, runs the tool
//! chain through the failover invoker and stores the reply. Replies are
//! handed to the commitment supervisor in the background.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use switchyard_commitments::CommitmentSupervisor;
use switchyard_core::{
    CallerClass, ConversationId, ConversationStore, InvokeMode, ProviderError, ProviderOutput,
    Turn, spawn_background,
};
use switchyard_providers::tier::strip_override;
use switchyard_providers::{Admission, Exhausted, Invocation};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::chain::{ChainEngine, ChainRequest, INTERRUPTED_NOTICE, TerminalReason};
use crate::interrupt::InterruptRegistry;
use crate::stream_event::{StreamEvent, SwitchReason};

const EMPTY_REPLY: &str = "I don't have an answer for that.";

/// Text returned when every candidate of the answering tier failed.
pub fn exhausted_reply(retry_eta: Duration) -> String {
    let minutes = retry_eta.as_secs().div_ceil(60).max(1);
    let window = if minutes == 1 {
        "about a minute".to_string()
    } else {
        format!("about {minutes} minutes")
    };
    format!(
        "Sorry, none of my language models are reachable right now. Please try again in {window}."
    )
}

/// A reply on its way back to the caller.
struct Reply {
    text: String,
    tools_used: Vec<String>,
    interrupted: bool,
}

impl Reply {
    fn exhausted(e: &Exhausted) -> Self {
        warn!(
            attempts = e.attempts.len(),
            retry_secs = e.retry_eta.as_secs(),
            "Every provider failed, apologizing"
        );
        Self {
            text: exhausted_reply(e.retry_eta),
            tools_used: Vec::new(),
            interrupted: false,
        }
    }
}

enum StreamAttempt {
    Finished(String),
    /// Hand over to the chain, with the tool call that caused it, if any
    Switch(SwitchReason, Option<Invocation>),
    Interrupted,
    Exhausted(Exhausted),
}

pub struct Orchestrator {
    engine: ChainEngine,
    turns: Arc<dyn ConversationStore>,
    supervisor: Option<Arc<CommitmentSupervisor>>,
    interrupts: InterruptRegistry,
}

impl Orchestrator {
    pub fn new(engine: ChainEngine, turns: Arc<dyn ConversationStore>) -> Self {
        Self {
            engine,
            turns,
            supervisor: None,
            interrupts: InterruptRegistry::new(),
        }
    }

    /// Hand every stored reply to `supervisor` for promise tracking.
    pub fn with_supervisor(mut self, supervisor: Arc<CommitmentSupervisor>) -> Self {
        self.supervisor = Some(supervisor);
        self
    }

    pub fn engine(&self) -> &ChainEngine {
        &self.engine
    }

    /// Stop whatever chain is running for the conversation.
    pub fn interrupt(&self, conversation_id: &ConversationId) {
        self.interrupts.interrupt(conversation_id);
    }

    /// Handle one message. Never fails and never returns empty text.
    pub async fn handle_request(
        &self,
        conversation_id: &ConversationId,
        text: &str,
        caller_id: &str,
        context_hint: Option<&str>,
    ) -> String {
        let request = self
            .prepare(conversation_id, text, caller_id, context_hint)
            .await;
        let token = request.interrupt.clone();
        let reply = self.run_chain(request).await;
        let text = self.finish(conversation_id, reply).await;
        self.interrupts.finish(conversation_id, &token);
        text
    }

    /// Like [`handle_request`](Self::handle_request), forwarding text deltas
    /// to `sink` while the model streams. Text is held back until it is too
    /// long to be a rate-limit notice. If the model asks for a tool, the
    /// tool chain takes over starting from that call. The last event is
    /// always [`StreamEvent::Done`] carrying the full reply.
    pub async fn handle_request_stream(
        &self,
        conversation_id: &ConversationId,
        text: &str,
        caller_id: &str,
        context_hint: Option<&str>,
        sink: mpsc::Sender<StreamEvent>,
    ) -> String {
        let request = self
            .prepare(conversation_id, text, caller_id, context_hint)
            .await;
        let token = request.interrupt.clone();

        let reply = match self.stream_attempt(&request, &sink).await {
            StreamAttempt::Finished(text) => Reply {
                text,
                tools_used: Vec::new(),
                interrupted: false,
            },
            StreamAttempt::Interrupted => Reply {
                text: INTERRUPTED_NOTICE.into(),
                tools_used: Vec::new(),
                interrupted: true,
            },
            StreamAttempt::Exhausted(e) => Reply::exhausted(&e),
            StreamAttempt::Switch(reason, initial) => {
                debug!(conversation_id = %conversation_id, ?reason, "Switching stream to chain");
                emit(&sink, StreamEvent::SwitchedToChain { reason }).await;
                self.run_chain(ChainRequest { initial, ..request }).await
            }
        };

        let text = self.finish(conversation_id, reply).await;
        self.interrupts.finish(conversation_id, &token);
        emit(&sink, StreamEvent::Done { text: text.clone() }).await;
        text
    }

    async fn prepare(
        &self,
        conversation_id: &ConversationId,
        text: &str,
        caller_id: &str,
        context_hint: Option<&str>,
    ) -> ChainRequest {
        let interrupt = self.interrupts.begin(conversation_id);
        let caller_class = CallerClass::from_hint(context_hint);

        let history = match self
            .turns
            .read_recent_turns(conversation_id, self.engine.config().history_turns)
            .await
        {
            Ok(turns) => turns,
            Err(e) => {
                warn!(conversation_id = %conversation_id, error = %e, "Could not read history");
                Vec::new()
            }
        };
        if let Err(e) = self.turns.append_turn(Turn::user(conversation_id, text)).await {
            warn!(conversation_id = %conversation_id, error = %e, "Could not store user turn");
        }

        let snapshot = self.engine.invoker().context().snapshot();
        let plan = self.engine.selector().select(text, caller_class, &snapshot);
        info!(
            conversation_id = %conversation_id,
            caller = %caller_id,
            class = caller_class.as_str(),
            tier = %plan.tier,
            reason = ?plan.reason,
            candidates = plan.candidates.len(),
            "Handling request"
        );

        ChainRequest {
            conversation_id: conversation_id.clone(),
            message: strip_override(text),
            history,
            caller_id: caller_id.to_string(),
            caller_class,
            candidates: plan.candidates,
            interrupt,
            initial: None,
        }
    }

    async fn run_chain(&self, request: ChainRequest) -> Reply {
        match self.engine.run(request).await {
            Ok(outcome) => Reply {
                tools_used: outcome.tools_used(),
                interrupted: outcome.reason == TerminalReason::Interrupted,
                text: outcome.reply,
            },
            Err(e) => Reply::exhausted(&e),
        }
    }

    /// Open a stream on the answering tier and forward its text.
    ///
    /// Deltas are buffered while the text is short enough to be a disguised
    /// rate-limit notice; past that window they are forwarded as they come.
    /// Every wait for a chunk is bounded by the invoker's call timeout.
    async fn stream_attempt(
        &self,
        request: &ChainRequest,
        sink: &mpsc::Sender<StreamEvent>,
    ) -> StreamAttempt {
        let privileged = self.engine.policy().is_privileged(&request.caller_id);
        let invoke = self
            .engine
            .build_request(request, &[], privileged, InvokeMode::Full, None);
        let invoker = self.engine.invoker();

        let mut handle = match invoker.invoke_stream(&invoke, &request.candidates).await {
            Ok(handle) => handle,
            Err(e) => return StreamAttempt::Exhausted(e),
        };

        let window = invoker.context().notice_window();
        let mut text = String::new();
        let mut released = 0;
        loop {
            if request.interrupt.is_interrupted() {
                return StreamAttempt::Interrupted;
            }
            let next = match tokio::time::timeout(invoker.timeout(), handle.chunks.recv()).await {
                Ok(next) => next,
                Err(_) => Some(Err(ProviderError::Timeout(format!(
                    "Provider '{}' stream stalled for {}s",
                    handle.provider,
                    invoker.timeout().as_secs()
                )))),
            };
            match next {
                Some(Ok(chunk)) => {
                    if let Some(call) = chunk.tool_call {
                        let initial = Invocation {
                            output: ProviderOutput::tool_call(call.tool, call.args),
                            provider: handle.provider,
                            model: handle.model,
                        };
                        return StreamAttempt::Switch(SwitchReason::ToolCall, Some(initial));
                    }
                    if let Some(delta) = chunk.content {
                        text.push_str(&delta);
                    }
                    if window.is_some_and(|w| text.trim().len() > w) && released < text.len() {
                        emit(sink, StreamEvent::Chunk {
                            content: text[released..].to_string(),
                        })
                        .await;
                        released = text.len();
                    }
                    if chunk.done {
                        break;
                    }
                }
                Some(Err(e)) => {
                    warn!(provider = %handle.provider, error = %e, "Stream broke mid-reply");
                    invoker
                        .context()
                        .record_failure(&handle.provider, &e, Admission::Call);
                    return StreamAttempt::Switch(SwitchReason::StreamFailed, None);
                }
                None => break,
            }
        }

        if text.trim().is_empty() {
            return StreamAttempt::Switch(SwitchReason::Unusable, None);
        }
        if let Some(notice) = invoker.context().detect_rate_limit_text(&text) {
            let error = ProviderError::ApiError {
                status_code: 429,
                message: format!("rate-limit notice in stream: '{}'", notice.phrase),
            };
            invoker
                .context()
                .record_failure(&handle.provider, &error, Admission::Call);
            return StreamAttempt::Switch(SwitchReason::Unusable, None);
        }
        if released < text.len() {
            emit(sink, StreamEvent::Chunk {
                content: text[released..].to_string(),
            })
            .await;
        }
        StreamAttempt::Finished(text)
    }

    /// Store the reply and queue it for commitment tracking. Interrupted
    /// replies are returned but not stored.
    async fn finish(&self, conversation_id: &ConversationId, reply: Reply) -> String {
        if reply.interrupted {
            return reply.text;
        }
        let text = if reply.text.trim().is_empty() {
            EMPTY_REPLY.to_string()
        } else {
            reply.text
        };

        let turn = Turn::assistant(conversation_id, text.as_str()).with_tool_calls(reply.tools_used);
        match self.turns.append_turn(turn).await {
            Ok(seq) => self.track_commitment(conversation_id, &text, seq),
            Err(e) => {
                warn!(conversation_id = %conversation_id, error = %e, "Could not store assistant turn");
            }
        }
        text
    }

    fn track_commitment(&self, conversation_id: &ConversationId, text: &str, seq: u64) {
        let Some(supervisor) = self.supervisor.clone() else {
            return;
        };
        let conversation_id = conversation_id.clone();
        let text = text.to_string();
        spawn_background("record_commitment", async move {
            supervisor
                .record_output(&conversation_id, &text, seq, Utc::now())
                .await
                .map(|_| ())
        });
    }
}

async fn emit(sink: &mpsc::Sender<StreamEvent>, event: StreamEvent) {
    if sink.send(event).await.is_err() {
        debug!("Stream receiver dropped");
    }
}
