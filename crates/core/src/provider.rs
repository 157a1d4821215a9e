//! Provider adapter trait: the abstraction over LLM backends.
//!
//! An adapter sends one request to a backend and returns either a final
//! message or a single tool call. Adapters must not panic on ordinary
//! failures; they report them as [`ProviderError`] so the failover layer can
//! classify and route around them.
//!
//! Implementations: OpenAI-compatible endpoints, scripted test providers.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::message::{ConversationId, Turn};
use crate::tool::{ToolCall, ToolExchange};

/// What an invocation is for. Adapters may use it to shape the prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvokeMode {
    /// Normal step: the model may answer or call a tool.
    Full,
    /// Cheap router pass: only decide whether another tool call is needed.
    Route,
    /// Compose the final reply from the accumulated tool history. No tools.
    Compose,
    /// Forced best-effort summary after a chain bound was hit. No tools.
    Summarize,
}

impl InvokeMode {
    /// Whether tool definitions should be offered for this mode.
    pub fn offers_tools(&self) -> bool {
        matches!(self, Self::Full | Self::Route)
    }
}

/// A tool definition sent to the model so it knows what it can call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// The tool name
    pub name: String,

    /// Description of what the tool does
    pub description: String,

    /// JSON Schema describing the tool's parameters
    pub parameters: serde_json::Value,
}

/// One request to one backend.
#[derive(Debug, Clone)]
pub struct InvokeRequest {
    /// Conversation the request belongs to (adapters key sessions on it)
    pub conversation_id: ConversationId,

    /// The user's message for this turn
    pub message: String,

    /// Recent transcript, oldest first
    pub history: Vec<Turn>,

    /// Tool calls and results accumulated in the current chain
    pub tool_history: Vec<ToolExchange>,

    /// Whether the caller is privileged (admin tools are offered)
    pub privileged: bool,

    /// Model identifier for this backend
    pub model: String,

    /// Tools the model may call
    pub tools: Vec<ToolDefinition>,

    /// Purpose of this invocation
    pub mode: InvokeMode,

    /// Corrective note for the model (validation errors, guard feedback)
    pub feedback: Option<String>,
}

impl InvokeRequest {
    /// A plain request with no history, tools or feedback.
    pub fn new(
        conversation_id: ConversationId,
        message: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            conversation_id,
            message: message.into(),
            history: Vec::new(),
            tool_history: Vec::new(),
            privileged: false,
            model: model.into(),
            tools: Vec::new(),
            mode: InvokeMode::Full,
            feedback: None,
        }
    }
}

/// What a backend produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderOutput {
    /// A natural-language message.
    Message { text: String },
    /// A request to run one tool.
    ToolCall {
        tool: String,
        #[serde(default)]
        args: serde_json::Value,
    },
}

impl ProviderOutput {
    pub fn message(text: impl Into<String>) -> Self {
        Self::Message { text: text.into() }
    }

    pub fn tool_call(tool: impl Into<String>, args: serde_json::Value) -> Self {
        Self::ToolCall {
            tool: tool.into(),
            args,
        }
    }

    /// Degenerate output: an empty or whitespace-only message.
    pub fn is_degenerate(&self) -> bool {
        match self {
            Self::Message { text } => text.trim().is_empty(),
            Self::ToolCall { .. } => false,
        }
    }

    /// The message text, if this is a message.
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Message { text } => Some(text),
            Self::ToolCall { .. } => None,
        }
    }

    pub fn into_tool_call(self) -> Option<ToolCall> {
        match self {
            Self::ToolCall { tool, args } => Some(ToolCall { tool, args }),
            Self::Message { .. } => None,
        }
    }
}

/// A single chunk in a streaming response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamChunk {
    /// Partial content delta
    #[serde(default)]
    pub content: Option<String>,

    /// A complete tool call, once the stream has assembled one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call: Option<ToolCall>,

    /// Whether this is the final chunk
    #[serde(default)]
    pub done: bool,
}

/// The core adapter trait every LLM backend implements.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// A stable identifier for this backend (e.g., "openrouter", "groq").
    fn name(&self) -> &str;

    /// Send a request and get the model's output.
    async fn invoke(&self, request: InvokeRequest) -> Result<ProviderOutput, ProviderError>;

    /// Send a request and get a stream of chunks.
    ///
    /// Default implementation calls `invoke()` and wraps the result as a
    /// single chunk.
    async fn stream(
        &self,
        request: InvokeRequest,
    ) -> Result<tokio::sync::mpsc::Receiver<Result<StreamChunk, ProviderError>>, ProviderError>
    {
        let output = self.invoke(request).await?;
        let (tx, rx) = tokio::sync::mpsc::channel(1);
        let chunk = match output {
            ProviderOutput::Message { text } => StreamChunk {
                content: Some(text),
                tool_call: None,
                done: true,
            },
            ProviderOutput::ToolCall { tool, args } => StreamChunk {
                content: None,
                tool_call: Some(ToolCall { tool, args }),
                done: true,
            },
        };
        let _ = tx.send(Ok(chunk)).await;
        Ok(rx)
    }

    /// Drop any server-side or cached session for the conversation.
    async fn reset_session(&self, _conversation_id: &ConversationId) -> Result<(), ProviderError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn degenerate_detection() {
        assert!(ProviderOutput::message("   \n").is_degenerate());
        assert!(!ProviderOutput::message("hi").is_degenerate());
        assert!(!ProviderOutput::tool_call("x", serde_json::json!({})).is_degenerate());
    }

    #[test]
    fn output_serialization_is_tagged() {
        let out = ProviderOutput::tool_call("current_time", serde_json::json!({"tz": "UTC"}));
        let json = serde_json::to_string(&out).unwrap();
        assert!(json.contains(r#""type":"tool_call""#));
        assert!(json.contains("current_time"));
    }

    #[test]
    fn modes_offering_tools() {
        assert!(InvokeMode::Full.offers_tools());
        assert!(InvokeMode::Route.offers_tools());
        assert!(!InvokeMode::Compose.offers_tools());
        assert!(!InvokeMode::Summarize.offers_tools());
    }

    struct Fixed;

    #[async_trait]
    impl ProviderAdapter for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn invoke(&self, _request: InvokeRequest) -> Result<ProviderOutput, ProviderError> {
            Ok(ProviderOutput::message("hello"))
        }
    }

    #[tokio::test]
    async fn default_stream_wraps_invoke() {
        let req = InvokeRequest::new(ConversationId::from("c"), "hi", "m");
        let mut rx = Fixed.stream(req).await.unwrap();
        let chunk = rx.recv().await.unwrap().unwrap();
        assert_eq!(chunk.content.as_deref(), Some("hello"));
        assert!(chunk.done);
    }
}
