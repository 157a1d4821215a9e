//! OpenAI-compatible provider adapter.
//!
//! Works with OpenRouter, OpenAI, Groq, Together, Ollama, vLLM and any other
//! endpoint exposing `/v1/chat/completions`.
//!
//! Supports:
//! - Chat completions (non-streaming and streaming SSE)
//! - Tool use / function calling (first tool call wins)
//! - `Retry-After` on HTTP 429

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use switchyard_core::{
    InvokeMode, InvokeRequest, ProviderAdapter, ProviderError, ProviderOutput, Role, StreamChunk,
    ToolCall, ToolDefinition,
};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

const ROUTE_INSTRUCTION: &str = "You are routing a multi-step task. Look at the tool results so far. \
If another tool call is needed, call exactly one tool. Otherwise reply with the single word DONE.";

const COMPOSE_INSTRUCTION: &str = "All needed tools have run. Write the final reply to the user \
from the tool results above. Do not call tools.";

const SUMMARIZE_INSTRUCTION: &str = "The task ran out of steps or time. Summarize what was found \
and what is still missing, using only the tool results above. Do not call tools.";

/// An OpenAI-compatible LLM backend.
pub struct OpenAiCompatProvider {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client,
        }
    }

    /// Create an OpenRouter provider (convenience constructor).
    pub fn openrouter(api_key: impl Into<String>) -> Self {
        Self::new("openrouter", "https://openrouter.ai/api/v1", api_key)
    }

    /// Create a Groq provider (convenience constructor).
    pub fn groq(api_key: impl Into<String>) -> Self {
        Self::new("groq", "https://api.groq.com/openai/v1", api_key)
    }

    /// Flatten a request into chat messages: transcript, the new message,
    /// the chain's tool exchanges, then mode instructions and feedback.
    fn to_api_messages(request: &InvokeRequest) -> Vec<ApiMessage> {
        let mut messages: Vec<ApiMessage> = request
            .history
            .iter()
            .map(|turn| ApiMessage::text(turn.role.as_str(), &turn.content))
            .collect();

        let last_is_same = request
            .history
            .last()
            .is_some_and(|t| t.role == Role::User && t.content == request.message);
        if !last_is_same {
            messages.push(ApiMessage::text("user", &request.message));
        }

        for (i, exchange) in request.tool_history.iter().enumerate() {
            let id = format!("call_{i}");
            messages.push(ApiMessage {
                role: "assistant".into(),
                content: None,
                tool_calls: Some(vec![ApiToolCall {
                    id: id.clone(),
                    r#type: "function".into(),
                    function: ApiFunction {
                        name: exchange.call.tool.clone(),
                        arguments: exchange.call.args.to_string(),
                    },
                }]),
                tool_call_id: None,
            });
            messages.push(ApiMessage {
                role: "tool".into(),
                content: Some(exchange.result.render()),
                tool_calls: None,
                tool_call_id: Some(id),
            });
        }

        let instruction = match request.mode {
            InvokeMode::Full => None,
            InvokeMode::Route => Some(ROUTE_INSTRUCTION),
            InvokeMode::Compose => Some(COMPOSE_INSTRUCTION),
            InvokeMode::Summarize => Some(SUMMARIZE_INSTRUCTION),
        };
        if let Some(text) = instruction {
            messages.push(ApiMessage::text("system", text));
        }
        if let Some(feedback) = &request.feedback {
            messages.push(ApiMessage::text("system", feedback));
        }

        messages
    }

    /// Convert tool definitions to OpenAI API format.
    fn to_api_tools(tools: &[ToolDefinition]) -> Vec<ApiToolDefinition> {
        tools
            .iter()
            .map(|t| ApiToolDefinition {
                r#type: "function".into(),
                function: ApiToolFunction {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.parameters.clone(),
                },
            })
            .collect()
    }

    fn request_body(request: &InvokeRequest, stream: bool) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(request),
            "stream": stream,
        });
        if request.mode.offers_tools() && !request.tools.is_empty() {
            body["tools"] = serde_json::json!(Self::to_api_tools(&request.tools));
        }
        body
    }

    async fn send(
        &self,
        request: &InvokeRequest,
        stream: bool,
    ) -> Result<reqwest::Response, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = Self::request_body(request, stream);

        debug!(provider = %self.name, model = %request.model, stream, "Sending completion request");

        let mut builder = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json");
        if stream {
            builder = builder.header("Accept", "text/event-stream");
        }

        let response = builder.json(&body).send().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Timeout(e.to_string())
            } else {
                ProviderError::Network(e.to_string())
            }
        })?;

        let status = response.status().as_u16();

        if status == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok());
            return Err(match retry_after {
                Some(retry_after_secs) => ProviderError::RateLimited { retry_after_secs },
                None => ProviderError::ApiError {
                    status_code: 429,
                    message: response.text().await.unwrap_or_default(),
                },
            });
        }

        if status == 401 || status == 403 {
            return Err(ProviderError::AuthenticationFailed(
                "Invalid API key or insufficient permissions".into(),
            ));
        }

        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(provider = %self.name, status, body = %error_body, "Provider returned error");
            return Err(ProviderError::ApiError {
                status_code: status,
                message: error_body,
            });
        }

        Ok(response)
    }
}

/// Arguments arrive as a JSON string. Unparseable text is kept as a JSON
/// string so validation rejects it with a structured error.
fn parse_arguments(raw: &str) -> serde_json::Value {
    if raw.trim().is_empty() {
        return serde_json::json!({});
    }
    serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_string()))
}

fn output_from_message(message: ApiMessage) -> ProviderOutput {
    let mut calls = message.tool_calls.unwrap_or_default().into_iter();
    if let Some(first) = calls.next() {
        let extra = calls.count();
        if extra > 0 {
            debug!(dropped = extra, "Only the first tool call is executed per step");
        }
        return ProviderOutput::tool_call(first.function.name, parse_arguments(&first.function.arguments));
    }
    ProviderOutput::message(message.content.unwrap_or_default())
}

#[async_trait]
impl ProviderAdapter for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, request: InvokeRequest) -> Result<ProviderOutput, ProviderError> {
        let response = self.send(&request, false).await?;

        let api_response: ApiResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Malformed(format!("Failed to parse response: {e}")))?;

        let choice = api_response
            .choices
            .into_iter()
            .next()
            .ok_or(ProviderError::EmptyResponse)?;

        Ok(output_from_message(choice.message))
    }

    async fn stream(
        &self,
        request: InvokeRequest,
    ) -> Result<mpsc::Receiver<Result<StreamChunk, ProviderError>>, ProviderError> {
        let response = self.send(&request, true).await?;

        let (tx, rx) = mpsc::channel(64);
        let provider_name = self.name.clone();

        // Read the SSE byte stream and forward parsed chunks
        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            let mut buffer = String::new();
            let mut accumulator: Option<ToolCallAccumulator> = None;

            while let Some(chunk_result) = byte_stream.next().await {
                let bytes = match chunk_result {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx
                            .send(Err(ProviderError::StreamInterrupted(e.to_string())))
                            .await;
                        return;
                    }
                };

                buffer.push_str(&String::from_utf8_lossy(&bytes));

                while let Some(line_end) = buffer.find('\n') {
                    let line = buffer[..line_end].trim_end_matches('\r').to_string();
                    buffer = buffer[line_end + 1..].to_string();

                    if line.is_empty() || line.starts_with(':') {
                        continue;
                    }

                    let Some(data) = line.strip_prefix("data:") else {
                        continue;
                    };
                    let data = data.trim();

                    if data == "[DONE]" {
                        let _ = tx.send(Ok(final_chunk(accumulator.take()))).await;
                        return;
                    }

                    let stream_resp = match serde_json::from_str::<StreamResponse>(data) {
                        Ok(r) => r,
                        Err(e) => {
                            trace!(
                                provider = %provider_name,
                                data = %data,
                                error = %e,
                                "Ignoring unparseable SSE chunk"
                            );
                            continue;
                        }
                    };

                    let Some(choice) = stream_resp.choices.into_iter().next() else {
                        continue;
                    };

                    if let Some(deltas) = choice.delta.tool_calls {
                        for delta in deltas {
                            // Only the first tool call (index 0) is kept
                            if delta.index != 0 {
                                continue;
                            }
                            let acc = accumulator.get_or_insert_with(ToolCallAccumulator::default);
                            if let Some(func) = delta.function {
                                if let Some(name) = func.name {
                                    acc.name = name;
                                }
                                if let Some(args) = func.arguments {
                                    acc.arguments.push_str(&args);
                                }
                            }
                        }
                        // Tell the consumer a tool call is forming
                        if let Some(acc) = accumulator.as_mut()
                            && !acc.name.is_empty()
                            && !acc.announced
                        {
                            acc.announced = true;
                            let announce = StreamChunk {
                                content: None,
                                tool_call: Some(ToolCall::new(acc.name.clone(), serde_json::json!({}))),
                                done: false,
                            };
                            if tx.send(Ok(announce)).await.is_err() {
                                return;
                            }
                        }
                    }

                    if let Some(content) = choice.delta.content
                        && !content.is_empty()
                    {
                        let chunk = StreamChunk {
                            content: Some(content),
                            tool_call: None,
                            done: false,
                        };
                        if tx.send(Ok(chunk)).await.is_err() {
                            return; // receiver dropped
                        }
                    }

                    if choice.finish_reason.is_some() {
                        let _ = tx.send(Ok(final_chunk(accumulator.take()))).await;
                        return;
                    }
                }
            }

            // Stream ended without [DONE]
            let _ = tx.send(Ok(final_chunk(accumulator.take()))).await;
        });

        Ok(rx)
    }
}

fn final_chunk(accumulator: Option<ToolCallAccumulator>) -> StreamChunk {
    StreamChunk {
        content: None,
        tool_call: accumulator
            .filter(|acc| !acc.name.is_empty())
            .map(|acc| acc.into_tool_call()),
        done: true,
    }
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ApiToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl ApiMessage {
    fn text(role: &str, content: &str) -> Self {
        Self {
            role: role.into(),
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolCall {
    #[serde(default)]
    id: String,
    #[serde(default = "function_type")]
    r#type: String,
    function: ApiFunction,
}

fn function_type() -> String {
    "function".into()
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolDefinition {
    r#type: String,
    function: ApiToolFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    choices: Vec<ApiChoice>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}

// --- Streaming SSE types ---

/// A single SSE `data: {...}` chunk from a streaming response.
#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<StreamToolCallDelta>>,
}

/// A tool call delta: arrives incrementally across chunks.
#[derive(Debug, Deserialize)]
struct StreamToolCallDelta {
    index: u32,
    #[serde(default)]
    function: Option<StreamFunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct StreamFunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

/// Accumulates incremental tool call deltas into a complete tool call.
#[derive(Default)]
struct ToolCallAccumulator {
    name: String,
    arguments: String,
    announced: bool,
}

impl ToolCallAccumulator {
    fn into_tool_call(self) -> ToolCall {
        ToolCall::new(self.name, parse_arguments(&self.arguments))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchyard_core::{ConversationId, ToolErrorKind, ToolExchange, ToolResult, Turn};

    fn request(mode: InvokeMode) -> InvokeRequest {
        let conv = ConversationId::from("c1");
        let mut req = InvokeRequest::new(conv.clone(), "what time is it?", "gpt-4o-mini");
        req.history = vec![Turn::user(&conv, "hi"), Turn::assistant(&conv, "hello!")];
        req.mode = mode;
        req
    }

    #[test]
    fn openrouter_constructor() {
        let provider = OpenAiCompatProvider::openrouter("sk-test");
        assert_eq!(provider.name(), "openrouter");
        assert!(provider.base_url.contains("openrouter.ai"));
    }

    #[test]
    fn trailing_slash_trimmed() {
        let provider = OpenAiCompatProvider::new("local", "http://localhost:11434/v1/", "");
        assert_eq!(provider.base_url, "http://localhost:11434/v1");
    }

    #[test]
    fn message_conversion() {
        let api = OpenAiCompatProvider::to_api_messages(&request(InvokeMode::Full));
        assert_eq!(api.len(), 3);
        assert_eq!(api[0].role, "user");
        assert_eq!(api[1].role, "assistant");
        assert_eq!(api[2].content.as_deref(), Some("what time is it?"));
    }

    #[test]
    fn tool_history_becomes_call_and_result_pairs() {
        let mut req = request(InvokeMode::Compose);
        req.tool_history = vec![
            ToolExchange {
                call: ToolCall::new("current_time", serde_json::json!({})),
                result: ToolResult::ok("12:00"),
            },
            ToolExchange {
                call: ToolCall::new("lookup", serde_json::json!({"q": "x"})),
                result: ToolResult::err(ToolErrorKind::Timeout, "slow"),
            },
        ];
        let api = OpenAiCompatProvider::to_api_messages(&req);
        // 3 conversation messages, 2 pairs, 1 instruction
        assert_eq!(api.len(), 8);
        assert_eq!(api[3].tool_calls.as_ref().unwrap()[0].function.name, "current_time");
        assert_eq!(api[4].role, "tool");
        assert_eq!(api[4].tool_call_id.as_deref(), Some("call_0"));
        assert_eq!(api[6].content.as_deref(), Some("Error (timeout): slow"));
        assert_eq!(api[7].role, "system");
    }

    #[test]
    fn tools_only_offered_in_tool_modes() {
        let mut req = request(InvokeMode::Full);
        req.tools = vec![ToolDefinition {
            name: "current_time".into(),
            description: "Current time".into(),
            parameters: serde_json::json!({"type": "object"}),
        }];
        assert!(OpenAiCompatProvider::request_body(&req, false).get("tools").is_some());
        req.mode = InvokeMode::Summarize;
        assert!(OpenAiCompatProvider::request_body(&req, false).get("tools").is_none());
    }

    #[test]
    fn feedback_appended_as_system_message() {
        let mut req = request(InvokeMode::Full);
        req.feedback = Some("Fix the arguments".into());
        let api = OpenAiCompatProvider::to_api_messages(&req);
        let last = api.last().unwrap();
        assert_eq!(last.role, "system");
        assert_eq!(last.content.as_deref(), Some("Fix the arguments"));
    }

    #[test]
    fn response_with_tool_call_maps_to_tool_output() {
        let data = r#"{"choices":[{"message":{"role":"assistant","content":null,
            "tool_calls":[{"id":"call_1","type":"function","function":{"name":"send_message","arguments":"{\"text\":\"hi\"}"}},
                          {"id":"call_2","type":"function","function":{"name":"other","arguments":"{}"}}]}}]}"#;
        let parsed: ApiResponse = serde_json::from_str(data).unwrap();
        let out = output_from_message(parsed.choices.into_iter().next().unwrap().message);
        assert_eq!(
            out,
            ProviderOutput::tool_call("send_message", serde_json::json!({"text": "hi"}))
        );
    }

    #[test]
    fn response_with_text_maps_to_message() {
        let data = r#"{"choices":[{"message":{"role":"assistant","content":"It is noon."}}]}"#;
        let parsed: ApiResponse = serde_json::from_str(data).unwrap();
        let out = output_from_message(parsed.choices.into_iter().next().unwrap().message);
        assert_eq!(out.text(), Some("It is noon."));
    }

    #[test]
    fn unparseable_arguments_kept_as_string() {
        assert_eq!(parse_arguments(""), serde_json::json!({}));
        assert_eq!(
            parse_arguments("{not json"),
            serde_json::Value::String("{not json".into())
        );
    }

    // --- SSE parsing tests ---

    #[test]
    fn parse_stream_content_delta() {
        let data = r#"{"choices":[{"delta":{"content":"Hello"},"finish_reason":null}]}"#;
        let parsed: StreamResponse = serde_json::from_str(data).unwrap();
        assert_eq!(parsed.choices[0].delta.content.as_deref(), Some("Hello"));
        assert!(parsed.choices[0].finish_reason.is_none());
    }

    #[test]
    fn parse_stream_tool_call_delta() {
        let data = r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_abc","function":{"name":"current_time","arguments":""}}]},"finish_reason":null}]}"#;
        let parsed: StreamResponse = serde_json::from_str(data).unwrap();
        let tc = &parsed.choices[0].delta.tool_calls.as_ref().unwrap()[0];
        assert_eq!(tc.index, 0);
        assert_eq!(
            tc.function.as_ref().unwrap().name.as_deref(),
            Some("current_time")
        );
    }

    #[test]
    fn tool_call_accumulator_assembly() {
        let mut acc = ToolCallAccumulator::default();
        acc.name = "lookup".into();
        acc.arguments.push_str("{\"query\"");
        acc.arguments.push_str(": \"rust\"}");

        let chunk = final_chunk(Some(acc));
        assert!(chunk.done);
        let tc = chunk.tool_call.unwrap();
        assert_eq!(tc.tool, "lookup");
        assert_eq!(tc.args, serde_json::json!({"query": "rust"}));
    }

    #[test]
    fn final_chunk_without_tool_call() {
        let chunk = final_chunk(None);
        assert!(chunk.done);
        assert!(chunk.tool_call.is_none());
    }
}
