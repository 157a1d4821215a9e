//! Events emitted by [`Orchestrator::handle_request_stream`].
//!
//! [`Orchestrator::handle_request_stream`]: crate::Orchestrator::handle_request_stream

use serde::{Deserialize, Serialize};

/// Why a streamed attempt was abandoned for the chain path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwitchReason {
    /// The model asked for a tool
    ToolCall,
    /// The stream broke before finishing
    StreamFailed,
    /// The streamed text was empty or a disguised rate-limit notice
    Unusable,
}

/// Events follow a small protocol:
/// - `chunk`: partial text from the model
/// - `switched_to_chain`: streamed text so far is void; the reply now comes
///   from the tool chain
/// - `done`: the complete reply, always last
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Chunk { content: String },

    SwitchedToChain { reason: SwitchReason },

    Done { text: String },
}

impl StreamEvent {
    /// SSE-style event name.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Chunk { .. } => "chunk",
            Self::SwitchedToChain { .. } => "switched_to_chain",
            Self::Done { .. } => "done",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_serialization() {
        let event = StreamEvent::Chunk {
            content: "Hello".into(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"chunk""#));
        assert!(json.contains(r#""content":"Hello""#));
    }

    #[test]
    fn switch_serialization() {
        let event = StreamEvent::SwitchedToChain {
            reason: SwitchReason::ToolCall,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(json, r#"{"type":"switched_to_chain","reason":"tool_call"}"#);
        assert_eq!(event.event_type(), "switched_to_chain");
    }

    #[test]
    fn done_deserialization() {
        let event: StreamEvent = serde_json::from_str(r#"{"type":"done","text":"hi"}"#).unwrap();
        assert_eq!(event, StreamEvent::Done { text: "hi".into() });
        assert_eq!(event.event_type(), "done");
    }
}
