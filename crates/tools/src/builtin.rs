//! Built-in tools shipped with the CLI.

use async_trait::async_trait;
use chrono::{FixedOffset, Utc};
use std::sync::Arc;
use switchyard_core::{ConversationId, Notifier, Tool, ToolClass, ToolError};

/// Current date and time, optionally at a fixed UTC offset.
pub struct CurrentTimeTool;

#[async_trait]
impl Tool for CurrentTimeTool {
    fn name(&self) -> &str {
        "current_time"
    }

    fn description(&self) -> &str {
        "Get the current date and time. Optionally pass a UTC offset in hours."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "utc_offset_hours": {
                    "type": "integer",
                    "description": "Offset from UTC in whole hours, e.g. -5 or 9"
                }
            }
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<String, ToolError> {
        let offset_hours = arguments
            .get("utc_offset_hours")
            .and_then(|v| v.as_i64())
            .unwrap_or(0);

        let offset = i32::try_from(offset_hours * 3600)
            .ok()
            .and_then(FixedOffset::east_opt)
            .ok_or_else(|| {
                ToolError::InvalidArguments(format!(
                    "utc_offset_hours out of range: {offset_hours}"
                ))
            })?;

        Ok(Utc::now().with_timezone(&offset).to_rfc3339())
    }
}

/// Delivers a message through the configured [`Notifier`].
pub struct SendMessageTool {
    notifier: Arc<dyn Notifier>,
}

impl SendMessageTool {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self { notifier }
    }
}

#[async_trait]
impl Tool for SendMessageTool {
    fn name(&self) -> &str {
        "send_message"
    }

    fn description(&self) -> &str {
        "Send a message to a recipient (a conversation or channel id)."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "recipient": {
                    "type": "string",
                    "description": "Conversation or channel id to deliver to"
                },
                "message": {
                    "type": "string",
                    "description": "The text to send"
                }
            },
            "required": ["recipient", "message"]
        })
    }

    fn class(&self) -> ToolClass {
        ToolClass::Communication
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<String, ToolError> {
        let recipient = arguments["recipient"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'recipient' argument".into()))?;
        let message = arguments["message"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'message' argument".into()))?;

        self.notifier
            .notify(&ConversationId::from(recipient), message)
            .await
            .map_err(|reason| ToolError::ExecutionFailed {
                tool_name: "send_message".into(),
                reason,
            })?;

        Ok(format!("Message delivered to {recipient}"))
    }
}
