//! Notifier: progress updates to the user and alerts to the operator.
//!
//! Delivery failures are reported but must never abort the caller.

use async_trait::async_trait;
use tracing::info;

use crate::message::ConversationId;

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, conversation_id: &ConversationId, text: &str) -> Result<(), String>;
}

/// Discards every notification.
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn notify(&self, _conversation_id: &ConversationId, _text: &str) -> Result<(), String> {
        Ok(())
    }
}

/// Writes notifications to the log. Default operator channel.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, conversation_id: &ConversationId, text: &str) -> Result<(), String> {
        info!(conversation_id = %conversation_id, "{text}");
        Ok(())
    }
}
