//! Tool plumbing for Switchyard.
//!
//! Tool implementations are mostly external; this crate holds what sits
//! between a model's tool call and the tool: argument normalization
//! ([`validator`]), the outgoing-text guard ([`guard`]) and two small
//! built-ins ([`builtin`]).

pub mod builtin;
pub mod guard;
pub mod validator;

use std::sync::Arc;
use switchyard_core::{Notifier, ToolRegistry};

pub use builtin::{CurrentTimeTool, SendMessageTool};
pub use guard::{Placeholder, PlaceholderGuard};
pub use validator::{Normalized, normalize};

/// Create a registry with the built-in tools. `send_message` delivers
/// through `notifier`.
pub fn default_registry(notifier: Arc<dyn Notifier>) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(CurrentTimeTool));
    registry.register(Arc::new(SendMessageTool::new(notifier)));
    registry
}
