//! # Switchyard Core
//!
//! Domain types, traits, and error definitions for the Switchyard
//! orchestration runtime. This crate defines the model every other crate
//! implements against and has no framework dependencies.
//!
//! ## Design Philosophy
//!
//! Every collaborator the engine talks to is a trait here:
//! - [`ProviderAdapter`]: an LLM backend
//! - [`Tool`] / [`ToolRegistry`]: actions the model can invoke
//! - [`PermissionPolicy`]: who may run what
//! - [`ConversationStore`] / [`CommitmentStore`]: persisted state
//! - [`Notifier`]: progress updates and operator alerts
//!
//! Implementations live in their respective crates, which keeps the
//! dependency graph pointing inward and makes every component testable
//! with scripted stand-ins.

pub mod background;
pub mod commitment;
pub mod error;
pub mod event;
pub mod message;
pub mod notify;
pub mod policy;
pub mod provider;
pub mod signal;
pub mod store;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use background::spawn_background;
pub use commitment::{Commitment, CommitmentStatus, CommitmentStore};
pub use error::{Error, ProviderError, Result, StoreError, ToolError};
pub use event::{DomainEvent, EventBus};
pub use message::{ConversationId, Role, Turn};
pub use notify::{LogNotifier, Notifier, NoopNotifier};
pub use policy::{AllowAll, CallerClass, PermissionPolicy};
pub use provider::{
    InvokeMode, InvokeRequest, ProviderAdapter, ProviderOutput, StreamChunk, ToolDefinition,
};
pub use signal::SignalClassifier;
pub use store::{ConversationStore, TurnSummarizer};
pub use tool::{
    Severity, Tool, ToolCall, ToolClass, ToolErrorKind, ToolExchange, ToolRegistry, ToolResult,
};
