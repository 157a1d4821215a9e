//! Request handling for Switchyard.
//!
//! A request flows through three layers:
//!
//! 1. [`Orchestrator`] stores turns, picks a tier and owns the interrupt
//!    registry
//! 2. [`ChainEngine`] runs the decide/act loop, guarding every tool call
//! 3. the failover invoker (in `switchyard-providers`) walks the tier's
//!    candidates for every model call
//!
//! Whatever happens below, the orchestrator answers with text.

pub mod chain;
pub mod interrupt;
pub mod orchestrator;
pub mod stream_event;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use chain::{ChainBudget, ChainEngine, ChainOutcome, ChainRequest, TerminalReason};
pub use interrupt::{InterruptRegistry, InterruptToken};
pub use orchestrator::{Orchestrator, exhausted_reply};
pub use stream_event::{StreamEvent, SwitchReason};
