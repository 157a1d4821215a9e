//! Access control for Switchyard tool calls.
//!
//! Provides:
//! - **Allowlists**: per-tool caller lists (`"*"` for everyone, empty for nobody)
//! - **Admin callers**: privileged identities that may run admin-only tools
//! - **Hard blocks**: tool families unattended jobs may never touch

pub mod allowlist;

pub use allowlist::{CallerCheckResult, ToolPolicy};
