//! Tool allowlists: which callers may run which tools.
//!
//! Three layers, checked independently by the chain:
//! - per-tool caller allowlists
//! - admin callers, who may also run `admin_only` tools
//! - hard blocks on tool families (by name prefix) for unattended callers

use switchyard_config::PolicyConfig;
use switchyard_core::{CallerClass, PermissionPolicy};

/// Result of checking a caller against a tool's allowlist.
#[derive(Debug, Clone, PartialEq)]
pub enum CallerCheckResult {
    /// Caller is allowed
    Allowed,
    /// Caller is denied
    Denied { caller: String, reason: String },
    /// Tool has no allowlist entry (open to everyone)
    Unlisted,
}

/// [`PermissionPolicy`] backed by the `[policy]` config section.
#[derive(Debug, Clone, Default)]
pub struct ToolPolicy {
    config: PolicyConfig,
}

impl ToolPolicy {
    pub fn new(config: PolicyConfig) -> Self {
        Self { config }
    }

    /// Check a caller against the allowlist for `tool`.
    ///
    /// Rules:
    /// - No entry for the tool → open
    /// - Entry contains `"*"` → allow all
    /// - Empty entry → deny all
    /// - Otherwise the caller must be listed
    pub fn check_caller(&self, tool: &str, caller: &str) -> CallerCheckResult {
        let Some(allowed) = self.config.tool_allowlist.get(tool) else {
            return CallerCheckResult::Unlisted;
        };

        if allowed.iter().any(|c| c == "*") {
            return CallerCheckResult::Allowed;
        }

        if allowed.is_empty() {
            return CallerCheckResult::Denied {
                caller: caller.into(),
                reason: format!("Tool '{tool}' is disabled for all callers"),
            };
        }

        if allowed.iter().any(|c| c == caller) {
            CallerCheckResult::Allowed
        } else {
            CallerCheckResult::Denied {
                caller: caller.into(),
                reason: format!(
                    "Caller '{}' not in allowlist for '{}' ({} callers configured)",
                    caller,
                    tool,
                    allowed.len()
                ),
            }
        }
    }

    fn blocked_prefix(&self, tool: &str) -> Option<&str> {
        self.config
            .background_blocked_prefixes
            .iter()
            .find(|p| !p.is_empty() && tool.starts_with(p.as_str()))
            .map(String::as_str)
    }
}

impl PermissionPolicy for ToolPolicy {
    fn is_tool_permitted(&self, tool: &str, caller: &str) -> bool {
        match self.check_caller(tool, caller) {
            CallerCheckResult::Allowed | CallerCheckResult::Unlisted => true,
            CallerCheckResult::Denied { reason, .. } => {
                tracing::warn!(tool = %tool, caller = %caller, %reason, "Tool call denied by allowlist");
                false
            }
        }
    }

    fn is_privileged(&self, caller: &str) -> bool {
        self.config.admin_callers.iter().any(|c| c == caller)
    }

    fn hard_block(&self, tool: &str, class: CallerClass) -> Option<String> {
        if class != CallerClass::Background {
            return None;
        }
        let prefix = self.blocked_prefix(tool)?;
        tracing::warn!(tool = %tool, prefix = %prefix, "Background call to blocked tool family");
        Some(format!(
            "'{tool}' belongs to the '{prefix}*' family, which unattended jobs may not use. \
             Report what you would have done instead of doing it."
        ))
    }
}
