//! Permission policy: who may run which tool.

use serde::{Deserialize, Serialize};

/// Whether a request comes from a person waiting for a reply or from an
/// unattended job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallerClass {
    Interactive,
    Background,
}

impl CallerClass {
    /// Context hints that mark a request as unattended.
    const BACKGROUND_HINTS: [&'static str; 5] =
        ["background", "scheduled", "cron", "automated", "heartbeat"];

    /// Classify a request from the caller-supplied context hint.
    pub fn from_hint(hint: Option<&str>) -> Self {
        match hint {
            Some(h) => {
                let h = h.trim().to_ascii_lowercase();
                if Self::BACKGROUND_HINTS.iter().any(|b| h == *b || h.starts_with(&format!("{b}:"))) {
                    Self::Background
                } else {
                    Self::Interactive
                }
            }
            None => Self::Interactive,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Interactive => "interactive",
            Self::Background => "background",
        }
    }
}

/// Access-control policy consulted by the chain before every tool call.
pub trait PermissionPolicy: Send + Sync {
    /// Whether `caller` may run `tool` at all.
    fn is_tool_permitted(&self, tool: &str, caller: &str) -> bool;

    /// Whether `caller` is privileged (admin tools, admin prompts).
    fn is_privileged(&self, caller: &str) -> bool;

    /// A domain-specific hard block: returns the explanation when the caller
    /// class is forbidden from the tool's family.
    fn hard_block(&self, _tool: &str, _class: CallerClass) -> Option<String> {
        None
    }
}

/// A policy that permits everything and privileges nobody.
pub struct AllowAll;

impl PermissionPolicy for AllowAll {
    fn is_tool_permitted(&self, _tool: &str, _caller: &str) -> bool {
        true
    }

    fn is_privileged(&self, _caller: &str) -> bool {
        false
    }
}
