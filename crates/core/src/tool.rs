//! Tool trait: the abstraction over actions the model can invoke.
//!
//! Tool results are a tagged union rather than a string convention: an
//! error carries a [`ToolErrorKind`] whose [`Severity`] decides whether the
//! chain feeds it back to the model or stops.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::ToolError;
use crate::provider::ToolDefinition;

/// A request to execute a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Name of the tool to execute
    pub tool: String,

    /// Arguments as a JSON value
    #[serde(default)]
    pub args: serde_json::Value,
}

impl ToolCall {
    pub fn new(tool: impl Into<String>, args: serde_json::Value) -> Self {
        Self {
            tool: tool.into(),
            args,
        }
    }
}

/// How a tool error should be handled by the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Fed back to the model as a retry opportunity.
    Corrective,
    /// Ends the chain; never retried.
    Terminal,
}

/// Why a tool call did not produce a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorKind {
    /// The model emitted an unusable tool name.
    Malformed,
    /// The caller is not allowed to run this tool.
    PermissionDenied,
    /// The caller class is forbidden from this tool family.
    Blocked,
    /// No tool with that name exists.
    UnknownTool,
    /// Arguments failed schema validation.
    InvalidArguments,
    /// Outgoing text contained unfilled placeholders.
    Placeholder,
    /// The tool itself failed.
    ExecutionFailed,
    /// The tool exceeded its time budget.
    Timeout,
}

impl ToolErrorKind {
    pub fn severity(&self) -> Severity {
        match self {
            Self::Malformed | Self::PermissionDenied | Self::Blocked => Severity::Terminal,
            Self::UnknownTool
            | Self::InvalidArguments
            | Self::Placeholder
            | Self::ExecutionFailed
            | Self::Timeout => Severity::Corrective,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Malformed => "malformed",
            Self::PermissionDenied => "permission_denied",
            Self::Blocked => "blocked",
            Self::UnknownTool => "unknown_tool",
            Self::InvalidArguments => "invalid_arguments",
            Self::Placeholder => "placeholder",
            Self::ExecutionFailed => "execution_failed",
            Self::Timeout => "timeout",
        }
    }
}

/// The result of a tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolResult {
    Ok { payload: String },
    Err { kind: ToolErrorKind, detail: String },
}

impl ToolResult {
    pub fn ok(payload: impl Into<String>) -> Self {
        Self::Ok {
            payload: payload.into(),
        }
    }

    pub fn err(kind: ToolErrorKind, detail: impl Into<String>) -> Self {
        Self::Err {
            kind,
            detail: detail.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok { .. })
    }

    /// Whether this result must stop the chain.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Err { kind, .. } if kind.severity() == Severity::Terminal)
    }

    /// Text form fed back to the model.
    pub fn render(&self) -> String {
        match self {
            Self::Ok { payload } => payload.clone(),
            Self::Err { kind, detail } => format!("Error ({}): {}", kind.as_str(), detail),
        }
    }
}

/// One executed step of a chain: the call and what came of it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolExchange {
    pub call: ToolCall,
    pub result: ToolResult,
}

/// Execution class of a tool; decides its time budget and extra guards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolClass {
    /// Local, quick computation.
    Standard,
    /// Network or disk heavy; gets a longer timeout.
    IoHeavy,
    /// Sends text a human will read; guarded against placeholders.
    Communication,
}

/// The core Tool trait.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "current_time").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the model).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Only privileged callers may run admin tools.
    fn admin_only(&self) -> bool {
        false
    }

    fn class(&self) -> ToolClass {
        ToolClass::Standard
    }

    /// Execute the tool with already-normalized arguments.
    async fn execute(&self, arguments: serde_json::Value) -> Result<String, ToolError>;

    /// Convert this tool into a ToolDefinition for sending to the model.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// A registry of available tools.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        self.tools.insert(name, tool);
    }

    /// Look up a tool by name.
    pub fn lookup(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Tool definitions to offer the model. Admin tools only when privileged.
    pub fn definitions(&self, privileged: bool) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self
            .tools
            .values()
            .filter(|t| privileged || !t.admin_only())
            .map(|t| t.to_definition())
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// All registered tool names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
