//! Tool calls: the concrete actions phase work may take, and the executor
//! that runs them behind the safety guard.
//!
//! A request is a tool name plus a flat parameter map. A result always
//! serializes to a map holding exactly one of `result` or `error`.

mod builtin;
mod executor;

use serde::Serialize;
use serde_json::Value;

use crate::error::Result;
use crate::guard::Violation;

pub use builtin::{ListDirTool, ReadFileTool, RunCommandTool, WriteFileTool};
pub use executor::ToolExecutor;

pub type ToolParams = serde_json::Map<String, Value>;

/// How a tool touches files, so the executor knows what to record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileAccess {
    None,
    Read,
    Write,
}

pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn access(&self) -> FileAccess {
        FileAccess::None
    }

    fn invoke(&self, params: &ToolParams) -> Result<Value>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorKind {
    GuardBlocked,
    Unavailable,
    Failed,
    Timeout,
    /// The session was closed; the executor refuses further calls.
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolError {
    pub kind: ToolErrorKind,
    pub tool: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub violation: Option<Violation>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ToolResult {
    Success { result: Value },
    Failure { error: ToolError },
}

impl ToolResult {
    pub fn is_success(&self) -> bool {
        matches!(self, ToolResult::Success { .. })
    }

    pub fn value(&self) -> Option<&Value> {
        match self {
            ToolResult::Success { result } => Some(result),
            ToolResult::Failure { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&ToolError> {
        match self {
            ToolResult::Success { .. } => None,
            ToolResult::Failure { error } => Some(error),
        }
    }

    pub fn is_guard_blocked(&self) -> bool {
        self.error()
            .is_some_and(|e| e.kind == ToolErrorKind::GuardBlocked)
    }

    pub(crate) fn failure(kind: ToolErrorKind, tool: &str, message: impl Into<String>) -> Self {
        ToolResult::Failure {
            error: ToolError {
                kind,
                tool: tool.to_string(),
                message: message.into(),
                violation: None,
            },
        }
    }
}

/// Build a parameter map from `json!({...})`. Non-objects give an empty map.
pub fn params(value: Value) -> ToolParams {
    match value {
        Value::Object(map) => map,
        _ => ToolParams::new(),
    }
}
