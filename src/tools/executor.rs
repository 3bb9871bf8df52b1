//! Guarded dispatch of tool calls.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::error::{Error, Result};
use crate::guard::{confine, SafetyGuard};
use crate::util::blocking_with_timeout;
use crate::{plog_debug, plog_warn};

use super::{
    FileAccess, ListDirTool, ReadFileTool, RunCommandTool, Tool, ToolError, ToolErrorKind,
    ToolParams, ToolResult, WriteFileTool,
};

/// Runs tool calls for one project session. Every call is admitted by the
/// session's guard first; failures of any kind come back as
/// [`ToolResult::Failure`], never as an `Err`.
pub struct ToolExecutor {
    guard: Arc<SafetyGuard>,
    tools: HashMap<String, Arc<dyn Tool>>,
    timeout: Duration,
    cancelled: AtomicBool,
}

impl ToolExecutor {
    pub fn new(guard: Arc<SafetyGuard>, timeout: Duration) -> Self {
        Self {
            guard,
            tools: HashMap::new(),
            timeout,
            cancelled: AtomicBool::new(false),
        }
    }

    /// Executor with the file and command tools rooted at the guard's sandbox.
    pub fn with_builtin_tools(guard: Arc<SafetyGuard>, timeout: Duration) -> Self {
        let root = guard.sandbox().to_path_buf();
        let mut executor = Self::new(guard, timeout);
        executor.register(ReadFileTool::new(&root));
        executor.register(WriteFileTool::new(&root));
        executor.register(ListDirTool::new(&root));
        executor.register(RunCommandTool::new(&root));
        executor
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.tools.insert(tool.name().to_string(), Arc::new(tool));
    }

    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn guard(&self) -> &Arc<SafetyGuard> {
        &self.guard
    }

    /// Refuse every later call. Calls already running are not interrupted.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Run a tool on the current thread, with no timeout.
    pub fn execute(&self, name: &str, params: &ToolParams) -> ToolResult {
        let tool = match self.preflight(name, params) {
            Ok(tool) => tool,
            Err(refusal) => return refusal,
        };
        let outcome = tool.invoke(params);
        self.finish(tool.as_ref(), params, outcome)
    }

    /// Run a tool on the blocking pool under the executor's timeout.
    pub async fn execute_with_timeout(&self, name: &str, params: &ToolParams) -> ToolResult {
        let tool = match self.preflight(name, params) {
            Ok(tool) => tool,
            Err(refusal) => return refusal,
        };
        let invoked = Arc::clone(&tool);
        let owned = params.clone();
        let outcome = blocking_with_timeout(self.timeout, move || invoked.invoke(&owned)).await;
        self.finish(tool.as_ref(), params, outcome)
    }

    fn preflight(
        &self,
        name: &str,
        params: &ToolParams,
    ) -> std::result::Result<Arc<dyn Tool>, ToolResult> {
        if self.is_cancelled() {
            plog_debug!("Tool {} refused: session closed", name);
            return Err(ToolResult::failure(
                ToolErrorKind::Cancelled,
                name,
                "the session running this call was closed",
            ));
        }

        let tool = self.tools.get(name).cloned().ok_or_else(|| {
            plog_warn!("Tool unavailable: {}", name);
            ToolResult::failure(
                ToolErrorKind::Unavailable,
                name,
                format!("tool {} is not registered", name),
            )
        })?;

        let verdict = self.guard.admit(name, params);
        if !verdict.allowed {
            let violation = verdict.violation;
            let message = violation
                .as_ref()
                .map(|v| v.message.clone())
                .unwrap_or_else(|| "blocked by safety guard".to_string());
            return Err(ToolResult::Failure {
                error: ToolError {
                    kind: ToolErrorKind::GuardBlocked,
                    tool: name.to_string(),
                    message,
                    violation,
                },
            });
        }
        Ok(tool)
    }

    fn finish(&self, tool: &dyn Tool, params: &ToolParams, outcome: Result<Value>) -> ToolResult {
        match outcome {
            Ok(result) => {
                if tool.access() == FileAccess::Read {
                    let read = params
                        .get("path")
                        .and_then(Value::as_str)
                        .and_then(|raw| confine(self.guard.sandbox(), raw));
                    if let Some(path) = read {
                        self.guard.record_file_read(&path);
                    }
                }
                plog_debug!("Tool {} succeeded", tool.name());
                ToolResult::Success { result }
            }
            // The write may still land, so its budget slot stays taken.
            Err(Error::Timeout(after)) => ToolResult::failure(
                ToolErrorKind::Timeout,
                tool.name(),
                format!("timed out after {:?}", after),
            ),
            Err(e) => {
                plog_warn!("Tool {} failed: {}", tool.name(), e);
                if tool.access() == FileAccess::Write {
                    if let Some(path) = self.guard.write_target(tool.name(), params) {
                        self.guard.release_write(&path);
                    }
                }
                ToolResult::failure(ToolErrorKind::Failed, tool.name(), e.to_string())
            }
        }
    }
}

impl std::fmt::Debug for ToolExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolExecutor")
            .field("guard", &self.guard)
            .field("tools", &self.tool_names())
            .field("timeout", &self.timeout)
            .finish()
    }
}
