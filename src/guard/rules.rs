//! Built-in safety rules.

use std::path::Path;
use std::sync::LazyLock;

use regex::RegexSet;
use serde_json::Value;

use crate::tools::ToolParams;

use super::{confine, Severity, SessionTracking, Violation};

/// Tools that create or modify files.
pub const WRITE_TOOLS: &[&str] = &["write_file"];

/// Everything a rule may look at when a call is checked.
pub struct RuleContext<'a> {
    pub tool: &'a str,
    pub params: &'a ToolParams,
    pub tracking: &'a SessionTracking,
    pub sandbox: &'a Path,
}

impl RuleContext<'_> {
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(Value::as_str)
    }

    fn is_write(&self) -> bool {
        WRITE_TOOLS.contains(&self.tool)
    }

    /// Arguments of a `run_command` call; empty for any other tool.
    fn command_args(&self) -> Vec<&str> {
        if self.tool != "run_command" {
            return Vec::new();
        }
        self.params
            .get("args")
            .and_then(Value::as_array)
            .map(|a| a.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }
}

/// Command arguments worth resolving against the sandbox. Flags are not.
fn is_path_like(arg: &str) -> bool {
    !arg.starts_with('-') && (arg == ".." || arg.contains('/'))
}

pub trait SafetyRule: Send + Sync {
    fn id(&self) -> &'static str;
    fn evaluate(&self, ctx: &RuleContext<'_>) -> Option<Violation>;
}

fn violation(rule: &dyn SafetyRule, severity: Severity, message: String) -> Option<Violation> {
    Some(Violation {
        rule_id: rule.id().to_string(),
        message,
        severity,
    })
}

/// File paths must stay inside the project sandbox.
pub struct PathEscapeRule;

impl SafetyRule for PathEscapeRule {
    fn id(&self) -> &'static str {
        "path_escape"
    }

    fn evaluate(&self, ctx: &RuleContext<'_>) -> Option<Violation> {
        if let Some(raw) = ctx.param_str("path") {
            if confine(ctx.sandbox, raw).is_none() {
                return violation(
                    self,
                    Severity::Block,
                    format!("path {:?} resolves outside the project workspace", raw),
                );
            }
        }
        let escaping = ctx
            .command_args()
            .into_iter()
            .find(|arg| is_path_like(arg) && confine(ctx.sandbox, arg).is_none())?;
        violation(
            self,
            Severity::Block,
            format!("argument {:?} resolves outside the project workspace", escaping),
        )
    }
}

/// Writes may not touch VCS internals, secrets, or phasegate's own files.
pub struct ProtectedPathRule {
    names: Vec<String>,
}

impl ProtectedPathRule {
    pub fn new(names: &[&str]) -> Self {
        Self {
            names: names.iter().map(|n| n.to_string()).collect(),
        }
    }
}

impl Default for ProtectedPathRule {
    fn default() -> Self {
        Self::new(&[".git", ".env", "manifest.json", "artifacts"])
    }
}

impl SafetyRule for ProtectedPathRule {
    fn id(&self) -> &'static str {
        "protected_path"
    }

    fn evaluate(&self, ctx: &RuleContext<'_>) -> Option<Violation> {
        if !ctx.is_write() {
            return None;
        }
        let raw = ctx.param_str("path")?;
        let hit = Path::new(raw).components().find_map(|c| {
            let part = c.as_os_str().to_str()?;
            self.names.iter().find(|n| n.as_str() == part)
        })?;
        violation(
            self,
            Severity::Block,
            format!("write to protected path {:?} ({})", raw, hit),
        )
    }
}

/// Overwriting an existing file that was never read this session.
pub struct BlindOverwriteRule;

impl SafetyRule for BlindOverwriteRule {
    fn id(&self) -> &'static str {
        "blind_overwrite"
    }

    fn evaluate(&self, ctx: &RuleContext<'_>) -> Option<Violation> {
        if !ctx.is_write() {
            return None;
        }
        let path = confine(ctx.sandbox, ctx.param_str("path")?)?;
        if !path.is_file() || ctx.tracking.was_read(&path) || ctx.tracking.write_count(&path) > 0 {
            return None;
        }
        violation(
            self,
            Severity::Warn,
            format!("overwriting {} without reading it first", path.display()),
        )
    }
}

/// Caps how often one file may be rewritten in a session.
pub struct WriteBudgetRule {
    pub max_writes: u32,
}

impl SafetyRule for WriteBudgetRule {
    fn id(&self) -> &'static str {
        "write_budget"
    }

    fn evaluate(&self, ctx: &RuleContext<'_>) -> Option<Violation> {
        if !ctx.is_write() {
            return None;
        }
        let path = confine(ctx.sandbox, ctx.param_str("path")?)?;
        let count = ctx.tracking.write_count(&path);
        if count < self.max_writes {
            return None;
        }
        violation(
            self,
            Severity::Block,
            format!(
                "{} already written {} times (budget {})",
                path.display(),
                count,
                self.max_writes
            ),
        )
    }
}

static DANGEROUS_COMMANDS: LazyLock<RegexSet> = LazyLock::new(|| {
    RegexSet::new([
        r"\brm\s+-[a-zA-Z]*[rRf][a-zA-Z]*\s+(/|~|\*|\.\.?(/|\s|$))",
        r"\bmkfs(\.\w+)?\b",
        r"\bdd\s+.*\bof=/dev/",
        r":\(\)\s*\{\s*:\s*\|\s*:\s*&\s*\}\s*;\s*:",
        r"\b(shutdown|reboot|halt|poweroff)\b",
        r"\b(curl|wget)\b[^|]*\|\s*(sudo\s+)?(sh|bash|zsh)\b",
        r"\bchmod\s+-R\s+0?777\s+/",
        r"\bgit\s+push\s+.*--force\b",
    ])
    .unwrap()
});

/// Destructive shell patterns in `run_command`.
pub struct DangerousCommandRule;

impl SafetyRule for DangerousCommandRule {
    fn id(&self) -> &'static str {
        "dangerous_command"
    }

    fn evaluate(&self, ctx: &RuleContext<'_>) -> Option<Violation> {
        if ctx.tool != "run_command" {
            return None;
        }
        let program = ctx.param_str("program").unwrap_or_default();
        let line = std::iter::once(program)
            .chain(ctx.command_args())
            .collect::<Vec<_>>()
            .join(" ");
        if !DANGEROUS_COMMANDS.is_match(&line) {
            return None;
        }
        violation(self, Severity::Block, format!("refusing destructive command: {}", line))
    }
}

/// Caps the number of tool calls in one session.
pub struct CallBudgetRule {
    pub max_calls: u32,
}

impl SafetyRule for CallBudgetRule {
    fn id(&self) -> &'static str {
        "call_budget"
    }

    fn evaluate(&self, ctx: &RuleContext<'_>) -> Option<Violation> {
        if ctx.tracking.calls() < self.max_calls {
            return None;
        }
        violation(
            self,
            Severity::Block,
            format!("session tool-call budget of {} exhausted", self.max_calls),
        )
    }
}
