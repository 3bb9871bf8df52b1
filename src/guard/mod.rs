//! Iron Dome: the policy gate around every tool invocation.
//!
//! A [`SafetyGuard`] is created per project session. Before a tool runs the
//! executor calls [`SafetyGuard::admit`], which checks the call and charges
//! it to the session's budgets under one lock, so concurrent calls cannot
//! both slip under a limit. Afterwards the executor reports reads, and gives
//! back the write slot of a write that failed, so later checks can reason
//! about ordering (read before overwrite) and budgets.
//!
//! Only `Block` severity stops a call, unless the guard is strict, in which
//! case any match does. Everything else is logged and handed back as an
//! advisory.

mod rules;

use std::collections::{HashMap, HashSet};
use std::ffi::OsStr;
use std::path::{Component, Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::Config;
use crate::tools::ToolParams;
use crate::{plog_debug, plog_warn};

pub use rules::{
    BlindOverwriteRule, CallBudgetRule, DangerousCommandRule, PathEscapeRule, ProtectedPathRule,
    RuleContext, SafetyRule, WriteBudgetRule, WRITE_TOOLS,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warn,
    Block,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub rule_id: String,
    pub message: String,
    pub severity: Severity,
}

/// Result of checking one call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GuardVerdict {
    pub allowed: bool,
    /// The violation that stopped the call.
    pub violation: Option<Violation>,
    /// Matches that did not stop it.
    pub advisories: Vec<Violation>,
}

/// What the session has done so far.
#[derive(Debug, Clone, Default)]
pub struct SessionTracking {
    reads: HashSet<PathBuf>,
    writes: HashMap<PathBuf, u32>,
    calls: u32,
}

impl SessionTracking {
    pub fn was_read(&self, path: &Path) -> bool {
        self.reads.contains(path)
    }

    pub fn write_count(&self, path: &Path) -> u32 {
        self.writes.get(path).copied().unwrap_or(0)
    }

    pub fn calls(&self) -> u32 {
        self.calls
    }

    pub fn files_written(&self) -> usize {
        self.writes.len()
    }

    fn note_read(&mut self, path: PathBuf) {
        self.reads.insert(path);
    }

    fn note_write(&mut self, path: PathBuf) {
        *self.writes.entry(path).or_insert(0) += 1;
    }

    fn forget_write(&mut self, path: &Path) {
        if let Some(count) = self.writes.get_mut(path) {
            *count -= 1;
            if *count == 0 {
                self.writes.remove(path);
            }
        }
    }

    fn note_call(&mut self) {
        self.calls += 1;
    }
}

/// Resolve `raw` against `root` lexically. `None` if it leaves `root`.
///
/// Symlinks are not followed; the sandbox is assumed to contain none that
/// point outward.
pub fn confine(root: &Path, raw: &str) -> Option<PathBuf> {
    let candidate = Path::new(raw);
    let relative = if candidate.is_absolute() {
        candidate.strip_prefix(root).ok()?
    } else {
        candidate
    };

    let mut parts: Vec<&OsStr> = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => parts.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                parts.pop()?;
            }
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }

    let mut resolved = root.to_path_buf();
    resolved.extend(parts);
    Some(resolved)
}

pub struct SafetyGuard {
    session_id: Uuid,
    sandbox: PathBuf,
    strict: bool,
    rules: Vec<Box<dyn SafetyRule>>,
    tracking: Mutex<SessionTracking>,
}

impl SafetyGuard {
    /// A guard with no rules; add them with [`SafetyGuard::with_rule`].
    pub fn new(sandbox: impl Into<PathBuf>, strict: bool) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            sandbox: sandbox.into(),
            strict,
            rules: Vec::new(),
            tracking: Mutex::new(SessionTracking::default()),
        }
    }

    /// A guard carrying every built-in rule, with budgets from `config`.
    pub fn standard(sandbox: impl Into<PathBuf>, config: &Config) -> Self {
        Self::new(sandbox, config.strict_mode)
            .with_rule(PathEscapeRule)
            .with_rule(ProtectedPathRule::default())
            .with_rule(BlindOverwriteRule)
            .with_rule(WriteBudgetRule {
                max_writes: config.max_writes_per_file(),
            })
            .with_rule(DangerousCommandRule)
            .with_rule(CallBudgetRule {
                max_calls: config.max_tool_calls(),
            })
    }

    pub fn with_rule(mut self, rule: impl SafetyRule + 'static) -> Self {
        self.rules.push(Box::new(rule));
        self
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn sandbox(&self) -> &Path {
        &self.sandbox
    }

    pub fn rule_ids(&self) -> Vec<&'static str> {
        self.rules.iter().map(|r| r.id()).collect()
    }

    /// Snapshot of the session tracking state.
    pub fn tracking(&self) -> SessionTracking {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SessionTracking> {
        self.tracking.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Check a call against every rule without charging it to the session.
    pub fn check(&self, tool: &str, params: &ToolParams) -> GuardVerdict {
        let tracking = self.lock();
        self.judge(tool, params, &tracking)
    }

    /// Check a call and, if it is allowed, count it before the lock is
    /// released. An allowed write takes its slot in the per-file budget
    /// right away.
    pub fn admit(&self, tool: &str, params: &ToolParams) -> GuardVerdict {
        let mut tracking = self.lock();
        let verdict = self.judge(tool, params, &tracking);
        if verdict.allowed {
            tracking.note_call();
            if let Some(path) = self.write_target(tool, params) {
                tracking.note_write(path);
            }
        }
        verdict
    }

    /// The sandbox file a write tool call targets.
    pub fn write_target(&self, tool: &str, params: &ToolParams) -> Option<PathBuf> {
        if !WRITE_TOOLS.contains(&tool) {
            return None;
        }
        let raw = params.get("path").and_then(|v| v.as_str())?;
        confine(&self.sandbox, raw)
    }

    fn judge(&self, tool: &str, params: &ToolParams, tracking: &SessionTracking) -> GuardVerdict {
        let ctx = RuleContext {
            tool,
            params,
            tracking,
            sandbox: &self.sandbox,
        };
        let mut matches: Vec<Violation> =
            self.rules.iter().filter_map(|rule| rule.evaluate(&ctx)).collect();

        // Most severe first; stable, so rule order breaks ties.
        matches.sort_by(|a, b| b.severity.cmp(&a.severity));

        let blocking = matches
            .first()
            .is_some_and(|v| self.strict || v.severity == Severity::Block);
        if !blocking {
            for advisory in &matches {
                plog_warn!(
                    "guard[{}] advisory {} on {}: {}",
                    self.session_id,
                    advisory.rule_id,
                    tool,
                    advisory.message
                );
            }
            return GuardVerdict {
                allowed: true,
                violation: None,
                advisories: matches,
            };
        }

        let violation = matches.remove(0);
        plog_warn!(
            "guard[{}] blocked {}: {} ({})",
            self.session_id,
            tool,
            violation.message,
            violation.rule_id
        );
        GuardVerdict {
            allowed: false,
            violation: Some(violation),
            advisories: matches,
        }
    }

    pub fn record_file_read(&self, path: &Path) {
        plog_debug!("guard[{}] read {}", self.session_id, path.display());
        self.lock().note_read(path.to_path_buf());
    }

    /// Record a write made outside [`SafetyGuard::admit`].
    pub fn record_file_write(&self, path: &Path) {
        plog_debug!("guard[{}] write {}", self.session_id, path.display());
        self.lock().note_write(path.to_path_buf());
    }

    /// Give back the slot an admitted write took, after the write failed.
    pub fn release_write(&self, path: &Path) {
        plog_debug!("guard[{}] write of {} released", self.session_id, path.display());
        self.lock().forget_write(path);
    }
}

impl std::fmt::Debug for SafetyGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SafetyGuard")
            .field("session_id", &self.session_id)
            .field("sandbox", &self.sandbox)
            .field("strict", &self.strict)
            .field("rules", &self.rule_ids())
            .finish()
    }
}
