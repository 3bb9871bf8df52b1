//! The project manifest: current phase, artifact summaries, approvals.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

use super::Phase;

/// Approval flag gating `AwaitingQaApproval -> Deployment`.
pub const QA_APPROVED: &str = "qa_approved";

static PROJECT_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9][a-z0-9_-]{0,63}$").unwrap());

/// Project identifier. Lowercase alphanumerics, `-` and `_`, so it is
/// always a safe directory name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProjectId(String);

impl ProjectId {
    pub fn new(id: &str) -> Result<Self> {
        if !PROJECT_ID_RE.is_match(id) {
            return Err(Error::Validation(format!(
                "invalid project id {:?}: use lowercase letters, digits, '-' or '_'",
                id
            )));
        }
        Ok(Self(id.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ProjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for ProjectId {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for ProjectId {
    type Error = Error;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<ProjectId> for String {
    fn from(id: ProjectId) -> Self {
        id.0
    }
}

/// What the manifest remembers about an artifact. The store holds the payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactSummary {
    pub name: String,
    pub schema_version: Option<String>,
    pub producer_phase: Phase,
    /// Path relative to the project directory.
    pub path: String,
    pub written_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseHistoryEntry {
    pub phase: Phase,
    pub entered_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectManifest {
    pub project_id: ProjectId,
    pub name: String,
    /// Free-text requirements the planning stage starts from.
    #[serde(default)]
    pub description: String,
    pub current_phase: Phase,
    #[serde(default)]
    pub artifacts: BTreeMap<String, ArtifactSummary>,
    #[serde(default)]
    pub approval_flags: BTreeMap<String, bool>,
    #[serde(default)]
    pub phase_history: Vec<PhaseHistoryEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProjectManifest {
    pub fn new(project_id: ProjectId, name: &str, description: &str) -> Self {
        let now = Utc::now();
        Self {
            project_id,
            name: name.to_string(),
            description: description.to_string(),
            current_phase: Phase::INITIAL,
            artifacts: BTreeMap::new(),
            approval_flags: BTreeMap::new(),
            phase_history: vec![PhaseHistoryEntry {
                phase: Phase::INITIAL,
                entered_at: now,
                note: None,
            }],
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_approved(&self, flag: &str) -> bool {
        self.approval_flags.get(flag).copied().unwrap_or(false)
    }

    pub fn qa_approved(&self) -> bool {
        self.is_approved(QA_APPROVED)
    }

    pub fn has_artifact(&self, name: &str) -> bool {
        self.artifacts.contains_key(name)
    }

    /// Move along a forward edge and record the artifact that justified it.
    ///
    /// Leaves the manifest untouched when the edge is not in the table.
    pub fn apply_transition(&mut self, target: Phase, artifact: ArtifactSummary) -> Result<()> {
        if !self.current_phase.can_transition(target) {
            return Err(Error::InvalidPhaseTransition {
                from: self.current_phase.to_string(),
                to: target.to_string(),
            });
        }
        let now = Utc::now();
        self.artifacts.insert(artifact.name.clone(), artifact);
        self.current_phase = target;
        self.phase_history.push(PhaseHistoryEntry {
            phase: target,
            entered_at: now,
            note: None,
        });
        self.updated_at = now;
        Ok(())
    }

    /// Set an approval flag. Returns `false` if it was already set.
    pub fn grant_approval(&mut self, flag: &str) -> bool {
        if self.is_approved(flag) {
            return false;
        }
        self.approval_flags.insert(flag.to_string(), true);
        self.updated_at = Utc::now();
        true
    }

    /// The single backward edge: QA approval rejected, back to coding.
    pub fn send_back_for_rework(&mut self, reason: Option<&str>) -> Result<()> {
        if self.current_phase != Phase::AwaitingQaApproval {
            return Err(Error::NotAwaitingApproval {
                phase: self.current_phase.to_string(),
            });
        }
        let now = Utc::now();
        self.approval_flags.insert(QA_APPROVED.to_string(), false);
        self.current_phase = Phase::Coding;
        self.phase_history.push(PhaseHistoryEntry {
            phase: Phase::Coding,
            entered_at: now,
            note: Some(match reason {
                Some(r) => format!("qa rejected: {}", r),
                None => "qa rejected".to_string(),
            }),
        });
        self.updated_at = now;
        Ok(())
    }
}
