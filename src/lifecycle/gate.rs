//! Quality gates: the conditions an edge must satisfy before it commits.

use serde::Serialize;

use crate::error::Error;
use crate::handlers::PhaseOutput;
use crate::store::ArtifactStore;

use super::{Phase, ProjectManifest, QA_APPROVED};

/// What an edge demands before it may be taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateRequirement {
    Unconditional,
    /// Approval flag plus a valid artifact.
    Approval(&'static str),
    /// A present, schema-valid producer artifact.
    Artifact,
}

pub fn requirement(from: Phase, to: Phase) -> GateRequirement {
    match (from, to) {
        (Phase::Testing, Phase::AwaitingQaApproval) => GateRequirement::Unconditional,
        (Phase::AwaitingQaApproval, Phase::Deployment) => GateRequirement::Approval(QA_APPROVED),
        _ => GateRequirement::Artifact,
    }
}

/// Why a transition did not commit. Reported to the operator as-is.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BlockReason {
    MissingArtifact {
        name: String,
    },
    MissingApproval {
        flag: String,
    },
    SchemaInvalid {
        name: String,
        schema: String,
        violations: Vec<String>,
    },
}

impl BlockReason {
    pub fn into_error(self, project: &str) -> Error {
        match self {
            BlockReason::MissingArtifact { name } => Error::ArtifactNotFound {
                project: project.to_string(),
                name,
            },
            BlockReason::MissingApproval { flag } => Error::ApprovalRequired { flag },
            BlockReason::SchemaInvalid {
                name,
                schema,
                violations,
            } => Error::SchemaValidation {
                name,
                schema,
                violations,
            },
        }
    }
}

impl std::fmt::Display for BlockReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BlockReason::MissingArtifact { name } => write!(f, "missing artifact {}", name),
            BlockReason::MissingApproval { flag } => write!(f, "missing approval {}", flag),
            BlockReason::SchemaInvalid {
                name,
                schema,
                violations,
            } => write!(
                f,
                "artifact {} violates {}: {}",
                name,
                schema,
                violations.join("; ")
            ),
        }
    }
}

/// Approval check that can run before the handler, so an unapproved edge
/// has no side effects at all.
pub fn precheck(manifest: &ProjectManifest, from: Phase) -> Result<(), BlockReason> {
    match requirement(from, from.successor()) {
        GateRequirement::Approval(flag) if !manifest.is_approved(flag) => {
            Err(BlockReason::MissingApproval {
                flag: flag.to_string(),
            })
        }
        _ => Ok(()),
    }
}

/// Evaluate the gate for `from -> output.next_phase`. The edge itself must
/// already be known to be in the table.
pub fn evaluate(
    store: &ArtifactStore,
    manifest: &ProjectManifest,
    from: Phase,
    output: &PhaseOutput,
) -> Result<(), BlockReason> {
    match requirement(from, output.next_phase) {
        GateRequirement::Unconditional => Ok(()),
        GateRequirement::Approval(flag) => {
            if !manifest.is_approved(flag) {
                return Err(BlockReason::MissingApproval {
                    flag: flag.to_string(),
                });
            }
            check_artifact(store, output)
        }
        GateRequirement::Artifact => check_artifact(store, output),
    }
}

fn check_artifact(store: &ArtifactStore, output: &PhaseOutput) -> Result<(), BlockReason> {
    if output.payload.is_null() {
        return Err(BlockReason::MissingArtifact {
            name: output.artifact_name.clone(),
        });
    }
    let Some(schema) = output.schema_version.as_deref() else {
        return Ok(());
    };
    match store.validate(&output.artifact_name, &output.payload, schema) {
        Ok(()) => Ok(()),
        Err(Error::SchemaValidation {
            name,
            schema,
            violations,
        }) => Err(BlockReason::SchemaInvalid {
            name,
            schema,
            violations,
        }),
        Err(other) => Err(BlockReason::SchemaInvalid {
            name: output.artifact_name.clone(),
            schema: schema.to_string(),
            violations: vec![other.to_string()],
        }),
    }
}
