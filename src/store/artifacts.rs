//! Versioned JSON artifacts, one document per name per project.

use std::fs;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::lifecycle::{ArtifactSummary, Phase, ProjectId};
use crate::{plog_debug, plog_warn};

use super::schema::SchemaRegistry;
use super::workspace::{atomic_write, Workspace};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    pub generated_at: DateTime<Utc>,
}

/// An artifact document as stored on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub name: String,
    pub schema_version: Option<String>,
    pub producer_phase: Phase,
    pub payload: Value,
    pub metadata: ArtifactMetadata,
}

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    workspace: Workspace,
    schemas: SchemaRegistry,
}

impl ArtifactStore {
    pub fn new(workspace: Workspace, schemas: SchemaRegistry) -> Self {
        Self { workspace, schemas }
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    pub fn schemas(&self) -> &SchemaRegistry {
        &self.schemas
    }

    /// Check `payload` against a named rule set.
    pub fn validate(&self, name: &str, payload: &Value, schema_version: &str) -> Result<()> {
        let violations = self
            .schemas
            .check(schema_version, payload)
            .ok_or_else(|| Error::UnknownSchema(schema_version.to_string()))?;
        if violations.is_empty() {
            Ok(())
        } else {
            Err(Error::SchemaValidation {
                name: name.to_string(),
                schema: schema_version.to_string(),
                violations,
            })
        }
    }

    /// Replace the artifact document. Validation runs before anything
    /// touches disk.
    pub fn save(
        &self,
        project: &ProjectId,
        phase: Phase,
        name: &str,
        payload: &Value,
        schema_version: Option<&str>,
    ) -> Result<ArtifactSummary> {
        validate_name(name)?;
        if let Some(version) = schema_version {
            self.validate(name, payload, version)?;
        }

        let written_at = Utc::now();
        let artifact = Artifact {
            name: name.to_string(),
            schema_version: schema_version.map(str::to_string),
            producer_phase: phase,
            payload: payload.clone(),
            metadata: ArtifactMetadata {
                generated_at: written_at,
            },
        };
        let path = self.workspace.artifact_path(project, phase, name);
        atomic_write(&path, serde_json::to_string_pretty(&artifact)?.as_bytes())?;
        plog_debug!("Artifact saved: project={} path={}", project, path.display());

        Ok(ArtifactSummary {
            name: name.to_string(),
            schema_version: artifact.schema_version,
            producer_phase: phase,
            path: format!("artifacts/{}/{}.json", phase.dir_name(), name),
            written_at,
        })
    }

    /// Full document, found by searching the phase directories in
    /// lifecycle order.
    pub fn load_artifact(&self, project: &ProjectId, name: &str) -> Result<Artifact> {
        validate_name(name)?;
        let mut searched = Vec::new();
        for phase in Phase::ALL {
            if searched.contains(&phase.dir_name()) {
                continue;
            }
            searched.push(phase.dir_name());

            let path = self.workspace.artifact_path(project, phase, name);
            if !path.exists() {
                continue;
            }
            let contents = fs::read_to_string(&path)?;
            return serde_json::from_str(&contents).map_err(|e| {
                plog_warn!("Malformed artifact {}: {}", path.display(), e);
                Error::ArtifactDecode {
                    name: name.to_string(),
                    reason: e.to_string(),
                }
            });
        }
        Err(Error::ArtifactNotFound {
            project: project.to_string(),
            name: name.to_string(),
        })
    }

    pub fn load(&self, project: &ProjectId, name: &str) -> Result<Value> {
        self.load_artifact(project, name).map(|artifact| artifact.payload)
    }

    pub fn exists(&self, project: &ProjectId, name: &str) -> bool {
        self.load_artifact(project, name).is_ok()
    }
}

fn validate_name(name: &str) -> Result<()> {
    let ok = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-');
    if ok {
        Ok(())
    } else {
        Err(Error::Validation(format!("invalid artifact name: {:?}", name)))
    }
}
