//! On-disk layout of a phasegate workspace.
//!
//! ```text
//! <root>/<project>/manifest.json
//! <root>/<project>/artifacts/<phase>/<artifact>.json
//! <root>/<project>/workspace/            files written by tools
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::lifecycle::{Phase, ProjectId, ProjectManifest};
use crate::plog_debug;

const MANIFEST_FILE: &str = "manifest.json";
const ARTIFACTS_DIR: &str = "artifacts";
const SANDBOX_DIR: &str = "workspace";

#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn project_dir(&self, id: &ProjectId) -> PathBuf {
        self.root.join(id.as_str())
    }

    pub fn manifest_path(&self, id: &ProjectId) -> PathBuf {
        self.project_dir(id).join(MANIFEST_FILE)
    }

    pub fn artifacts_dir(&self, id: &ProjectId) -> PathBuf {
        self.project_dir(id).join(ARTIFACTS_DIR)
    }

    pub fn artifact_path(&self, id: &ProjectId, phase: Phase, name: &str) -> PathBuf {
        self.artifacts_dir(id)
            .join(phase.dir_name())
            .join(format!("{}.json", name))
    }

    /// Directory tools are confined to for a project.
    pub fn sandbox_dir(&self, id: &ProjectId) -> PathBuf {
        self.project_dir(id).join(SANDBOX_DIR)
    }

    pub fn project_exists(&self, id: &ProjectId) -> bool {
        self.manifest_path(id).exists()
    }

    pub fn load_manifest(&self, id: &ProjectId) -> Result<ProjectManifest> {
        let path = self.manifest_path(id);
        plog_debug!("Workspace::load_manifest path={}", path.display());
        if !path.exists() {
            return Err(Error::ProjectNotFound(id.to_string()));
        }
        let manifest: ProjectManifest = serde_json::from_str(&fs::read_to_string(&path)?)?;
        Ok(manifest)
    }

    /// Persist the manifest. A reader sees either the old or the new file.
    pub fn save_manifest(&self, manifest: &ProjectManifest) -> Result<()> {
        let path = self.manifest_path(&manifest.project_id);
        let contents = serde_json::to_string_pretty(manifest)?;
        if path.exists() {
            fs::copy(&path, path.with_extension("json.bak"))?;
        }
        atomic_write(&path, contents.as_bytes())?;
        plog_debug!(
            "Manifest saved: project={} phase={}",
            manifest.project_id,
            manifest.current_phase
        );
        Ok(())
    }

    pub fn list_projects(&self) -> Result<Vec<ProjectId>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let mut ids: Vec<ProjectId> = fs::read_dir(&self.root)?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().join(MANIFEST_FILE).exists())
            .filter_map(|entry| entry.file_name().to_str().and_then(|n| ProjectId::new(n).ok()))
            .collect();
        ids.sort();
        Ok(ids)
    }
}

/// Write to a sibling temp file, then rename over the target.
pub fn atomic_write(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.exists() {
            fs::create_dir_all(parent)?;
        }
    }
    let temp_path = path.with_extension("json.tmp");
    fs::write(&temp_path, contents)?;
    fs::rename(&temp_path, path)?;
    Ok(())
}
