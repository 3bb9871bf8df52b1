//! Test fixtures for integration tests.
//!
//! Provides helpers for:
//! - An orchestrator over a temporary workspace
//! - Driving a project to a given phase

use std::path::Path;

use tempfile::TempDir;

use phasegate::config::Config;
use phasegate::{Orchestrator, Phase, ProjectId, TransitionOutcome};

pub const DESCRIPTION: &str = "User login; Product search; Checkout";

/// An orchestrator rooted in a temporary workspace.
pub struct Harness {
    /// Keeps the workspace alive for the test's duration.
    pub temp_dir: TempDir,
    pub orchestrator: Orchestrator,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let orchestrator = Orchestrator::at(temp_dir.path(), config);
        Self {
            temp_dir,
            orchestrator,
        }
    }

    pub fn root(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Create a project with the standard description.
    pub async fn project(&self, id: &str) -> ProjectId {
        let id = ProjectId::new(id).unwrap();
        self.orchestrator
            .create_project(&id, "Shop", DESCRIPTION)
            .await
            .expect("Failed to create project");
        id
    }

    /// Advance and insist it moved on.
    pub async fn step(&self, id: &ProjectId) -> Phase {
        match self.orchestrator.advance(id).await.expect("advance errored") {
            TransitionOutcome::Advanced { to, .. } => to,
            other => panic!("expected {} to advance, got {:?}", id, other),
        }
    }

    /// Advance until the project reaches `target`, approving QA on the way
    /// if `approve` is set.
    pub async fn drive_to(&self, id: &ProjectId, target: Phase, approve: bool) {
        for _ in 0..16 {
            let phase = self.orchestrator.load_manifest(id).unwrap().current_phase;
            if phase == target {
                return;
            }
            if phase == Phase::AwaitingQaApproval && approve {
                self.orchestrator.approve_qa(id).await.unwrap();
            }
            self.step(id).await;
        }
        panic!("{} never reached {}", id, target);
    }

    pub fn phase(&self, id: &ProjectId) -> Phase {
        self.orchestrator.load_manifest(id).unwrap().current_phase
    }

    pub fn artifact_file(&self, id: &ProjectId, phase_dir: &str, name: &str) -> std::path::PathBuf {
        self.root()
            .join(id.as_str())
            .join("artifacts")
            .join(phase_dir)
            .join(format!("{}.json", name))
    }
}
