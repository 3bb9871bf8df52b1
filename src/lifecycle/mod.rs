//! Project lifecycle: phases, the manifest that tracks them, and the
//! quality gates guarding each edge.

pub mod gate;
mod manifest;
mod phase;

pub use gate::{BlockReason, GateRequirement};
pub use manifest::{
    ArtifactSummary, PhaseHistoryEntry, ProjectId, ProjectManifest, QA_APPROVED,
};
pub use phase::{Phase, PhaseGraph, PlanningStage};
