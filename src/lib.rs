pub mod config;
pub mod error;
pub mod log;
pub mod util;

// Lifecycle core
pub mod guard;
pub mod handlers;
pub mod lifecycle;
pub mod orchestrator;
pub mod router;
pub mod store;
pub mod tools;

pub use config::{Config, QaPolicy};
pub use error::{Error, Result};
pub use lifecycle::{Phase, PlanningStage, ProjectId, ProjectManifest};
pub use orchestrator::{Orchestrator, Pending, ProjectStatus, TransitionOutcome};
