//! Persistent state: the workspace layout, project manifests, and the
//! schema-validated artifact store.

mod artifacts;
mod schema;
mod workspace;

pub use artifacts::{Artifact, ArtifactMetadata, ArtifactStore};
pub use schema::{FieldKind, SchemaRegistry, SchemaRule};
pub use workspace::{atomic_write, Workspace};
