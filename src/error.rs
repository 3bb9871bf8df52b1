use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("No home directory")]
    NoHomeDir,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Project not found: {0}")]
    ProjectNotFound(String),

    #[error("Project already exists: {0}")]
    ProjectExists(String),

    #[error("Artifact not found: {name} (project {project})")]
    ArtifactNotFound { project: String, name: String },

    #[error("Artifact {name} could not be decoded: {reason}")]
    ArtifactDecode { name: String, reason: String },

    #[error("Artifact {name} failed schema {schema}: {}", .violations.join("; "))]
    SchemaValidation {
        name: String,
        schema: String,
        violations: Vec<String>,
    },

    #[error("Unknown schema: {0}")]
    UnknownSchema(String),

    #[error("Invalid phase transition from {from} to {to}")]
    InvalidPhaseTransition { from: String, to: String },

    #[error("Approval required: {flag} is not set")]
    ApprovalRequired { flag: String },

    #[error("Project is in {phase}, not awaiting QA approval")]
    NotAwaitingApproval { phase: String },

    #[error("{reader} may not read {artifact} produced by {producer}")]
    CausalityViolation {
        reader: String,
        artifact: String,
        producer: String,
    },

    #[error("No handler bound to phase {0}")]
    NoHandler(String),

    #[error("No worker offers any of: {}", .skills.join(", "))]
    NoCapableWorker { skills: Vec<String> },

    #[error("Worker {worker} failed: {message}")]
    WorkerFailed { worker: String, message: String },

    #[error("Operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Task join error: {0}")]
    TaskJoin(String),
}

impl Error {
    /// Whether the error should escalate past an `advance` call instead of
    /// being reported as a failed transition.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Io(_)
                | Error::Json(_)
                | Error::NoHomeDir
                | Error::ProjectNotFound(_)
                | Error::InvalidPhaseTransition { .. }
                | Error::NoHandler(_)
                | Error::TaskJoin(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
