//! Orchestrator - drives projects through the lifecycle.
//!
//! Owns the artifact store, the process-wide capability router, the handler
//! bindings and one guarded tool session per active project. Every command
//! that mutates a manifest holds that project's async lock for its whole
//! duration, so there is a single writer per project while different
//! projects advance concurrently.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::guard::{SafetyGuard, SessionTracking};
use crate::handlers::{HandlerRegistry, PhaseContext, PhaseHandler};
use crate::lifecycle::gate::{self, BlockReason};
use crate::lifecycle::{ArtifactSummary, Phase, ProjectId, ProjectManifest, QA_APPROVED};
use crate::router::{Capability, CapabilityRouter, Worker};
use crate::store::{ArtifactStore, SchemaRegistry, Workspace};
use crate::tools::ToolExecutor;
use crate::util::blocking_with_timeout;
use crate::{plog, plog_debug, plog_error, plog_warn};

/// Result of one `advance`. Fatal errors are returned as `Err` instead.
#[derive(Debug)]
pub enum TransitionOutcome {
    Advanced {
        from: Phase,
        to: Phase,
        artifact: ArtifactSummary,
    },
    /// The gate refused the edge. Nothing was written.
    Blocked(BlockReason),
    /// The handler failed. Nothing was written.
    Failed(Error),
}

impl TransitionOutcome {
    pub fn is_advanced(&self) -> bool {
        matches!(self, TransitionOutcome::Advanced { .. })
    }

    /// Collapse into a plain `Result` carrying the new phase.
    pub fn into_result(self, project: &ProjectId) -> Result<Phase> {
        match self {
            TransitionOutcome::Advanced { to, .. } => Ok(to),
            TransitionOutcome::Blocked(reason) => Err(reason.into_error(project.as_str())),
            TransitionOutcome::Failed(e) => Err(e),
        }
    }
}

/// What a project is waiting on before it can advance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Pending {
    Artifact { name: String },
    Approval { flag: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct ProjectStatus {
    pub project_id: ProjectId,
    pub name: String,
    pub current_phase: Phase,
    pub next_phase: Phase,
    pub qa_approved: bool,
    pub pending: Option<Pending>,
    pub artifacts: Vec<String>,
    pub history_len: usize,
    pub session_id: Option<Uuid>,
    pub updated_at: DateTime<Utc>,
}

/// Guarded tool access for one project.
pub struct ProjectSession {
    pub project_id: ProjectId,
    pub guard: Arc<SafetyGuard>,
    pub tools: Arc<ToolExecutor>,
}

impl ProjectSession {
    pub fn id(&self) -> Uuid {
        self.guard.session_id()
    }
}

pub struct Orchestrator {
    config: Config,
    store: Arc<ArtifactStore>,
    router: Arc<CapabilityRouter>,
    handlers: HandlerRegistry,
    sessions: Mutex<HashMap<ProjectId, Arc<ProjectSession>>>,
    locks: LockMap,
}

type LockMap = Arc<Mutex<HashMap<ProjectId, Arc<AsyncMutex<()>>>>>;

/// Held writer lock for one project. The lock's map entry goes away with
/// its last holder.
struct ProjectGuard {
    held: Option<OwnedMutexGuard<()>>,
    project: ProjectId,
    locks: LockMap,
}

impl Drop for ProjectGuard {
    fn drop(&mut self) {
        drop(self.held.take());
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if locks
            .get(&self.project)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.project);
        }
    }
}

impl Orchestrator {
    /// Orchestrator over the workspace the config resolves to.
    pub fn new(config: Config) -> Result<Self> {
        let root = config.workspace_root()?;
        Ok(Self::at(root, config))
    }

    /// Orchestrator over an explicit workspace root.
    pub fn at(root: impl Into<PathBuf>, config: Config) -> Self {
        let root = root.into();
        plog_debug!("Orchestrator::at root={}", root.display());
        let store = ArtifactStore::new(Workspace::new(root), SchemaRegistry::builtin());
        Self {
            config,
            store: Arc::new(store),
            router: Arc::new(CapabilityRouter::with_placeholder_workers()),
            handlers: HandlerRegistry::standard(),
            sessions: Mutex::new(HashMap::new()),
            locks: LockMap::default(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    pub fn workspace(&self) -> &Workspace {
        self.store.workspace()
    }

    pub fn router(&self) -> &CapabilityRouter {
        &self.router
    }

    /// Replace the handler for its phase.
    pub fn bind_handler(&mut self, handler: impl PhaseHandler + 'static) {
        self.handlers.bind(handler);
    }

    pub fn register_worker(&self, worker: Arc<dyn Worker>) -> bool {
        self.router.register(worker)
    }

    pub fn capability_matrix(&self) -> BTreeMap<String, BTreeSet<Capability>> {
        self.router.capability_matrix()
    }

    async fn lock_project(&self, project: &ProjectId) -> ProjectGuard {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(project.clone()).or_default())
        };
        ProjectGuard {
            held: Some(lock.lock_owned().await),
            project: project.clone(),
            locks: Arc::clone(&self.locks),
        }
    }

    pub async fn create_project(
        &self,
        project: &ProjectId,
        name: &str,
        description: &str,
    ) -> Result<ProjectManifest> {
        let _held = self.lock_project(project).await;

        let workspace = self.workspace();
        if workspace.project_exists(project) {
            return Err(Error::ProjectExists(project.to_string()));
        }
        std::fs::create_dir_all(workspace.sandbox_dir(project))?;
        let manifest = ProjectManifest::new(project.clone(), name, description);
        workspace.save_manifest(&manifest)?;
        plog!("Created project {} at {}", project, manifest.current_phase);
        Ok(manifest)
    }

    pub fn load_manifest(&self, project: &ProjectId) -> Result<ProjectManifest> {
        self.workspace().load_manifest(project)
    }

    pub fn list_projects(&self) -> Result<Vec<ProjectId>> {
        self.workspace().list_projects()
    }

    /// Session for `project`, opening one if none is active.
    pub fn open_session(&self, project: &ProjectId) -> Result<Arc<ProjectSession>> {
        if !self.workspace().project_exists(project) {
            return Err(Error::ProjectNotFound(project.to_string()));
        }
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(session) = sessions.get(project) {
            return Ok(Arc::clone(session));
        }

        let sandbox = self.workspace().sandbox_dir(project);
        let guard = Arc::new(SafetyGuard::standard(sandbox, &self.config));
        let tools = ToolExecutor::with_builtin_tools(Arc::clone(&guard), self.config.tool_timeout());
        let session = Arc::new(ProjectSession {
            project_id: project.clone(),
            guard,
            tools: Arc::new(tools),
        });
        plog!("Opened session {} for {}", session.id(), project);
        sessions.insert(project.clone(), Arc::clone(&session));
        Ok(session)
    }

    /// End the project's session. Its executor refuses any further call,
    /// including calls from a handler that was abandoned on timeout.
    /// Returns what the session tracked, if one was open.
    ///
    /// Sessions also end when a project is sent back for rework, when a
    /// handler times out, and after each advance into MAINTENANCE.
    pub fn close_session(&self, project: &ProjectId) -> Option<SessionTracking> {
        let session = self
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(project)?;
        session.tools.cancel();
        let tracking = session.guard.tracking();
        plog!(
            "Closed session {} for {}: {} calls, {} files written",
            session.id(),
            project,
            tracking.calls(),
            tracking.files_written()
        );
        Some(tracking)
    }

    pub fn session(&self, project: &ProjectId) -> Option<Arc<ProjectSession>> {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(project)
            .cloned()
    }

    /// Run the current phase's handler and commit its output if the gate
    /// for the proposed edge passes.
    pub async fn advance(&self, project: &ProjectId) -> Result<TransitionOutcome> {
        let _held = self.lock_project(project).await;

        let manifest = self.load_manifest(project)?;
        let from = manifest.current_phase;
        let handler = self
            .handlers
            .get(from)
            .ok_or_else(|| Error::NoHandler(from.to_string()))?;

        if let Err(reason) = gate::precheck(&manifest, from) {
            plog_warn!("{}: advance from {} blocked: {}", project, from, reason);
            return Ok(TransitionOutcome::Blocked(reason));
        }

        let session = self.open_session(project)?;
        let ctx = PhaseContext {
            manifest: manifest.clone(),
            store: Arc::clone(&self.store),
            router: Arc::clone(&self.router),
            tools: Arc::clone(&session.tools),
            qa_policy: self.config.qa_policy,
        };
        plog_debug!("{}: running {} handler", project, from);
        let output =
            match blocking_with_timeout(self.config.handler_timeout(), move || handler.execute(&ctx))
                .await
            {
                Ok(output) => output,
                Err(Error::Timeout(after)) => {
                    plog_warn!("{}: {} handler timed out after {:?}", project, from, after);
                    self.close_session(project);
                    return Ok(TransitionOutcome::Failed(Error::Timeout(after)));
                }
                Err(e) if e.is_fatal() => {
                    plog_error!("{}: {} handler failed fatally: {}", project, from, e);
                    return Err(e);
                }
                Err(e) => {
                    plog_warn!("{}: {} handler failed: {}", project, from, e);
                    return Ok(TransitionOutcome::Failed(e));
                }
            };

        let to = output.next_phase;
        if !from.can_transition(to) {
            plog_error!("{}: handler for {} proposed {}", project, from, to);
            return Err(Error::InvalidPhaseTransition {
                from: from.to_string(),
                to: to.to_string(),
            });
        }

        if let Err(reason) = gate::evaluate(&self.store, &manifest, from, &output) {
            plog_warn!("{}: {} -> {} blocked: {}", project, from, to, reason);
            return Ok(TransitionOutcome::Blocked(reason));
        }

        let summary = match self.store.save(
            project,
            from,
            &output.artifact_name,
            &output.payload,
            output.schema_version.as_deref(),
        ) {
            Ok(summary) => summary,
            Err(Error::SchemaValidation {
                name,
                schema,
                violations,
            }) => {
                let reason = BlockReason::SchemaInvalid {
                    name,
                    schema,
                    violations,
                };
                plog_warn!("{}: {} -> {} blocked: {}", project, from, to, reason);
                return Ok(TransitionOutcome::Blocked(reason));
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => return Ok(TransitionOutcome::Failed(e)),
        };

        let mut manifest = manifest;
        manifest.apply_transition(to, summary.clone())?;
        self.workspace().save_manifest(&manifest)?;
        plog!("{}: {} -> {} ({})", project, from, to, summary.name);
        if to == Phase::Maintenance {
            self.close_session(project);
        }

        Ok(TransitionOutcome::Advanced {
            from,
            to,
            artifact: summary,
        })
    }

    /// Grant QA approval. Returns `false` if it was already granted, in
    /// which case nothing is written.
    pub async fn approve_qa(&self, project: &ProjectId) -> Result<bool> {
        let _held = self.lock_project(project).await;

        let mut manifest = self.load_manifest(project)?;
        if manifest.current_phase != Phase::AwaitingQaApproval {
            return Err(Error::NotAwaitingApproval {
                phase: manifest.current_phase.to_string(),
            });
        }
        if !manifest.grant_approval(QA_APPROVED) {
            plog_debug!("{}: already approved", project);
            return Ok(false);
        }
        self.workspace().save_manifest(&manifest)?;
        plog!("{}: QA approved", project);
        Ok(true)
    }

    /// Send the project back to coding. The tool session is closed so the
    /// rework starts with fresh write budgets.
    pub async fn reject_qa(&self, project: &ProjectId, reason: Option<&str>) -> Result<()> {
        let _held = self.lock_project(project).await;

        let mut manifest = self.load_manifest(project)?;
        manifest.send_back_for_rework(reason)?;
        self.workspace().save_manifest(&manifest)?;
        self.close_session(project);
        plog!(
            "{}: QA rejected, back to {}: {}",
            project,
            manifest.current_phase,
            reason.unwrap_or("no reason given")
        );
        Ok(())
    }

    pub fn status(&self, project: &ProjectId) -> Result<ProjectStatus> {
        let manifest = self.load_manifest(project)?;
        let phase = manifest.current_phase;

        let pending = match gate::precheck(&manifest, phase) {
            Err(BlockReason::MissingApproval { flag }) => Some(Pending::Approval { flag }),
            _ => self
                .handlers
                .get(phase)
                .and_then(|h| h.requires())
                .filter(|name| !self.store.exists(project, name))
                .map(|name| Pending::Artifact {
                    name: name.to_string(),
                }),
        };

        Ok(ProjectStatus {
            project_id: manifest.project_id.clone(),
            name: manifest.name.clone(),
            current_phase: phase,
            next_phase: phase.successor(),
            qa_approved: manifest.qa_approved(),
            pending,
            artifacts: manifest.artifacts.keys().cloned().collect(),
            history_len: manifest.phase_history.len(),
            session_id: self.session(project).map(|s| s.id()),
            updated_at: manifest.updated_at,
        })
    }
}
