//! Phase handlers: the work done in each lifecycle phase.
//!
//! A handler loads the one upstream artifact its phase depends on, gets the
//! phase's work done by a routed worker, and hands back the artifact it
//! produced together with the phase it proposes to move to. Handlers never
//! write artifacts or touch the manifest; the orchestrator commits their
//! output only after the quality gate passes.

mod build;
mod planning;
mod release;

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::runtime::Handle;

use crate::config::QaPolicy;
use crate::error::{Error, Result};
use crate::lifecycle::{Phase, PhaseGraph, ProjectManifest, QA_APPROVED};
use crate::router::{CapabilityRouter, WorkRequest};
use crate::store::ArtifactStore;
use crate::tools::{ToolExecutor, ToolParams, ToolResult};
use crate::{plog_debug, plog_warn};

pub use build::{CodingHandler, TestingHandler};
pub use planning::{FeasibilityHandler, FeatureExtractionHandler, SpecificationHandler};
pub use release::{DeploymentHandler, MaintenanceHandler, ProductionHandler, ReleaseHandler};

/// What a handler produced.
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseOutput {
    pub artifact_name: String,
    pub payload: Value,
    pub schema_version: Option<String>,
    pub next_phase: Phase,
}

impl PhaseOutput {
    pub fn new(artifact_name: &str, payload: Value, next_phase: Phase) -> Self {
        Self {
            artifact_name: artifact_name.to_string(),
            payload,
            schema_version: Some(format!("{}/v1", artifact_name)),
            next_phase,
        }
    }
}

/// Everything a handler may use while it runs.
pub struct PhaseContext {
    pub manifest: ProjectManifest,
    pub store: Arc<ArtifactStore>,
    pub router: Arc<CapabilityRouter>,
    pub tools: Arc<ToolExecutor>,
    pub qa_policy: QaPolicy,
}

impl PhaseContext {
    pub fn phase(&self) -> Phase {
        self.manifest.current_phase
    }

    /// Load an upstream artifact. Fails if it is missing or was produced by
    /// a phase that does not precede this one.
    pub fn require_artifact(&self, name: &str) -> Result<Value> {
        let artifact = self.store.load_artifact(&self.manifest.project_id, name)?;
        if !PhaseGraph::lifecycle().precedes(artifact.producer_phase, self.phase()) {
            return Err(Error::CausalityViolation {
                reader: self.phase().to_string(),
                artifact: name.to_string(),
                producer: artifact.producer_phase.to_string(),
            });
        }
        Ok(artifact.payload)
    }

    /// Like `require_artifact`, but absence is `Ok(None)`.
    pub fn optional_artifact(&self, name: &str) -> Result<Option<Value>> {
        match self.require_artifact(name) {
            Ok(payload) => Ok(Some(payload)),
            Err(Error::ArtifactNotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Route `request` to the best worker and have it do the work.
    pub fn dispatch(&self, request: &WorkRequest, inputs: &Value) -> Result<Value> {
        let worker = self
            .router
            .route(request)
            .ok_or_else(|| Error::NoCapableWorker {
                skills: request.required_skills.iter().cloned().collect(),
            })?;
        plog_debug!(
            "{}: {} routed to {}",
            self.manifest.project_id,
            request.intent,
            worker.name()
        );
        worker
            .perform(&request.intent, inputs)
            .map_err(|e| match e {
                Error::WorkerFailed { .. } => e,
                other => Error::WorkerFailed {
                    worker: worker.name().to_string(),
                    message: other.to_string(),
                },
            })
    }

    /// Run a tool through the session executor under its tool timeout.
    ///
    /// Handlers run on the blocking pool, so this parks the handler's thread
    /// on the runtime until the call finishes or times out. Outside any
    /// runtime the call runs inline with no timeout.
    pub fn run_tool(&self, name: &str, params: &ToolParams) -> ToolResult {
        match Handle::try_current() {
            Ok(runtime) => runtime.block_on(self.tools.execute_with_timeout(name, params)),
            Err(_) => self.tools.execute(name, params),
        }
    }

    /// QA approval check for phases past the approval gate.
    pub fn ensure_qa_approved(&self) -> Result<()> {
        if self.manifest.qa_approved() {
            return Ok(());
        }
        match self.qa_policy {
            QaPolicy::Enforce => Err(Error::ApprovalRequired {
                flag: QA_APPROVED.to_string(),
            }),
            QaPolicy::Warn => {
                plog_warn!(
                    "{}: {} proceeding without QA approval",
                    self.manifest.project_id,
                    self.phase()
                );
                Ok(())
            }
        }
    }
}

pub trait PhaseHandler: Send + Sync {
    fn phase(&self) -> Phase;

    /// The upstream artifact this phase cannot run without.
    fn requires(&self) -> Option<&'static str>;

    /// The artifact this phase produces.
    fn produces(&self) -> &'static str;

    fn execute(&self, ctx: &PhaseContext) -> Result<PhaseOutput>;
}

/// Handlers bound to phases. One handler per phase.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<Phase, Arc<dyn PhaseHandler>>,
}

impl HandlerRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn standard() -> Self {
        let mut registry = Self::empty();
        registry.bind(FeatureExtractionHandler);
        registry.bind(FeasibilityHandler);
        registry.bind(SpecificationHandler);
        registry.bind(CodingHandler);
        registry.bind(TestingHandler);
        registry.bind(ReleaseHandler);
        registry.bind(DeploymentHandler);
        registry.bind(ProductionHandler);
        registry.bind(MaintenanceHandler);
        registry
    }

    /// Bind a handler to its phase, replacing any existing one.
    pub fn bind(&mut self, handler: impl PhaseHandler + 'static) {
        self.handlers.insert(handler.phase(), Arc::new(handler));
    }

    pub fn get(&self, phase: Phase) -> Option<Arc<dyn PhaseHandler>> {
        self.handlers.get(&phase).cloned()
    }
}
