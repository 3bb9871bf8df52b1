//! Capability routing tests.
//!
//! Exercise the orchestrator's process-wide router with custom workers, and
//! the way routing failures surface from `advance`.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::{json, Value};

use phasegate::handlers::{PhaseContext, PhaseHandler, PhaseOutput};
use phasegate::router::{Capability, WorkRequest, Worker};
use phasegate::{Error, Phase, PlanningStage, Result, TransitionOutcome};

use crate::fixtures::Harness;

struct Auditor {
    name: &'static str,
    capabilities: BTreeSet<Capability>,
    healthy: bool,
}

impl Auditor {
    fn new(name: &'static str, caps: &[&str], healthy: bool) -> Arc<dyn Worker> {
        Arc::new(Self {
            name,
            capabilities: caps.iter().map(|c| c.to_string()).collect(),
            healthy,
        })
    }
}

impl Worker for Auditor {
    fn name(&self) -> &str {
        self.name
    }

    fn capabilities(&self) -> &BTreeSet<Capability> {
        &self.capabilities
    }

    fn perform(&self, intent: &str, _inputs: &Value) -> Result<Value> {
        if !self.healthy {
            return Err(Error::Validation(format!("{} cannot {}", self.name, intent)));
        }
        Ok(json!({ "features": [{ "id": "f1", "title": "audited" }], "source": self.name }))
    }
}

/// Feature extraction that asks for a security audit instead.
struct AuditedExtraction;

impl PhaseHandler for AuditedExtraction {
    fn phase(&self) -> Phase {
        Phase::INITIAL
    }

    fn requires(&self) -> Option<&'static str> {
        None
    }

    fn produces(&self) -> &'static str {
        "feature_list"
    }

    fn execute(&self, ctx: &PhaseContext) -> Result<PhaseOutput> {
        let request = WorkRequest::new("audit", &["security_audit"]);
        let payload = ctx.dispatch(&request, &json!({}))?;
        Ok(PhaseOutput::new(
            self.produces(),
            payload,
            Phase::Planning(PlanningStage::FeasibilityValidation),
        ))
    }
}

#[test]
fn test_placeholder_roles_cover_every_phase_skill() {
    let harness = Harness::new();
    let matrix = harness.orchestrator.capability_matrix();
    let names: Vec<&str> = matrix.keys().map(String::as_str).collect();
    assert_eq!(names, vec!["coder", "operator", "planner", "releaser", "tester"]);

    for skills in [
        &["requirements_analysis"][..],
        &["feasibility_analysis"],
        &["architecture", "specification"],
        &["code_generation"],
        &["testing", "qa"],
        &["release_management"],
        &["deployment", "infrastructure"],
        &["monitoring"],
        &["maintenance"],
    ] {
        let request = WorkRequest::new("any", skills);
        assert!(harness.orchestrator.router().route(&request).is_some());
    }
}

#[test]
fn test_late_registration_loses_ties() {
    let harness = Harness::new();
    assert!(harness
        .orchestrator
        .register_worker(Auditor::new("second-coder", &["code_generation"], true)));
    assert!(!harness
        .orchestrator
        .register_worker(Auditor::new("coder", &["security_audit"], true)));

    let request = WorkRequest::new("generate_code", &["code_generation"]);
    for _ in 0..20 {
        let chosen = harness.orchestrator.router().route(&request).unwrap();
        assert_eq!(chosen.name(), "coder");
    }
}

#[tokio::test]
async fn test_custom_worker_drives_a_phase() {
    let mut harness = Harness::new();
    harness.orchestrator.bind_handler(AuditedExtraction);
    harness
        .orchestrator
        .register_worker(Auditor::new("auditor", &["security_audit"], true));
    let id = harness.project("shop").await;

    assert_eq!(
        harness.step(&id).await,
        Phase::Planning(PlanningStage::FeasibilityValidation)
    );
    let list = harness.orchestrator.store().load(&id, "feature_list").unwrap();
    assert_eq!(list["source"], "auditor");
}

#[tokio::test]
async fn test_no_capable_worker_fails_the_phase() {
    let mut harness = Harness::new();
    harness.orchestrator.bind_handler(AuditedExtraction);
    let id = harness.project("shop").await;

    let outcome = harness.orchestrator.advance(&id).await.unwrap();
    assert!(matches!(
        &outcome,
        TransitionOutcome::Failed(Error::NoCapableWorker { skills }) if skills == &["security_audit"]
    ));
    assert_eq!(harness.phase(&id), Phase::INITIAL);
}

#[tokio::test]
async fn test_worker_failure_is_reported_by_name() {
    let mut harness = Harness::new();
    harness.orchestrator.bind_handler(AuditedExtraction);
    harness
        .orchestrator
        .register_worker(Auditor::new("flaky", &["security_audit"], false));
    let id = harness.project("shop").await;

    let outcome = harness.orchestrator.advance(&id).await.unwrap();
    let TransitionOutcome::Failed(Error::WorkerFailed { worker, message }) = outcome else {
        panic!("expected a worker failure");
    };
    assert_eq!(worker, "flaky");
    assert!(message.contains("cannot audit"));
    assert!(!harness.orchestrator.store().exists(&id, "feature_list"));
}
