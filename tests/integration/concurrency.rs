//! Concurrency tests.
//!
//! One writer per project, independent projects in parallel, and handler
//! timeouts that release the project.

use std::time::{Duration, Instant};

use serde_json::json;

use phasegate::config::Config;
use phasegate::handlers::{PhaseContext, PhaseHandler, PhaseOutput};
use phasegate::tools::params;
use phasegate::{Error, Phase, PlanningStage, Result, TransitionOutcome};

use crate::fixtures::Harness;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_projects_advance_independently() {
    let harness = Harness::new();
    let shop = harness.project("shop").await;
    let blog = harness.project("blog").await;

    let (a, b) = tokio::join!(
        harness.orchestrator.advance(&shop),
        harness.orchestrator.advance(&blog)
    );
    assert!(a.unwrap().is_advanced());
    assert!(b.unwrap().is_advanced());

    let next = Phase::Planning(PlanningStage::FeasibilityValidation);
    assert_eq!(harness.phase(&shop), next);
    assert_eq!(harness.phase(&blog), next);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_same_project_advances_are_serialized() {
    let harness = Harness::new();
    let id = harness.project("shop").await;

    let (first, second, third) = tokio::join!(
        harness.orchestrator.advance(&id),
        harness.orchestrator.advance(&id),
        harness.orchestrator.advance(&id)
    );
    let mut edges: Vec<(Phase, Phase)> = [first, second, third]
        .into_iter()
        .map(|outcome| match outcome.unwrap() {
            TransitionOutcome::Advanced { from, to, .. } => (from, to),
            other => panic!("expected an advance, got {:?}", other),
        })
        .collect();
    edges.sort();

    assert_eq!(
        edges,
        vec![
            (
                Phase::Planning(PlanningStage::FeatureExtraction),
                Phase::Planning(PlanningStage::FeasibilityValidation)
            ),
            (
                Phase::Planning(PlanningStage::FeasibilityValidation),
                Phase::Planning(PlanningStage::Specification)
            ),
            (Phase::Planning(PlanningStage::Specification), Phase::Coding),
        ]
    );
    let manifest = harness.orchestrator.load_manifest(&id).unwrap();
    assert_eq!(manifest.current_phase, Phase::Coding);
    assert_eq!(manifest.phase_history.len(), 4);
}

struct Stalled;

impl PhaseHandler for Stalled {
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
        std::thread::sleep(Duration::from_secs(2));
        ctx.run_tool(
            "write_file",
            &params(json!({ "path": "late.txt", "content": "too late" })),
        );
        Ok(PhaseOutput::new(
            "feature_list",
            json!({ "features": [{ "id": "f1" }], "source": "late" }),
            Phase::Planning(PlanningStage::FeasibilityValidation),
        ))
    }
}

/// Test: Handler Timeout
/// Given a handler that outlives the configured timeout
/// When the project advances
/// Then the outcome is a timeout failure, the project is usable again and
/// the abandoned handler can no longer write into the sandbox
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_handler_timeout_releases_project() {
    let mut harness = Harness::with_config(Config {
        handler_timeout_secs: Some(1),
        ..Default::default()
    });
    harness.orchestrator.bind_handler(Stalled);
    let id = harness.project("shop").await;

    let first_session = harness.orchestrator.open_session(&id).unwrap();
    let started = Instant::now();
    let outcome = harness.orchestrator.advance(&id).await.unwrap();
    assert!(matches!(outcome, TransitionOutcome::Failed(Error::Timeout(_))));
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(first_session.tools.is_cancelled());
    assert!(harness.orchestrator.session(&id).is_none());

    assert_eq!(harness.phase(&id), Phase::INITIAL);
    let approval = tokio::time::timeout(
        Duration::from_millis(500),
        harness.orchestrator.approve_qa(&id),
    )
    .await
    .expect("project lock still held after timeout");
    assert!(matches!(approval, Err(Error::NotAwaitingApproval { .. })));

    // Let the abandoned handler wake up and try its write.
    tokio::time::sleep(Duration::from_millis(1500)).await;
    let sandbox = harness.orchestrator.workspace().sandbox_dir(&id);
    assert!(!sandbox.join("late.txt").exists());
    assert_eq!(first_session.guard.tracking().calls(), 0);
}

/// Runs a command that outlasts the tool timeout and records how it ended.
struct SlowCommand;

impl PhaseHandler for SlowCommand {
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
        let result = ctx.run_tool(
            "run_command",
            &params(json!({ "program": "sleep", "args": ["3"] })),
        );
        let outcome = match result.error() {
            Some(error) => serde_json::to_value(error.kind)?,
            None => json!("completed"),
        };
        Ok(PhaseOutput::new(
            "feature_list",
            json!({ "features": [{ "id": "f1" }], "source": outcome }),
            Phase::Planning(PlanningStage::FeasibilityValidation),
        ))
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_tool_timeout_applies_inside_handlers() {
    let mut harness = Harness::with_config(Config {
        tool_timeout_secs: Some(1),
        handler_timeout_secs: Some(30),
        ..Default::default()
    });
    harness.orchestrator.bind_handler(SlowCommand);
    let id = harness.project("shop").await;

    let started = Instant::now();
    assert_eq!(
        harness.step(&id).await,
        Phase::Planning(PlanningStage::FeasibilityValidation)
    );
    assert!(started.elapsed() < Duration::from_secs(3));
    let list = harness.orchestrator.store().load(&id, "feature_list").unwrap();
    assert_eq!(list["source"], "timeout");
}
