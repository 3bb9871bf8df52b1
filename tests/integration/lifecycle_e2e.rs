//! End-to-end lifecycle tests.
//!
//! These tests walk projects through every phase with the placeholder
//! workers, and check the gates at the edges that need them.

use serde_json::json;

use phasegate::handlers::{PhaseContext, PhaseHandler, PhaseOutput};
use phasegate::lifecycle::gate::BlockReason;
use phasegate::{Error, Phase, PlanningStage, Result, TransitionOutcome};

use crate::fixtures::Harness;

/// Test: Full Lifecycle
/// Given a new project
/// When it is advanced through every phase with QA approval
/// Then each phase's artifact exists and maintenance repeats
#[tokio::test]
async fn test_full_walk_to_maintenance() {
    let harness = Harness::new();
    let id = harness.project("shop").await;

    let expected = [
        Phase::Planning(PlanningStage::FeasibilityValidation),
        Phase::Planning(PlanningStage::Specification),
        Phase::Coding,
        Phase::Testing,
        Phase::AwaitingQaApproval,
    ];
    for phase in expected {
        assert_eq!(harness.step(&id).await, phase);
    }

    assert!(harness.orchestrator.approve_qa(&id).await.unwrap());
    assert_eq!(harness.step(&id).await, Phase::Deployment);
    assert_eq!(harness.step(&id).await, Phase::Production);
    assert_eq!(harness.step(&id).await, Phase::Maintenance);
    assert!(harness.orchestrator.session(&id).is_none());
    assert_eq!(harness.step(&id).await, Phase::Maintenance);
    assert_eq!(harness.step(&id).await, Phase::Maintenance);
    assert!(harness.orchestrator.session(&id).is_none());

    let manifest = harness.orchestrator.load_manifest(&id).unwrap();
    for name in [
        "feature_list",
        "feasibility_report",
        "feature_spec",
        "code_gen_spec",
        "qa_report",
        "release_candidate",
        "deployment_report",
        "production_status",
        "maintenance_report",
    ] {
        assert!(manifest.has_artifact(name), "missing {}", name);
    }
    assert_eq!(manifest.phase_history.len(), 11);

    let report = harness.orchestrator.store().load(&id, "maintenance_report").unwrap();
    assert_eq!(report["cycle"], 2);

    let sandbox = harness.orchestrator.workspace().sandbox_dir(&id);
    assert!(sandbox.join("src/f1.rs").exists());
    assert!(sandbox.join("src/f3.rs").exists());
}

/// Test: QA Parking
/// Given a project in TESTING with a code_gen_spec
/// When it advances, then advances again without approval
/// Then the qa_report exists and the second advance is refused with no writes
#[tokio::test]
async fn test_testing_parks_at_qa_approval() {
    let harness = Harness::new();
    let id = harness.project("shop").await;
    harness.drive_to(&id, Phase::Testing, false).await;

    assert_eq!(harness.step(&id).await, Phase::AwaitingQaApproval);
    assert!(harness.artifact_file(&id, "testing", "qa_report").exists());
    let qa = harness.orchestrator.store().load(&id, "qa_report").unwrap();
    assert_eq!(qa["passed"], true);
    assert_eq!(qa["total"], 3);

    let outcome = harness.orchestrator.advance(&id).await.unwrap();
    assert!(matches!(
        &outcome,
        TransitionOutcome::Blocked(BlockReason::MissingApproval { flag }) if flag == "qa_approved"
    ));
    let err = outcome.into_result(&id).unwrap_err();
    assert!(matches!(err, Error::ApprovalRequired { .. }));

    assert_eq!(harness.phase(&id), Phase::AwaitingQaApproval);
    assert!(!harness.orchestrator.store().exists(&id, "release_candidate"));
}

#[tokio::test]
async fn test_approving_twice_is_idempotent() {
    let harness = Harness::new();
    let id = harness.project("shop").await;
    harness.drive_to(&id, Phase::AwaitingQaApproval, false).await;

    assert!(harness.orchestrator.approve_qa(&id).await.unwrap());
    let first = harness.orchestrator.load_manifest(&id).unwrap();
    assert!(!harness.orchestrator.approve_qa(&id).await.unwrap());
    let second = harness.orchestrator.load_manifest(&id).unwrap();

    assert!(second.qa_approved());
    assert_eq!(first.updated_at, second.updated_at);
    assert_eq!(first.phase_history.len(), second.phase_history.len());
}

/// Test: QA Rejection
/// Given a project awaiting QA approval
/// When QA is rejected
/// Then it is back in CODING with approval cleared, and can be reworked
#[tokio::test]
async fn test_rejection_sends_back_to_coding() {
    let harness = Harness::new();
    let id = harness.project("shop").await;
    harness.drive_to(&id, Phase::AwaitingQaApproval, false).await;
    harness.orchestrator.approve_qa(&id).await.unwrap();

    harness
        .orchestrator
        .reject_qa(&id, Some("checkout flow untested"))
        .await
        .unwrap();

    let manifest = harness.orchestrator.load_manifest(&id).unwrap();
    assert_eq!(manifest.current_phase, Phase::Coding);
    assert!(!manifest.qa_approved());
    let last = manifest.phase_history.last().unwrap();
    assert_eq!(last.note.as_deref(), Some("qa rejected: checkout flow untested"));

    assert_eq!(harness.step(&id).await, Phase::Testing);
    assert_eq!(harness.step(&id).await, Phase::AwaitingQaApproval);
    harness.orchestrator.reject_qa(&id, None).await.unwrap();
    assert!(matches!(
        harness.orchestrator.reject_qa(&id, None).await,
        Err(Error::NotAwaitingApproval { .. })
    ));
}

/// Test: Missing Upstream Artifact
/// Given a project in CODING with no feature_spec
/// When it advances
/// Then the handler fails, the phase is unchanged and nothing is written
#[tokio::test]
async fn test_coding_without_feature_spec() {
    let harness = Harness::new();
    let id = harness.project("shop").await;
    let mut manifest = harness.orchestrator.load_manifest(&id).unwrap();
    manifest.current_phase = Phase::Coding;
    harness.orchestrator.workspace().save_manifest(&manifest).unwrap();

    let outcome = harness.orchestrator.advance(&id).await.unwrap();
    assert!(matches!(
        &outcome,
        TransitionOutcome::Failed(Error::ArtifactNotFound { name, .. }) if name == "feature_spec"
    ));
    assert_eq!(harness.phase(&id), Phase::Coding);
    assert!(!harness.artifact_file(&id, "coding", "code_gen_spec").exists());
}

#[tokio::test]
async fn test_specification_without_feasibility_report_stays_in_planning() {
    let harness = Harness::new();
    let id = harness.project("shop").await;
    let mut manifest = harness.orchestrator.load_manifest(&id).unwrap();
    manifest.current_phase = Phase::Planning(PlanningStage::Specification);
    harness.orchestrator.workspace().save_manifest(&manifest).unwrap();

    let outcome = harness.orchestrator.advance(&id).await.unwrap();
    assert!(matches!(outcome, TransitionOutcome::Failed(Error::ArtifactNotFound { .. })));
    assert_eq!(harness.phase(&id), Phase::Planning(PlanningStage::Specification));
    assert!(!harness.orchestrator.store().exists(&id, "feature_spec"));
}

struct NoFeatures;

impl PhaseHandler for NoFeatures {
    fn phase(&self) -> Phase {
        Phase::INITIAL
    }

    fn requires(&self) -> Option<&'static str> {
        None
    }

    fn produces(&self) -> &'static str {
        "feature_list"
    }

    fn execute(&self, _ctx: &PhaseContext) -> Result<PhaseOutput> {
        Ok(PhaseOutput::new(
            "feature_list",
            json!({ "features": [] }),
            Phase::Planning(PlanningStage::FeasibilityValidation),
        ))
    }
}

#[tokio::test]
async fn test_schema_violation_blocks_without_writing() {
    let mut harness = Harness::new();
    harness.orchestrator.bind_handler(NoFeatures);
    let id = harness.project("shop").await;

    let outcome = harness.orchestrator.advance(&id).await.unwrap();
    let TransitionOutcome::Blocked(BlockReason::SchemaInvalid { schema, violations, .. }) = outcome
    else {
        panic!("expected a schema block");
    };
    assert_eq!(schema, "feature_list/v1");
    assert_eq!(violations.len(), 2);
    assert_eq!(harness.phase(&id), Phase::INITIAL);
    assert!(!harness.artifact_file(&id, "planning", "feature_list").exists());
}

#[tokio::test]
async fn test_status_tracks_pending_requirements() {
    let harness = Harness::new();
    let id = harness.project("shop").await;

    let status = harness.orchestrator.status(&id).unwrap();
    assert_eq!(status.current_phase, Phase::INITIAL);
    assert!(status.pending.is_none());

    harness.drive_to(&id, Phase::AwaitingQaApproval, false).await;
    let status = harness.orchestrator.status(&id).unwrap();
    assert_eq!(
        serde_json::to_value(&status.pending).unwrap(),
        json!({ "kind": "approval", "flag": "qa_approved" })
    );
    assert_eq!(status.next_phase, Phase::Deployment);
    assert!(status.session_id.is_some());
}

#[test]
fn test_manifest_survives_reload_across_orchestrators() {
    let harness = Harness::new();
    let id = tokio_test::block_on(harness.project("shop"));
    tokio_test::block_on(harness.step(&id));

    let reopened = phasegate::Orchestrator::at(harness.root(), phasegate::Config::default());
    let manifest = reopened.load_manifest(&id).unwrap();
    assert_eq!(
        manifest.current_phase,
        Phase::Planning(PlanningStage::FeasibilityValidation)
    );
    assert_eq!(reopened.list_projects().unwrap(), vec![id]);
}
