//! Safety guard tests through project sessions.
//!
//! Tool calls go through the session executor exactly as phase handlers
//! issue them, so a blocked call must leave the filesystem untouched.

use serde_json::json;

use phasegate::config::Config;
use phasegate::tools::{params, ToolErrorKind};
use phasegate::Phase;

use crate::fixtures::Harness;

#[tokio::test]
async fn test_escape_from_sandbox_never_reaches_disk() {
    let harness = Harness::new();
    let id = harness.project("shop").await;
    let session = harness.orchestrator.open_session(&id).unwrap();

    let result = session.tools.execute(
        "write_file",
        &params(json!({ "path": "../manifest.json", "content": "{}" })),
    );
    assert!(result.is_guard_blocked());
    assert_eq!(
        result.error().unwrap().violation.as_ref().unwrap().rule_id,
        "path_escape"
    );

    // The real manifest is still intact.
    let manifest = harness.orchestrator.load_manifest(&id).unwrap();
    assert_eq!(manifest.current_phase, Phase::INITIAL);
    assert_eq!(session.guard.tracking().calls(), 0);
}

#[tokio::test]
async fn test_protected_paths_inside_sandbox() {
    let harness = Harness::new();
    let id = harness.project("shop").await;
    let session = harness.orchestrator.open_session(&id).unwrap();

    let result = session.tools.execute(
        "write_file",
        &params(json!({ "path": ".git/config", "content": "[core]" })),
    );
    assert!(result.is_guard_blocked());
    assert!(!session.guard.sandbox().join(".git/config").exists());

    // Reads of protected paths are not a write concern.
    let listing = session.tools.execute("list_dir", &params(json!({})));
    assert!(listing.is_success());
}

#[tokio::test]
async fn test_write_budget_per_file() {
    let config = Config {
        max_writes_per_file: Some(2),
        ..Default::default()
    };
    let harness = Harness::with_config(config);
    let id = harness.project("shop").await;
    let session = harness.orchestrator.open_session(&id).unwrap();
    let write = params(json!({ "path": "notes.md", "content": "draft" }));

    assert!(session.tools.execute("write_file", &write).is_success());
    assert!(session.tools.execute("read_file", &params(json!({ "path": "notes.md" }))).is_success());
    assert!(session.tools.execute("write_file", &write).is_success());

    let third = session.tools.execute("write_file", &write);
    assert!(third.is_guard_blocked());
    assert_eq!(
        third.error().unwrap().violation.as_ref().unwrap().rule_id,
        "write_budget"
    );
}

#[tokio::test]
async fn test_dangerous_command_is_blocked() {
    let harness = Harness::new();
    let id = harness.project("shop").await;
    let session = harness.orchestrator.open_session(&id).unwrap();

    let result = session.tools.execute(
        "run_command",
        &params(json!({ "program": "rm", "args": ["-rf", "~"] })),
    );
    let error = result.error().unwrap();
    assert_eq!(error.kind, ToolErrorKind::GuardBlocked);
    assert_eq!(error.violation.as_ref().unwrap().rule_id, "dangerous_command");

    // Arguments pointing out of the sandbox are refused before the pattern check.
    for args in [json!(["-rf", "../"]), json!(["-rf", "/"])] {
        let result = session
            .tools
            .execute("run_command", &params(json!({ "program": "rm", "args": args })));
        assert_eq!(
            result.error().unwrap().violation.as_ref().unwrap().rule_id,
            "path_escape"
        );
    }
    assert!(harness.orchestrator.load_manifest(&id).is_ok());
}

#[tokio::test]
async fn test_blind_overwrite_warns_unless_strict() {
    let write = params(json!({ "path": "existing.txt", "content": "new" }));

    let harness = Harness::new();
    let id = harness.project("shop").await;
    let session = harness.orchestrator.open_session(&id).unwrap();
    std::fs::write(session.guard.sandbox().join("existing.txt"), "old").unwrap();
    assert!(session.tools.execute("write_file", &write).is_success());

    let strict = Harness::with_config(Config {
        strict_mode: true,
        ..Default::default()
    });
    let id = strict.project("shop").await;
    let session = strict.orchestrator.open_session(&id).unwrap();
    let target = session.guard.sandbox().join("existing.txt");
    std::fs::write(&target, "old").unwrap();

    let blocked = session.tools.execute("write_file", &write);
    assert_eq!(
        blocked.error().unwrap().violation.as_ref().unwrap().rule_id,
        "blind_overwrite"
    );
    assert_eq!(std::fs::read_to_string(&target).unwrap(), "old");

    // Reading first makes the overwrite informed.
    session
        .tools
        .execute("read_file", &params(json!({ "path": "existing.txt" })));
    assert!(session.tools.execute("write_file", &write).is_success());
}

/// Test: Strict Rework
/// Given strict mode and a project sent back for rework
/// When coding regenerates files that already exist
/// Then it reads them first, QA passes again, and the project can ship
#[tokio::test]
async fn test_strict_rework_reaches_deployment() {
    let harness = Harness::with_config(Config {
        strict_mode: true,
        ..Default::default()
    });
    let id = harness.project("shop").await;
    harness.drive_to(&id, Phase::AwaitingQaApproval, false).await;

    for round in 0..2 {
        harness.orchestrator.reject_qa(&id, Some("redo")).await.unwrap();
        assert_eq!(harness.step(&id).await, Phase::Testing);
        let code = harness.orchestrator.store().load(&id, "code_gen_spec").unwrap();
        assert_eq!(code["written_files"].as_array().unwrap().len(), 3, "round {}", round);
        assert_eq!(code["blocked_files"], json!([]), "round {}", round);

        let session = harness.orchestrator.session(&id).unwrap();
        let sandbox = session.guard.sandbox().to_path_buf();
        assert!(session.guard.tracking().was_read(&sandbox.join("src/f1.rs")));

        assert_eq!(harness.step(&id).await, Phase::AwaitingQaApproval);
        let qa = harness.orchestrator.store().load(&id, "qa_report").unwrap();
        assert_eq!(qa["passed"], true, "round {}", round);
    }

    assert!(harness.orchestrator.approve_qa(&id).await.unwrap());
    assert_eq!(harness.step(&id).await, Phase::Deployment);
}

#[tokio::test]
async fn test_closing_session_resets_tracking() {
    let harness = Harness::new();
    let id = harness.project("shop").await;
    let session = harness.orchestrator.open_session(&id).unwrap();
    session
        .tools
        .execute("write_file", &params(json!({ "path": "x.txt", "content": "x" })));

    let tracking = harness.orchestrator.close_session(&id).unwrap();
    assert_eq!(tracking.calls(), 1);
    assert_eq!(tracking.files_written(), 1);

    let fresh = harness.orchestrator.open_session(&id).unwrap();
    assert_ne!(fresh.id(), session.id());
    assert_eq!(fresh.guard.tracking().calls(), 0);
}
