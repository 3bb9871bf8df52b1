use serde_json::{json, Value};

use crate::error::Result;
use crate::guard::confine;
use crate::lifecycle::Phase;
use crate::router::WorkRequest;
use crate::tools::params;
use crate::{plog, plog_warn};

use super::{PhaseContext, PhaseHandler, PhaseOutput};

/// Generates source files from the feature spec and writes them into the
/// project sandbox through the guarded executor.
pub struct CodingHandler;

impl PhaseHandler for CodingHandler {
    fn phase(&self) -> Phase {
        Phase::Coding
    }

    fn requires(&self) -> Option<&'static str> {
        Some("feature_spec")
    }

    fn produces(&self) -> &'static str {
        "code_gen_spec"
    }

    fn execute(&self, ctx: &PhaseContext) -> Result<PhaseOutput> {
        let feature_spec = ctx.require_artifact("feature_spec")?;
        let request = WorkRequest::new("generate_code", &["code_generation"]);
        let generated = ctx.dispatch(&request, &json!({ "feature_spec": feature_spec }))?;

        let files = generated["files"].as_array().cloned().unwrap_or_default();
        let mut paths = Vec::with_capacity(files.len());
        let mut written = Vec::new();
        let mut blocked = Vec::new();
        for file in &files {
            let Some(path) = file["path"].as_str() else {
                continue;
            };
            paths.push(path.to_string());
            // Regenerating during rework: read the old file so the write is
            // an informed overwrite.
            let existing = confine(ctx.tools.guard().sandbox(), path)
                .is_some_and(|target| target.is_file());
            if existing {
                let read = ctx.run_tool("read_file", &params(json!({ "path": path })));
                if let Some(error) = read.error() {
                    plog_warn!("{}: read of {} failed: {}", ctx.manifest.project_id, path, error.message);
                }
            }
            let result = ctx.run_tool(
                "write_file",
                &params(json!({ "path": path, "content": file["content"] })),
            );
            match result.error() {
                None => written.push(path.to_string()),
                Some(error) => {
                    plog_warn!("{}: write of {} refused: {}", ctx.manifest.project_id, path, error.message);
                    blocked.push(json!({ "path": path, "reason": error.message }));
                }
            }
        }
        plog!(
            "{}: coding wrote {}/{} files",
            ctx.manifest.project_id,
            written.len(),
            paths.len()
        );

        let payload = json!({
            "language": generated["language"].clone(),
            "files": paths,
            "written_files": written,
            "blocked_files": blocked,
        });
        Ok(PhaseOutput::new(self.produces(), payload, Phase::Testing))
    }
}

/// Reads back every generated file and combines those checks with the
/// tester's own run into a QA report.
pub struct TestingHandler;

impl PhaseHandler for TestingHandler {
    fn phase(&self) -> Phase {
        Phase::Testing
    }

    fn requires(&self) -> Option<&'static str> {
        Some("code_gen_spec")
    }

    fn produces(&self) -> &'static str {
        "qa_report"
    }

    fn execute(&self, ctx: &PhaseContext) -> Result<PhaseOutput> {
        let code = ctx.require_artifact("code_gen_spec")?;
        let request = WorkRequest::new("run_tests", &["testing", "qa"]);
        let run = ctx.dispatch(&request, &json!({ "code_gen_spec": code }))?;

        let mut checks: Vec<Value> = run["checks"].as_array().cloned().unwrap_or_default();
        for path in code["written_files"].as_array().into_iter().flatten() {
            let Some(path) = path.as_str() else {
                continue;
            };
            let result = ctx.run_tool("read_file", &params(json!({ "path": path })));
            let ok = result
                .value()
                .and_then(|v| v["content"].as_str())
                .is_some_and(|content| !content.trim().is_empty());
            checks.push(json!({ "name": format!("readable:{}", path), "ok": ok }));
        }
        for blocked in code["blocked_files"].as_array().into_iter().flatten() {
            checks.push(json!({
                "name": format!("written:{}", blocked["path"].as_str().unwrap_or("?")),
                "ok": false,
            }));
        }

        let all_ok = checks.iter().all(|c| c["ok"] == json!(true));
        let passed = run["passed"] != json!(false) && all_ok;
        plog!(
            "{}: testing ran {} checks, passed={}",
            ctx.manifest.project_id,
            checks.len(),
            passed
        );

        let payload = json!({
            "passed": passed,
            "total": checks.len(),
            "checks": checks,
        });
        Ok(PhaseOutput::new(
            self.produces(),
            payload,
            Phase::AwaitingQaApproval,
        ))
    }
}
