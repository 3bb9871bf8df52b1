use serde_json::json;

use crate::error::{Error, Result};
use crate::lifecycle::Phase;
use crate::plog;
use crate::router::WorkRequest;

use super::{PhaseContext, PhaseHandler, PhaseOutput};

/// Cuts a release candidate once QA has signed off.
pub struct ReleaseHandler;

impl PhaseHandler for ReleaseHandler {
    fn phase(&self) -> Phase {
        Phase::AwaitingQaApproval
    }

    fn requires(&self) -> Option<&'static str> {
        Some("qa_report")
    }

    fn produces(&self) -> &'static str {
        "release_candidate"
    }

    fn execute(&self, ctx: &PhaseContext) -> Result<PhaseOutput> {
        let qa_report = ctx.require_artifact("qa_report")?;
        if qa_report["passed"] == json!(false) {
            return Err(Error::Validation(
                "qa report did not pass; reject it to send the project back to coding"
                    .to_string(),
            ));
        }
        let request = WorkRequest::new("prepare_release", &["release_management"]);
        let mut payload = ctx.dispatch(&request, &json!({ "qa_report": qa_report }))?;
        if let Some(fields) = payload.as_object_mut() {
            fields.insert("qa_report".to_string(), qa_report);
        }
        Ok(PhaseOutput::new(self.produces(), payload, Phase::Deployment))
    }
}

pub struct DeploymentHandler;

impl PhaseHandler for DeploymentHandler {
    fn phase(&self) -> Phase {
        Phase::Deployment
    }

    fn requires(&self) -> Option<&'static str> {
        Some("release_candidate")
    }

    fn produces(&self) -> &'static str {
        "deployment_report"
    }

    fn execute(&self, ctx: &PhaseContext) -> Result<PhaseOutput> {
        ctx.ensure_qa_approved()?;
        let candidate = ctx.require_artifact("release_candidate")?;
        let request = WorkRequest::new("deploy", &["deployment", "infrastructure"]);
        let mut payload = ctx.dispatch(&request, &json!({ "release_candidate": candidate }))?;
        if let Some(fields) = payload.as_object_mut() {
            fields.insert("version".to_string(), candidate["version"].clone());
        }
        Ok(PhaseOutput::new(self.produces(), payload, Phase::Production))
    }
}

pub struct ProductionHandler;

impl PhaseHandler for ProductionHandler {
    fn phase(&self) -> Phase {
        Phase::Production
    }

    fn requires(&self) -> Option<&'static str> {
        Some("deployment_report")
    }

    fn produces(&self) -> &'static str {
        "production_status"
    }

    fn execute(&self, ctx: &PhaseContext) -> Result<PhaseOutput> {
        let report = ctx.require_artifact("deployment_report")?;
        if report["deployed"] == json!(false) {
            return Err(Error::Validation(
                "deployment report says nothing was deployed".to_string(),
            ));
        }
        let request = WorkRequest::new("verify_production", &["monitoring"]);
        let payload = ctx.dispatch(&request, &json!({ "deployment_report": report }))?;
        Ok(PhaseOutput::new(self.produces(), payload, Phase::Maintenance))
    }
}

/// Repeats forever. Each run bumps the cycle counter of the previous
/// maintenance report.
pub struct MaintenanceHandler;

impl PhaseHandler for MaintenanceHandler {
    fn phase(&self) -> Phase {
        Phase::Maintenance
    }

    fn requires(&self) -> Option<&'static str> {
        Some("production_status")
    }

    fn produces(&self) -> &'static str {
        "maintenance_report"
    }

    fn execute(&self, ctx: &PhaseContext) -> Result<PhaseOutput> {
        ctx.ensure_qa_approved()?;
        let status = ctx.require_artifact("production_status")?;
        let cycle = ctx
            .optional_artifact("maintenance_report")?
            .and_then(|previous| previous["cycle"].as_u64())
            .unwrap_or(0)
            + 1;

        let request = WorkRequest::new("maintain", &["maintenance"]);
        let mut payload = ctx.dispatch(
            &request,
            &json!({ "production_status": status, "cycle": cycle }),
        )?;
        if let Some(fields) = payload.as_object_mut() {
            fields.insert("cycle".to_string(), json!(cycle));
        }
        plog!("{}: maintenance cycle {}", ctx.manifest.project_id, cycle);
        Ok(PhaseOutput::new(self.produces(), payload, Phase::Maintenance))
    }
}
