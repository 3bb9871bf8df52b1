use serde_json::json;

use crate::error::{Error, Result};
use crate::lifecycle::{Phase, PlanningStage};
use crate::router::WorkRequest;

use super::{PhaseContext, PhaseHandler, PhaseOutput};

/// Turns the project description into a feature list.
pub struct FeatureExtractionHandler;

impl PhaseHandler for FeatureExtractionHandler {
    fn phase(&self) -> Phase {
        Phase::Planning(PlanningStage::FeatureExtraction)
    }

    fn requires(&self) -> Option<&'static str> {
        None
    }

    fn produces(&self) -> &'static str {
        "feature_list"
    }

    fn execute(&self, ctx: &PhaseContext) -> Result<PhaseOutput> {
        let description = ctx.manifest.description.trim();
        if description.is_empty() {
            return Err(Error::Validation(
                "project description is empty; nothing to extract features from".to_string(),
            ));
        }
        let request = WorkRequest::new("extract_features", &["requirements_analysis"]);
        let payload = ctx.dispatch(&request, &json!({ "description": description }))?;
        Ok(PhaseOutput::new(
            self.produces(),
            payload,
            Phase::Planning(PlanningStage::FeasibilityValidation),
        ))
    }
}

pub struct FeasibilityHandler;

impl PhaseHandler for FeasibilityHandler {
    fn phase(&self) -> Phase {
        Phase::Planning(PlanningStage::FeasibilityValidation)
    }

    fn requires(&self) -> Option<&'static str> {
        Some("feature_list")
    }

    fn produces(&self) -> &'static str {
        "feasibility_report"
    }

    fn execute(&self, ctx: &PhaseContext) -> Result<PhaseOutput> {
        let feature_list = ctx.require_artifact("feature_list")?;
        let request = WorkRequest::new("assess_feasibility", &["feasibility_analysis"]);
        let payload = ctx.dispatch(&request, &json!({ "feature_list": feature_list }))?;
        Ok(PhaseOutput::new(
            self.produces(),
            payload,
            Phase::Planning(PlanningStage::Specification),
        ))
    }
}

/// Last planning step. An infeasible report stops planning here.
pub struct SpecificationHandler;

impl PhaseHandler for SpecificationHandler {
    fn phase(&self) -> Phase {
        Phase::Planning(PlanningStage::Specification)
    }

    fn requires(&self) -> Option<&'static str> {
        Some("feasibility_report")
    }

    fn produces(&self) -> &'static str {
        "feature_spec"
    }

    fn execute(&self, ctx: &PhaseContext) -> Result<PhaseOutput> {
        let report = ctx.require_artifact("feasibility_report")?;
        if report["feasible"] == json!(false) {
            return Err(Error::Validation(
                "feasibility report marks the project infeasible".to_string(),
            ));
        }
        let request = WorkRequest::new("write_feature_spec", &["architecture", "specification"]);
        let payload = ctx.dispatch(&request, &json!({ "feasibility_report": report }))?;
        Ok(PhaseOutput::new(self.produces(), payload, Phase::Coding))
    }
}
