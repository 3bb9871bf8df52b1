//! Lifecycle phases and the fixed edge table between them.

use std::collections::HashMap;
use std::sync::OnceLock;

use petgraph::algo::has_path_connecting;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Ordered sub-states of the planning phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PlanningStage {
    FeatureExtraction,
    FeasibilityValidation,
    /// Terminal sub-state; its successor is `Phase::Coding`.
    Specification,
}

impl PlanningStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanningStage::FeatureExtraction => "feature_extraction",
            PlanningStage::FeasibilityValidation => "feasibility_validation",
            PlanningStage::Specification => "specification",
        }
    }
}

/// A lifecycle phase. Serialized as its display string, e.g.
/// `"planning:feasibility_validation"` or `"awaiting_qa_approval"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Phase {
    Planning(PlanningStage),
    Coding,
    Testing,
    AwaitingQaApproval,
    Deployment,
    Production,
    Maintenance,
}

impl Phase {
    pub const INITIAL: Phase = Phase::Planning(PlanningStage::FeatureExtraction);

    /// Every phase in lifecycle order.
    pub const ALL: [Phase; 9] = [
        Phase::Planning(PlanningStage::FeatureExtraction),
        Phase::Planning(PlanningStage::FeasibilityValidation),
        Phase::Planning(PlanningStage::Specification),
        Phase::Coding,
        Phase::Testing,
        Phase::AwaitingQaApproval,
        Phase::Deployment,
        Phase::Production,
        Phase::Maintenance,
    ];

    /// The only phase this one may advance to.
    pub fn successor(self) -> Phase {
        match self {
            Phase::Planning(PlanningStage::FeatureExtraction) => {
                Phase::Planning(PlanningStage::FeasibilityValidation)
            }
            Phase::Planning(PlanningStage::FeasibilityValidation) => {
                Phase::Planning(PlanningStage::Specification)
            }
            Phase::Planning(PlanningStage::Specification) => Phase::Coding,
            Phase::Coding => Phase::Testing,
            Phase::Testing => Phase::AwaitingQaApproval,
            Phase::AwaitingQaApproval => Phase::Deployment,
            Phase::Deployment => Phase::Production,
            Phase::Production => Phase::Maintenance,
            Phase::Maintenance => Phase::Maintenance,
        }
    }

    /// Forward edges only. The rework edge out of QA approval is a separate
    /// operation and is not part of this table.
    pub fn can_transition(self, target: Phase) -> bool {
        self.successor() == target
    }

    /// Top-level phase name, used as the artifact directory.
    pub fn dir_name(&self) -> &'static str {
        match self {
            Phase::Planning(_) => "planning",
            Phase::Coding => "coding",
            Phase::Testing => "testing",
            Phase::AwaitingQaApproval => "awaiting_qa_approval",
            Phase::Deployment => "deployment",
            Phase::Production => "production",
            Phase::Maintenance => "maintenance",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Planning(stage) => write!(f, "planning:{}", stage.as_str()),
            other => write!(f, "{}", other.dir_name()),
        }
    }
}

impl std::str::FromStr for Phase {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let phase = match s {
            "planning" | "planning:feature_extraction" => {
                Phase::Planning(PlanningStage::FeatureExtraction)
            }
            "planning:feasibility_validation" => {
                Phase::Planning(PlanningStage::FeasibilityValidation)
            }
            "planning:specification" => Phase::Planning(PlanningStage::Specification),
            "coding" => Phase::Coding,
            "testing" => Phase::Testing,
            "awaiting_qa_approval" => Phase::AwaitingQaApproval,
            "deployment" => Phase::Deployment,
            "production" => Phase::Production,
            "maintenance" => Phase::Maintenance,
            other => return Err(Error::Validation(format!("unknown phase: {}", other))),
        };
        Ok(phase)
    }
}

impl TryFrom<String> for Phase {
    type Error = Error;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Phase> for String {
    fn from(phase: Phase) -> Self {
        phase.to_string()
    }
}

/// Directed graph of the forward lifecycle, used to answer causal
/// precedence questions about artifacts.
pub struct PhaseGraph {
    graph: DiGraph<Phase, ()>,
    nodes: HashMap<Phase, NodeIndex>,
}

impl PhaseGraph {
    fn build() -> Self {
        let mut graph = DiGraph::new();
        let nodes: HashMap<Phase, NodeIndex> = Phase::ALL
            .iter()
            .map(|phase| (*phase, graph.add_node(*phase)))
            .collect();
        for phase in Phase::ALL {
            graph.add_edge(nodes[&phase], nodes[&phase.successor()], ());
        }
        Self { graph, nodes }
    }

    /// The process-wide lifecycle graph.
    pub fn lifecycle() -> &'static PhaseGraph {
        static GRAPH: OnceLock<PhaseGraph> = OnceLock::new();
        GRAPH.get_or_init(PhaseGraph::build)
    }

    /// Whether output of `producer` may be consumed by `reader`.
    ///
    /// A phase precedes itself only when it has a self-loop (maintenance
    /// reading its own previous report).
    pub fn precedes(&self, producer: Phase, reader: Phase) -> bool {
        let (a, b) = (self.nodes[&producer], self.nodes[&reader]);
        if a == b {
            return self.graph.contains_edge(a, a);
        }
        has_path_connecting(&self.graph, a, b, None)
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }
}
