//! Plan, phase, step and task definitions
//!
//! A plan is a named operator procedure: an ordered list of phases, each an
//! ordered group of steps executed serially or in parallel. Steps reference
//! tasks, and tasks bundle resource template keys. These types are embedded
//! in the operator CRDs by the outer reconciler, so they carry serde and
//! JSON-schema derives.

mod status;

pub use status::{ExecutionStatus, PhaseStatus, PlanStatus, StepStatus};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A named operator procedure: an ordered sequence of phases
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct Plan {
    /// Plan name, unique within an operator version
    pub name: String,
    /// Phases in execution order; phases are always serial w.r.t. each other
    pub phases: Vec<Phase>,
}

impl Plan {
    /// Validates the plan structure.
    ///
    /// Rejects plans with no phases, phases with no steps, and duplicate
    /// phase or step names (the status tree is keyed by name, so duplicates
    /// would alias status nodes).
    pub fn validate(&self) -> Result<(), crate::EngineError> {
        if self.phases.is_empty() {
            return Err(invalid(&self.name, "plan has no phases"));
        }
        let mut phase_names = std::collections::BTreeSet::new();
        for phase in &self.phases {
            if !phase_names.insert(&phase.name) {
                return Err(invalid(
                    &self.name,
                    &format!("duplicate phase name {}", phase.name),
                ));
            }
            if phase.steps.is_empty() {
                return Err(invalid(
                    &self.name,
                    &format!("phase {} has no steps", phase.name),
                ));
            }
            let mut step_names = std::collections::BTreeSet::new();
            for step in &phase.steps {
                if !step_names.insert(&step.name) {
                    return Err(invalid(
                        &self.name,
                        &format!("duplicate step name {} in phase {}", step.name, phase.name),
                    ));
                }
            }
        }
        Ok(())
    }
}

fn invalid(plan: &str, message: &str) -> crate::EngineError {
    crate::EngineError::Validation {
        plan: plan.to_string(),
        message: message.to_string(),
    }
}

/// An ordered group of steps with an execution strategy
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct Phase {
    /// Phase name, unique within the plan
    pub name: String,
    /// How steps within this phase are scheduled across ticks
    #[serde(default)]
    pub strategy: Strategy,
    /// Steps in declared order
    pub steps: Vec<Step>,
}

/// Step scheduling strategy within a phase.
///
/// `Serial` advances through steps only until one is not yet complete;
/// `Parallel` gives every step of the phase its tick so they converge
/// independently. Neither spawns threads: a tick is single-threaded.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Steps run one after another; an unfinished step blocks its successors
    #[default]
    Serial,
    /// All steps are applied each tick and become complete independently
    Parallel,
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Serial => write!(f, "serial"),
            Self::Parallel => write!(f, "parallel"),
        }
    }
}

/// A unit of apply or delete work referencing one or more tasks
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct Step {
    /// Step name, unique within the phase
    pub name: String,
    /// When true the step removes its resources instead of creating them
    #[serde(default)]
    pub delete: bool,
    /// Names of tasks whose resources this step applies, in order
    pub tasks: Vec<String>,
}

/// A named bundle of resource template references
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct Task {
    /// Task name, unique within an operator version
    pub name: String,
    /// Resource keys into the template catalog, in order
    pub resources: Vec<String>,
}
