//! Execution status tree
//!
//! The durable state of a plan execution mirrors the plan shape: one status
//! node per plan, phase and step, each carrying an [`ExecutionStatus`]. The
//! outer loop persists this tree on the instance and re-invokes the engine
//! until the top-level status is terminal.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::Plan;

/// Execution state of a plan, phase or step
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ExecutionStatus {
    /// Not yet started
    #[default]
    #[serde(rename = "PENDING")]
    Pending,
    /// Started and not yet complete
    #[serde(rename = "IN_PROGRESS")]
    InProgress,
    /// Finished; a complete node is never revisited
    #[serde(rename = "COMPLETE")]
    Complete,
    /// A recoverable error occurred; the node is re-entered next tick
    #[serde(rename = "ERROR")]
    Error,
    /// An authoring bug was detected; the plan must not be retried without
    /// an operator change
    #[serde(rename = "FATAL_ERROR")]
    FatalError,
}

impl ExecutionStatus {
    /// True for states the engine never leaves: `Complete` and `FatalError`
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::FatalError)
    }

    /// True once all work at this node is done
    pub fn is_finished(self) -> bool {
        matches!(self, Self::Complete)
    }

    /// True for the in-progress-ish set: states that mean "work remains
    /// here" and cause the engine to re-enter the node. A recoverable error
    /// counts; the outer cadence retries it until it completes or is
    /// interrupted.
    pub fn is_in_progress(self) -> bool {
        matches!(self, Self::Pending | Self::InProgress | Self::Error)
    }
}

impl std::fmt::Display for ExecutionStatus {
    // Display matches the wire strings so logs and the persisted status
    // agree on the state names.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::InProgress => "IN_PROGRESS",
            Self::Complete => "COMPLETE",
            Self::Error => "ERROR",
            Self::FatalError => "FATAL_ERROR",
        };
        write!(f, "{s}")
    }
}

/// Durable status of one plan execution
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct PlanStatus {
    /// Name of the plan this status belongs to
    pub name: String,
    /// Aggregate state of the whole plan
    pub status: ExecutionStatus,
    /// One status node per phase, in plan order
    pub phases: Vec<PhaseStatus>,
}

/// Durable status of one phase
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct PhaseStatus {
    /// Name of the phase this status belongs to
    pub name: String,
    /// Aggregate state of the phase
    pub status: ExecutionStatus,
    /// One status node per step, in phase order
    pub steps: Vec<StepStatus>,
}

/// Durable status of one step
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct StepStatus {
    /// Name of the step this status belongs to
    pub name: String,
    /// State of the step
    pub status: ExecutionStatus,
}

impl PlanStatus {
    /// Seed a fresh all-pending status tree shaped like the given plan
    pub fn pending(plan: &Plan) -> Self {
        Self {
            name: plan.name.clone(),
            status: ExecutionStatus::Pending,
            phases: plan
                .phases
                .iter()
                .map(|phase| PhaseStatus {
                    name: phase.name.clone(),
                    status: ExecutionStatus::Pending,
                    steps: phase
                        .steps
                        .iter()
                        .map(|step| StepStatus {
                            name: step.name.clone(),
                            status: ExecutionStatus::Pending,
                        })
                        .collect(),
                })
                .collect(),
        }
    }

    /// Look up the status node for a phase by name
    pub fn phase(&self, name: &str) -> Option<&PhaseStatus> {
        self.phases.iter().find(|p| p.name == name)
    }

    /// Look up the status node for a phase by name, mutably
    pub fn phase_mut(&mut self, name: &str) -> Option<&mut PhaseStatus> {
        self.phases.iter_mut().find(|p| p.name == name)
    }
}

impl PhaseStatus {
    /// Look up the status node for a step by name
    pub fn step(&self, name: &str) -> Option<&StepStatus> {
        self.steps.iter().find(|s| s.name == name)
    }

    /// Look up the status node for a step by name, mutably
    pub fn step_mut(&mut self, name: &str) -> Option<&mut StepStatus> {
        self.steps.iter_mut().find(|s| s.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{Phase, Step, Strategy};

    fn sample_plan() -> Plan {
        Plan {
            name: "deploy".to_string(),
            phases: vec![
                Phase {
                    name: "prep".to_string(),
                    strategy: Strategy::Serial,
                    steps: vec![Step {
                        name: "config".to_string(),
                        delete: false,
                        tasks: vec![],
                    }],
                },
                Phase {
                    name: "main".to_string(),
                    strategy: Strategy::Parallel,
                    steps: vec![
                        Step {
                            name: "srv".to_string(),
                            delete: false,
                            tasks: vec![],
                        },
                        Step {
                            name: "web".to_string(),
                            delete: false,
                            tasks: vec![],
                        },
                    ],
                },
            ],
        }
    }

    #[test]
    fn terminal_states() {
        assert!(ExecutionStatus::Complete.is_terminal());
        assert!(ExecutionStatus::FatalError.is_terminal());
        assert!(!ExecutionStatus::Pending.is_terminal());
        assert!(!ExecutionStatus::InProgress.is_terminal());
        assert!(!ExecutionStatus::Error.is_terminal());
    }

    #[test]
    fn in_progress_ish_includes_error() {
        // A recoverable error means "work remains here": the node is
        // re-entered on the next tick, same as Pending and InProgress.
        assert!(ExecutionStatus::Pending.is_in_progress());
        assert!(ExecutionStatus::InProgress.is_in_progress());
        assert!(ExecutionStatus::Error.is_in_progress());
        assert!(!ExecutionStatus::Complete.is_in_progress());
        assert!(!ExecutionStatus::FatalError.is_in_progress());
    }

    #[test]
    fn only_complete_is_finished() {
        assert!(ExecutionStatus::Complete.is_finished());
        assert!(!ExecutionStatus::FatalError.is_finished());
        assert!(!ExecutionStatus::Error.is_finished());
    }

    #[test]
    fn pending_tree_mirrors_plan_shape() {
        let status = PlanStatus::pending(&sample_plan());
        assert_eq!(status.name, "deploy");
        assert_eq!(status.status, ExecutionStatus::Pending);
        assert_eq!(status.phases.len(), 2);
        assert_eq!(status.phases[1].steps.len(), 2);
        assert_eq!(status.phases[1].steps[0].name, "srv");
        assert!(status
            .phases
            .iter()
            .flat_map(|p| &p.steps)
            .all(|s| s.status == ExecutionStatus::Pending));
    }

    #[test]
    fn lookup_by_name() {
        let mut status = PlanStatus::pending(&sample_plan());
        assert!(status.phase("main").is_some());
        assert!(status.phase("nope").is_none());

        let main = status.phase_mut("main").unwrap();
        main.step_mut("web").unwrap().status = ExecutionStatus::Complete;
        assert_eq!(
            status.phase("main").unwrap().step("web").unwrap().status,
            ExecutionStatus::Complete
        );
    }

    #[test]
    fn wire_serialization_uses_screaming_snake() {
        let json = serde_json::to_string(&ExecutionStatus::InProgress).unwrap();
        assert_eq!(json, "\"IN_PROGRESS\"");
        let status: ExecutionStatus = serde_json::from_str("\"FATAL_ERROR\"").unwrap();
        assert_eq!(status, ExecutionStatus::FatalError);
    }

    #[test]
    fn display_matches_wire_names() {
        assert_eq!(ExecutionStatus::InProgress.to_string(), "IN_PROGRESS");
        assert_eq!(ExecutionStatus::Error.to_string(), "ERROR");
    }
}
