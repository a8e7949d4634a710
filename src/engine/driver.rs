//! Plan driver
//!
//! Top-level state machine for one tick of plan execution. Phases are
//! always serial with respect to each other; within a phase the strategy
//! decides whether an unfinished step blocks its successors (serial) or
//! every step gets its tick (parallel). Repeated invocation with an
//! unchanged spec and cluster produces an identical status: the outer
//! loop relies on this monotone-progress contract.

use tracing::{debug, info, instrument};

use crate::client::ResourceClient;
use crate::engine::{executor, prepare, ActivePlan, ExecutionMetadata, ResourceEnhancer};
use crate::error::{EngineError, ExecutionFailure};
use crate::health::HealthOracle;
use crate::plan::{ExecutionStatus, PlanStatus, Strategy};

/// Execute one tick of the given active plan.
///
/// Renders the whole resource plan first so authoring errors fail before
/// any cluster mutation, then advances phases and steps according to the
/// current status. The returned status is a mutated copy of
/// `plan.status`; the caller persists it either way, which is why the
/// error type carries the working status too.
#[instrument(skip_all, fields(plan = %plan.name(), instance = %meta.instance_name))]
pub async fn execute_plan(
    plan: &ActivePlan,
    meta: &ExecutionMetadata,
    client: &dyn ResourceClient,
    enhancer: &dyn ResourceEnhancer,
    health: &dyn HealthOracle,
) -> Result<PlanStatus, ExecutionFailure> {
    if plan.status.status.is_terminal() {
        debug!(status = %plan.status.status, "plan is terminal, nothing to do");
        return Ok(plan.status.clone());
    }

    let mut working = plan.status.clone();

    let resources = match prepare::prepare_plan_resources(plan, meta, enhancer, &mut working) {
        Ok(resources) => resources,
        Err(error) => {
            working.status = if error.is_fatal() {
                ExecutionStatus::FatalError
            } else {
                ExecutionStatus::Error
            };
            return Err(ExecutionFailure {
                status: working,
                error,
            });
        }
    };

    let mut all_phases_complete = true;
    for phase in &plan.spec.phases {
        let Some(phase_index) = working.phases.iter().position(|p| p.name == phase.name) else {
            return Err(missing_status(working, &phase.name, plan.name()));
        };

        if working.phases[phase_index].status.is_finished() {
            debug!(phase = %phase.name, "phase already finished");
        } else if working.phases[phase_index].status.is_in_progress() {
            working.status = ExecutionStatus::InProgress;
            working.phases[phase_index].status = ExecutionStatus::InProgress;
            debug!(phase = %phase.name, strategy = %phase.strategy, "executing phase");

            let mut all_steps_healthy = true;
            for step in &phase.steps {
                let Some(step_index) = working.phases[phase_index]
                    .steps
                    .iter()
                    .position(|s| s.name == step.name)
                else {
                    return Err(missing_status(working, &step.name, plan.name()));
                };

                let step_resources = resources.step(&phase.name, &step.name);
                debug!(
                    phase = %phase.name,
                    step = %step.name,
                    status = %working.phases[phase_index].steps[step_index].status,
                    "executing step"
                );

                if let Err(error) = executor::execute_step(
                    step,
                    &mut working.phases[phase_index].steps[step_index],
                    step_resources,
                    client,
                    health,
                )
                .await
                {
                    working.phases[phase_index].status = ExecutionStatus::Error;
                    working.phases[phase_index].steps[step_index].status = ExecutionStatus::Error;
                    return Err(ExecutionFailure {
                        status: working,
                        error,
                    });
                }

                if !working.phases[phase_index].steps[step_index]
                    .status
                    .is_finished()
                {
                    all_steps_healthy = false;
                    if phase.strategy == Strategy::Serial {
                        // An unfinished step blocks everything after it.
                        break;
                    }
                }
            }

            if all_steps_healthy {
                info!(phase = %phase.name, "all steps complete");
                working.phases[phase_index].status = ExecutionStatus::Complete;
            }
        }

        if !working.phases[phase_index].status.is_finished() {
            // Phases are serial with respect to each other.
            all_phases_complete = false;
            break;
        }
    }

    if all_phases_complete {
        info!("all phases complete");
        working.status = ExecutionStatus::Complete;
    }

    Ok(working)
}

fn missing_status(status: PlanStatus, name: &str, plan: &str) -> ExecutionFailure {
    ExecutionFailure {
        error: EngineError::MissingStatus {
            name: name.to_string(),
            plan: plan.to_string(),
        },
        status,
    }
}
