//! Resource preparation
//!
//! Renders and enhances every resource of every step before the driver
//! mutates anything on the cluster. Authoring errors therefore fail fast
//! and cheap: a plan with a broken template never half-applies.

use std::collections::BTreeMap;

use kube::api::DynamicObject;
use tracing::debug;

use crate::engine::{ActivePlan, ConventionMetadata, ExecutionMetadata, ResourceEnhancer};
use crate::plan::{ExecutionStatus, PlanStatus};
use crate::template::{RenderContext, TemplateEngine};
use crate::EngineError;

/// Rendered and enhanced resources for every step of a plan, keyed
/// phase → step. Resource order within a step reflects declared
/// task/template/document order.
#[derive(Debug, Default)]
pub struct PlanResources {
    phases: BTreeMap<String, BTreeMap<String, Vec<DynamicObject>>>,
}

impl PlanResources {
    /// The resources prepared for one step; empty when the step has none
    pub fn step(&self, phase: &str, step: &str) -> &[DynamicObject] {
        self.phases
            .get(phase)
            .and_then(|steps| steps.get(step))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    fn insert(&mut self, phase: &str, step: &str, resources: Vec<DynamicObject>) {
        self.phases
            .entry(phase.to_string())
            .or_default()
            .insert(step.to_string(), resources);
    }
}

/// Render every template of every step and apply the conventions,
/// assembling the full resource plan.
///
/// Failures are written into `status` on the offending phase and step so
/// the persisted tree explains where preparation stopped: authoring bugs
/// (missing template, render failure) mark `FatalError`, catalog and
/// enhancer problems that a rollout may still fix mark `Error`. The
/// top-level status is left to the driver, which classifies from the
/// returned error.
pub fn prepare_plan_resources(
    plan: &ActivePlan,
    meta: &ExecutionMetadata,
    enhancer: &dyn ResourceEnhancer,
    status: &mut PlanStatus,
) -> Result<PlanResources, EngineError> {
    let engine = TemplateEngine::new();
    let mut ctx = RenderContext::new(
        &meta.operator_name,
        &meta.instance_name,
        &meta.instance_namespace,
        plan.params.clone(),
    );

    let mut result = PlanResources::default();
    for phase in &plan.spec.phases {
        for (index, step) in phase.steps.iter().enumerate() {
            ctx.set_step(plan.name(), &phase.name, &step.name, index);

            let mut rendered: Vec<(String, String)> = Vec::new();
            for task_name in &step.tasks {
                let Some(task) = plan.tasks.get(task_name) else {
                    mark(status, &phase.name, &step.name, ExecutionStatus::Error);
                    return Err(EngineError::MissingTask {
                        task: task_name.clone(),
                        operator_version: meta.operator_version_name.clone(),
                    });
                };

                for resource_key in &task.resources {
                    let Some(template) = plan.templates.get(resource_key) else {
                        mark(status, &phase.name, &step.name, ExecutionStatus::FatalError);
                        return Err(EngineError::MissingTemplate {
                            template: resource_key.clone(),
                            operator_version: meta.operator_version_name.clone(),
                        });
                    };

                    match engine.render(template, &ctx) {
                        Ok(body) => rendered.push((resource_key.clone(), body)),
                        Err(source) => {
                            mark(status, &phase.name, &step.name, ExecutionStatus::FatalError);
                            return Err(EngineError::Render {
                                template: resource_key.clone(),
                                step: step.name.clone(),
                                source,
                            });
                        }
                    }
                }
            }

            let convention_meta = ConventionMetadata {
                instance_name: meta.instance_name.clone(),
                namespace: meta.instance_namespace.clone(),
                operator_name: meta.operator_name.clone(),
                operator_version: meta.operator_version.clone(),
                plan_name: plan.name().to_string(),
                phase_name: phase.name.clone(),
                step_name: step.name.clone(),
            };
            match enhancer.apply_conventions(&rendered, &convention_meta, &meta.resources_owner) {
                Ok(objects) => {
                    debug!(
                        phase = %phase.name,
                        step = %step.name,
                        resources = objects.len(),
                        "prepared step resources"
                    );
                    result.insert(&phase.name, &step.name, objects);
                }
                Err(source) => {
                    mark(status, &phase.name, &step.name, ExecutionStatus::Error);
                    return Err(EngineError::Enhance {
                        step: step.name.clone(),
                        source,
                    });
                }
            }
        }
    }

    Ok(result)
}

/// Record a preparation failure on the offending phase and step nodes
fn mark(status: &mut PlanStatus, phase: &str, step: &str, state: ExecutionStatus) {
    if let Some(phase_status) = status.phase_mut(phase) {
        phase_status.status = state;
        if let Some(step_status) = phase_status.step_mut(step) {
            step_status.status = state;
        }
    }
}
