//! Plan execution engine
//!
//! The engine drives one active plan instance toward completion, one tick
//! at a time. A tick renders the whole resource plan up front
//! ([`prepare_plan_resources`]), then walks the status tree phase by phase
//! and step by step ([`execute_plan`]), applying resources and observing
//! health through the injected client and oracle. All durable state lives
//! in the returned [`crate::plan::PlanStatus`]; the outer reconciliation
//! loop persists it and re-invokes until the plan is terminal.

mod driver;
mod enhancer;
mod executor;
mod prepare;

pub use driver::execute_plan;
pub use enhancer::{
    ConventionEnhancer, ConventionMetadata, EnhancerError, ResourceEnhancer, HERITAGE_LABEL,
    HERITAGE_VALUE, INSTANCE_LABEL, OPERATOR_LABEL, OPERATOR_VERSION_ANNOTATION, PHASE_ANNOTATION,
    PLAN_ANNOTATION, STEP_ANNOTATION,
};
pub use executor::execute_step;
pub use prepare::{prepare_plan_resources, PlanResources};

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;

use crate::plan::{Plan, PlanStatus, Task};

/// A plan picked up for execution, together with everything needed to run
/// it: the current status, the task and template catalogs of the operator
/// version, and the resolved parameter bindings.
#[derive(Clone, Debug)]
pub struct ActivePlan {
    /// The plan definition
    pub spec: Plan,
    /// Current durable status; the engine works on a copy and never
    /// mutates this
    pub status: PlanStatus,
    /// Task catalog of the operator version, keyed by task name
    pub tasks: BTreeMap<String, Task>,
    /// Template catalog of the operator version, keyed by resource key
    pub templates: BTreeMap<String, String>,
    /// Parameter bindings resolved by the outer loop
    pub params: BTreeMap<String, String>,
}

impl ActivePlan {
    /// Name of the plan being executed
    pub fn name(&self) -> &str {
        &self.spec.name
    }
}

/// Identity of the instance and operator a plan executes for
#[derive(Clone, Debug)]
pub struct ExecutionMetadata {
    /// Name of the instance
    pub instance_name: String,
    /// Namespace of the instance; every emitted resource lands here
    pub instance_namespace: String,
    /// Name of the operator
    pub operator_name: String,
    /// Name of the operator version object (used in error messages)
    pub operator_version_name: String,
    /// Version string of the operator version
    pub operator_version: String,
    /// The object that owns all resources created by this execution; the
    /// enhancer stamps it onto every object with the controller bit set
    pub resources_owner: OwnerReference,
}
