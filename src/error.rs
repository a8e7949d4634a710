//! Error types for the plan execution engine
//!
//! Errors carry enough context to identify the offending step and resource;
//! the plan and phase identity travel in the returned status tree and in
//! tracing spans. [`EngineError::is_fatal`] is the single classification
//! point between authoring bugs (do not retry without an operator change)
//! and transient failures (the outer loop re-invokes on its usual cadence).

use thiserror::Error;

use crate::engine::EnhancerError;
use crate::plan::PlanStatus;
use crate::template::TemplateError;

/// Main error type for plan execution
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EngineError {
    /// A step references a task that is not in the operator version's task
    /// catalog. Recoverable: an operator-version rollout may be in flight.
    #[error("task {task} not found in operator version {operator_version}")]
    MissingTask {
        /// The task name the step referenced
        task: String,
        /// Operator version whose catalog was searched
        operator_version: String,
    },

    /// A task references a resource template that is not in the operator
    /// version's template catalog. Authoring bug.
    #[error("template {template} not found in operator version {operator_version}")]
    MissingTemplate {
        /// The resource key the task referenced
        template: String,
        /// Operator version whose catalog was searched
        operator_version: String,
    },

    /// Expanding a resource template failed. Authoring bug.
    #[error("error expanding template {template} for step {step}: {source}")]
    Render {
        /// The resource key of the failing template
        template: String,
        /// Step the template was rendered for
        step: String,
        /// The underlying render error
        #[source]
        source: TemplateError,
    },

    /// Applying conventions to a step's rendered templates failed
    #[error("error enhancing resources for step {step}: {source}")]
    Enhance {
        /// Step whose resources were being enhanced
        step: String,
        /// The underlying enhancer error
        #[source]
        source: EnhancerError,
    },

    /// A plan spec failed structural validation
    #[error("invalid plan {plan}: {message}")]
    Validation {
        /// The plan that failed validation
        plan: String,
        /// What is wrong with it
        message: String,
    },

    /// A phase or step named in the plan spec has no matching status node.
    /// The outer loop seeds the status tree before invoking the engine, so
    /// this signals a spec/status mismatch mid-rollout.
    #[error("no status for {name} in plan {plan}")]
    MissingStatus {
        /// The phase or step name that has no status node
        name: String,
        /// The plan being executed
        plan: String,
    },

    /// Serializing a resource into a patch body failed
    #[error("error serializing resource {resource}: {source}")]
    Serialize {
        /// Name of the resource being serialized
        resource: String,
        /// The underlying serializer error
        #[source]
        source: serde_json::Error,
    },

    /// A get, create, patch or delete against the cluster failed while
    /// executing a step
    #[error("error {action} resource {resource} in step {step}: {source}")]
    Apply {
        /// What was being attempted ("getting", "creating", "patching", "deleting")
        action: &'static str,
        /// Name of the resource the operation targeted
        resource: String,
        /// Step the resource belongs to
        step: String,
        /// The underlying Kubernetes error
        #[source]
        source: kube::Error,
    },

    /// The health oracle failed while evaluating an applied resource
    #[error("error evaluating health of resource {resource} in step {step}: {source}")]
    Health {
        /// Name of the resource being evaluated
        resource: String,
        /// Step the resource belongs to
        step: String,
        /// The underlying Kubernetes error
        #[source]
        source: kube::Error,
    },

    /// Kubernetes API error outside of step execution
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),
}

impl EngineError {
    /// True for authoring bugs that must not be retried without an operator
    /// change. The driver promotes these to `FatalError` on the top-level
    /// status; everything else surfaces as `Error` and is re-entered on the
    /// next tick.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::MissingTemplate { .. } | Self::Render { .. })
    }
}

/// Returned when a tick fails part-way through.
///
/// The working status is returned alongside the error so the caller can
/// persist it and the failure location stays visible to users even when the
/// tick did not complete.
#[derive(Debug, Error)]
#[error("plan execution failed: {error}")]
pub struct ExecutionFailure {
    /// The status tree as of the failure, for the caller to persist
    pub status: PlanStatus,
    /// What went wrong
    #[source]
    pub error: EngineError,
}
