//! Render context for resource templates
//!
//! Maps the configuration keys available to operator authors:
//! - `{{ OperatorName }}`, `{{ Name }}`, `{{ Namespace }}` - identity of the
//!   operator and instance the plan runs for
//! - `{{ Params.KEY }}` - resolved parameter bindings
//! - `{{ PlanName }}`, `{{ PhaseName }}`, `{{ StepName }}`,
//!   `{{ StepNumber }}` - coordinates of the step being rendered

use std::collections::BTreeMap;

use minijinja::Value;
use serde::Serialize;

/// Values available for placeholder resolution in resource templates.
///
/// The identity fields are fixed for a plan execution; the step coordinates
/// are rebound with [`RenderContext::set_step`] before each step's templates
/// are rendered.
#[derive(Clone, Debug, Serialize)]
pub struct RenderContext {
    /// `{{ OperatorName }}`
    #[serde(rename = "OperatorName")]
    pub operator_name: String,

    /// `{{ Name }}` - the instance name
    #[serde(rename = "Name")]
    pub instance_name: String,

    /// `{{ Namespace }}` - the instance namespace
    #[serde(rename = "Namespace")]
    pub namespace: String,

    /// `{{ Params.KEY }}` - parameter bindings resolved by the outer loop
    #[serde(rename = "Params")]
    pub params: BTreeMap<String, String>,

    /// `{{ PlanName }}`
    #[serde(rename = "PlanName")]
    pub plan_name: String,

    /// `{{ PhaseName }}`
    #[serde(rename = "PhaseName")]
    pub phase_name: String,

    /// `{{ StepName }}`
    #[serde(rename = "StepName")]
    pub step_name: String,

    /// `{{ StepNumber }}` - zero-based decimal index of the step within its
    /// phase
    #[serde(rename = "StepNumber")]
    pub step_number: String,
}

impl RenderContext {
    /// Create a context with the identity fields set and the step
    /// coordinates empty
    pub fn new(
        operator_name: impl Into<String>,
        instance_name: impl Into<String>,
        namespace: impl Into<String>,
        params: BTreeMap<String, String>,
    ) -> Self {
        Self {
            operator_name: operator_name.into(),
            instance_name: instance_name.into(),
            namespace: namespace.into(),
            params,
            plan_name: String::new(),
            phase_name: String::new(),
            step_name: String::new(),
            step_number: String::new(),
        }
    }

    /// Rebind the step coordinates before rendering one step's templates
    pub fn set_step(&mut self, plan: &str, phase: &str, step: &str, index: usize) {
        self.plan_name = plan.to_string();
        self.phase_name = phase.to_string();
        self.step_name = step.to_string();
        self.step_number = index.to_string();
    }

    /// Convert to a minijinja value for rendering
    pub(crate) fn to_value(&self) -> Value {
        Value::from_serialize(self)
    }
}
