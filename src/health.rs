//! Resource health evaluation
//!
//! The executor consults a [`HealthOracle`] once per applied resource per
//! tick; it never polls. Unhealthy is a progress state, not an error: the
//! step stays in progress and the outer loop re-invokes the engine on its
//! usual cadence.

use async_trait::async_trait;
use kube::api::DynamicObject;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

/// Result of a health evaluation
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Health {
    /// The resource has converged to its desired state
    Healthy,
    /// The resource exists but has not converged yet; re-poll later
    Unhealthy(String),
}

impl Health {
    /// True when the resource has converged
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }
}

/// Trait abstracting health evaluation of applied resources
///
/// The production implementation judges from the observed object's reported
/// status; implementations that need extra lookups hold their own client.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait HealthOracle: Send + Sync {
    /// Evaluate the health of an applied resource.
    ///
    /// `Ok(Unhealthy)` means "not yet": the caller records it and moves on.
    /// `Err` is a real evaluation failure and aborts the step.
    async fn is_healthy(&self, obj: &DynamicObject) -> Result<Health, kube::Error>;
}

/// [`HealthOracle`] that judges convergence from the object's own status.
///
/// Kinds with a readiness signal are checked against it; kinds without one
/// (ConfigMaps, Services, Secrets, arbitrary custom resources) count as
/// healthy by existing.
#[derive(Clone, Copy, Debug, Default)]
pub struct StatusHealthOracle;

#[async_trait]
impl HealthOracle for StatusHealthOracle {
    async fn is_healthy(&self, obj: &DynamicObject) -> Result<Health, kube::Error> {
        let kind = obj.types.as_ref().map(|t| t.kind.as_str()).unwrap_or("");
        let health = match kind {
            "Deployment" => condition_true(obj, "Available"),
            "StatefulSet" | "ReplicaSet" => replicas_ready(obj),
            "DaemonSet" => daemons_ready(obj),
            "Job" => job_succeeded(obj),
            "Pod" => pod_running(obj),
            "PersistentVolumeClaim" => pvc_bound(obj),
            // No readiness signal to check; existence is health.
            _ => Health::Healthy,
        };

        if let Health::Unhealthy(reason) = &health {
            debug!(kind = %kind, reason = %reason, "resource not yet healthy");
        }
        Ok(health)
    }
}

/// Healthy when status.conditions contains the given type with status True
fn condition_true(obj: &DynamicObject, condition: &str) -> Health {
    let matched = obj
        .data
        .pointer("/status/conditions")
        .and_then(|c| c.as_array())
        .map(|conditions| {
            conditions.iter().any(|c| {
                c.get("type").and_then(|t| t.as_str()) == Some(condition)
                    && c.get("status").and_then(|s| s.as_str()) == Some("True")
            })
        })
        .unwrap_or(false);

    if matched {
        Health::Healthy
    } else {
        Health::Unhealthy(format!("condition {condition} is not True"))
    }
}

/// Healthy when status.readyReplicas has reached spec.replicas (default 1)
fn replicas_ready(obj: &DynamicObject) -> Health {
    let desired = obj
        .data
        .pointer("/spec/replicas")
        .and_then(|r| r.as_i64())
        .unwrap_or(1);
    let ready = obj
        .data
        .pointer("/status/readyReplicas")
        .and_then(|r| r.as_i64())
        .unwrap_or(0);

    if ready >= desired {
        Health::Healthy
    } else {
        Health::Unhealthy(format!("{ready}/{desired} replicas ready"))
    }
}

/// Healthy when every scheduled daemon pod is ready
fn daemons_ready(obj: &DynamicObject) -> Health {
    let desired = obj
        .data
        .pointer("/status/desiredNumberScheduled")
        .and_then(|r| r.as_i64())
        .unwrap_or(0);
    let ready = obj
        .data
        .pointer("/status/numberReady")
        .and_then(|r| r.as_i64())
        .unwrap_or(0);

    if ready >= desired {
        Health::Healthy
    } else {
        Health::Unhealthy(format!("{ready}/{desired} daemon pods ready"))
    }
}

/// Healthy once at least one completion succeeded
fn job_succeeded(obj: &DynamicObject) -> Health {
    let succeeded = obj
        .data
        .pointer("/status/succeeded")
        .and_then(|s| s.as_i64())
        .unwrap_or(0);

    if succeeded >= 1 {
        Health::Healthy
    } else {
        Health::Unhealthy("no successful completions".to_string())
    }
}

/// Healthy while the pod runs or after it succeeded
fn pod_running(obj: &DynamicObject) -> Health {
    match obj.data.pointer("/status/phase").and_then(|p| p.as_str()) {
        Some("Running") | Some("Succeeded") => Health::Healthy,
        phase => Health::Unhealthy(format!("pod phase is {}", phase.unwrap_or("unknown"))),
    }
}

/// Healthy once the claim is bound
fn pvc_bound(obj: &DynamicObject) -> Health {
    match obj.data.pointer("/status/phase").and_then(|p| p.as_str()) {
        Some("Bound") => Health::Healthy,
        phase => Health::Unhealthy(format!("claim phase is {}", phase.unwrap_or("unknown"))),
    }
}
