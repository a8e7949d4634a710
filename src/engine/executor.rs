//! Step execution
//!
//! A step either applies its resources (create or patch toward the
//! rendered state) or, for delete steps, removes them with foreground
//! propagation. Health is observed synchronously once per resource per
//! tick; an unhealthy resource leaves the step in progress for the next
//! tick, while the first real error aborts the step.

use kube::api::DynamicObject;
use kube::ResourceExt;
use tracing::debug;

use crate::client::{is_not_found, is_unsupported_media_type, PatchStrategy, ResourceClient};
use crate::health::{Health, HealthOracle};
use crate::plan::{ExecutionStatus, Step, StepStatus};
use crate::EngineError;

/// Execute one tick of a single step, mutating its status node.
///
/// A no-op for steps that are already complete or fatally failed.
/// Otherwise the step transitions to `InProgress`, every resource is
/// processed in order, and the step completes once every resource applied
/// cleanly and reported healthy. Returning `Ok` with the status still
/// `InProgress` means "apply succeeded, not yet healthy, re-poll later".
pub async fn execute_step(
    step: &Step,
    status: &mut StepStatus,
    resources: &[DynamicObject],
    client: &dyn ResourceClient,
    health: &dyn HealthOracle,
) -> Result<(), EngineError> {
    if !status.status.is_in_progress() {
        return Ok(());
    }
    status.status = ExecutionStatus::InProgress;

    let mut all_healthy = true;
    for resource in resources {
        let name = resource.name_any();
        if step.delete {
            debug!(step = %step.name, resource = %name, "deleting resource");
            match client.delete(resource).await {
                Ok(()) => {}
                // Already gone counts as deleted.
                Err(err) if is_not_found(&err) => {}
                Err(source) => {
                    return Err(EngineError::Apply {
                        action: "deleting",
                        resource: name,
                        step: step.name.clone(),
                        source,
                    })
                }
            }
            continue;
        }

        let observed = client.get(resource).await.map_err(|source| EngineError::Apply {
            action: "getting",
            resource: name.clone(),
            step: step.name.clone(),
            source,
        })?;

        let applied = match observed {
            None => {
                debug!(step = %step.name, resource = %name, "creating resource");
                client
                    .create(resource)
                    .await
                    .map_err(|source| EngineError::Apply {
                        action: "creating",
                        resource: name.clone(),
                        step: step.name.clone(),
                        source,
                    })?
            }
            Some(existing) => {
                debug!(step = %step.name, resource = %name, "patching resource");
                patch_existing(resource, &name, &step.name, client).await?;
                existing
            }
        };

        match health.is_healthy(&applied).await {
            Ok(Health::Healthy) => {}
            Ok(Health::Unhealthy(reason)) => {
                debug!(step = %step.name, resource = %name, reason = %reason, "resource not yet healthy");
                all_healthy = false;
            }
            Err(source) => {
                return Err(EngineError::Health {
                    resource: name,
                    step: step.name.clone(),
                    source,
                })
            }
        }
    }

    if all_healthy {
        status.status = ExecutionStatus::Complete;
    }
    Ok(())
}

/// Patch the live object toward the rendered resource.
///
/// Comparing specs to skip no-op patches would produce false diffs (the
/// server sets fields the engine cannot cheaply reason about), so the
/// patch is always attempted. Strategic merge first; custom resources do
/// not participate in strategic merge and answer 415, in which case
/// exactly one retry is issued as a plain merge patch.
async fn patch_existing(
    new: &DynamicObject,
    name: &str,
    step: &str,
    client: &dyn ResourceClient,
) -> Result<(), EngineError> {
    let body = serde_json::to_value(new).map_err(|source| EngineError::Serialize {
        resource: name.to_string(),
        source,
    })?;

    match client
        .patch(new, PatchStrategy::StrategicMerge, &body)
        .await
    {
        Ok(()) => Ok(()),
        Err(err) if is_unsupported_media_type(&err) => {
            debug!(resource = %name, "strategic merge patch unsupported, retrying as merge patch");
            client
                .patch(new, PatchStrategy::Merge, &body)
                .await
                .map_err(|source| EngineError::Apply {
                    action: "patching",
                    resource: name.to_string(),
                    step: step.to_string(),
                    source,
                })
        }
        Err(source) => Err(EngineError::Apply {
            action: "patching",
            resource: name.to_string(),
            step: step.to_string(),
            source,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockResourceClient;
    use crate::health::MockHealthOracle;
    use kube::core::ErrorResponse;
    use serde_json::json;

    fn deployment() -> DynamicObject {
        serde_json::from_value(json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": "web-nginx", "namespace": "prod"},
            "spec": {"replicas": 1}
        }))
        .unwrap()
    }

    fn custom_resource() -> DynamicObject {
        serde_json::from_value(json!({
            "apiVersion": "example.com/v1",
            "kind": "Widget",
            "metadata": {"name": "web-widget", "namespace": "prod"},
            "spec": {"size": 2}
        }))
        .unwrap()
    }

    fn apply_step() -> Step {
        Step {
            name: "srv".to_string(),
            delete: false,
            tasks: vec!["deploy".to_string()],
        }
    }

    fn delete_step() -> Step {
        Step {
            name: "remove".to_string(),
            delete: true,
            tasks: vec!["deploy".to_string()],
        }
    }

    fn pending_status() -> StepStatus {
        StepStatus {
            name: "srv".to_string(),
            status: ExecutionStatus::Pending,
        }
    }

    fn api_error(code: u16, reason: &str) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: reason.to_string(),
            reason: reason.to_string(),
            code,
        })
    }

    fn healthy_oracle() -> MockHealthOracle {
        let mut oracle = MockHealthOracle::new();
        oracle
            .expect_is_healthy()
            .returning(|_| Ok(Health::Healthy));
        oracle
    }

    #[tokio::test]
    async fn creates_missing_resource_and_completes_when_healthy() {
        let mut client = MockResourceClient::new();
        client.expect_get().times(1).returning(|_| Ok(None));
        client
            .expect_create()
            .times(1)
            .returning(|obj| Ok(obj.clone()));
        let oracle = healthy_oracle();

        let mut status = pending_status();
        execute_step(&apply_step(), &mut status, &[deployment()], &client, &oracle)
            .await
            .unwrap();

        assert_eq!(status.status, ExecutionStatus::Complete);
    }

    #[tokio::test]
    async fn unhealthy_resource_leaves_step_in_progress() {
        let mut client = MockResourceClient::new();
        client.expect_get().returning(|_| Ok(None));
        client.expect_create().returning(|obj| Ok(obj.clone()));
        let mut oracle = MockHealthOracle::new();
        oracle
            .expect_is_healthy()
            .returning(|_| Ok(Health::Unhealthy("0/1 replicas ready".to_string())));

        let mut status = pending_status();
        execute_step(&apply_step(), &mut status, &[deployment()], &client, &oracle)
            .await
            .unwrap();

        assert_eq!(status.status, ExecutionStatus::InProgress);
    }

    #[tokio::test]
    async fn existing_resource_is_patched_strategically() {
        let mut client = MockResourceClient::new();
        client
            .expect_get()
            .returning(|obj| Ok(Some(obj.clone())));
        client
            .expect_patch()
            .withf(|_, strategy, _| *strategy == PatchStrategy::StrategicMerge)
            .times(1)
            .returning(|_, _, _| Ok(()));
        let oracle = healthy_oracle();

        let mut status = pending_status();
        execute_step(&apply_step(), &mut status, &[deployment()], &client, &oracle)
            .await
            .unwrap();

        assert_eq!(status.status, ExecutionStatus::Complete);
    }

    #[tokio::test]
    async fn unsupported_media_type_falls_back_to_merge_patch_once() {
        let mut client = MockResourceClient::new();
        client
            .expect_get()
            .returning(|obj| Ok(Some(obj.clone())));
        client
            .expect_patch()
            .withf(|_, strategy, _| *strategy == PatchStrategy::StrategicMerge)
            .times(1)
            .returning(|_, _, _| Err(api_error(415, "UnsupportedMediaType")));
        client
            .expect_patch()
            .withf(|_, strategy, _| *strategy == PatchStrategy::Merge)
            .times(1)
            .returning(|_, _, _| Ok(()));
        let oracle = healthy_oracle();

        let mut status = pending_status();
        execute_step(
            &apply_step(),
            &mut status,
            &[custom_resource()],
            &client,
            &oracle,
        )
        .await
        .unwrap();

        assert_eq!(status.status, ExecutionStatus::Complete);
    }

    #[tokio::test]
    async fn non_415_patch_error_is_not_retried() {
        let mut client = MockResourceClient::new();
        client
            .expect_get()
            .returning(|obj| Ok(Some(obj.clone())));
        client
            .expect_patch()
            .times(1)
            .returning(|_, _, _| Err(api_error(409, "Conflict")));
        let oracle = MockHealthOracle::new();

        let mut status = pending_status();
        let err = execute_step(&apply_step(), &mut status, &[deployment()], &client, &oracle)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            EngineError::Apply {
                action: "patching",
                ..
            }
        ));
        assert_eq!(status.status, ExecutionStatus::InProgress);
    }

    #[tokio::test]
    async fn failed_merge_fallback_aborts_the_step() {
        let mut client = MockResourceClient::new();
        client
            .expect_get()
            .returning(|obj| Ok(Some(obj.clone())));
        client
            .expect_patch()
            .withf(|_, strategy, _| *strategy == PatchStrategy::StrategicMerge)
            .times(1)
            .returning(|_, _, _| Err(api_error(415, "UnsupportedMediaType")));
        client
            .expect_patch()
            .withf(|_, strategy, _| *strategy == PatchStrategy::Merge)
            .times(1)
            .returning(|_, _, _| Err(api_error(500, "InternalError")));
        let oracle = MockHealthOracle::new();

        let mut status = pending_status();
        let err = execute_step(
            &apply_step(),
            &mut status,
            &[custom_resource()],
            &client,
            &oracle,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, EngineError::Apply { .. }));
    }

    #[tokio::test]
    async fn create_error_aborts_the_step() {
        let mut client = MockResourceClient::new();
        client.expect_get().returning(|_| Ok(None));
        client
            .expect_create()
            .returning(|_| Err(api_error(503, "ServiceUnavailable")));
        let oracle = MockHealthOracle::new();

        let mut status = pending_status();
        let err = execute_step(&apply_step(), &mut status, &[deployment()], &client, &oracle)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            EngineError::Apply {
                action: "creating",
                ..
            }
        ));
        assert!(!err.is_fatal());
    }

    #[tokio::test]
    async fn delete_step_treats_not_found_as_success() {
        let mut client = MockResourceClient::new();
        client
            .expect_delete()
            .times(1)
            .returning(|_| Err(api_error(404, "NotFound")));
        let oracle = MockHealthOracle::new();

        let mut status = pending_status();
        execute_step(
            &delete_step(),
            &mut status,
            &[deployment()],
            &client,
            &oracle,
        )
        .await
        .unwrap();

        // Delete steps complete without a health check.
        assert_eq!(status.status, ExecutionStatus::Complete);
    }

    #[tokio::test]
    async fn delete_error_aborts_the_step() {
        let mut client = MockResourceClient::new();
        client
            .expect_delete()
            .returning(|_| Err(api_error(500, "InternalError")));
        let oracle = MockHealthOracle::new();

        let mut status = pending_status();
        let err = execute_step(
            &delete_step(),
            &mut status,
            &[deployment()],
            &client,
            &oracle,
        )
        .await
        .unwrap_err();

        assert!(matches!(
            err,
            EngineError::Apply {
                action: "deleting",
                ..
            }
        ));
    }

    #[tokio::test]
    async fn completed_step_is_never_revisited() {
        // No expectations registered: any client or oracle call would panic.
        let client = MockResourceClient::new();
        let oracle = MockHealthOracle::new();

        let mut status = StepStatus {
            name: "srv".to_string(),
            status: ExecutionStatus::Complete,
        };
        execute_step(&apply_step(), &mut status, &[deployment()], &client, &oracle)
            .await
            .unwrap();

        assert_eq!(status.status, ExecutionStatus::Complete);
    }

    #[tokio::test]
    async fn errored_step_is_reentered() {
        let mut client = MockResourceClient::new();
        client.expect_get().returning(|_| Ok(None));
        client.expect_create().returning(|obj| Ok(obj.clone()));
        let oracle = healthy_oracle();

        let mut status = StepStatus {
            name: "srv".to_string(),
            status: ExecutionStatus::Error,
        };
        execute_step(&apply_step(), &mut status, &[deployment()], &client, &oracle)
            .await
            .unwrap();

        assert_eq!(status.status, ExecutionStatus::Complete);
    }

    #[tokio::test]
    async fn health_oracle_error_aborts_the_step() {
        let mut client = MockResourceClient::new();
        client.expect_get().returning(|_| Ok(None));
        client.expect_create().returning(|obj| Ok(obj.clone()));
        let mut oracle = MockHealthOracle::new();
        oracle
            .expect_is_healthy()
            .returning(|_| Err(api_error(500, "InternalError")));

        let mut status = pending_status();
        let err = execute_step(&apply_step(), &mut status, &[deployment()], &client, &oracle)
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::Health { .. }));
    }

    #[tokio::test]
    async fn remaining_resources_still_apply_after_an_unhealthy_one() {
        let mut client = MockResourceClient::new();
        client.expect_get().times(2).returning(|_| Ok(None));
        client
            .expect_create()
            .times(2)
            .returning(|obj| Ok(obj.clone()));
        let mut oracle = MockHealthOracle::new();
        let mut first = true;
        oracle.expect_is_healthy().returning(move |_| {
            if std::mem::take(&mut first) {
                Ok(Health::Unhealthy("not yet".to_string()))
            } else {
                Ok(Health::Healthy)
            }
        });

        let second: DynamicObject = serde_json::from_value(json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {"name": "web-cfg", "namespace": "prod"}
        }))
        .unwrap();

        let mut status = pending_status();
        execute_step(
            &apply_step(),
            &mut status,
            &[deployment(), second],
            &client,
            &oracle,
        )
        .await
        .unwrap();

        // Both resources were applied; the unhealthy first one keeps the
        // step in progress.
        assert_eq!(status.status, ExecutionStatus::InProgress);
    }
}
