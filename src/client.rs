//! Cluster client abstraction
//!
//! The engine talks to the cluster through the [`ResourceClient`] trait so
//! tests can substitute a fake; [`KubeResourceClient`] is the production
//! implementation over `Api<DynamicObject>`. Resources flow through the
//! engine untyped (operator authors can ship arbitrary kinds, including
//! custom resources), so the Api is derived per object from its
//! `apiVersion`/`kind`.

use async_trait::async_trait;
use kube::api::{Api, DeleteParams, DynamicObject, Patch, PatchParams, PostParams};
use kube::core::ErrorResponse;
use kube::discovery::ApiResource;
use kube::{Client, ResourceExt};

#[cfg(test)]
use mockall::automock;

/// Media-type selection for patches.
///
/// `StrategicMerge` sends `application/strategic-merge-patch+json`; `Merge`
/// sends `application/merge-patch+json`. The executor always tries the
/// strategic patch first and falls back to a plain merge patch only when
/// the server answers 415 (custom resources do not participate in
/// strategic merge).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PatchStrategy {
    /// Strategic merge patch
    StrategicMerge,
    /// Plain JSON merge patch
    Merge,
}

/// Trait abstracting the cluster CRUD operations the engine needs
///
/// One production implementation exists ([`KubeResourceClient`]); tests
/// supply mocks or scripted fakes.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ResourceClient: Send + Sync {
    /// Fetch the live object matching the given rendered resource's
    /// (kind, namespace, name) key. Returns `Ok(None)` when the object does
    /// not exist.
    async fn get(&self, obj: &DynamicObject) -> Result<Option<DynamicObject>, kube::Error>;

    /// Create the object on the cluster, returning the server's view of it
    async fn create(&self, obj: &DynamicObject) -> Result<DynamicObject, kube::Error>;

    /// Patch the live object identified by `obj`'s key with the given body
    async fn patch(
        &self,
        obj: &DynamicObject,
        strategy: PatchStrategy,
        body: &serde_json::Value,
    ) -> Result<(), kube::Error>;

    /// Delete the object with foreground propagation. A missing object
    /// surfaces as a not-found error; the caller decides whether that
    /// counts as success.
    async fn delete(&self, obj: &DynamicObject) -> Result<(), kube::Error>;
}

/// True when the error is a Kubernetes 404
pub fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 404)
}

/// True when the API rejected the request media type (HTTP 415).
///
/// Strategic merge patches against custom resources fail this way because
/// the server has no strategic-merge schema for them.
pub fn is_unsupported_media_type(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 415)
}

/// [`ResourceClient`] backed by a real cluster connection
pub struct KubeResourceClient {
    client: Client,
}

impl KubeResourceClient {
    /// Create a new client wrapping the given kube client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Build a dynamic Api scoped to the object's kind and namespace
    fn api_for(&self, obj: &DynamicObject) -> Result<Api<DynamicObject>, kube::Error> {
        let types = obj.types.as_ref().ok_or_else(|| missing_type_meta(obj))?;
        let (group, version) = parse_api_version(&types.api_version);
        let ar = ApiResource {
            group: group.to_string(),
            version: version.to_string(),
            api_version: types.api_version.clone(),
            kind: types.kind.clone(),
            plural: pluralize(&types.kind),
        };

        Ok(match obj.metadata.namespace.as_deref() {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &ar),
            None => Api::all_with(self.client.clone(), &ar),
        })
    }
}

#[async_trait]
impl ResourceClient for KubeResourceClient {
    async fn get(&self, obj: &DynamicObject) -> Result<Option<DynamicObject>, kube::Error> {
        let api = self.api_for(obj)?;
        match api.get(&obj.name_any()).await {
            Ok(found) => Ok(Some(found)),
            Err(err) if is_not_found(&err) => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn create(&self, obj: &DynamicObject) -> Result<DynamicObject, kube::Error> {
        let api = self.api_for(obj)?;
        api.create(&PostParams::default(), obj).await
    }

    async fn patch(
        &self,
        obj: &DynamicObject,
        strategy: PatchStrategy,
        body: &serde_json::Value,
    ) -> Result<(), kube::Error> {
        let api = self.api_for(obj)?;
        let name = obj.name_any();
        match strategy {
            PatchStrategy::StrategicMerge => {
                api.patch(&name, &PatchParams::default(), &Patch::Strategic(body))
                    .await?;
            }
            PatchStrategy::Merge => {
                api.patch(&name, &PatchParams::default(), &Patch::Merge(body))
                    .await?;
            }
        }
        Ok(())
    }

    async fn delete(&self, obj: &DynamicObject) -> Result<(), kube::Error> {
        let api = self.api_for(obj)?;
        api.delete(&obj.name_any(), &DeleteParams::foreground())
            .await?;
        Ok(())
    }
}

/// Error for objects that reached the client without apiVersion/kind.
/// The enhancer validates type metadata, so hitting this means a resource
/// bypassed it.
fn missing_type_meta(obj: &DynamicObject) -> kube::Error {
    kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message: format!("object {} has no apiVersion/kind", obj.name_any()),
        reason: "BadRequest".to_string(),
        code: 400,
    })
}

/// Split an apiVersion into (group, version); core resources have an empty
/// group
fn parse_api_version(api_version: &str) -> (&str, &str) {
    match api_version.split_once('/') {
        Some((group, version)) => (group, version),
        None => ("", api_version),
    }
}

/// Simple pluralization for Kubernetes resource kinds
fn pluralize(kind: &str) -> String {
    let lower = kind.to_lowercase();
    if lower.ends_with('s') {
        format!("{lower}es")
    } else if let Some(stem) = lower.strip_suffix('y') {
        format!("{stem}ies")
    } else {
        format!("{lower}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_api_version_with_group() {
        assert_eq!(parse_api_version("apps/v1"), ("apps", "v1"));
        assert_eq!(
            parse_api_version("kudo.dev/v1alpha1"),
            ("kudo.dev", "v1alpha1")
        );
    }

    #[test]
    fn parse_api_version_core() {
        assert_eq!(parse_api_version("v1"), ("", "v1"));
    }

    #[test]
    fn pluralize_common_kinds() {
        assert_eq!(pluralize("Deployment"), "deployments");
        assert_eq!(pluralize("Service"), "services");
        assert_eq!(pluralize("Ingress"), "ingresses");
        assert_eq!(pluralize("NetworkPolicy"), "networkpolicies");
        assert_eq!(pluralize("ConfigMap"), "configmaps");
    }

    #[test]
    fn not_found_predicate() {
        let err = kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: "not found".to_string(),
            reason: "NotFound".to_string(),
            code: 404,
        });
        assert!(is_not_found(&err));
        assert!(!is_unsupported_media_type(&err));
    }

    #[test]
    fn unsupported_media_type_predicate() {
        let err = kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: "the body of the request was in an unknown format".to_string(),
            reason: "UnsupportedMediaType".to_string(),
            code: 415,
        });
        assert!(is_unsupported_media_type(&err));
        assert!(!is_not_found(&err));
    }
}
