//! Convention application for rendered resources
//!
//! Every resource a plan emits carries the same conventions: a
//! deterministic `<instance>-` name prefix, the instance namespace, the
//! standard labels and annotations, and a controller-owner reference back
//! to the instance. The [`ResourceEnhancer`] trait is the seam; the
//! production [`ConventionEnhancer`] applies the customization in memory
//! over parsed YAML documents.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::DynamicObject;
use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;

/// Label key marking who manages an emitted resource
pub const HERITAGE_LABEL: &str = "heritage";
/// Value of the heritage label on every emitted resource
pub const HERITAGE_VALUE: &str = "kudo";
/// Label key carrying the operator name
pub const OPERATOR_LABEL: &str = "operator";
/// Label key carrying the instance name
pub const INSTANCE_LABEL: &str = "instance";
/// Annotation key carrying the plan name
pub const PLAN_ANNOTATION: &str = "plan";
/// Annotation key carrying the phase name
pub const PHASE_ANNOTATION: &str = "phase";
/// Annotation key carrying the step name
pub const STEP_ANNOTATION: &str = "step";
/// Annotation key carrying the operator version
pub const OPERATOR_VERSION_ANNOTATION: &str = "operatorVersion";

/// Errors raised while applying conventions to rendered templates
#[derive(Debug, Error)]
pub enum EnhancerError {
    /// A rendered template is not valid YAML
    #[error("error parsing rendered template {template}: {source}")]
    Parse {
        /// Resource key of the offending template
        template: String,
        /// The underlying YAML error
        #[source]
        source: serde_yaml::Error,
    },

    /// A parsed document is missing a field every cluster object needs
    #[error("template {template} produced a document without {field}")]
    NotAnObject {
        /// Resource key of the offending template
        template: String,
        /// Which required field is missing
        field: &'static str,
    },

    /// An enhanced document does not convert into a cluster object
    #[error("error converting document from template {template}: {source}")]
    Convert {
        /// Resource key of the offending template
        template: String,
        /// The underlying conversion error
        #[source]
        source: serde_json::Error,
    },

    /// The resources owner is missing a field an owner reference requires
    #[error("cannot build controller reference: owner has empty {field}")]
    OwnerReference {
        /// Which owner field is empty
        field: &'static str,
    },
}

/// Metadata stamped onto every resource emitted for one step
#[derive(Clone, Debug)]
pub struct ConventionMetadata {
    /// Instance the plan executes for; becomes the name prefix and the
    /// `instance` label
    pub instance_name: String,
    /// Namespace every emitted resource is placed in
    pub namespace: String,
    /// Operator name; becomes the `operator` label
    pub operator_name: String,
    /// Operator version; becomes the `operatorVersion` annotation
    pub operator_version: String,
    /// Plan name; becomes the `plan` annotation
    pub plan_name: String,
    /// Phase name; becomes the `phase` annotation
    pub phase_name: String,
    /// Step name; becomes the `step` annotation
    pub step_name: String,
}

/// Takes one step's rendered templates and stamps the conventions onto
/// every object they contain, wiring the owner reference along the way.
///
/// Modeled as a trait so tests can substitute a fake; one production
/// implementation exists.
pub trait ResourceEnhancer: Send + Sync {
    /// Apply the conventions to a group of rendered templates.
    ///
    /// Templates are handed over as an ordered `(resource key, rendered
    /// YAML)` slice; the output preserves template order and, within a
    /// template, document order. Multi-document YAML is supported and
    /// `List` kinds are flattened.
    fn apply_conventions(
        &self,
        templates: &[(String, String)],
        meta: &ConventionMetadata,
        owner: &OwnerReference,
    ) -> Result<Vec<DynamicObject>, EnhancerError>;
}

/// Production [`ResourceEnhancer`] applying the customization in memory
#[derive(Clone, Copy, Debug, Default)]
pub struct ConventionEnhancer;

impl ResourceEnhancer for ConventionEnhancer {
    fn apply_conventions(
        &self,
        templates: &[(String, String)],
        meta: &ConventionMetadata,
        owner: &OwnerReference,
    ) -> Result<Vec<DynamicObject>, EnhancerError> {
        let owner_ref = controller_reference(owner)?;

        let mut objects = Vec::new();
        for (template, body) in templates {
            for document in serde_yaml::Deserializer::from_str(body) {
                let value =
                    Value::deserialize(document).map_err(|source| EnhancerError::Parse {
                        template: template.clone(),
                        source,
                    })?;
                if value.is_null() {
                    continue;
                }
                for item in flatten_lists(value) {
                    objects.push(enhance_object(item, template, meta, &owner_ref)?);
                }
            }
        }

        Ok(objects)
    }
}

/// Expand `List` kinds into their items; anything else passes through
fn flatten_lists(value: Value) -> Vec<Value> {
    let is_list = value
        .get("kind")
        .and_then(|k| k.as_str())
        .is_some_and(|k| k == "List" || k.ends_with("List"))
        && value.get("items").is_some_and(Value::is_array);

    if is_list {
        match value {
            Value::Object(mut map) => match map.remove("items") {
                Some(Value::Array(items)) => items,
                _ => vec![],
            },
            _ => vec![],
        }
    } else {
        vec![value]
    }
}

/// Stamp the conventions onto one parsed document and convert it into a
/// cluster object
fn enhance_object(
    mut value: Value,
    template: &str,
    meta: &ConventionMetadata,
    owner_ref: &OwnerReference,
) -> Result<DynamicObject, EnhancerError> {
    let not_an_object = |field| EnhancerError::NotAnObject {
        template: template.to_string(),
        field,
    };

    if !value.is_object() {
        return Err(not_an_object("an object body"));
    }
    if value
        .get("kind")
        .and_then(|k| k.as_str())
        .unwrap_or_default()
        .is_empty()
    {
        return Err(not_an_object("kind"));
    }
    if value
        .get("apiVersion")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .is_empty()
    {
        return Err(not_an_object("apiVersion"));
    }

    let labels = [
        (HERITAGE_LABEL, HERITAGE_VALUE.to_string()),
        (OPERATOR_LABEL, meta.operator_name.clone()),
        (INSTANCE_LABEL, meta.instance_name.clone()),
    ];
    let annotations = [
        (PLAN_ANNOTATION, meta.plan_name.clone()),
        (PHASE_ANNOTATION, meta.phase_name.clone()),
        (STEP_ANNOTATION, meta.step_name.clone()),
        (OPERATOR_VERSION_ANNOTATION, meta.operator_version.clone()),
    ];

    {
        let metadata = object_entry(&mut value, "metadata");
        let name = metadata
            .get("name")
            .and_then(|n| n.as_str())
            .unwrap_or_default();
        if name.is_empty() {
            return Err(not_an_object("metadata.name"));
        }

        // Prefix exactly once; names stay deterministic (no suffix hash).
        metadata.insert(
            "name".to_string(),
            Value::String(format!("{}-{}", meta.instance_name, name)),
        );
        metadata.insert(
            "namespace".to_string(),
            Value::String(meta.namespace.clone()),
        );
        merge_string_map(metadata, "labels", &labels);
        merge_string_map(metadata, "annotations", &annotations);
        metadata.insert(
            "ownerReferences".to_string(),
            Value::Array(vec![serde_json::to_value(owner_ref).map_err(|source| {
                EnhancerError::Convert {
                    template: template.to_string(),
                    source,
                }
            })?]),
        );
    }

    // Workload kinds embed a pod template and a selector; both carry the
    // common labels so selectors keep matching the relabeled pods.
    if let Some(pod_metadata) = value
        .pointer_mut("/spec/template/metadata")
        .and_then(Value::as_object_mut)
    {
        merge_string_map(pod_metadata, "labels", &labels);
        merge_string_map(pod_metadata, "annotations", &annotations);
    }
    if let Some(selector) = value
        .pointer_mut("/spec/selector")
        .and_then(Value::as_object_mut)
    {
        if selector.contains_key("matchLabels") {
            merge_string_map(selector, "matchLabels", &labels);
        }
    }

    serde_json::from_value(value).map_err(|source| EnhancerError::Convert {
        template: template.to_string(),
        source,
    })
}

/// Get or create an object-valued entry on a JSON object
fn object_entry<'a>(value: &'a mut Value, key: &str) -> &'a mut Map<String, Value> {
    let map = value
        .as_object_mut()
        .expect("caller verified the document is an object");
    let entry = map
        .entry(key.to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    if !entry.is_object() {
        *entry = Value::Object(Map::new());
    }
    entry.as_object_mut().expect("entry was just made an object")
}

/// Merge key/value pairs into a string-map field, creating it if absent.
/// Convention values win over authored ones.
fn merge_string_map(parent: &mut Map<String, Value>, field: &str, pairs: &[(&str, String)]) {
    let entry = parent
        .entry(field.to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    if !entry.is_object() {
        *entry = Value::Object(Map::new());
    }
    let map = entry.as_object_mut().expect("entry was just made an object");
    for (key, val) in pairs {
        map.insert((*key).to_string(), Value::String(val.clone()));
    }
}

/// Validate the owner and derive the controller reference stamped onto
/// every emitted resource
fn controller_reference(owner: &OwnerReference) -> Result<OwnerReference, EnhancerError> {
    let missing = |field| EnhancerError::OwnerReference { field };
    if owner.api_version.is_empty() {
        return Err(missing("apiVersion"));
    }
    if owner.kind.is_empty() {
        return Err(missing("kind"));
    }
    if owner.name.is_empty() {
        return Err(missing("name"));
    }
    if owner.uid.is_empty() {
        return Err(missing("uid"));
    }

    Ok(OwnerReference {
        controller: Some(true),
        block_owner_deletion: Some(true),
        ..owner.clone()
    })
}
