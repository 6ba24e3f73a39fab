//! ManifestWork resource definition
//!
//! A ManifestWork lives in a spoke's namespace on the hub and carries raw
//! manifests that the spoke's work agent applies. The agent reports back
//! per-manifest conditions and, for manifests with feedback rules, selected
//! status fields.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::Condition;

/// Specification for a ManifestWork
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "work.open-cluster-management.io",
    version = "v1",
    kind = "ManifestWork",
    plural = "manifestworks",
    status = "ManifestWorkStatus",
    derive = "PartialEq",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ManifestWorkSpec {
    /// Manifests to apply on the spoke
    #[serde(default)]
    pub workload: ManifestsTemplate,

    /// Per-resource options such as status feedback rules
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub manifest_configs: Vec<ManifestConfigOption>,
}

/// Ordered list of raw manifests
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct ManifestsTemplate {
    /// Raw Kubernetes objects, applied in order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub manifests: Vec<serde_json::Value>,
}

/// Options for one resource inside the workload
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ManifestConfigOption {
    /// Which resource the options apply to
    pub resource_identifier: ResourceIdentifier,

    /// Status fields the agent should report back
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub feedback_rules: Vec<FeedbackRule>,
}

/// Identifies a resource in the workload by group/resource/name/namespace
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct ResourceIdentifier {
    /// API group ("" for core)
    #[serde(default)]
    pub group: String,
    /// Plural resource name
    pub resource: String,
    /// Object name
    pub name: String,
    /// Object namespace ("" for cluster scoped)
    #[serde(default)]
    pub namespace: String,
}

/// A status feedback rule
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackRule {
    /// Rule type, `JSONPaths` or `WellKnownStatus`
    #[serde(rename = "type")]
    pub type_: String,

    /// JSON paths to report when the type is `JSONPaths`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub json_paths: Vec<JsonPath>,
}

/// A named JSON path evaluated against the applied resource
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct JsonPath {
    /// Name the value is reported under
    pub name: String,
    /// JSON path into the resource, e.g. `.status.state`
    pub path: String,
}

/// Status for a ManifestWork, written by the spoke's work agent
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ManifestWorkStatus {
    /// Work-level conditions (Applied, Available, Degraded)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Per-manifest status
    #[serde(default)]
    pub resource_status: ManifestResourceStatus,
}

/// Status of each manifest in the workload
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct ManifestResourceStatus {
    /// One entry per applied manifest
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub manifests: Vec<ManifestCondition>,
}

/// Status of a single applied manifest
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ManifestCondition {
    /// Identity of the applied resource
    pub resource_meta: ManifestResourceMeta,

    /// Values collected by the feedback rules
    #[serde(default)]
    pub status_feedback: StatusFeedbackResult,

    /// Conditions of the applied resource
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

/// Identity of an applied manifest
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct ManifestResourceMeta {
    /// Index of the manifest in the workload
    #[serde(default)]
    pub ordinal: i32,
    /// API group
    #[serde(default)]
    pub group: String,
    /// API version
    #[serde(default)]
    pub version: String,
    /// Kind, e.g. `Subscription`
    #[serde(default)]
    pub kind: String,
    /// Plural resource name
    #[serde(default)]
    pub resource: String,
    /// Object name
    #[serde(default)]
    pub name: String,
    /// Object namespace
    #[serde(default)]
    pub namespace: String,
}

/// Values reported for one manifest
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct StatusFeedbackResult {
    /// Named feedback values
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<FeedbackValue>,
}

/// A single named feedback value
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackValue {
    /// Name from the feedback rule
    pub name: String,
    /// Typed value
    #[serde(default)]
    pub field_value: FieldValue,
}

/// Typed feedback value; exactly one of the payload fields is set
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FieldValue {
    /// Value type: `Integer`, `String`, `Boolean` or `JsonRaw`
    #[serde(rename = "type", default)]
    pub type_: String,
    /// Integer payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integer: Option<i64>,
    /// String payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub string: Option<String>,
    /// Boolean payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boolean: Option<bool>,
    /// Raw JSON payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json_raw: Option<String>,
}

impl FieldValue {
    /// Build a string-typed value
    pub fn string(value: impl Into<String>) -> Self {
        Self {
            type_: "String".to_string(),
            string: Some(value.into()),
            ..Default::default()
        }
    }
}

impl ManifestWorkStatus {
    /// All feedback values named `name` reported for manifests of `kind`
    pub fn feedback_values<'a>(
        &'a self,
        kind: &'a str,
        name: &'a str,
    ) -> impl Iterator<Item = &'a FieldValue> + 'a {
        self.resource_status
            .manifests
            .iter()
            .filter(move |m| m.resource_meta.kind == kind)
            .flat_map(|m| m.status_feedback.values.iter())
            .filter(move |v| v.name == name)
            .map(|v| &v.field_value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent_status() -> ManifestWorkStatus {
        serde_json::from_value(serde_json::json!({
            "conditions": [{"type": "Applied", "status": "True"}],
            "resourceStatus": {
                "manifests": [
                    {
                        "resourceMeta": {"ordinal": 0, "kind": "OperatorGroup", "name": "og"},
                        "conditions": []
                    },
                    {
                        "resourceMeta": {
                            "ordinal": 1,
                            "group": "operators.coreos.com",
                            "version": "v1alpha1",
                            "kind": "Subscription",
                            "resource": "subscriptions",
                            "name": "acm-operator-subscription",
                            "namespace": "open-cluster-management"
                        },
                        "statusFeedback": {
                            "values": [
                                {"name": "state", "fieldValue": {"type": "String", "string": "AtLatestKnown"}},
                                {"name": "installedCSV", "fieldValue": {"type": "String", "string": "advanced-cluster-management.v2.4.0"}}
                            ]
                        }
                    }
                ]
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_feedback_values_filters_by_kind_and_name() {
        let status = agent_status();
        let values: Vec<_> = status.feedback_values("Subscription", "state").collect();
        assert_eq!(values.len(), 1);
        assert_eq!(values[0].string.as_deref(), Some("AtLatestKnown"));

        assert_eq!(status.feedback_values("OperatorGroup", "state").count(), 0);
        assert_eq!(status.feedback_values("Subscription", "phase").count(), 0);
    }

    #[test]
    fn test_missing_resource_status_defaults_to_empty() {
        let status: ManifestWorkStatus = serde_json::from_value(serde_json::json!({})).unwrap();
        assert!(status.resource_status.manifests.is_empty());
        assert_eq!(status.feedback_values("Subscription", "state").count(), 0);
    }

    #[test]
    fn test_spec_serializes_with_wire_field_names() {
        let spec = ManifestWorkSpec {
            workload: ManifestsTemplate {
                manifests: vec![serde_json::json!({"kind": "Namespace"})],
            },
            manifest_configs: vec![ManifestConfigOption {
                resource_identifier: ResourceIdentifier {
                    group: "operators.coreos.com".to_string(),
                    resource: "subscriptions".to_string(),
                    name: "sub".to_string(),
                    namespace: "ns".to_string(),
                },
                feedback_rules: vec![FeedbackRule {
                    type_: "JSONPaths".to_string(),
                    json_paths: vec![JsonPath {
                        name: "state".to_string(),
                        path: ".status.state".to_string(),
                    }],
                }],
            }],
        };

        let json = serde_json::to_value(&spec).unwrap();
        assert_eq!(json["workload"]["manifests"][0]["kind"], "Namespace");
        assert_eq!(
            json["manifestConfigs"][0]["resourceIdentifier"]["resource"],
            "subscriptions"
        );
        assert_eq!(json["manifestConfigs"][0]["feedbackRules"][0]["type"], "JSONPaths");
        assert_eq!(
            json["manifestConfigs"][0]["feedbackRules"][0]["jsonPaths"][0]["path"],
            ".status.state"
        );
    }
}
