//! Desired ManifestWork construction
//!
//! Builds the payload of both stages for a cluster:
//!
//! - Subscription stage: the operator Namespace, an OperatorGroup and an OLM
//!   Subscription for the hub operator. A feedback rule reports the
//!   Subscription's `.status.state`, which gates the second stage.
//! - ManagementHub stage: a MultiClusterHub, either the default one or the
//!   user-defined document from the cluster's `mch` annotation.
//!
//! Building is deterministic: the same inputs always produce the same object.

use kube::api::ObjectMeta;
use serde_json::{json, Value};

use crate::crd::{
    FeedbackRule, JsonPath, ManifestConfigOption, ManifestWork, ManifestWorkSpec,
    ManifestsTemplate, ResourceIdentifier,
};
use crate::stage::Stage;
use crate::{Error, Result, SUBSCRIPTION_STATE_FEEDBACK};

/// Label marking works created by this controller
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

/// Value of [`MANAGED_BY_LABEL`]
pub const MANAGED_BY_VALUE: &str = "hub-of-hubs";

/// Label recording which stage a work belongs to
pub const STAGE_LABEL: &str = "hub-of-hubs.open-cluster-management.io/stage";

const MCH_API_GROUP: &str = "operator.open-cluster-management.io";
const MCH_API_VERSION: &str = "operator.open-cluster-management.io/v1";
const MCH_KIND: &str = "MultiClusterHub";
const OLM_API_GROUP: &str = "operators.coreos.com";

/// Settings for the manifests placed on every spoke
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HubManifestSettings {
    /// Namespace the hub operator and MultiClusterHub are installed into
    pub operator_namespace: String,
    /// OLM channel to subscribe to
    pub channel: String,
    /// CatalogSource providing the package
    pub source: String,
    /// Namespace of the CatalogSource
    pub source_namespace: String,
    /// OLM package name
    pub package: String,
    /// Pin the initial CSV, if set
    pub starting_csv: Option<String>,
    /// Name of the default MultiClusterHub
    pub hub_name: String,
}

impl Default for HubManifestSettings {
    fn default() -> Self {
        Self {
            operator_namespace: "open-cluster-management".to_string(),
            channel: "release-2.4".to_string(),
            source: "redhat-operators".to_string(),
            source_namespace: "openshift-marketplace".to_string(),
            package: "advanced-cluster-management".to_string(),
            starting_csv: None,
            hub_name: "multiclusterhub".to_string(),
        }
    }
}

impl HubManifestSettings {
    fn subscription_name(&self) -> String {
        format!("{}-subscription", self.package)
    }
}

/// Produces the desired ManifestWork for each stage
pub trait DesiredStateBuilder: Send + Sync {
    /// Desired Subscription-stage work for `cluster`
    fn subscription_work(&self, cluster: &str) -> ManifestWork;

    /// Desired ManagementHub-stage work for `cluster`
    ///
    /// `mch_override` is a user-defined MultiClusterHub document (YAML or
    /// JSON). Fails if the override cannot be used.
    fn management_hub_work(&self, cluster: &str, mch_override: Option<&str>)
        -> Result<ManifestWork>;
}

/// Default builder producing the OLM Subscription and MultiClusterHub works
#[derive(Clone, Debug, Default)]
pub struct HubManifestBuilder {
    settings: HubManifestSettings,
}

impl HubManifestBuilder {
    /// Create a builder using the given settings
    pub fn new(settings: HubManifestSettings) -> Self {
        Self { settings }
    }

    fn default_mch(&self) -> Value {
        json!({
            "apiVersion": MCH_API_VERSION,
            "kind": MCH_KIND,
            "metadata": {
                "name": self.settings.hub_name,
                "namespace": self.settings.operator_namespace,
            },
            "spec": {}
        })
    }

    /// Parse and complete a user-defined MultiClusterHub
    fn user_mch(&self, cluster: &str, raw: &str) -> Result<Value> {
        let mut doc: Value = serde_yaml::from_str(raw).map_err(|e| {
            Error::build(cluster, format!("mch annotation is not valid YAML/JSON: {}", e))
        })?;

        let obj = doc
            .as_object_mut()
            .ok_or_else(|| Error::build(cluster, "mch annotation must be an object"))?;

        match obj.get("kind").and_then(Value::as_str) {
            Some(MCH_KIND) => {}
            Some(other) => {
                return Err(Error::build(
                    cluster,
                    format!("mch annotation has kind {}, expected {}", other, MCH_KIND),
                ))
            }
            None => {
                obj.insert("kind".to_string(), json!(MCH_KIND));
            }
        }

        match obj.get("apiVersion").and_then(Value::as_str) {
            Some(v) if v.split('/').next() == Some(MCH_API_GROUP) => {}
            Some(v) => {
                return Err(Error::build(
                    cluster,
                    format!("mch annotation has apiVersion {}, expected {}", v, MCH_API_VERSION),
                ))
            }
            None => {
                obj.insert("apiVersion".to_string(), json!(MCH_API_VERSION));
            }
        }

        let metadata = obj
            .entry("metadata")
            .or_insert_with(|| json!({}))
            .as_object_mut()
            .ok_or_else(|| Error::build(cluster, "mch annotation metadata must be an object"))?;
        for (field, default) in [
            ("name", &self.settings.hub_name),
            ("namespace", &self.settings.operator_namespace),
        ] {
            match metadata.get(field) {
                None | Some(Value::Null) => {
                    metadata.insert(field.to_string(), json!(default));
                }
                Some(Value::String(s)) if !s.trim().is_empty() => {}
                Some(other) => {
                    return Err(Error::build(
                        cluster,
                        format!(
                            "mch annotation metadata.{} must be a non-empty string, got {}",
                            field, other
                        ),
                    ))
                }
            }
        }

        Ok(doc)
    }
}

impl DesiredStateBuilder for HubManifestBuilder {
    fn subscription_work(&self, cluster: &str) -> ManifestWork {
        let s = &self.settings;
        let subscription_name = s.subscription_name();

        let mut subscription_spec = json!({
            "channel": s.channel,
            "installPlanApproval": "Automatic",
            "name": s.package,
            "source": s.source,
            "sourceNamespace": s.source_namespace,
        });
        if let Some(csv) = &s.starting_csv {
            subscription_spec["startingCSV"] = json!(csv);
        }

        let manifests = vec![
            json!({
                "apiVersion": "v1",
                "kind": "Namespace",
                "metadata": {"name": s.operator_namespace}
            }),
            json!({
                "apiVersion": "operators.coreos.com/v1",
                "kind": "OperatorGroup",
                "metadata": {"name": "default", "namespace": s.operator_namespace},
                "spec": {"targetNamespaces": [s.operator_namespace]}
            }),
            json!({
                "apiVersion": "operators.coreos.com/v1alpha1",
                "kind": "Subscription",
                "metadata": {"name": subscription_name, "namespace": s.operator_namespace},
                "spec": subscription_spec
            }),
        ];

        let configs = vec![feedback_config(
            OLM_API_GROUP,
            "subscriptions",
            &subscription_name,
            &s.operator_namespace,
            &[
                (SUBSCRIPTION_STATE_FEEDBACK, ".status.state"),
                ("installedCSV", ".status.installedCSV"),
            ],
        )];

        work(cluster, Stage::Subscription, manifests, configs)
    }

    fn management_hub_work(
        &self,
        cluster: &str,
        mch_override: Option<&str>,
    ) -> Result<ManifestWork> {
        let mch = match mch_override.filter(|raw| !raw.trim().is_empty()) {
            Some(raw) => self.user_mch(cluster, raw)?,
            None => self.default_mch(),
        };

        let (name, namespace) = mch_identity(cluster, &mch)?;
        let configs = vec![feedback_config(
            MCH_API_GROUP,
            "multiclusterhubs",
            name,
            namespace,
            &[("phase", ".status.phase")],
        )];

        Ok(work(cluster, Stage::ManagementHub, vec![mch], configs))
    }
}

/// Name and namespace of a completed MultiClusterHub document
fn mch_identity<'a>(cluster: &str, mch: &'a Value) -> Result<(&'a str, &'a str)> {
    let field = |key: &str| {
        mch["metadata"][key]
            .as_str()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| Error::build(cluster, format!("mch metadata.{} is not set", key)))
    };
    Ok((field("name")?, field("namespace")?))
}

fn feedback_config(
    group: &str,
    resource: &str,
    name: &str,
    namespace: &str,
    paths: &[(&str, &str)],
) -> ManifestConfigOption {
    ManifestConfigOption {
        resource_identifier: ResourceIdentifier {
            group: group.to_string(),
            resource: resource.to_string(),
            name: name.to_string(),
            namespace: namespace.to_string(),
        },
        feedback_rules: vec![FeedbackRule {
            type_: "JSONPaths".to_string(),
            json_paths: paths
                .iter()
                .map(|(name, path)| JsonPath {
                    name: name.to_string(),
                    path: path.to_string(),
                })
                .collect(),
        }],
    }
}

fn work(
    cluster: &str,
    stage: Stage,
    manifests: Vec<Value>,
    manifest_configs: Vec<ManifestConfigOption>,
) -> ManifestWork {
    let stage_value = match stage {
        Stage::Subscription => "subscription",
        Stage::ManagementHub => "mch",
    };
    ManifestWork {
        metadata: ObjectMeta {
            name: Some(stage.work_name(cluster)),
            namespace: Some(cluster.to_string()),
            labels: Some(
                [
                    (MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string()),
                    (STAGE_LABEL.to_string(), stage_value.to_string()),
                ]
                .into(),
            ),
            ..Default::default()
        },
        spec: ManifestWorkSpec {
            workload: ManifestsTemplate { manifests },
            manifest_configs,
        },
        status: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::ResourceExt;

    fn builder() -> HubManifestBuilder {
        HubManifestBuilder::default()
    }

    mod subscription {
        use super::*;

        #[test]
        fn test_work_is_named_and_placed_for_the_cluster() {
            let work = builder().subscription_work("cluster1");
            assert_eq!(work.name_any(), "cluster1-hoh-hub-cluster-subscription");
            assert_eq!(work.namespace().as_deref(), Some("cluster1"));
            assert_eq!(
                work.labels().get(MANAGED_BY_LABEL).map(String::as_str),
                Some(MANAGED_BY_VALUE)
            );
        }

        #[test]
        fn test_workload_installs_operator_through_olm() {
            let work = builder().subscription_work("cluster1");
            let kinds: Vec<_> = work
                .spec
                .workload
                .manifests
                .iter()
                .map(|m| m["kind"].as_str().unwrap())
                .collect();
            assert_eq!(kinds, vec!["Namespace", "OperatorGroup", "Subscription"]);

            let sub = &work.spec.workload.manifests[2];
            assert_eq!(sub["spec"]["channel"], "release-2.4");
            assert_eq!(sub["spec"]["name"], "advanced-cluster-management");
            assert!(sub["spec"].get("startingCSV").is_none());
        }

        #[test]
        fn test_state_feedback_targets_the_subscription() {
            let work = builder().subscription_work("cluster1");
            let config = &work.spec.manifest_configs[0];
            assert_eq!(config.resource_identifier.resource, "subscriptions");
            assert_eq!(
                config.resource_identifier.name,
                work.spec.workload.manifests[2]["metadata"]["name"]
            );
            let paths = &config.feedback_rules[0].json_paths;
            assert!(paths
                .iter()
                .any(|p| p.name == SUBSCRIPTION_STATE_FEEDBACK && p.path == ".status.state"));
        }

        #[test]
        fn test_starting_csv_is_pinned_when_configured() {
            let b = HubManifestBuilder::new(HubManifestSettings {
                starting_csv: Some("advanced-cluster-management.v2.4.1".to_string()),
                ..Default::default()
            });
            let work = b.subscription_work("cluster1");
            assert_eq!(
                work.spec.workload.manifests[2]["spec"]["startingCSV"],
                "advanced-cluster-management.v2.4.1"
            );
        }

        #[test]
        fn test_building_is_deterministic() {
            assert_eq!(
                builder().subscription_work("cluster1"),
                builder().subscription_work("cluster1")
            );
        }
    }

    mod management_hub {
        use super::*;

        #[test]
        fn test_default_hub_without_override() {
            let work = builder().management_hub_work("cluster1", None).unwrap();
            assert_eq!(work.name_any(), "cluster1-hoh-hub-cluster-mch");
            assert_eq!(work.namespace().as_deref(), Some("cluster1"));

            let mch = &work.spec.workload.manifests[0];
            assert_eq!(mch["kind"], MCH_KIND);
            assert_eq!(mch["metadata"]["name"], "multiclusterhub");
            assert_eq!(mch["metadata"]["namespace"], "open-cluster-management");
        }

        #[test]
        fn test_empty_override_means_default() {
            assert_eq!(
                builder().management_hub_work("cluster1", Some("")).unwrap(),
                builder().management_hub_work("cluster1", None).unwrap()
            );
        }

        #[test]
        fn test_yaml_override_is_used_and_completed() {
            let raw = "kind: MultiClusterHub\nspec:\n  availabilityConfig: Basic\n";
            let work = builder().management_hub_work("cluster1", Some(raw)).unwrap();
            let mch = &work.spec.workload.manifests[0];
            assert_eq!(mch["spec"]["availabilityConfig"], "Basic");
            assert_eq!(mch["apiVersion"], MCH_API_VERSION);
            assert_eq!(mch["metadata"]["name"], "multiclusterhub");
        }

        #[test]
        fn test_json_override_keeps_its_identity() {
            let raw = r#"{"apiVersion":"operator.open-cluster-management.io/v1","kind":"MultiClusterHub","metadata":{"name":"custom","namespace":"acm"},"spec":{}}"#;
            let work = builder().management_hub_work("cluster1", Some(raw)).unwrap();
            let config = &work.spec.manifest_configs[0];
            assert_eq!(config.resource_identifier.name, "custom");
            assert_eq!(config.resource_identifier.namespace, "acm");
        }

        #[test]
        fn test_malformed_override_is_a_build_error() {
            let err = builder()
                .management_hub_work("cluster1", Some("kind: [unclosed"))
                .unwrap_err();
            assert!(matches!(err, Error::Build { ref cluster, .. } if cluster == "cluster1"));
        }

        #[test]
        fn test_override_of_another_kind_is_rejected() {
            let err = builder()
                .management_hub_work("cluster1", Some("kind: ConfigMap\n"))
                .unwrap_err();
            assert!(err.to_string().contains("ConfigMap"));
        }

        #[test]
        fn test_override_with_foreign_api_group_is_rejected() {
            let raw = "apiVersion: example.com/v1\nkind: MultiClusterHub\n";
            assert!(builder().management_hub_work("cluster1", Some(raw)).is_err());
        }

        #[test]
        fn test_non_string_override_name_is_rejected() {
            let raw = "kind: MultiClusterHub\nmetadata:\n  name: 42\n";
            let err = builder().management_hub_work("cluster1", Some(raw)).unwrap_err();
            assert!(matches!(err, Error::Build { .. }));
            assert!(err.to_string().contains("metadata.name"));
        }

        #[test]
        fn test_non_string_override_namespace_is_rejected() {
            let raw = "kind: MultiClusterHub\nmetadata:\n  name: hub\n  namespace: [a]\n";
            let err = builder().management_hub_work("cluster1", Some(raw)).unwrap_err();
            assert!(err.to_string().contains("metadata.namespace"));
        }

        #[test]
        fn test_null_override_name_falls_back_to_default() {
            let raw = "kind: MultiClusterHub\nmetadata:\n  name: null\n";
            let work = builder().management_hub_work("cluster1", Some(raw)).unwrap();
            assert_eq!(work.spec.manifest_configs[0].resource_identifier.name, "multiclusterhub");
        }

        #[test]
        fn test_scalar_override_is_rejected() {
            assert!(builder()
                .management_hub_work("cluster1", Some("just-a-string"))
                .is_err());
        }
    }
}
