//! ManagedCluster resource definition
//!
//! A ManagedCluster is the hub's record of a spoke cluster. It is created and
//! maintained by the open-cluster-management registration controller; this
//! crate only reads it, so only the fields we consume or log are modelled.

use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::Condition;
use crate::MCH_OVERRIDE_ANNOTATION;

/// Specification for a ManagedCluster
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "cluster.open-cluster-management.io",
    version = "v1",
    kind = "ManagedCluster",
    plural = "managedclusters",
    status = "ManagedClusterStatus",
    derive = "PartialEq",
    namespaced = false
)]
#[serde(rename_all = "camelCase")]
pub struct ManagedClusterSpec {
    /// Whether the hub accepts the spoke's registration agent
    #[serde(default)]
    pub hub_accepts_client: bool,

    /// API server endpoints of the spoke
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub managed_cluster_client_configs: Vec<ClientConfig>,

    /// Lease renewal interval of the spoke agent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease_duration_seconds: Option<i32>,
}

/// Endpoint information for a spoke's API server
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
    /// API server URL
    #[serde(default)]
    pub url: String,

    /// Base64 CA bundle for the API server
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_bundle: Option<String>,
}

/// Status for a ManagedCluster
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ManagedClusterStatus {
    /// Conditions reported by the registration controller
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Version information of the spoke
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<ManagedClusterVersion>,
}

/// Version information of a spoke cluster
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct ManagedClusterVersion {
    /// Kubernetes version of the spoke
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubernetes: Option<String>,
}

impl ManagedCluster {
    /// User-defined MultiClusterHub document from the override annotation
    ///
    /// Empty and whitespace-only values are treated as absent.
    pub fn mch_override(&self) -> Option<&str> {
        self.annotations()
            .get(MCH_OVERRIDE_ANNOTATION)
            .map(|s| s.as_str())
            .filter(|s| !s.trim().is_empty())
    }

    /// Kubernetes version reported by the spoke, if known
    pub fn kubernetes_version(&self) -> Option<&str> {
        self.status
            .as_ref()
            .and_then(|s| s.version.as_ref())
            .and_then(|v| v.kubernetes.as_deref())
    }
}
