//! Event routing for the two watched kinds
//!
//! Every change notification goes through an admission predicate and a key
//! deriver before it reaches the controller queue. Both kinds map onto the
//! same key space: the ManagedCluster name. A ManifestWork event is keyed by
//! its namespace, which is the name of the cluster that owns it.
//!
//! All functions here are pure; the queue collapses duplicate keys.

use std::collections::BTreeMap;

use kube::runtime::reflector::ObjectRef;
use kube::Resource;

use crate::crd::{ManagedCluster, ManifestWork};
use crate::stage::Stage;
use crate::{DEFAULT_LOCAL_CLUSTER_NAME, OPT_OUT_DISABLED, OPT_OUT_LABEL};

/// Name, namespace and labels of a watched object
///
/// Any field may be missing on a malformed object; predicates reject those
/// rather than fail.
pub trait Identifiable {
    /// Object name
    fn object_name(&self) -> Option<&str>;
    /// Object namespace (None for cluster-scoped objects)
    fn object_namespace(&self) -> Option<&str>;
    /// Object labels
    fn object_labels(&self) -> Option<&BTreeMap<String, String>>;
}

impl<K: Resource> Identifiable for K {
    fn object_name(&self) -> Option<&str> {
        self.meta().name.as_deref()
    }

    fn object_namespace(&self) -> Option<&str> {
        self.meta().namespace.as_deref()
    }

    fn object_labels(&self) -> Option<&BTreeMap<String, String>> {
        self.meta().labels.as_ref()
    }
}

/// Which ManagedClusters are never provisioned
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AdmissionPolicy {
    /// Name of the cluster representing the hub itself
    pub local_cluster_name: String,
}

impl Default for AdmissionPolicy {
    fn default() -> Self {
        Self {
            local_cluster_name: DEFAULT_LOCAL_CLUSTER_NAME.to_string(),
        }
    }
}

/// Admission predicate for ManagedCluster events
///
/// Rejects clusters labelled `hoh=disabled` and the hub's own local cluster.
pub fn admit_cluster(obj: &impl Identifiable, policy: &AdmissionPolicy) -> bool {
    let Some(name) = obj.object_name() else {
        return false;
    };
    let opted_out = obj
        .object_labels()
        .and_then(|labels| labels.get(OPT_OUT_LABEL))
        .is_some_and(|value| value == OPT_OUT_DISABLED);

    !opted_out && name != policy.local_cluster_name
}

/// Queue key for a ManagedCluster event: the cluster name
pub fn cluster_key(obj: &impl Identifiable) -> Option<String> {
    obj.object_name().map(str::to_string)
}

/// Admission predicate for ManifestWork events
///
/// Only works this controller owns (named after their namespace plus a stage
/// suffix) trigger reconciliation.
pub fn admit_work(obj: &impl Identifiable) -> bool {
    match (obj.object_namespace(), obj.object_name()) {
        (Some(namespace), Some(name)) => Stage::for_work(namespace, name).is_some(),
        _ => false,
    }
}

/// Queue key for a ManifestWork event: the namespace, i.e. the owning cluster
pub fn work_key(obj: &impl Identifiable) -> Option<String> {
    obj.object_namespace().map(str::to_string)
}

/// Composes the per-kind predicates and key derivers
#[derive(Clone, Debug, Default)]
pub struct EventRouter {
    policy: AdmissionPolicy,
}

impl EventRouter {
    /// Create a router applying the given admission policy
    pub fn new(policy: AdmissionPolicy) -> Self {
        Self { policy }
    }

    /// The admission policy in effect
    pub fn policy(&self) -> &AdmissionPolicy {
        &self.policy
    }

    /// Key to enqueue for a ManagedCluster change, if admitted
    pub fn route_cluster(&self, cluster: &ManagedCluster) -> Option<ObjectRef<ManagedCluster>> {
        if !admit_cluster(cluster, &self.policy) {
            return None;
        }
        cluster_key(cluster).map(|name| ObjectRef::new(&name))
    }

    /// Key to enqueue for a ManifestWork change, if admitted
    pub fn route_work(&self, work: &ManifestWork) -> Option<ObjectRef<ManagedCluster>> {
        if !admit_work(work) {
            return None;
        }
        work_key(work).map(|cluster| ObjectRef::new(&cluster))
    }
}
