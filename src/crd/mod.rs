//! Resource definitions for the open-cluster-management APIs we consume
//!
//! Both kinds are owned by open-cluster-management; the types here mirror the
//! subset of their schema this controller reads or writes.

mod managed_cluster;
mod manifest_work;
mod types;

pub use managed_cluster::{
    ClientConfig, ManagedCluster, ManagedClusterSpec, ManagedClusterStatus, ManagedClusterVersion,
};
pub use manifest_work::{
    FeedbackRule, FeedbackValue, FieldValue, JsonPath, ManifestCondition, ManifestConfigOption,
    ManifestResourceMeta, ManifestResourceStatus, ManifestWork, ManifestWorkSpec,
    ManifestWorkStatus, ManifestsTemplate, ResourceIdentifier, StatusFeedbackResult,
};
pub use types::{Condition, ConditionStatus};
