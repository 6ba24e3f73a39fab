//! Kubernetes Events recorded on ManagedClusters
//!
//! `kubectl describe managedcluster <name>` shows when each stage's
//! ManifestWork was created or brought back to the desired content, and why a
//! MultiClusterHub override was refused. Recording is best-effort: a failed
//! publish is logged and the sync carries on.

use async_trait::async_trait;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Client, Resource, ResourceExt};
use tracing::warn;

#[cfg(test)]
use mockall::automock;

use crate::crd::ManagedCluster;
use crate::stage::Stage;

/// Event reason for a stage work that was just created
pub const REASON_WORK_CREATED: &str = "ManifestWorkCreated";
/// Event reason for a stage work that was rewritten to the desired content
pub const REASON_WORK_UPDATED: &str = "ManifestWorkUpdated";
/// Event reason for an override that could not be turned into a hub
pub const REASON_BUILD_FAILED: &str = "DesiredStateBuildFailed";

/// Something worth telling the cluster's owner about
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HubEvent {
    /// The stage's ManifestWork was created
    WorkCreated(Stage),
    /// The stage's ManifestWork had drifted and was updated
    WorkUpdated(Stage),
    /// The MultiClusterHub work could not be built; carries the reason
    BuildFailed(String),
}

impl HubEvent {
    /// Event type shown by kubectl
    pub fn type_(&self) -> EventType {
        match self {
            Self::WorkCreated(_) | Self::WorkUpdated(_) => EventType::Normal,
            Self::BuildFailed(_) => EventType::Warning,
        }
    }

    /// Machine-readable reason
    pub fn reason(&self) -> &'static str {
        match self {
            Self::WorkCreated(_) => REASON_WORK_CREATED,
            Self::WorkUpdated(_) => REASON_WORK_UPDATED,
            Self::BuildFailed(_) => REASON_BUILD_FAILED,
        }
    }

    /// Action the controller took
    pub fn action(&self) -> &'static str {
        match self {
            Self::WorkCreated(_) => "Create",
            Self::WorkUpdated(_) => "Update",
            Self::BuildFailed(_) => "Build",
        }
    }

    /// Human-readable note for the given cluster
    pub fn note(&self, cluster: &str) -> String {
        match self {
            Self::WorkCreated(stage) => {
                format!("created {} manifestwork {}", stage, stage.work_name(cluster))
            }
            Self::WorkUpdated(stage) => {
                format!("updated {} manifestwork {}", stage, stage.work_name(cluster))
            }
            Self::BuildFailed(reason) => format!("mch override rejected: {}", reason),
        }
    }
}

/// Records [`HubEvent`]s against a ManagedCluster
#[cfg_attr(test, automock)]
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Record `event` on `cluster`; never fails
    async fn record(&self, cluster: &ManagedCluster, event: HubEvent);
}

/// Publishes through the kube-rs event [`Recorder`]
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl KubeEventPublisher {
    /// Report as `controller_name`; the pod name (downward API `POD_NAME`)
    /// identifies the replica
    pub fn new(client: Client, controller_name: &str) -> Self {
        let reporter = Reporter {
            controller: controller_name.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn record(&self, cluster: &ManagedCluster, event: HubEvent) {
        let name = cluster.name_any();
        let published = Event {
            type_: event.type_(),
            reason: event.reason().to_string(),
            note: Some(event.note(&name)),
            action: event.action().to_string(),
            secondary: None,
        };
        if let Err(e) = self
            .recorder
            .publish(&published, &cluster.object_ref(&()))
            .await
        {
            warn!(cluster = %name, reason = event.reason(), error = %e, "failed to record event");
        }
    }
}

/// Drops every event; the reconciler default when none is configured
pub struct NoopEventPublisher;

#[async_trait]
impl EventPublisher for NoopEventPublisher {
    async fn record(&self, _cluster: &ManagedCluster, _event: HubEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_work_events_are_normal_and_name_the_work() {
        let event = HubEvent::WorkCreated(Stage::Subscription);
        assert_eq!(event.type_(), EventType::Normal);
        assert_eq!(event.reason(), REASON_WORK_CREATED);
        assert_eq!(
            event.note("cluster1"),
            "created Subscription manifestwork cluster1-hoh-hub-cluster-subscription"
        );

        let event = HubEvent::WorkUpdated(Stage::ManagementHub);
        assert_eq!(event.action(), "Update");
        assert!(event.note("cluster1").ends_with("cluster1-hoh-hub-cluster-mch"));
    }

    #[test]
    fn test_build_failure_is_a_warning_carrying_the_reason() {
        let event = HubEvent::BuildFailed("kind ConfigMap".to_string());
        assert_eq!(event.type_(), EventType::Warning);
        assert_eq!(event.reason(), REASON_BUILD_FAILED);
        assert!(event.note("cluster1").contains("kind ConfigMap"));
    }
}
