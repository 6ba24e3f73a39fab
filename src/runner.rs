//! Controller runner - wires watches, stores and the queue together
//!
//! Both kinds are watched cluster-wide through reflectors so the reconciler
//! reads from local stores. ManagedCluster events pass the admission filter
//! before reaching the queue; ManifestWork events are mapped onto the owning
//! cluster's key.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::{future, StreamExt, TryStreamExt};
use kube::runtime::controller::Config as QueueConfig;
use kube::runtime::reflector::{ObjectRef, Store};
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::{reflector, watcher, Controller, WatchStreamExt};
use kube::{Api, Client};
use tokio_util::sync::CancellationToken;

use crate::config;
use crate::controller::{error_policy, reconcile, Context, KubeWorkWriter, Reconciler, StoreCache};
use crate::crd::{ManagedCluster, ManifestWork};
use crate::events::KubeEventPublisher;
use crate::manifests::HubManifestBuilder;
use crate::router::EventRouter;
use crate::CONTROLLER_NAME;

/// Build the hub cluster controller future
///
/// The future completes once `shutdown` fires and in-flight reconciliations
/// have finished.
pub fn build_hub_cluster_controller(
    client: Client,
    config: config::ControllerConfig,
    shutdown: CancellationToken,
) -> Pin<Box<dyn Future<Output = ()> + Send>> {
    let watcher_config = WatcherConfig::default().timeout(config.watch_timeout_secs);
    let router = EventRouter::new(config.admission_policy());

    let (cluster_reader, cluster_writer) = reflector::store::<ManagedCluster>();
    let (work_reader, work_writer) = reflector::store::<ManifestWork>();

    let cluster_router = router.clone();
    let clusters = reflector(
        cluster_writer,
        watcher(Api::<ManagedCluster>::all(client.clone()), watcher_config.clone()),
    )
    .default_backoff()
    .touched_objects()
    .try_filter(move |cluster| future::ready(cluster_router.route_cluster(cluster).is_some()));

    let works = reflector(
        work_writer,
        watcher(Api::<ManifestWork>::all(client.clone()), watcher_config),
    )
    .default_backoff()
    .touched_objects();

    let reconciler = Reconciler::builder(
        Arc::new(StoreCache::new(cluster_reader.clone(), work_reader)),
        Arc::new(KubeWorkWriter::new(client.clone())),
    )
    .manifest_builder(Arc::new(HubManifestBuilder::new(config.manifests.clone().into())))
    .comparison_cache(Arc::new(config.comparison_cache()))
    .events(Arc::new(KubeEventPublisher::new(client, CONTROLLER_NAME)))
    .admission_policy(router.policy().clone())
    .cancellation(shutdown.clone())
    .build();
    let ctx = Arc::new(Context::new(reconciler).with_requeue_after(config.requeue_after()));

    tracing::info!(
        workers = config.workers,
        local_cluster = %config.local_cluster_name,
        "- ManagedCluster controller"
    );

    let work_clusters = cluster_reader.clone();
    Box::pin(
        Controller::for_stream(clusters, cluster_reader)
            .watches_stream(works, move |work| {
                route_work_event(&router, &work_clusters, &work)
            })
            .with_config(QueueConfig::default().concurrency(config.workers))
            .graceful_shutdown_on(shutdown.cancelled_owned())
            .run(reconcile, error_policy, ctx)
            .for_each(log_reconcile_result("ManagedCluster")),
    )
}

/// Map a ManifestWork event onto the owning cluster's key
///
/// Works of a cluster that is known but not admitted are dropped, so an
/// opted-out cluster is never reconciled through its works.
fn route_work_event(
    router: &EventRouter,
    clusters: &Store<ManagedCluster>,
    work: &ManifestWork,
) -> Option<ObjectRef<ManagedCluster>> {
    let key = router.route_work(work)?;
    match clusters.get(&key) {
        Some(cluster) if router.route_cluster(&cluster).is_none() => None,
        _ => Some(key),
    }
}

fn log_reconcile_result<T: std::fmt::Debug, E: std::fmt::Debug>(
    controller_name: &'static str,
) -> impl Fn(Result<T, E>) -> std::future::Ready<()> {
    move |result| {
        match result {
            Ok(action) => tracing::debug!(?action, "{} reconciliation completed", controller_name),
            Err(e) => tracing::warn!(error = ?e, "{} reconciliation error", controller_name),
        }
        std::future::ready(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifests::DesiredStateBuilder;
    use crate::router::AdmissionPolicy;
    use crate::{OPT_OUT_DISABLED, OPT_OUT_LABEL};
    use kube::api::ObjectMeta;
    use std::collections::BTreeMap;

    fn cluster(name: &str, labels: &[(&str, &str)]) -> ManagedCluster {
        let labels: BTreeMap<String, String> = labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ManagedCluster {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(labels),
                ..Default::default()
            },
            spec: Default::default(),
            status: None,
        }
    }

    fn store_with(clusters: Vec<ManagedCluster>) -> Store<ManagedCluster> {
        let (reader, mut writer) = reflector::store();
        for c in clusters {
            writer.apply_watcher_event(&watcher::Event::Apply(c));
        }
        reader
    }

    fn subscription_work(cluster: &str) -> ManifestWork {
        HubManifestBuilder::default().subscription_work(cluster)
    }

    #[test]
    fn test_work_of_admitted_cluster_is_routed() {
        let store = store_with(vec![cluster("cluster1", &[])]);
        let router = EventRouter::new(AdmissionPolicy::default());

        let key = route_work_event(&router, &store, &subscription_work("cluster1"));
        assert_eq!(key, Some(ObjectRef::new("cluster1")));
    }

    #[test]
    fn test_work_of_opted_out_cluster_is_dropped() {
        let store = store_with(vec![cluster("cluster1", &[(OPT_OUT_LABEL, OPT_OUT_DISABLED)])]);
        let router = EventRouter::new(AdmissionPolicy::default());

        assert_eq!(
            route_work_event(&router, &store, &subscription_work("cluster1")),
            None
        );
    }

    #[test]
    fn test_work_of_unknown_cluster_is_still_routed() {
        let router = EventRouter::new(AdmissionPolicy::default());
        let key = route_work_event(&router, &store_with(vec![]), &subscription_work("cluster2"));
        assert_eq!(key, Some(ObjectRef::new("cluster2")));
    }

    #[test]
    fn test_foreign_work_is_dropped() {
        let store = store_with(vec![cluster("cluster1", &[])]);
        let router = EventRouter::new(AdmissionPolicy::default());
        let mut work = subscription_work("cluster1");
        work.metadata.name = Some("someone-elses-work".to_string());

        assert_eq!(route_work_event(&router, &store, &work), None);
    }
}
