//! Hub cluster controller implementation
//!
//! Reconciles one ManagedCluster at a time (the queue key is the cluster
//! name) through two stages:
//!
//! 1. ensure the Subscription ManifestWork exists and matches the desired
//!    content; a freshly created work ends the pass
//! 2. once the Subscription reports `state=AtLatestKnown` through status
//!    feedback, ensure the MultiClusterHub ManifestWork
//!
//! Every pass rebuilds the full desired state from scratch and re-checks the
//! gate, so a pass can be repeated or interrupted at any point. A pass reads
//! the Subscription work's status once; if the same pass updates that work,
//! the effect of the update on status is only seen by the next pass.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kube::api::{Api, PostParams};
use kube::runtime::controller::Action;
use kube::runtime::reflector::{ObjectRef, Store};
use kube::{Client, ResourceExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

#[cfg(test)]
use mockall::automock;

use crate::crd::{ManagedCluster, ManifestWork};
use crate::ensure::{ComparisonCache, EnsureEngine};
use crate::events::{EventPublisher, HubEvent, NoopEventPublisher};
use crate::manifests::{DesiredStateBuilder, HubManifestBuilder};
use crate::router::{admit_cluster, AdmissionPolicy};
use crate::stage::Stage;
use crate::{
    Error, CONTROLLER_NAME, SUBSCRIPTION_KIND, SUBSCRIPTION_STATE_AT_LATEST,
    SUBSCRIPTION_STATE_FEEDBACK,
};

/// Default delay before a failed reconciliation is retried
pub const DEFAULT_REQUEUE_AFTER: Duration = Duration::from_secs(5);

/// Read-only, eventually-consistent view of both watched kinds
///
/// Lookups return `Ok(None)` for objects that don't exist; errors are
/// reserved for a cache that can't answer at all.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait WatchCache: Send + Sync {
    /// Wait until the initial list of both kinds has been loaded
    async fn wait_until_ready(&self) -> Result<(), Error>;

    /// Look up a ManagedCluster by name
    fn get_cluster(&self, name: &str) -> Result<Option<Arc<ManagedCluster>>, Error>;

    /// Look up a ManifestWork by namespace and name
    fn get_work(&self, namespace: &str, name: &str) -> Result<Option<Arc<ManifestWork>>, Error>;
}

/// Writes ManifestWorks to the hub API server
#[cfg_attr(test, automock)]
#[async_trait]
pub trait WorkWriter: Send + Sync {
    /// Create a ManifestWork in its namespace
    async fn create(&self, work: &ManifestWork) -> Result<ManifestWork, Error>;

    /// Replace a ManifestWork; `work` must carry the resourceVersion it was
    /// read at
    async fn update(&self, work: &ManifestWork) -> Result<ManifestWork, Error>;
}

/// [`WatchCache`] backed by kube-rs reflector stores
#[derive(Clone)]
pub struct StoreCache {
    clusters: Store<ManagedCluster>,
    works: Store<ManifestWork>,
}

impl StoreCache {
    /// Wrap the reader halves of the two reflectors
    pub fn new(clusters: Store<ManagedCluster>, works: Store<ManifestWork>) -> Self {
        Self { clusters, works }
    }
}

#[async_trait]
impl WatchCache for StoreCache {
    async fn wait_until_ready(&self) -> Result<(), Error> {
        self.clusters
            .wait_until_ready()
            .await
            .map_err(|e| Error::cache(format!("managed cluster store: {}", e)))?;
        self.works
            .wait_until_ready()
            .await
            .map_err(|e| Error::cache(format!("manifest work store: {}", e)))?;
        Ok(())
    }

    fn get_cluster(&self, name: &str) -> Result<Option<Arc<ManagedCluster>>, Error> {
        Ok(self.clusters.get(&ObjectRef::new(name)))
    }

    fn get_work(&self, namespace: &str, name: &str) -> Result<Option<Arc<ManifestWork>>, Error> {
        Ok(self.works.get(&ObjectRef::new(name).within(namespace)))
    }
}

/// [`WorkWriter`] using the typed ManifestWork API
pub struct KubeWorkWriter {
    client: Client,
}

impl KubeWorkWriter {
    /// Create a writer using the given client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api_for(&self, work: &ManifestWork) -> Result<Api<ManifestWork>, Error> {
        let namespace = work.namespace().ok_or_else(|| {
            Error::build(work.name_any(), "ManifestWork has no namespace")
        })?;
        Ok(Api::namespaced(self.client.clone(), &namespace))
    }

    fn params() -> PostParams {
        PostParams {
            field_manager: Some(CONTROLLER_NAME.to_string()),
            ..Default::default()
        }
    }
}

#[async_trait]
impl WorkWriter for KubeWorkWriter {
    async fn create(&self, work: &ManifestWork) -> Result<ManifestWork, Error> {
        Ok(self.api_for(work)?.create(&Self::params(), work).await?)
    }

    async fn update(&self, work: &ManifestWork) -> Result<ManifestWork, Error> {
        Ok(self
            .api_for(work)?
            .replace(&work.name_any(), &Self::params(), work)
            .await?)
    }
}

/// How far a sync pass got
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The ManagedCluster no longer exists; nothing was done
    MembershipRemoved,
    /// The ManagedCluster is opted out or is the hub itself; nothing was done
    NotAdmitted,
    /// The Subscription work was just created; the next pass continues
    SubscriptionCreated,
    /// The Subscription work exists but has not reported AtLatestKnown
    AwaitingSubscription,
    /// Both works exist and match the desired state
    ManagementHubEnsured,
}

/// Runs the staged sync algorithm for one cluster at a time
///
/// Holds no per-cluster state; concurrent passes for different clusters are
/// safe, and the queue never runs two passes for the same cluster at once.
pub struct Reconciler {
    cache: Arc<dyn WatchCache>,
    writer: Arc<dyn WorkWriter>,
    builder: Arc<dyn DesiredStateBuilder>,
    ensure: EnsureEngine,
    events: Arc<dyn EventPublisher>,
    admission: AdmissionPolicy,
    cancel: CancellationToken,
}

impl Reconciler {
    /// Create a builder with the two required collaborators
    pub fn builder(cache: Arc<dyn WatchCache>, writer: Arc<dyn WorkWriter>) -> ReconcilerBuilder {
        ReconcilerBuilder::new(cache, writer)
    }

    /// The watch cache this reconciler reads from
    pub fn cache(&self) -> &Arc<dyn WatchCache> {
        &self.cache
    }

    /// Reconcile the cluster named `cluster_name`
    #[instrument(skip(self), fields(cluster = %cluster_name))]
    pub async fn sync(&self, cluster_name: &str) -> Result<SyncOutcome, Error> {
        debug!("reconciling hub cluster");
        self.check_cancelled()?;

        let Some(cluster) = self.cache.get_cluster(cluster_name)? else {
            // TODO: delete this cluster's stage ManifestWorks once the
            // cleanup ordering for a departed spoke is settled
            debug!("managed cluster not found, nothing to do");
            return Ok(SyncOutcome::MembershipRemoved);
        };
        // Retries and work-triggered passes reach here without the watch filter
        if !admit_cluster(&*cluster, &self.admission) {
            debug!("managed cluster not admitted, nothing to do");
            return Ok(SyncOutcome::NotAdmitted);
        }
        debug!(
            kubernetes_version = cluster.kubernetes_version().unwrap_or("unknown"),
            "managed cluster admitted"
        );

        // Stage 1: Subscription
        let desired_subscription = self.builder.subscription_work(cluster_name);
        let subscription_name = Stage::Subscription.work_name(cluster_name);
        let Some(subscription) = self.cache.get_work(cluster_name, &subscription_name)? else {
            self.check_cancelled()?;
            info!(work = %subscription_name, "creating subscription manifestwork");
            self.writer.create(&desired_subscription).await?;
            self.events
                .record(&cluster, HubEvent::WorkCreated(Stage::Subscription))
                .await;
            return Ok(SyncOutcome::SubscriptionCreated);
        };
        self.apply_if_diverged(&cluster, Stage::Subscription, &subscription, &desired_subscription)
            .await?;

        // Gate on the status read above, never on what our own update produced
        if !subscription_at_latest(&subscription) {
            debug!(work = %subscription_name, "subscription not at latest known state yet");
            return Ok(SyncOutcome::AwaitingSubscription);
        }

        // Stage 2: MultiClusterHub
        self.check_cancelled()?;
        let desired_mch = match self
            .builder
            .management_hub_work(cluster_name, cluster.mch_override())
        {
            Ok(work) => work,
            Err(e) => {
                warn!(error = %e, "failed to build multiclusterhub manifestwork");
                self.events
                    .record(&cluster, HubEvent::BuildFailed(e.to_string()))
                    .await;
                return Err(e);
            }
        };

        let mch_name = Stage::ManagementHub.work_name(cluster_name);
        let mch = match self.cache.get_work(cluster_name, &mch_name)? {
            Some(existing) => existing,
            None => {
                self.check_cancelled()?;
                info!(work = %mch_name, "creating mch manifestwork");
                let created = self.writer.create(&desired_mch).await?;
                self.events
                    .record(&cluster, HubEvent::WorkCreated(Stage::ManagementHub))
                    .await;
                Arc::new(created)
            }
        };
        self.apply_if_diverged(&cluster, Stage::ManagementHub, &mch, &desired_mch)
            .await?;

        Ok(SyncOutcome::ManagementHubEnsured)
    }

    /// Update `existing` if it diverges from `desired`; returns true if written
    async fn apply_if_diverged(
        &self,
        cluster: &ManagedCluster,
        stage: Stage,
        existing: &ManifestWork,
        desired: &ManifestWork,
    ) -> Result<bool, Error> {
        let outcome = self.ensure.ensure(existing, desired)?;
        if !outcome.needs_write {
            debug!(work = %existing.name_any(), "manifestwork up to date");
            return Ok(false);
        }

        self.check_cancelled()?;
        info!(
            work = %existing.name_any(),
            resource_version = %existing.resource_version().unwrap_or_default(),
            "updating manifestwork"
        );
        self.writer.update(&outcome.merged).await?;
        self.events
            .record(cluster, HubEvent::WorkUpdated(stage))
            .await;
        Ok(true)
    }

    fn check_cancelled(&self) -> Result<(), Error> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(())
    }
}

/// True if the work's status reports the Subscription at its latest version
pub fn subscription_at_latest(work: &ManifestWork) -> bool {
    work.status.as_ref().is_some_and(|status| {
        status
            .feedback_values(SUBSCRIPTION_KIND, SUBSCRIPTION_STATE_FEEDBACK)
            .any(|v| v.string.as_deref() == Some(SUBSCRIPTION_STATE_AT_LATEST))
    })
}

/// Builder for constructing [`Reconciler`] instances
///
/// ```ignore
/// let reconciler = Reconciler::builder(cache, writer)
///     .manifest_builder(Arc::new(HubManifestBuilder::new(settings)))
///     .comparison_cache(cache)
///     .cancellation(token)
///     .build();
/// ```
pub struct ReconcilerBuilder {
    cache: Arc<dyn WatchCache>,
    writer: Arc<dyn WorkWriter>,
    builder: Option<Arc<dyn DesiredStateBuilder>>,
    comparison_cache: Option<Arc<ComparisonCache>>,
    events: Option<Arc<dyn EventPublisher>>,
    admission: Option<AdmissionPolicy>,
    cancel: Option<CancellationToken>,
}

impl ReconcilerBuilder {
    fn new(cache: Arc<dyn WatchCache>, writer: Arc<dyn WorkWriter>) -> Self {
        Self {
            cache,
            writer,
            builder: None,
            comparison_cache: None,
            events: None,
            admission: None,
            cancel: None,
        }
    }

    /// Override the desired state builder
    pub fn manifest_builder(mut self, builder: Arc<dyn DesiredStateBuilder>) -> Self {
        self.builder = Some(builder);
        self
    }

    /// Share an existing comparison cache
    pub fn comparison_cache(mut self, cache: Arc<ComparisonCache>) -> Self {
        self.comparison_cache = Some(cache);
        self
    }

    /// Record Kubernetes Events through the given publisher
    pub fn events(mut self, events: Arc<dyn EventPublisher>) -> Self {
        self.events = Some(events);
        self
    }

    /// Skip clusters the policy does not admit
    pub fn admission_policy(mut self, policy: AdmissionPolicy) -> Self {
        self.admission = Some(policy);
        self
    }

    /// Abort passes between steps once `cancel` fires
    pub fn cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Build the Reconciler
    pub fn build(self) -> Reconciler {
        Reconciler {
            cache: self.cache,
            writer: self.writer,
            builder: self
                .builder
                .unwrap_or_else(|| Arc::new(HubManifestBuilder::default())),
            ensure: EnsureEngine::new(self.comparison_cache.unwrap_or_default()),
            events: self.events.unwrap_or_else(|| Arc::new(NoopEventPublisher)),
            admission: self.admission.unwrap_or_default(),
            cancel: self.cancel.unwrap_or_default(),
        }
    }
}

/// Controller context shared across all reconciliation calls
pub struct Context {
    /// The staged sync algorithm
    pub reconciler: Reconciler,
    /// Delay before a failed reconciliation is retried
    pub requeue_after: Duration,
}

impl Context {
    /// Create a context with the default requeue delay
    pub fn new(reconciler: Reconciler) -> Self {
        Self {
            reconciler,
            requeue_after: DEFAULT_REQUEUE_AFTER,
        }
    }

    /// Set the delay before a failed reconciliation is retried
    pub fn with_requeue_after(mut self, requeue_after: Duration) -> Self {
        self.requeue_after = requeue_after;
        self
    }
}

/// Reconcile a ManagedCluster
///
/// Adapter between the kube-rs controller and [`Reconciler::sync`]. Success
/// waits for the next relevant change; there is no periodic requeue.
pub async fn reconcile(cluster: Arc<ManagedCluster>, ctx: Arc<Context>) -> Result<Action, Error> {
    ctx.reconciler.cache().wait_until_ready().await?;
    let outcome = ctx.reconciler.sync(&cluster.name_any()).await?;
    debug!(cluster = %cluster.name_any(), ?outcome, "hub cluster reconciled");
    Ok(Action::await_change())
}

/// Error policy for the hub cluster controller
///
/// Every failure is retryable: the next pass rebuilds the desired state.
pub fn error_policy(cluster: Arc<ManagedCluster>, error: &Error, ctx: Arc<Context>) -> Action {
    if error.is_cancelled() {
        debug!(cluster = %cluster.name_any(), "reconciliation cancelled");
        return Action::await_change();
    }
    warn!(
        error = %error,
        cluster = %cluster.name_any(),
        retry_in = ?ctx.requeue_after,
        "reconciliation failed"
    );
    Action::requeue(ctx.requeue_after)
}
