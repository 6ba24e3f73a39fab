//! Hub cluster controller
//!
//! Staged sync of the two per-cluster ManifestWorks plus the adapters the
//! kube-rs runtime calls into.

mod cluster;

pub use cluster::{
    error_policy, reconcile, subscription_at_latest, Context, KubeWorkWriter, Reconciler,
    ReconcilerBuilder, StoreCache, SyncOutcome, WatchCache, WorkWriter, DEFAULT_REQUEUE_AFTER,
};
