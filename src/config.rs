//! Command line and environment configuration
//!
//! Every flag can also be set through the environment variable named next to
//! it, so the controller Deployment can be configured without touching args.

use std::time::Duration;

use clap::{Args, ValueEnum};

use crate::ensure::ComparisonCache;
use crate::manifests::HubManifestSettings;
use crate::router::AdmissionPolicy;
use crate::DEFAULT_LOCAL_CLUSTER_NAME;

/// Log output format
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// One JSON object per line
    #[default]
    Json,
    /// Human-readable lines
    Text,
}

/// Settings for the `controller` command
#[derive(Args, Clone, Debug)]
pub struct ControllerConfig {
    /// Name of the ManagedCluster that represents the hub itself
    #[arg(long, env = "HOH_LOCAL_CLUSTER_NAME", default_value = DEFAULT_LOCAL_CLUSTER_NAME)]
    pub local_cluster_name: String,

    /// Number of clusters reconciled concurrently
    #[arg(long, env = "HOH_WORKERS", default_value_t = 4)]
    pub workers: u16,

    /// Delay before a failed reconciliation is retried
    #[arg(long, env = "HOH_REQUEUE_SECS", default_value_t = 5)]
    pub requeue_secs: u64,

    /// Server-side watch timeout; must stay below the client read timeout
    #[arg(long, env = "HOH_WATCH_TIMEOUT_SECS", default_value_t = 25)]
    pub watch_timeout_secs: u32,

    /// Maximum number of memoised comparisons (0 disables the cache)
    #[arg(long, env = "HOH_COMPARISON_CACHE_CAPACITY", default_value_t = 1024)]
    pub comparison_cache_capacity: usize,

    /// Lifetime of a memoised comparison
    #[arg(long, env = "HOH_COMPARISON_CACHE_TTL_SECS", default_value_t = 600)]
    pub comparison_cache_ttl_secs: u64,

    #[command(flatten)]
    #[allow(missing_docs)]
    pub manifests: ManifestArgs,
}

impl ControllerConfig {
    /// Delay before a failed reconciliation is retried
    pub fn requeue_after(&self) -> Duration {
        Duration::from_secs(self.requeue_secs)
    }

    /// Admission policy for the ManagedCluster watch
    pub fn admission_policy(&self) -> AdmissionPolicy {
        AdmissionPolicy {
            local_cluster_name: self.local_cluster_name.clone(),
        }
    }

    /// Comparison cache sized from the flags
    pub fn comparison_cache(&self) -> ComparisonCache {
        ComparisonCache::new(
            self.comparison_cache_capacity,
            Duration::from_secs(self.comparison_cache_ttl_secs),
        )
    }
}

/// Settings shaping the ManifestWorks built for each spoke
#[derive(Args, Clone, Debug)]
pub struct ManifestArgs {
    /// Namespace the hub operator is installed into on the spoke
    #[arg(long, env = "HOH_OPERATOR_NAMESPACE", default_value = "open-cluster-management")]
    pub operator_namespace: String,

    /// OLM channel of the hub operator Subscription
    #[arg(long, env = "HOH_SUBSCRIPTION_CHANNEL", default_value = "release-2.4")]
    pub subscription_channel: String,

    /// CatalogSource providing the hub operator
    #[arg(long, env = "HOH_SUBSCRIPTION_SOURCE", default_value = "redhat-operators")]
    pub subscription_source: String,

    /// Namespace of the CatalogSource
    #[arg(
        long,
        env = "HOH_SUBSCRIPTION_SOURCE_NAMESPACE",
        default_value = "openshift-marketplace"
    )]
    pub subscription_source_namespace: String,

    /// OLM package name of the hub operator
    #[arg(
        long,
        env = "HOH_SUBSCRIPTION_PACKAGE",
        default_value = "advanced-cluster-management"
    )]
    pub subscription_package: String,

    /// Pin the Subscription to a specific CSV
    #[arg(long, env = "HOH_SUBSCRIPTION_STARTING_CSV")]
    pub subscription_starting_csv: Option<String>,

    /// Name of the MultiClusterHub created when no override is given
    #[arg(long, env = "HOH_HUB_NAME", default_value = "multiclusterhub")]
    pub hub_name: String,
}

impl From<ManifestArgs> for HubManifestSettings {
    fn from(args: ManifestArgs) -> Self {
        Self {
            operator_namespace: args.operator_namespace,
            channel: args.subscription_channel,
            source: args.subscription_source,
            source_namespace: args.subscription_source_namespace,
            package: args.subscription_package,
            starting_csv: args.subscription_starting_csv,
            hub_name: args.hub_name,
        }
    }
}
