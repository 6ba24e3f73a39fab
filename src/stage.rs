//! The two deployment stages and their naming contract
//!
//! Work objects are named `<cluster>-<suffix>` and live in the namespace named
//! after the cluster. Other components (and the event router) rely on this.

use std::fmt;

/// Suffix of the stage-one (Subscription) ManifestWork name
pub const SUBSCRIPTION_SUFFIX: &str = "hoh-hub-cluster-subscription";

/// Suffix of the stage-two (MultiClusterHub) ManifestWork name
pub const MCH_SUFFIX: &str = "hoh-hub-cluster-mch";

/// A provisioning stage
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Stage 1: install the hub operator through an OLM Subscription
    Subscription,
    /// Stage 2: create the MultiClusterHub once the operator is at latest
    ManagementHub,
}

impl Stage {
    /// Both stages, in deployment order
    pub const ALL: [Stage; 2] = [Stage::Subscription, Stage::ManagementHub];

    /// Name suffix of this stage's ManifestWork
    pub fn suffix(self) -> &'static str {
        match self {
            Self::Subscription => SUBSCRIPTION_SUFFIX,
            Self::ManagementHub => MCH_SUFFIX,
        }
    }

    /// ManifestWork name for this stage on the given cluster
    pub fn work_name(self, cluster: &str) -> String {
        format!("{}-{}", cluster, self.suffix())
    }

    /// Stage owning a work with `name` in `namespace`, if any
    pub fn for_work(namespace: &str, name: &str) -> Option<Stage> {
        let suffix = name.strip_prefix(namespace)?.strip_prefix('-')?;
        Self::ALL.into_iter().find(|stage| stage.suffix() == suffix)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Subscription => write!(f, "Subscription"),
            Self::ManagementHub => write!(f, "ManagementHub"),
        }
    }
}
