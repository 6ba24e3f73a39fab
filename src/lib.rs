//! Hub-of-hubs - provisions the management hub stack onto spoke clusters
//!
//! The controller runs on a hub cluster, watches `ManagedCluster` membership
//! records and drives a two-stage deployment onto each spoke through
//! `ManifestWork` objects living in the spoke's namespace on the hub:
//!
//! 1. a Subscription work that installs the hub operator through OLM
//! 2. a MultiClusterHub work, created only once the Subscription reports
//!    `state=AtLatestKnown` through status feedback
//!
//! # Modules
//!
//! - [`crd`] - ManagedCluster and ManifestWork resource types
//! - [`stage`] - The two deployment stages and their naming contract
//! - [`router`] - Admission predicates and queue-key derivation for both watches
//! - [`manifests`] - Desired ManifestWork construction
//! - [`ensure`] - Authored-field comparison with a shared comparison cache
//! - [`controller`] - The staged sync algorithm and kube-rs adapters
//! - [`runner`] - Controller wiring (reflectors, watches, shutdown)
//! - [`events`] - Kubernetes Event publishing
//! - [`config`] - Command line and environment configuration
//! - [`telemetry`] - Tracing subscriber setup
//! - [`error`] - Error types

#![deny(missing_docs)]

pub mod config;
pub mod controller;
pub mod crd;
pub mod ensure;
pub mod error;
pub mod events;
pub mod manifests;
pub mod router;
pub mod runner;
pub mod stage;
pub mod telemetry;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Wire contract constants
// =============================================================================
// These values are shared with the agents and tooling that read the works we
// create, so they must not drift.

/// Label on a ManagedCluster that opts it out of hub provisioning
pub const OPT_OUT_LABEL: &str = "hoh";

/// Value of [`OPT_OUT_LABEL`] that disables provisioning
pub const OPT_OUT_DISABLED: &str = "disabled";

/// Name of the ManagedCluster representing the hub itself
pub const DEFAULT_LOCAL_CLUSTER_NAME: &str = "local-cluster";

/// Annotation on a ManagedCluster carrying a user-defined MultiClusterHub
pub const MCH_OVERRIDE_ANNOTATION: &str = "mch";

/// Manifest kind whose status feedback gates the second stage
pub const SUBSCRIPTION_KIND: &str = "Subscription";

/// Feedback value name reported for the Subscription manifest
pub const SUBSCRIPTION_STATE_FEEDBACK: &str = "state";

/// Subscription state meaning the operator is installed at the latest version
pub const SUBSCRIPTION_STATE_AT_LATEST: &str = "AtLatestKnown";

/// Field manager / reporting component name
pub const CONTROLLER_NAME: &str = "hub-cluster-controller";
