//! Error types for the hub cluster controller

use thiserror::Error;

/// Main error type for hub cluster operations
///
/// Not-found is deliberately absent: the watch cache reports missing objects
/// as `None`, so every variant here is a real failure that gets requeued.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Desired state could not be built (e.g. malformed override annotation)
    #[error("build error for {cluster}: {message}")]
    Build {
        /// Cluster whose desired state was being built
        cluster: String,
        /// Description of what's invalid
        message: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Watch cache is unusable (writer dropped before sync)
    #[error("watch cache error: {0}")]
    Cache(String),

    /// Reconciliation aborted because shutdown was requested
    #[error("reconciliation cancelled")]
    Cancelled,
}

impl Error {
    /// Create a build error for the given cluster
    pub fn build(cluster: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Build {
            cluster: cluster.into(),
            message: msg.into(),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Create a watch cache error with the given message
    pub fn cache(msg: impl Into<String>) -> Self {
        Self::Cache(msg.into())
    }

    /// Returns true if the error was caused by shutdown rather than a failure
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}
