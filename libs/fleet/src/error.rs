//! Fleet configuration errors.

use thiserror::Error;

/// Errors raised while loading or querying the fleet configuration.
///
/// Every variant except [`FleetError::MissingComputeMachines`] is fatal at
/// process startup.
#[derive(Debug, Error)]
pub enum FleetError {
    /// A cluster entry has no `cluster_id`.
    #[error("cluster_id is required for cluster {name:?}")]
    MissingClusterId { name: String },

    /// A standalone cluster entry has no `cluster_dns`.
    #[error("cluster_dns is required for standalone cluster {cluster_id}")]
    MissingClusterDns { cluster_id: String },

    /// A standalone cluster entry has no `name`.
    #[error("name is required for standalone cluster {cluster_id}")]
    MissingName { cluster_id: String },

    /// The `cluster_id` value is not a valid identifier.
    #[error("invalid cluster_id {value:?}: {source}")]
    InvalidClusterId {
        value: String,
        #[source]
        source: sfm_id::IdError,
    },

    /// A closed-enumeration field holds an unrecognized value.
    #[error("unrecognized {field} value {value:?}")]
    UnrecognizedValue { field: &'static str, value: String },

    /// No compute machine configuration exists for a cloud provider.
    #[error("missing compute machine configuration for cloud provider {0:?}")]
    MissingComputeMachines(String),

    /// The configuration file could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The configuration document could not be parsed.
    #[error("failed to parse fleet configuration: {0}")]
    Parse(#[from] serde_yaml::Error),
}
