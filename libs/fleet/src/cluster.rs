//! Manually curated cluster descriptors.

use serde::Deserialize;
use sfm_id::ClusterId;

use crate::{ClusterStatus, FleetError, ProviderKind, ALL_INSTANCE_TYPES};

/// A cluster entry from the operator-curated fleet list.
///
/// Instances are only built through deserialization or [`ManagedCluster::new`];
/// both paths apply the same defaults and validation.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawManagedCluster")]
pub struct ManagedCluster {
    pub name: String,
    pub cluster_id: ClusterId,
    pub cloud_provider: String,
    pub region: String,
    pub multi_az: bool,
    pub schedulable: bool,
    /// Maximum number of instances the cluster may host.
    pub kafka_instance_limit: u32,
    /// Comma separated instance types. Loading fills in every type when empty.
    pub supported_instance_type: String,
    pub status: ClusterStatus,
    pub provider_type: ProviderKind,
    /// DNS name, required for standalone clusters.
    pub cluster_dns: String,
    pub desired_state: Option<ClusterStatus>,
}

impl ManagedCluster {
    /// Create a schedulable descriptor with defaults for everything else.
    pub fn new(cluster_id: ClusterId, kafka_instance_limit: u32) -> Self {
        Self {
            name: String::new(),
            cluster_id,
            cloud_provider: String::new(),
            region: String::new(),
            multi_az: false,
            schedulable: true,
            kafka_instance_limit,
            supported_instance_type: ALL_INSTANCE_TYPES.to_string(),
            status: ClusterStatus::default(),
            provider_type: ProviderKind::default(),
            cluster_dns: String::new(),
            desired_state: None,
        }
    }

    /// Iterate over the instance types this cluster accepts.
    pub fn supported_instance_types(&self) -> impl Iterator<Item = &str> {
        self.supported_instance_type
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }

    /// Returns true if the cluster accepts the given instance type.
    pub fn supports(&self, instance_type: &str) -> bool {
        self.supported_instance_types().any(|t| t == instance_type)
    }
}

/// On-disk form of a cluster entry, before defaults and validation.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawManagedCluster {
    name: String,
    cluster_id: String,
    cloud_provider: String,
    region: String,
    multi_az: bool,
    schedulable: bool,
    kafka_instance_limit: u32,
    supported_instance_type: String,
    status: Option<String>,
    provider_type: Option<String>,
    cluster_dns: String,
    desired_state: Option<String>,
}

impl TryFrom<RawManagedCluster> for ManagedCluster {
    type Error = FleetError;

    fn try_from(raw: RawManagedCluster) -> Result<Self, Self::Error> {
        let status = match raw.status.as_deref() {
            None | Some("") => ClusterStatus::default(),
            Some(s) => s.parse()?,
        };
        let provider_type = match raw.provider_type.as_deref() {
            None | Some("") => ProviderKind::default(),
            Some(s) => s.parse()?,
        };
        let desired_state = match raw.desired_state.as_deref() {
            None | Some("") => None,
            Some(s) => Some(s.parse()?),
        };

        if raw.cluster_id.is_empty() {
            return Err(FleetError::MissingClusterId { name: raw.name });
        }
        let cluster_id =
            ClusterId::parse(&raw.cluster_id).map_err(|source| FleetError::InvalidClusterId {
                value: raw.cluster_id.clone(),
                source,
            })?;

        if provider_type == ProviderKind::Standalone {
            if raw.cluster_dns.is_empty() {
                return Err(FleetError::MissingClusterDns {
                    cluster_id: raw.cluster_id,
                });
            }
            if raw.name.is_empty() {
                return Err(FleetError::MissingName {
                    cluster_id: raw.cluster_id,
                });
            }
        }

        let supported_instance_type = if raw.supported_instance_type.trim().is_empty() {
            ALL_INSTANCE_TYPES.to_string()
        } else {
            raw.supported_instance_type
        };

        Ok(Self {
            name: raw.name,
            cluster_id,
            cloud_provider: raw.cloud_provider,
            region: raw.region,
            multi_az: raw.multi_az,
            schedulable: raw.schedulable,
            kafka_instance_limit: raw.kafka_instance_limit,
            supported_instance_type,
            status,
            provider_type,
            cluster_dns: raw.cluster_dns,
            desired_state,
        })
    }
}
