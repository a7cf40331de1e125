//! Scaling mode and dynamic scaling configuration.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::{ClusterFleet, FleetError, ManagedCluster, ScalingMode};

/// Autoscaling bounds for a machine pool.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ComputeNodesAutoscaling {
    pub min_compute_nodes: u32,
    pub max_compute_nodes: u32,
}

/// A single machine pool definition.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ComputeMachineConfig {
    pub compute_machine_type: String,
    pub compute_node_autoscaling: Option<ComputeNodesAutoscaling>,
}

/// Machine pools used when a cloud provider's clusters are created dynamically.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ComputeMachinesConfig {
    pub cluster_wide_workload: Option<ComputeMachineConfig>,
    /// Keyed by instance type.
    pub kafka_workload_per_instance_type: HashMap<String, ComputeMachineConfig>,
}

/// Settings that only apply under [`ScalingMode::Auto`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DynamicScalingConfig {
    /// Keyed by cloud provider id (`aws`, `gcp`, ...).
    pub compute_machine_per_cloud_provider: HashMap<String, ComputeMachinesConfig>,
}

/// On-disk layout of the data plane cluster configuration file.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FleetFile {
    clusters: Vec<ManagedCluster>,
    dynamic_scaling_config: DynamicScalingConfig,
    enable_ready_data_plane_clusters_reconcile: bool,
}

/// Complete data plane fleet configuration.
#[derive(Debug, Clone, Default)]
pub struct FleetConfig {
    pub scaling_mode: ScalingMode,
    pub clusters: ClusterFleet,
    pub dynamic_scaling: DynamicScalingConfig,
    pub enable_ready_clusters_reconcile: bool,
}

impl FleetConfig {
    pub fn new(scaling_mode: ScalingMode, clusters: ClusterFleet) -> Self {
        Self {
            scaling_mode,
            clusters,
            ..Default::default()
        }
    }

    /// Parse a data plane cluster configuration document.
    ///
    /// The cluster list is only kept under manual scaling.
    pub fn from_yaml_str(scaling_mode: ScalingMode, input: &str) -> Result<Self, FleetError> {
        let file: FleetFile = serde_yaml::from_str(input)?;
        let clusters = match scaling_mode {
            ScalingMode::Manual => ClusterFleet::new(file.clusters),
            ScalingMode::Auto => ClusterFleet::default(),
        };

        Ok(Self {
            scaling_mode,
            clusters,
            dynamic_scaling: file.dynamic_scaling_config,
            enable_ready_clusters_reconcile: file.enable_ready_data_plane_clusters_reconcile,
        })
    }

    /// Read and parse a data plane cluster configuration file.
    pub fn from_file(scaling_mode: ScalingMode, path: impl AsRef<Path>) -> Result<Self, FleetError> {
        let path = path.as_ref();
        let input = std::fs::read_to_string(path).map_err(|source| FleetError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml_str(scaling_mode, &input)
    }

    pub fn is_auto_scaling_enabled(&self) -> bool {
        self.scaling_mode == ScalingMode::Auto
    }

    pub fn is_manual_scaling_enabled(&self) -> bool {
        self.scaling_mode == ScalingMode::Manual
    }

    pub fn is_ready_clusters_reconcile_enabled(&self) -> bool {
        self.enable_ready_clusters_reconcile
    }

    /// Machine pool configuration for a cloud provider.
    pub fn default_compute_machines_config(
        &self,
        cloud_provider: &str,
    ) -> Result<&ComputeMachinesConfig, FleetError> {
        self.dynamic_scaling
            .compute_machine_per_cloud_provider
            .get(cloud_provider)
            .ok_or_else(|| FleetError::MissingComputeMachines(cloud_provider.to_string()))
    }
}
