//! Capacity accounting primitives.
//!
//! Turns "current usage per cluster" snapshots into "available / maximum
//! capacity" snapshots. Three algorithms share one shape: combine a local
//! ceiling with a regional ceiling, subtract usage, floor at zero.
//!
//! - **Dynamic**: per usage row on a managed cluster, local ceiling is the
//!   row's `max_units`.
//! - **Manual**: per schedulable configured cluster and supported instance
//!   type, local ceiling is the cluster's instance limit, and the remaining
//!   cluster-wide capacity caps every type.
//! - **Enterprise**: dedicated clusters, no regional ceiling and no floor.
//!
//! # Invariants
//!
//! - All functions are pure and deterministic given the same inputs
//! - Manual and dynamic availability is never negative
//! - Manual availability for any type never exceeds the cluster's
//!   remaining overall capacity

use sfm_fleet::{ClusterStatus, ClusterType, FleetConfig};
use sfm_id::ClusterId;
use thiserror::Error;

/// Regional limit lookup errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LimitLookupError {
    #[error("cloud provider {0:?} is not configured")]
    UnknownProvider(String),

    #[error("region {region:?} is not configured for cloud provider {cloud_provider:?}")]
    UnknownRegion {
        region: String,
        cloud_provider: String,
    },

    #[error("instance type {instance_type:?} is not supported in region {region:?}")]
    UnsupportedInstanceType {
        region: String,
        instance_type: String,
    },
}

/// Capacity calculation errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CapacityError {
    #[error(
        "failed to get instance limit for {region} on {cloud_provider} and instance type {instance_type}: {source}"
    )]
    RegionalLimit {
        region: String,
        cloud_provider: String,
        instance_type: String,
        #[source]
        source: LimitLookupError,
    },
}

/// Source of per region, cloud provider and instance type ceilings.
pub trait RegionalLimits {
    /// `Ok(None)` means the combination is known and unbounded.
    fn instance_limit(
        &self,
        region: &str,
        cloud_provider: &str,
        instance_type: &str,
    ) -> Result<Option<i64>, LimitLookupError>;
}

/// Resolve a regional ceiling, treating "no limit" as `i64::MAX`.
pub fn regional_limit<L: RegionalLimits + ?Sized>(
    limits: &L,
    region: &str,
    cloud_provider: &str,
    instance_type: &str,
) -> Result<i64, CapacityError> {
    limits
        .instance_limit(region, cloud_provider, instance_type)
        .map(|limit| limit.unwrap_or(i64::MAX))
        .map_err(|source| CapacityError::RegionalLimit {
            region: region.to_string(),
            cloud_provider: cloud_provider.to_string(),
            instance_type: instance_type.to_string(),
            source,
        })
}

/// Returns true for rows that belong to clusters which have been accepted
/// but not yet placed. Such rows are left out of dynamic capacity and of
/// the used-capacity report.
pub fn is_placement_pending(status: ClusterStatus) -> bool {
    status == ClusterStatus::Accepted
}

/// Metric labels identifying one capacity dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapacityLabels<'a> {
    pub cloud_provider: &'a str,
    pub region: &'a str,
    pub instance_type: &'a str,
    pub cluster_id: &'a str,
}

/// Instances provisioned on one cluster for one instance type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageSnapshot {
    pub cluster_id: ClusterId,
    pub cloud_provider: String,
    pub region: String,
    pub instance_type: String,
    /// Provisioned instances.
    pub count: i64,
    /// Dynamic ceiling; meaningful for dynamic and enterprise clusters only.
    pub max_units: i64,
    pub cluster_type: ClusterType,
    pub status: ClusterStatus,
}

impl UsageSnapshot {
    pub fn labels(&self) -> CapacityLabels<'_> {
        CapacityLabels {
            cloud_provider: &self.cloud_provider,
            region: &self.region,
            instance_type: &self.instance_type,
            cluster_id: self.cluster_id.as_str(),
        }
    }

    fn is_enterprise(&self) -> bool {
        self.cluster_type == ClusterType::Enterprise
    }
}

/// Available and effective maximum capacity for one dimension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapacityResult {
    pub cluster_id: ClusterId,
    pub cloud_provider: String,
    pub region: String,
    pub instance_type: String,
    /// How many more instances may be admitted.
    pub available: i64,
    /// Effective ceiling after combining local and regional limits.
    pub max_units: i64,
}

impl CapacityResult {
    pub fn labels(&self) -> CapacityLabels<'_> {
        CapacityLabels {
            cloud_provider: &self.cloud_provider,
            region: &self.region,
            instance_type: &self.instance_type,
            cluster_id: self.cluster_id.as_str(),
        }
    }
}

/// Capacity of a single usage row under dynamic scaling.
pub fn dynamic_capacity<L: RegionalLimits + ?Sized>(
    row: &UsageSnapshot,
    limits: &L,
) -> Result<CapacityResult, CapacityError> {
    let limit = regional_limit(limits, &row.region, &row.cloud_provider, &row.instance_type)?;

    // The cluster's own ceiling or the provider's, whichever is reached first.
    let max_available = row.max_units.min(limit);
    // A ceiling lowered below existing usage reports zero, not a negative.
    let available = max_available.saturating_sub(row.count).max(0);

    Ok(CapacityResult {
        cluster_id: row.cluster_id.clone(),
        cloud_provider: row.cloud_provider.clone(),
        region: row.region.clone(),
        instance_type: row.instance_type.clone(),
        available,
        max_units: max_available,
    })
}

/// Dynamic capacity for every placed, non-enterprise row.
pub fn dynamic_capacities<L: RegionalLimits + ?Sized>(
    rows: &[UsageSnapshot],
    limits: &L,
) -> Result<Vec<CapacityResult>, CapacityError> {
    rows.iter()
        .filter(|row| !is_placement_pending(row.status) && !row.is_enterprise())
        .map(|row| dynamic_capacity(row, limits))
        .collect()
}

/// Capacity of every schedulable configured cluster, per supported type.
pub fn manual_capacities<L: RegionalLimits + ?Sized>(
    fleet: &FleetConfig,
    rows: &[UsageSnapshot],
    limits: &L,
) -> Result<Vec<CapacityResult>, CapacityError> {
    let mut result = Vec::new();

    for cluster in fleet.clusters.manual_clusters() {
        if !cluster.schedulable {
            continue;
        }

        let cluster_limit = i64::from(cluster.kafka_instance_limit);
        let (total_used, _) = used_on_cluster(rows, &cluster.cluster_id, None);

        for instance_type in cluster.supported_instance_types() {
            let limit =
                regional_limit(limits, &cluster.region, &cluster.cloud_provider, instance_type)?;

            let max_available = cluster_limit.min(limit);
            let (_, type_used) = used_on_cluster(rows, &cluster.cluster_id, Some(instance_type));

            // Bounded by what is left for this type and what is left overall.
            let available = (max_available - type_used)
                .min(cluster_limit - total_used)
                .max(0);

            result.push(CapacityResult {
                cluster_id: cluster.cluster_id.clone(),
                cloud_provider: cluster.cloud_provider.clone(),
                region: cluster.region.clone(),
                instance_type: instance_type.to_string(),
                available,
                max_units: max_available,
            });
        }
    }

    Ok(result)
}

/// Sum of usage on a cluster: (all types, the given type).
///
/// Rows pending placement still hold a slot on the cluster and are counted.
fn used_on_cluster(
    rows: &[UsageSnapshot],
    cluster_id: &ClusterId,
    instance_type: Option<&str>,
) -> (i64, i64) {
    rows.iter()
        .filter(|row| &row.cluster_id == cluster_id)
        .fold((0, 0), |(total, typed), row| {
            let matches = instance_type.is_some_and(|t| t == row.instance_type);
            (total + row.count, if matches { typed + row.count } else { typed })
        })
}

/// Capacity of dedicated clusters.
///
/// Over-subscribed clusters report negative availability.
pub fn enterprise_capacities(rows: &[UsageSnapshot]) -> Vec<CapacityResult> {
    rows.iter()
        .filter(|row| row.is_enterprise())
        .map(|row| CapacityResult {
            cluster_id: row.cluster_id.clone(),
            cloud_provider: row.cloud_provider.clone(),
            region: row.region.clone(),
            instance_type: row.instance_type.clone(),
            available: row.max_units - row.count,
            max_units: row.max_units,
        })
        .collect()
}

/// Everything the capacity metrics need from one usage snapshot.
#[derive(Debug, Clone, Default)]
pub struct CapacityReport {
    /// Usage rows of placed clusters.
    pub used: Vec<UsageSnapshot>,
    pub dynamic: Vec<CapacityResult>,
    pub manual: Vec<CapacityResult>,
    pub enterprise: Vec<CapacityResult>,
    /// Lookup failures; each discards the results of the mode that hit it.
    pub errors: Vec<CapacityError>,
}

impl CapacityReport {
    /// Every computed capacity result across modes.
    pub fn results(&self) -> impl Iterator<Item = &CapacityResult> {
        self.dynamic
            .iter()
            .chain(self.manual.iter())
            .chain(self.enterprise.iter())
    }
}

/// Run the accountant for the active scaling mode plus enterprise clusters.
pub fn assess<L: RegionalLimits + ?Sized>(
    fleet: &FleetConfig,
    rows: &[UsageSnapshot],
    limits: &L,
) -> CapacityReport {
    let mut report = CapacityReport {
        used: rows
            .iter()
            .filter(|row| !is_placement_pending(row.status))
            .cloned()
            .collect(),
        ..Default::default()
    };

    if fleet.is_auto_scaling_enabled() {
        match dynamic_capacities(rows, limits) {
            Ok(results) => report.dynamic = results,
            Err(e) => report.errors.push(e),
        }
    }

    if fleet.is_manual_scaling_enabled() {
        match manual_capacities(fleet, rows, limits) {
            Ok(results) => report.manual = results,
            Err(e) => report.errors.push(e),
        }
    }

    report.enterprise = enterprise_capacities(rows);
    report
}
