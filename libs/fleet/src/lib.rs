//! Cluster fleet model.
//!
//! The fleet is the set of data plane clusters that host tenant instances.
//! Under manual scaling it is an operator-curated list loaded once at
//! startup; this crate owns that list, its validation, and the lookups the
//! rest of the system asks of it. Everything here is pure data.
//!
//! # Invariants
//!
//! - Closed-enumeration fields are parsed at load time; unrecognized values
//!   fail the load
//! - Unknown cluster ids are unconstrained (within limit, schedulable)
//! - A loaded snapshot is never mutated; reloads swap snapshots

mod cluster;
mod config;
mod error;
mod fleet;
mod shared;
mod types;

pub use cluster::ManagedCluster;
pub use config::{
    ComputeMachineConfig, ComputeMachinesConfig, ComputeNodesAutoscaling, DynamicScalingConfig,
    FleetConfig,
};
pub use error::FleetError;
pub use fleet::ClusterFleet;
pub use shared::SharedFleet;
pub use types::{ClusterStatus, ClusterType, ProviderKind, ScalingMode, ALL_INSTANCE_TYPES};
