//! Collaborator interfaces used by the reconciler.
//!
//! The reconciler never talks to storage or the quota backend directly; it
//! goes through these traits so a pass can run against Postgres in
//! production and in-memory fakes in tests.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sfm_capacity::UsageSnapshot;
use sfm_fleet::{ClusterStatus, ClusterType};
use sfm_id::{ClusterId, InstanceId, SubscriptionId};

use crate::model::{InstanceRequest, InstanceStatus, StatusCount};

/// Result type for collaborator calls.
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Errors returned by collaborators.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid record: {0}")]
    InvalidRecord(String),

    #[error("unsupported quota type {0:?}")]
    UnsupportedQuotaType(String),

    #[error("service unavailable: {0}")]
    Unavailable(String),
}

/// A single-column update applied without rewriting the whole record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceField {
    ExpiresAt(Option<DateTime<Utc>>),
}

/// Instance request storage and lifecycle operations.
#[async_trait]
pub trait InstanceService: Send + Sync {
    /// All instance requests that have not been soft deleted.
    async fn list_active(&self) -> ServiceResult<Vec<InstanceRequest>>;

    async fn count_by_status(&self, statuses: &[InstanceStatus]) -> ServiceResult<Vec<StatusCount>>;

    /// Returns false when no matching request exists.
    async fn update_status(&self, id: &InstanceId, status: InstanceStatus) -> ServiceResult<bool>;

    /// Persist status, billing models and expiry of a request.
    async fn update(&self, instance: &InstanceRequest) -> ServiceResult<()>;

    async fn update_fields(&self, id: &InstanceId, fields: &[InstanceField]) -> ServiceResult<()>;

    /// Mark every request whose expiry has passed for deprovisioning.
    async fn deprovision_expired(&self) -> ServiceResult<()>;

    /// Mark every request owned by one of `owners` for deprovisioning.
    async fn deprovision_for_owners(&self, owners: &[String]) -> ServiceResult<()>;

    /// Whether the request's organisation still holds an entitlement for its
    /// billing model.
    async fn is_entitlement_active(&self, instance: &InstanceRequest) -> ServiceResult<bool>;
}

/// A cluster as persisted by the cluster service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterRecord {
    pub cluster_id: ClusterId,
    pub cloud_provider: String,
    pub region: String,
    pub cluster_type: ClusterType,
    pub status: ClusterStatus,
}

/// Cluster storage queries.
#[async_trait]
pub trait ClusterService: Send + Sync {
    /// Provisioned instances per cluster and instance type.
    async fn usage_by_cluster_and_instance_type(&self) -> ServiceResult<Vec<UsageSnapshot>>;

    async fn list_clusters(&self) -> ServiceResult<HashMap<ClusterId, ClusterRecord>>;
}

/// Backend used to decide quota and entitlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QuotaType {
    /// Static allow list maintained by operators.
    #[default]
    QuotaManagementList,
    /// Account management service with subscriptions.
    Ams,
}

impl QuotaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::QuotaManagementList => "quota-management-list",
            Self::Ams => "ams",
        }
    }
}

impl fmt::Display for QuotaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QuotaType {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "quota-management-list" => Ok(Self::QuotaManagementList),
            "ams" => Ok(Self::Ams),
            other => Err(ServiceError::UnsupportedQuotaType(other.to_string())),
        }
    }
}

/// A billing subscription attached to an instance request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub id: SubscriptionId,
    billing_model: String,
}

impl Subscription {
    pub fn new(id: SubscriptionId, billing_model: impl Into<String>) -> Self {
        Self {
            id,
            billing_model: billing_model.into(),
        }
    }

    pub fn billing_model(&self) -> &str {
        &self.billing_model
    }
}

/// Subscription lookup, offered only by quota backends that track them.
#[async_trait]
pub trait SubscriptionLookup: Send + Sync {
    async fn subscription_by_id(&self, id: &SubscriptionId) -> ServiceResult<Option<Subscription>>;
}

/// A quota backend.
#[async_trait]
pub trait QuotaService: Send + Sync {
    async fn is_entitlement_active(&self, instance: &InstanceRequest) -> ServiceResult<bool>;

    /// Subscription lookup capability, if the backend has one.
    fn subscriptions(&self) -> Option<&dyn SubscriptionLookup> {
        None
    }
}

/// Resolves the quota backend for a quota type.
pub trait QuotaServiceFactory: Send + Sync {
    fn get_service(&self, quota_type: QuotaType) -> ServiceResult<Arc<dyn QuotaService>>;
}
