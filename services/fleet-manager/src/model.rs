//! Instance request model as seen by the reconciler.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use sfm_id::{ClusterId, InstanceId, OrgId, SubscriptionId};

/// Lifecycle status of an instance request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstanceStatus {
    Accepted,
    Preparing,
    Provisioning,
    Ready,
    Suspending,
    Suspended,
    Resuming,
    Deprovision,
    Deleting,
    Failed,
}

/// Statuses reported by the status metrics.
///
/// Soft-deleted requests are not listed; they never come back from queries.
pub const METRICS_STATUSES: [InstanceStatus; 10] = [
    InstanceStatus::Accepted,
    InstanceStatus::Preparing,
    InstanceStatus::Provisioning,
    InstanceStatus::Ready,
    InstanceStatus::Deprovision,
    InstanceStatus::Deleting,
    InstanceStatus::Failed,
    InstanceStatus::Suspended,
    InstanceStatus::Suspending,
    InstanceStatus::Resuming,
];

impl InstanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accepted => "accepted",
            Self::Preparing => "preparing",
            Self::Provisioning => "provisioning",
            Self::Ready => "ready",
            Self::Suspending => "suspending",
            Self::Suspended => "suspended",
            Self::Resuming => "resuming",
            Self::Deprovision => "deprovision",
            Self::Deleting => "deleting",
            Self::Failed => "failed",
        }
    }

    /// Marked for deletion or already being deleted.
    pub fn is_deletion_bound(&self) -> bool {
        matches!(self, Self::Deprovision | Self::Deleting)
    }

    pub fn is_suspendable(&self) -> bool {
        matches!(self, Self::Ready)
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An instance status string that is not part of the lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown instance status {0:?}")]
pub struct UnknownStatus(pub String);

impl FromStr for InstanceStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        METRICS_STATUSES
            .iter()
            .copied()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}

/// A tenant's request for a streaming instance.
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceRequest {
    pub id: InstanceId,
    pub organisation_id: OrgId,
    pub owner: String,
    pub cluster_id: Option<ClusterId>,
    pub instance_type: String,
    pub size_id: String,
    pub status: InstanceStatus,
    /// Empty for requests created before billing models were recorded.
    pub actual_billing_model: String,
    pub desired_billing_model: String,
    pub subscription_id: Option<SubscriptionId>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl InstanceRequest {
    pub fn can_be_automatically_suspended(&self) -> bool {
        self.status.is_suspendable()
    }

    /// Days until `expires_at`, fractional. `None` when no expiry is set.
    pub fn remaining_lifespan_days(&self, now: DateTime<Utc>) -> Option<f64> {
        self.expires_at
            .map(|expires_at| (expires_at - now).num_seconds() as f64 / 86_400.0)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.remaining_lifespan_days(now)
            .is_some_and(|days| days <= 0.0)
    }
}

/// Number of instance requests in a status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusCount {
    pub status: InstanceStatus,
    pub count: i64,
}
