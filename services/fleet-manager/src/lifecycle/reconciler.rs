//! Instance lifecycle reconciler.
//!
//! One pass, in order:
//! - publish per-instance status gauges and per-status counts
//! - publish cluster capacity (used, available, max)
//! - deprovision instances of denied owners
//! - backfill empty billing models from subscriptions
//! - set or clear expiry timestamps from quota entitlement
//! - suspend instances that entered their grace period
//! - deprovision expired instances
//!
//! Failures are collected and returned; no failure stops the pass.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sfm_capacity::{assess, CapacityError};
use sfm_fleet::SharedFleet;
use sfm_id::{InstanceId, SubscriptionId};
use tracing::{debug, info, instrument, warn};

use super::expiry::{expiry_action, EntitlementCache, ExpiryAction};
use crate::acl::AccessControlList;
use crate::catalogue::{CatalogueError, InstanceTypeCatalogue, ProviderCatalogue};
use crate::metrics::{MetricsError, MetricsSink};
use crate::model::{InstanceRequest, InstanceStatus, METRICS_STATUSES};
use crate::services::{
    ClusterService, InstanceField, InstanceService, QuotaServiceFactory, QuotaType, ServiceError,
};

/// Per-instance step of a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    BillingModelBackfill,
    Expiry,
    Suspension,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BillingModelBackfill => "billing_model_backfill",
            Self::Expiry => "expiry",
            Self::Suspension => "suspension",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a single instance could not be reconciled.
#[derive(Debug, thiserror::Error)]
pub enum InstanceFailure {
    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error(transparent)]
    Catalogue(#[from] CatalogueError),

    #[error("instance request has no subscription")]
    MissingSubscription,

    #[error("subscription {0} not found")]
    SubscriptionNotFound(SubscriptionId),

    #[error("grace period of {0} days is out of range")]
    GracePeriodOutOfRange(u32),
}

/// An error collected during a pass.
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("failed to list instance requests: {0}")]
    ListInstances(#[source] ServiceError),

    #[error("failed to count instance requests by status: {0}")]
    CountByStatus(#[source] ServiceError),

    #[error("failed to publish metrics: {0}")]
    Metrics(#[from] MetricsError),

    #[error("failed to count instances by cluster: {0}")]
    Usage(#[source] ServiceError),

    #[error(transparent)]
    Capacity(#[from] CapacityError),

    #[error("failed to deprovision instances for denied owners {owners:?}: {source}")]
    DeniedOwners {
        owners: Vec<String>,
        #[source]
        source: ServiceError,
    },

    #[error("unable to get the {quota_type} quota service: {source}")]
    QuotaService {
        quota_type: QuotaType,
        #[source]
        source: ServiceError,
    },

    #[error("{stage} failed for instance request {instance_id}: {source}")]
    Instance {
        instance_id: InstanceId,
        stage: Stage,
        #[source]
        source: InstanceFailure,
    },

    #[error("failed to deprovision expired instance requests: {0}")]
    DeprovisionExpired(#[source] ServiceError),
}

fn grace_period_end(now: DateTime<Utc>, grace_period_days: u32) -> Option<DateTime<Utc>> {
    Duration::try_days(i64::from(grace_period_days)).and_then(|grace| now.checked_add_signed(grace))
}

impl ReconcileError {
    fn instance(instance: &InstanceRequest, stage: Stage, source: impl Into<InstanceFailure>) -> Self {
        Self::Instance {
            instance_id: instance.id.clone(),
            stage,
            source: source.into(),
        }
    }
}

/// Statistics from a single pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileStats {
    pub instances: usize,
    pub billing_models_backfilled: usize,
    pub expiries_set: usize,
    pub expiries_cleared: usize,
    pub instances_suspended: usize,
    pub errors: usize,
}

/// A periodic reconciliation target.
#[async_trait]
pub trait Reconcile: Send + Sync {
    async fn reconcile(&self) -> Vec<ReconcileError>;
}

/// Services the reconciler reads from and acts on.
#[derive(Clone)]
pub struct Collaborators {
    pub instances: Arc<dyn InstanceService>,
    pub clusters: Arc<dyn ClusterService>,
    pub quota_factory: Arc<dyn QuotaServiceFactory>,
    pub metrics: Arc<dyn MetricsSink>,
}

/// Static configuration consulted during a pass.
#[derive(Clone)]
pub struct ReconcileSettings {
    pub fleet: Arc<SharedFleet>,
    pub instance_types: Arc<InstanceTypeCatalogue>,
    pub providers: Arc<ProviderCatalogue>,
    pub acl: AccessControlList,
    pub quota_type: QuotaType,
}

/// Reconciles instance requests against entitlement and lifespan policy.
pub struct InstanceReconciler {
    services: Collaborators,
    settings: ReconcileSettings,
}

impl InstanceReconciler {
    pub fn new(services: Collaborators, settings: ReconcileSettings) -> Self {
        Self { services, settings }
    }

    /// Run one pass against the given clock.
    #[instrument(skip(self))]
    pub async fn reconcile_at(&self, now: DateTime<Utc>) -> Vec<ReconcileError> {
        let mut errors = Vec::new();
        let mut stats = ReconcileStats::default();

        let (mut instances, listed) = match self.services.instances.list_active().await {
            Ok(instances) => (instances, true),
            Err(e) => {
                errors.push(ReconcileError::ListInstances(e));
                (Vec::new(), false)
            }
        };
        stats.instances = instances.len();
        debug!(instance_count = instances.len(), "Reconciling instance requests");

        self.publish_status_info(&instances, &mut errors);
        if listed {
            self.prune_status_info(&instances);
        }
        self.publish_status_counts(&mut errors).await;
        self.publish_capacity(&mut errors).await;

        if let Some(owners) = self.settings.acl.denied_owners() {
            info!(owners = ?owners, "Deprovisioning instances of denied owners");
            if let Err(source) = self.services.instances.deprovision_for_owners(owners).await {
                errors.push(ReconcileError::DeniedOwners {
                    owners: owners.to_vec(),
                    source,
                });
            }
        }

        stats.billing_models_backfilled = self.backfill_billing_models(&mut instances, &mut errors).await;

        let (set, cleared) = self.reconcile_expiry(&mut instances, now, &mut errors).await;
        stats.expiries_set = set;
        stats.expiries_cleared = cleared;

        stats.instances_suspended = self.suspend_in_grace_period(&mut instances, now, &mut errors).await;

        if let Err(e) = self.services.instances.deprovision_expired().await {
            errors.push(ReconcileError::DeprovisionExpired(e));
        }

        stats.errors = errors.len();
        info!(
            instances = stats.instances,
            billing_models_backfilled = stats.billing_models_backfilled,
            expiries_set = stats.expiries_set,
            expiries_cleared = stats.expiries_cleared,
            instances_suspended = stats.instances_suspended,
            errors = stats.errors,
            "Reconciliation pass complete"
        );

        errors
    }

    fn publish_status_info(&self, instances: &[InstanceRequest], errors: &mut Vec<ReconcileError>) {
        // Explicit zeros for every other status keep the series continuous.
        for instance in instances {
            for status in METRICS_STATUSES {
                let value = if instance.status == status { 1.0 } else { 0.0 };
                if let Err(e) = self.services.metrics.set_instance_status_info(
                    status,
                    &instance.id,
                    instance.cluster_id.as_ref(),
                    value,
                ) {
                    errors.push(e.into());
                }
            }
        }
    }

    fn prune_status_info(&self, instances: &[InstanceRequest]) {
        let live: HashSet<InstanceId> = instances.iter().map(|i| i.id.clone()).collect();
        let removed = self.services.metrics.retain_instance_status_info(&live);
        if removed > 0 {
            debug!(removed, "Removed status series of departed instances");
        }
    }

    async fn publish_status_counts(&self, errors: &mut Vec<ReconcileError>) {
        let counts = match self
            .services
            .instances
            .count_by_status(&METRICS_STATUSES)
            .await
        {
            Ok(counts) => counts,
            Err(e) => {
                errors.push(ReconcileError::CountByStatus(e));
                return;
            }
        };

        for count in counts {
            if let Err(e) = self
                .services
                .metrics
                .set_instance_status_count(count.status, count.count)
            {
                errors.push(e.into());
            }
        }
    }

    async fn publish_capacity(&self, errors: &mut Vec<ReconcileError>) {
        let rows = match self.services.clusters.usage_by_cluster_and_instance_type().await {
            Ok(rows) => rows,
            Err(e) => {
                errors.push(ReconcileError::Usage(e));
                return;
            }
        };

        let fleet = self.settings.fleet.snapshot();
        let report = assess(&fleet, &rows, self.settings.providers.as_ref());
        let metrics = &self.services.metrics;

        for row in &report.used {
            if let Err(e) = metrics.set_capacity_used(row.labels(), row.count) {
                errors.push(e.into());
            }
        }

        for result in report.results() {
            if let Err(e) = metrics.set_capacity_available(result.labels(), result.available) {
                errors.push(e.into());
            }
            if let Err(e) = metrics.set_capacity_max(result.labels(), result.max_units) {
                errors.push(e.into());
            }
        }

        for e in report.errors {
            warn!(error = %e, "Capacity calculation failed");
            errors.push(e.into());
        }
    }

    /// Fill empty billing models from the owning subscription.
    ///
    /// Skipped entirely when the quota backend cannot look up subscriptions.
    async fn backfill_billing_models(
        &self,
        instances: &mut [InstanceRequest],
        errors: &mut Vec<ReconcileError>,
    ) -> usize {
        let quota_type = self.settings.quota_type;
        let quota_service = match self.services.quota_factory.get_service(quota_type) {
            Ok(service) => service,
            Err(source) => {
                errors.push(ReconcileError::QuotaService { quota_type, source });
                return 0;
            }
        };
        let Some(subscriptions) = quota_service.subscriptions() else {
            return 0;
        };

        let mut updated = 0;
        for instance in instances
            .iter_mut()
            .filter(|i| i.actual_billing_model.is_empty())
        {
            let Some(subscription_id) = instance.subscription_id.clone() else {
                errors.push(ReconcileError::instance(
                    instance,
                    Stage::BillingModelBackfill,
                    InstanceFailure::MissingSubscription,
                ));
                continue;
            };

            let subscription = match subscriptions.subscription_by_id(&subscription_id).await {
                Ok(Some(subscription)) => subscription,
                Ok(None) => {
                    errors.push(ReconcileError::instance(
                        instance,
                        Stage::BillingModelBackfill,
                        InstanceFailure::SubscriptionNotFound(subscription_id),
                    ));
                    continue;
                }
                Err(e) => {
                    errors.push(ReconcileError::instance(instance, Stage::BillingModelBackfill, e));
                    continue;
                }
            };

            let mut candidate = instance.clone();
            candidate.actual_billing_model = subscription.billing_model().to_string();
            candidate.desired_billing_model = candidate.actual_billing_model.clone();

            if let Err(e) = self.services.instances.update(&candidate).await {
                errors.push(ReconcileError::instance(instance, Stage::BillingModelBackfill, e));
                continue;
            }

            info!(
                instance_id = %instance.id,
                billing_model = %candidate.actual_billing_model,
                "Backfilled billing model"
            );
            *instance = candidate;
            updated += 1;
        }

        updated
    }

    /// Returns the number of expiries set and cleared.
    async fn reconcile_expiry(
        &self,
        instances: &mut [InstanceRequest],
        now: DateTime<Utc>,
        errors: &mut Vec<ReconcileError>,
    ) -> (usize, usize) {
        let mut cache = EntitlementCache::new();
        let mut set = 0;
        let mut cleared = 0;

        for instance in instances.iter_mut() {
            if instance.status.is_deletion_bound() {
                debug!(
                    instance_id = %instance.id,
                    status = %instance.status,
                    "Skipping expiry for instance marked for deletion"
                );
                continue;
            }

            match self.settings.instance_types.effective_lifespan_seconds(
                &instance.instance_type,
                &instance.size_id,
                &instance.actual_billing_model,
            ) {
                Ok(None) => {}
                Ok(Some(_)) => continue,
                Err(e) => {
                    errors.push(ReconcileError::instance(instance, Stage::Expiry, e));
                    continue;
                }
            }

            let active = match cache.get(&instance.organisation_id, &instance.actual_billing_model) {
                Some(active) => active,
                None => match self.services.instances.is_entitlement_active(instance).await {
                    Ok(active) => {
                        cache.insert(
                            &instance.organisation_id,
                            &instance.actual_billing_model,
                            active,
                        );
                        active
                    }
                    Err(e) => {
                        errors.push(ReconcileError::instance(instance, Stage::Expiry, e));
                        continue;
                    }
                },
            };

            let expires_at = match expiry_action(active, instance.expires_at) {
                ExpiryAction::Keep => continue,
                ExpiryAction::Clear => None,
                ExpiryAction::SetFromGracePeriod => {
                    match self
                        .settings
                        .instance_types
                        .billing_model(&instance.instance_type, &instance.actual_billing_model)
                    {
                        Ok(bm) => match grace_period_end(now, bm.grace_period_days) {
                            Some(at) => Some(at),
                            None => {
                                errors.push(ReconcileError::instance(
                                    instance,
                                    Stage::Expiry,
                                    InstanceFailure::GracePeriodOutOfRange(bm.grace_period_days),
                                ));
                                continue;
                            }
                        },
                        Err(e) => {
                            errors.push(ReconcileError::instance(instance, Stage::Expiry, e));
                            continue;
                        }
                    }
                }
            };

            if let Err(e) = self
                .services
                .instances
                .update_fields(&instance.id, &[InstanceField::ExpiresAt(expires_at)])
                .await
            {
                errors.push(ReconcileError::instance(instance, Stage::Expiry, e));
                continue;
            }

            match expires_at {
                Some(at) => {
                    info!(instance_id = %instance.id, expires_at = %at, "Quota entitlement no longer active, expiry set");
                    set += 1;
                }
                None => {
                    info!(instance_id = %instance.id, "Quota entitlement active, expiry cleared");
                    cleared += 1;
                }
            }
            instance.expires_at = expires_at;
        }

        (set, cleared)
    }

    async fn suspend_in_grace_period(
        &self,
        instances: &mut [InstanceRequest],
        now: DateTime<Utc>,
        errors: &mut Vec<ReconcileError>,
    ) -> usize {
        let mut suspended = 0;

        for instance in instances
            .iter_mut()
            .filter(|i| i.can_be_automatically_suspended())
        {
            // Expired instances are deprovisioned instead.
            if instance.is_expired(now) {
                continue;
            }
            let Some(remaining_days) = instance.remaining_lifespan_days(now) else {
                continue;
            };

            let grace_period_days = match self
                .settings
                .instance_types
                .billing_model(&instance.instance_type, &instance.actual_billing_model)
            {
                Ok(bm) => bm.grace_period_days,
                Err(e) => {
                    errors.push(ReconcileError::instance(instance, Stage::Suspension, e));
                    continue;
                }
            };

            if remaining_days > f64::from(grace_period_days) {
                continue;
            }

            info!(
                instance_id = %instance.id,
                remaining_days,
                grace_period_days,
                "Instance entered its grace period, suspending"
            );
            match self
                .services
                .instances
                .update_status(&instance.id, InstanceStatus::Suspending)
                .await
            {
                Ok(true) => {
                    instance.status = InstanceStatus::Suspending;
                    suspended += 1;
                }
                Ok(false) => {
                    debug!(instance_id = %instance.id, "Instance request disappeared before suspension");
                }
                Err(e) => errors.push(ReconcileError::instance(instance, Stage::Suspension, e)),
            }
        }

        suspended
    }
}

#[async_trait]
impl Reconcile for InstanceReconciler {
    async fn reconcile(&self) -> Vec<ReconcileError> {
        self.reconcile_at(Utc::now()).await
    }
}
