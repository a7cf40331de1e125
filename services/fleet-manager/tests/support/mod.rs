//! In-memory collaborators for driving reconciliation passes.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sfm_capacity::{CapacityLabels, UsageSnapshot};
use sfm_fleet::{ClusterFleet, FleetConfig, ScalingMode, SharedFleet};
use sfm_fleet_manager::acl::AccessControlList;
use sfm_fleet_manager::catalogue::{InstanceTypeCatalogue, ProviderCatalogue};
use sfm_fleet_manager::lifecycle::{Collaborators, InstanceReconciler, ReconcileSettings};
use sfm_fleet_manager::metrics::{MetricsError, MetricsSink};
use sfm_fleet_manager::model::{InstanceRequest, InstanceStatus, StatusCount};
use sfm_fleet_manager::services::{
    ClusterRecord, ClusterService, InstanceField, InstanceService, QuotaService,
    QuotaServiceFactory, QuotaType, ServiceError, ServiceResult, Subscription, SubscriptionLookup,
};
use sfm_id::{ClusterId, InstanceId, OrgId, SubscriptionId};

pub const INSTANCE_TYPES: &str = r#"
instance_types:
  - id: standard
    billing_models:
      - id: standard
        grace_period_days: 7
      - id: marketplace
        grace_period_days: 3
    sizes:
      - id: x1
  - id: developer
    billing_models:
      - id: standard
        lifespan_seconds: 172800
    sizes:
      - id: x1
        lifespan_seconds: 172800
"#;

pub const PROVIDERS: &str = r#"
providers:
  - name: aws
    regions:
      - name: us-east-1
        supported_instance_types:
          standard:
            limit: 3
          developer:
          premium:
"#;

pub fn instance(id: &str, org: &str, status: InstanceStatus) -> InstanceRequest {
    InstanceRequest {
        id: InstanceId::parse(id).unwrap(),
        organisation_id: OrgId::parse(org).unwrap(),
        owner: format!("{org}-owner"),
        cluster_id: Some(ClusterId::parse("test01").unwrap()),
        instance_type: "standard".to_string(),
        size_id: "x1".to_string(),
        status,
        actual_billing_model: "standard".to_string(),
        desired_billing_model: "standard".to_string(),
        subscription_id: None,
        expires_at: None,
        created_at: Utc::now(),
    }
}

/// Instance storage with per-organisation entitlements.
#[derive(Default)]
pub struct InMemoryInstances {
    records: Mutex<Vec<InstanceRequest>>,
    entitlements: Mutex<HashMap<String, bool>>,
    failing_entitlements: Mutex<HashSet<String>>,
    pub fail_list: Mutex<bool>,
    pub entitlement_calls: AtomicUsize,
    pub field_updates: AtomicUsize,
    pub deprovision_expired_calls: AtomicUsize,
    pub denied_owner_calls: Mutex<Vec<Vec<String>>>,
}

impl InMemoryInstances {
    pub fn new(records: Vec<InstanceRequest>) -> Self {
        Self {
            records: Mutex::new(records),
            ..Default::default()
        }
    }

    pub fn set_entitlement(&self, org: &str, active: bool) {
        self.entitlements
            .lock()
            .unwrap()
            .insert(org.to_string(), active);
    }

    /// Entitlement checks for this instance fail.
    pub fn fail_entitlement_for(&self, id: &str) {
        self.failing_entitlements
            .lock()
            .unwrap()
            .insert(id.to_string());
    }

    pub fn get(&self, id: &str) -> InstanceRequest {
        self.records
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.id.as_str() == id)
            .cloned()
            .unwrap()
    }

    pub fn remove(&self, id: &str) {
        self.records.lock().unwrap().retain(|r| r.id.as_str() != id);
    }

    fn with_record<T>(&self, id: &InstanceId, f: impl FnOnce(&mut InstanceRequest) -> T) -> Option<T> {
        self.records
            .lock()
            .unwrap()
            .iter_mut()
            .find(|r| &r.id == id)
            .map(f)
    }
}

#[async_trait]
impl InstanceService for InMemoryInstances {
    async fn list_active(&self) -> ServiceResult<Vec<InstanceRequest>> {
        if *self.fail_list.lock().unwrap() {
            return Err(ServiceError::Unavailable("instance store down".to_string()));
        }
        Ok(self.records.lock().unwrap().clone())
    }

    async fn count_by_status(&self, statuses: &[InstanceStatus]) -> ServiceResult<Vec<StatusCount>> {
        let records = self.records.lock().unwrap();
        Ok(statuses
            .iter()
            .map(|status| StatusCount {
                status: *status,
                count: records.iter().filter(|r| r.status == *status).count() as i64,
            })
            .collect())
    }

    async fn update_status(&self, id: &InstanceId, status: InstanceStatus) -> ServiceResult<bool> {
        Ok(self.with_record(id, |r| r.status = status).is_some())
    }

    async fn update(&self, instance: &InstanceRequest) -> ServiceResult<()> {
        self.with_record(&instance.id, |r| *r = instance.clone())
            .ok_or_else(|| ServiceError::NotFound(instance.id.to_string()))
    }

    async fn update_fields(&self, id: &InstanceId, fields: &[InstanceField]) -> ServiceResult<()> {
        self.field_updates.fetch_add(1, Ordering::SeqCst);
        for field in fields {
            match field {
                InstanceField::ExpiresAt(expires_at) => {
                    let expires_at = *expires_at;
                    self.with_record(id, |r| r.expires_at = expires_at)
                        .ok_or_else(|| ServiceError::NotFound(id.to_string()))?;
                }
            }
        }
        Ok(())
    }

    async fn deprovision_expired(&self) -> ServiceResult<()> {
        self.deprovision_expired_calls.fetch_add(1, Ordering::SeqCst);
        let now = Utc::now();
        for record in self.records.lock().unwrap().iter_mut() {
            if !record.status.is_deletion_bound() && record.is_expired(now) {
                record.status = InstanceStatus::Deprovision;
            }
        }
        Ok(())
    }

    async fn deprovision_for_owners(&self, owners: &[String]) -> ServiceResult<()> {
        self.denied_owner_calls.lock().unwrap().push(owners.to_vec());
        for record in self.records.lock().unwrap().iter_mut() {
            if owners.contains(&record.owner) && !record.status.is_deletion_bound() {
                record.status = InstanceStatus::Deprovision;
            }
        }
        Ok(())
    }

    async fn is_entitlement_active(&self, instance: &InstanceRequest) -> ServiceResult<bool> {
        self.entitlement_calls.fetch_add(1, Ordering::SeqCst);
        if self
            .failing_entitlements
            .lock()
            .unwrap()
            .contains(instance.id.as_str())
        {
            return Err(ServiceError::Unavailable("entitlement check failed".to_string()));
        }
        Ok(self
            .entitlements
            .lock()
            .unwrap()
            .get(instance.organisation_id.as_str())
            .copied()
            .unwrap_or(true))
    }
}

#[derive(Default)]
pub struct InMemoryClusters {
    pub usage: Vec<UsageSnapshot>,
    pub clusters: HashMap<ClusterId, ClusterRecord>,
}

#[async_trait]
impl ClusterService for InMemoryClusters {
    async fn usage_by_cluster_and_instance_type(&self) -> ServiceResult<Vec<UsageSnapshot>> {
        Ok(self.usage.clone())
    }

    async fn list_clusters(&self) -> ServiceResult<HashMap<ClusterId, ClusterRecord>> {
        Ok(self.clusters.clone())
    }
}

/// Quota backend without subscription lookup.
pub struct AllowAllQuota;

#[async_trait]
impl QuotaService for AllowAllQuota {
    async fn is_entitlement_active(&self, _instance: &InstanceRequest) -> ServiceResult<bool> {
        Ok(true)
    }
}

/// Quota backend that tracks subscriptions.
#[derive(Default)]
pub struct SubscriptionQuota {
    pub subscriptions: HashMap<SubscriptionId, Subscription>,
}

impl SubscriptionQuota {
    pub fn with(id: &str, billing_model: &str) -> Self {
        let id = SubscriptionId::parse(id).unwrap();
        let mut subscriptions = HashMap::new();
        subscriptions.insert(id.clone(), Subscription::new(id, billing_model));
        Self { subscriptions }
    }
}

#[async_trait]
impl QuotaService for SubscriptionQuota {
    async fn is_entitlement_active(&self, _instance: &InstanceRequest) -> ServiceResult<bool> {
        Ok(true)
    }

    fn subscriptions(&self) -> Option<&dyn SubscriptionLookup> {
        Some(self)
    }
}

#[async_trait]
impl SubscriptionLookup for SubscriptionQuota {
    async fn subscription_by_id(&self, id: &SubscriptionId) -> ServiceResult<Option<Subscription>> {
        Ok(self.subscriptions.get(id).cloned())
    }
}

pub struct StaticQuotaFactory(pub Arc<dyn QuotaService>);

impl QuotaServiceFactory for StaticQuotaFactory {
    fn get_service(&self, _quota_type: QuotaType) -> ServiceResult<Arc<dyn QuotaService>> {
        Ok(self.0.clone())
    }
}

/// Capacity gauge key: (cluster id, instance type).
pub type CapacityKey = (String, String);

fn capacity_key(labels: &CapacityLabels<'_>) -> CapacityKey {
    (labels.cluster_id.to_string(), labels.instance_type.to_string())
}

/// Metrics sink that remembers the last value per series.
#[derive(Default)]
pub struct RecordingMetrics {
    pub status_info: Mutex<HashMap<(String, InstanceStatus), f64>>,
    pub status_counts: Mutex<HashMap<InstanceStatus, i64>>,
    pub used: Mutex<HashMap<CapacityKey, i64>>,
    pub available: Mutex<HashMap<CapacityKey, i64>>,
    pub max: Mutex<HashMap<CapacityKey, i64>>,
}

impl MetricsSink for RecordingMetrics {
    fn set_instance_status_info(
        &self,
        status: InstanceStatus,
        instance_id: &InstanceId,
        _cluster_id: Option<&ClusterId>,
        value: f64,
    ) -> Result<(), MetricsError> {
        self.status_info
            .lock()
            .unwrap()
            .insert((instance_id.to_string(), status), value);
        Ok(())
    }

    fn retain_instance_status_info(&self, live: &HashSet<InstanceId>) -> usize {
        let mut info = self.status_info.lock().unwrap();
        let before: HashSet<String> = info.keys().map(|(id, _)| id.clone()).collect();
        info.retain(|(id, _), _| live.iter().any(|l| l.as_str() == id));
        let after: HashSet<&String> = info.keys().map(|(id, _)| id).collect();
        before.len() - after.len()
    }

    fn set_instance_status_count(&self, status: InstanceStatus, count: i64) -> Result<(), MetricsError> {
        self.status_counts.lock().unwrap().insert(status, count);
        Ok(())
    }

    fn set_capacity_used(&self, labels: CapacityLabels<'_>, count: i64) -> Result<(), MetricsError> {
        self.used.lock().unwrap().insert(capacity_key(&labels), count);
        Ok(())
    }

    fn set_capacity_available(&self, labels: CapacityLabels<'_>, count: i64) -> Result<(), MetricsError> {
        self.available
            .lock()
            .unwrap()
            .insert(capacity_key(&labels), count);
        Ok(())
    }

    fn set_capacity_max(&self, labels: CapacityLabels<'_>, count: i64) -> Result<(), MetricsError> {
        self.max.lock().unwrap().insert(capacity_key(&labels), count);
        Ok(())
    }
}

/// Everything a pass needs, with handles kept for assertions.
pub struct Harness {
    pub instances: Arc<InMemoryInstances>,
    pub clusters: Arc<InMemoryClusters>,
    pub quota: Arc<dyn QuotaService>,
    pub metrics: Arc<RecordingMetrics>,
    pub fleet: FleetConfig,
    pub acl: AccessControlList,
    pub instance_types: String,
}

impl Harness {
    pub fn new(records: Vec<InstanceRequest>) -> Self {
        Self {
            instances: Arc::new(InMemoryInstances::new(records)),
            clusters: Arc::new(InMemoryClusters::default()),
            quota: Arc::new(AllowAllQuota),
            metrics: Arc::new(RecordingMetrics::default()),
            fleet: FleetConfig::new(ScalingMode::Manual, ClusterFleet::default()),
            acl: AccessControlList::default(),
            instance_types: INSTANCE_TYPES.to_string(),
        }
    }

    pub fn reconciler(&self) -> InstanceReconciler {
        InstanceReconciler::new(
            Collaborators {
                instances: self.instances.clone(),
                clusters: self.clusters.clone(),
                quota_factory: Arc::new(StaticQuotaFactory(self.quota.clone())),
                metrics: self.metrics.clone(),
            },
            ReconcileSettings {
                fleet: Arc::new(SharedFleet::new(self.fleet.clone())),
                instance_types: Arc::new(InstanceTypeCatalogue::from_yaml_str(&self.instance_types).unwrap()),
                providers: Arc::new(ProviderCatalogue::from_yaml_str(PROVIDERS).unwrap()),
                acl: self.acl.clone(),
                quota_type: QuotaType::Ams,
            },
        )
    }

    pub fn now() -> DateTime<Utc> {
        Utc::now()
    }
}
