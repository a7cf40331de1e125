//! Full reconciliation passes against in-memory collaborators.

mod support;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use chrono::{Duration, Utc};
use sfm_capacity::UsageSnapshot;
use sfm_fleet::{ClusterFleet, ClusterStatus, ClusterType, FleetConfig, ManagedCluster, ScalingMode};
use sfm_fleet_manager::acl::AccessControlList;
use sfm_fleet_manager::lifecycle::{ReconcileError, Stage};
use sfm_fleet_manager::model::InstanceStatus;
use sfm_id::{ClusterId, SubscriptionId};
use support::{instance, Harness, SubscriptionQuota};

fn key(cluster_id: &str, instance_type: &str) -> (String, String) {
    (cluster_id.to_string(), instance_type.to_string())
}

fn usage(
    cluster_id: &str,
    instance_type: &str,
    count: i64,
    max_units: i64,
    cluster_type: ClusterType,
    status: ClusterStatus,
) -> UsageSnapshot {
    UsageSnapshot {
        cluster_id: ClusterId::parse(cluster_id).unwrap(),
        cloud_provider: "aws".to_string(),
        region: "us-east-1".to_string(),
        instance_type: instance_type.to_string(),
        count,
        max_units,
        cluster_type,
        status,
    }
}

fn manual_cluster(cluster_id: &str, region: &str, limit: u32, types: &str) -> ManagedCluster {
    let mut cluster = ManagedCluster::new(ClusterId::parse(cluster_id).unwrap(), limit);
    cluster.cloud_provider = "aws".to_string();
    cluster.region = region.to_string();
    cluster.supported_instance_type = types.to_string();
    cluster
}

#[tokio::test]
async fn test_expiry_set_on_lost_entitlement_and_cleared_on_return() {
    let harness = Harness::new(vec![instance("i-1", "org-1", InstanceStatus::Provisioning)]);
    harness.instances.set_entitlement("org-1", false);
    let reconciler = harness.reconciler();
    let now = Utc::now();

    let errors = reconciler.reconcile_at(now).await;
    assert!(errors.is_empty(), "unexpected errors: {errors:?}");
    assert_eq!(
        harness.instances.get("i-1").expires_at,
        Some(now + Duration::days(7))
    );

    harness.instances.set_entitlement("org-1", true);
    let errors = reconciler.reconcile_at(now).await;
    assert!(errors.is_empty(), "unexpected errors: {errors:?}");
    assert_eq!(harness.instances.get("i-1").expires_at, None);
}

#[tokio::test]
async fn test_expiry_reconciliation_converges() {
    let harness = Harness::new(vec![instance("i-1", "org-1", InstanceStatus::Provisioning)]);
    harness.instances.set_entitlement("org-1", false);
    let reconciler = harness.reconciler();
    let now = Utc::now();

    reconciler.reconcile_at(now).await;
    let first = harness.instances.get("i-1").expires_at;
    reconciler.reconcile_at(now + Duration::minutes(1)).await;

    assert_eq!(harness.instances.field_updates.load(Ordering::SeqCst), 1);
    assert_eq!(harness.instances.get("i-1").expires_at, first);
}

#[tokio::test]
async fn test_entitlement_checked_once_per_org_and_billing_model() {
    let mut marketplace = instance("i-3", "org-1", InstanceStatus::Ready);
    marketplace.actual_billing_model = "marketplace".to_string();
    let harness = Harness::new(vec![
        instance("i-1", "org-1", InstanceStatus::Ready),
        instance("i-2", "org-1", InstanceStatus::Ready),
        marketplace,
    ]);

    let errors = harness.reconciler().reconcile_at(Utc::now()).await;

    assert!(errors.is_empty(), "unexpected errors: {errors:?}");
    assert_eq!(harness.instances.entitlement_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_deletion_bound_and_fixed_lifespan_instances_skip_entitlement() {
    let mut developer = instance("i-2", "org-1", InstanceStatus::Ready);
    developer.instance_type = "developer".to_string();
    let harness = Harness::new(vec![
        instance("i-1", "org-1", InstanceStatus::Deprovision),
        developer,
        instance("i-3", "org-1", InstanceStatus::Deleting),
    ]);
    harness.instances.set_entitlement("org-1", false);

    let errors = harness.reconciler().reconcile_at(Utc::now()).await;

    assert!(errors.is_empty(), "unexpected errors: {errors:?}");
    assert_eq!(harness.instances.entitlement_calls.load(Ordering::SeqCst), 0);
    assert_eq!(harness.instances.get("i-2").expires_at, None);
}

#[tokio::test]
async fn test_unrepresentable_grace_period_fails_only_that_instance() {
    let mut marketplace = instance("i-2", "org-1", InstanceStatus::Ready);
    marketplace.actual_billing_model = "marketplace".to_string();
    let mut harness = Harness::new(vec![instance("i-1", "org-1", InstanceStatus::Ready), marketplace]);
    harness.instance_types = support::INSTANCE_TYPES.replace("grace_period_days: 7", "grace_period_days: 4000000000");
    harness.instances.set_entitlement("org-1", false);
    let now = Utc::now();

    let reconciler = harness.reconciler();
    let errors = tokio::spawn(async move { reconciler.reconcile_at(now).await })
        .await
        .expect("pass must not panic");

    assert_eq!(errors.len(), 1, "unexpected errors: {errors:?}");
    assert!(matches!(
        &errors[0],
        ReconcileError::Instance { instance_id, stage: Stage::Expiry, .. } if instance_id.as_str() == "i-1"
    ));
    assert_eq!(harness.instances.get("i-1").expires_at, None);
    assert_eq!(harness.instances.get("i-2").expires_at, Some(now + Duration::days(3)));
}

#[tokio::test]
async fn test_instances_in_grace_period_are_suspended() {
    let now = Utc::now();
    let mut in_grace = instance("i-1", "org-1", InstanceStatus::Ready);
    in_grace.expires_at = Some(now + Duration::days(3));
    let mut outside_grace = instance("i-2", "org-1", InstanceStatus::Ready);
    outside_grace.expires_at = Some(now + Duration::days(10));
    let mut expired = instance("i-3", "org-1", InstanceStatus::Ready);
    expired.expires_at = Some(now - Duration::hours(1));
    let no_expiry = instance("i-4", "org-2", InstanceStatus::Ready);

    let harness = Harness::new(vec![in_grace, outside_grace, expired, no_expiry]);
    harness.instances.set_entitlement("org-1", false);

    let errors = harness.reconciler().reconcile_at(now).await;

    assert!(errors.is_empty(), "unexpected errors: {errors:?}");
    assert_eq!(harness.instances.get("i-1").status, InstanceStatus::Suspending);
    assert_eq!(harness.instances.get("i-2").status, InstanceStatus::Ready);
    assert_eq!(harness.instances.get("i-3").status, InstanceStatus::Deprovision);
    assert_eq!(harness.instances.get("i-4").status, InstanceStatus::Ready);
}

#[tokio::test]
async fn test_denied_owners_are_deprovisioned() {
    let mut harness = Harness::new(vec![
        instance("i-1", "org-bad", InstanceStatus::Ready),
        instance("i-2", "org-1", InstanceStatus::Ready),
    ]);
    harness.acl = AccessControlList::new(true, vec!["org-bad-owner".to_string()]);

    let errors = harness.reconciler().reconcile_at(Utc::now()).await;

    assert!(errors.is_empty(), "unexpected errors: {errors:?}");
    assert_eq!(harness.instances.get("i-1").status, InstanceStatus::Deprovision);
    assert_eq!(harness.instances.get("i-2").status, InstanceStatus::Ready);
}

#[tokio::test]
async fn test_disabled_deny_list_is_not_enforced() {
    let mut harness = Harness::new(vec![instance("i-1", "org-bad", InstanceStatus::Ready)]);
    harness.acl = AccessControlList::new(false, vec!["org-bad-owner".to_string()]);

    harness.reconciler().reconcile_at(Utc::now()).await;

    assert!(harness.instances.denied_owner_calls.lock().unwrap().is_empty());
    assert_eq!(harness.instances.get("i-1").status, InstanceStatus::Ready);
}

#[tokio::test]
async fn test_billing_model_backfilled_from_subscription() {
    let mut legacy = instance("i-1", "org-1", InstanceStatus::Ready);
    legacy.actual_billing_model = String::new();
    legacy.desired_billing_model = String::new();
    legacy.subscription_id = Some(SubscriptionId::parse("sub-1").unwrap());
    let mut unknown = legacy.clone();
    unknown.id = "i-2".parse().unwrap();
    unknown.subscription_id = Some(SubscriptionId::parse("sub-9").unwrap());
    let mut unsubscribed = legacy.clone();
    unsubscribed.id = "i-3".parse().unwrap();
    unsubscribed.subscription_id = None;

    let mut harness = Harness::new(vec![legacy, unknown, unsubscribed]);
    harness.quota = Arc::new(SubscriptionQuota::with("sub-1", "marketplace"));

    let errors = harness.reconciler().reconcile_at(Utc::now()).await;

    let backfilled = harness.instances.get("i-1");
    assert_eq!(backfilled.actual_billing_model, "marketplace");
    assert_eq!(backfilled.desired_billing_model, "marketplace");

    let mut failed: Vec<_> = errors
        .iter()
        .map(|e| match e {
            ReconcileError::Instance {
                instance_id, stage, ..
            } => {
                assert_eq!(*stage, Stage::BillingModelBackfill);
                instance_id.to_string()
            }
            other => panic!("unexpected error: {other}"),
        })
        .collect();
    failed.sort();
    assert_eq!(failed, vec!["i-2", "i-3"]);
}

#[tokio::test]
async fn test_backfill_skipped_without_subscription_lookup() {
    let mut legacy = instance("i-1", "org-1", InstanceStatus::Ready);
    legacy.actual_billing_model = String::new();
    legacy.subscription_id = Some(SubscriptionId::parse("sub-1").unwrap());
    let harness = Harness::new(vec![legacy]);

    let errors = harness.reconciler().reconcile_at(Utc::now()).await;

    assert!(errors.is_empty(), "unexpected errors: {errors:?}");
    assert_eq!(harness.instances.get("i-1").actual_billing_model, "");
}

#[tokio::test]
async fn test_failures_are_collected_and_pass_continues() {
    let harness = Harness::new(vec![
        instance("i-1", "org-1", InstanceStatus::Provisioning),
        instance("i-2", "org-2", InstanceStatus::Provisioning),
    ]);
    harness.instances.set_entitlement("org-1", false);
    harness.instances.set_entitlement("org-2", false);
    harness.instances.fail_entitlement_for("i-1");
    let now = Utc::now();

    let errors = harness.reconciler().reconcile_at(now).await;

    assert_eq!(errors.len(), 1);
    match &errors[0] {
        ReconcileError::Instance {
            instance_id, stage, ..
        } => {
            assert_eq!(instance_id.as_str(), "i-1");
            assert_eq!(*stage, Stage::Expiry);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(harness.instances.get("i-1").expires_at, None);
    assert_eq!(
        harness.instances.get("i-2").expires_at,
        Some(now + Duration::days(7))
    );
    assert_eq!(
        harness.instances.deprovision_expired_calls.load(Ordering::SeqCst),
        1
    );
}

#[tokio::test]
async fn test_list_failure_does_not_abort_pass() {
    let harness = Harness::new(Vec::new());
    *harness.instances.fail_list.lock().unwrap() = true;

    let errors = harness.reconciler().reconcile_at(Utc::now()).await;

    assert_eq!(errors.len(), 1);
    assert!(matches!(errors[0], ReconcileError::ListInstances(_)));
    assert_eq!(
        harness.instances.deprovision_expired_calls.load(Ordering::SeqCst),
        1
    );
}

#[tokio::test]
async fn test_status_gauges_cover_every_status() {
    let harness = Harness::new(vec![instance("i-1", "org-1", InstanceStatus::Ready)]);

    harness.reconciler().reconcile_at(Utc::now()).await;

    let info = harness.metrics.status_info.lock().unwrap();
    assert_eq!(info.len(), 10);
    assert_eq!(info[&("i-1".to_string(), InstanceStatus::Ready)], 1.0);
    assert_eq!(info[&("i-1".to_string(), InstanceStatus::Failed)], 0.0);

    let counts = harness.metrics.status_counts.lock().unwrap();
    assert_eq!(counts[&InstanceStatus::Ready], 1);
    assert_eq!(counts[&InstanceStatus::Accepted], 0);
}

#[tokio::test]
async fn test_status_gauges_dropped_for_departed_instances() {
    let harness = Harness::new(vec![
        instance("i-1", "org-1", InstanceStatus::Ready),
        instance("i-2", "org-1", InstanceStatus::Ready),
    ]);
    let reconciler = harness.reconciler();
    reconciler.reconcile_at(Utc::now()).await;
    assert_eq!(harness.metrics.status_info.lock().unwrap().len(), 20);

    harness.instances.remove("i-2");
    *harness.instances.fail_list.lock().unwrap() = true;
    reconciler.reconcile_at(Utc::now()).await;
    assert_eq!(harness.metrics.status_info.lock().unwrap().len(), 20);

    *harness.instances.fail_list.lock().unwrap() = false;
    reconciler.reconcile_at(Utc::now()).await;
    let info = harness.metrics.status_info.lock().unwrap();
    assert_eq!(info.len(), 10);
    assert!(info.keys().all(|(id, _)| id == "i-1"));
}

fn capacity_harness(fleet: FleetConfig) -> Harness {
    let mut harness = Harness::new(Vec::new());
    harness.fleet = fleet;
    harness.clusters = Arc::new(support::InMemoryClusters {
        usage: vec![
            usage("test01", "standard", 2, 0, ClusterType::Managed, ClusterStatus::Ready),
            usage("test01", "premium", 1, 0, ClusterType::Managed, ClusterStatus::Ready),
            usage("test02", "standard", 4, 0, ClusterType::Managed, ClusterStatus::Accepted),
            usage("ent01", "standard", 3, 2, ClusterType::Enterprise, ClusterStatus::Ready),
        ],
        ..Default::default()
    });
    harness
}

#[tokio::test]
async fn test_manual_capacity_published() {
    let fleet = FleetConfig::new(
        ScalingMode::Manual,
        ClusterFleet::new(vec![manual_cluster("test01", "us-east-1", 5, "standard")]),
    );
    let harness = capacity_harness(fleet);

    let errors = harness.reconciler().reconcile_at(Utc::now()).await;
    assert!(errors.is_empty(), "unexpected errors: {errors:?}");

    let used = harness.metrics.used.lock().unwrap();
    assert_eq!(used[&key("test01", "standard")], 2);
    assert_eq!(used[&key("test01", "premium")], 1);
    assert!(!used.contains_key(&key("test02", "standard")));

    let available = harness.metrics.available.lock().unwrap();
    let max = harness.metrics.max.lock().unwrap();
    assert_eq!(available[&key("test01", "standard")], 1);
    assert_eq!(max[&key("test01", "standard")], 3);
    assert_eq!(available[&key("ent01", "standard")], -1);
    assert_eq!(max[&key("ent01", "standard")], 2);
    assert!(!available.contains_key(&key("test02", "standard")));
}

#[tokio::test]
async fn test_regional_lookup_failure_keeps_enterprise_capacity() {
    let fleet = FleetConfig::new(
        ScalingMode::Manual,
        ClusterFleet::new(vec![manual_cluster("test01", "eu-west-1", 5, "standard")]),
    );
    let harness = capacity_harness(fleet);

    let errors = harness.reconciler().reconcile_at(Utc::now()).await;

    assert_eq!(errors.len(), 1);
    assert!(matches!(errors[0], ReconcileError::Capacity(_)));
    let available = harness.metrics.available.lock().unwrap();
    assert!(!available.contains_key(&key("test01", "standard")));
    assert_eq!(available[&key("ent01", "standard")], -1);
}
