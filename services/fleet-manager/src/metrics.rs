//! Prometheus publication of instance status and cluster capacity.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use prometheus::{Encoder, GaugeVec, IntGaugeVec, Opts, Registry, TextEncoder};
use sfm_capacity::CapacityLabels;
use sfm_id::{ClusterId, InstanceId};

use crate::model::{InstanceStatus, METRICS_STATUSES};

const NAMESPACE: &str = "fleet_manager";

const CAPACITY_LABELS: &[&str] = &["cloud_provider", "region", "instance_type", "cluster_id"];

/// Metrics publication errors.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),

    #[error("metrics output is not valid UTF-8: {0}")]
    Encoding(#[from] std::string::FromUtf8Error),
}

/// One-way gauge publication used by the reconciler.
pub trait MetricsSink: Send + Sync {
    /// 1 when `status` is the instance's current status, 0 otherwise.
    fn set_instance_status_info(
        &self,
        status: InstanceStatus,
        instance_id: &InstanceId,
        cluster_id: Option<&ClusterId>,
        value: f64,
    ) -> Result<(), MetricsError>;

    /// Drops the status series of instances not in `live`. Returns how many
    /// instances were dropped.
    fn retain_instance_status_info(&self, live: &HashSet<InstanceId>) -> usize;

    fn set_instance_status_count(&self, status: InstanceStatus, count: i64)
        -> Result<(), MetricsError>;

    fn set_capacity_used(&self, labels: CapacityLabels<'_>, count: i64) -> Result<(), MetricsError>;

    fn set_capacity_available(
        &self,
        labels: CapacityLabels<'_>,
        count: i64,
    ) -> Result<(), MetricsError>;

    fn set_capacity_max(&self, labels: CapacityLabels<'_>, count: i64) -> Result<(), MetricsError>;
}

fn capacity_values<'a>(labels: &CapacityLabels<'a>) -> [&'a str; 4] {
    [
        labels.cloud_provider,
        labels.region,
        labels.instance_type,
        labels.cluster_id,
    ]
}

/// Metrics sink backed by a dedicated registry.
#[derive(Debug, Clone)]
pub struct PrometheusSink {
    registry: Registry,
    status_info: GaugeVec,
    status_count: IntGaugeVec,
    capacity_used: IntGaugeVec,
    capacity_available: IntGaugeVec,
    capacity_max: IntGaugeVec,
    /// Cluster label last published per instance.
    status_series: Arc<Mutex<HashMap<InstanceId, String>>>,
}

impl PrometheusSink {
    pub fn new() -> Result<Self, MetricsError> {
        let status_info = GaugeVec::new(
            Opts::new(
                "instance_requests_current_status_info",
                "Current status of each instance request",
            )
            .namespace(NAMESPACE),
            &["status", "instance_id", "cluster_id"],
        )?;

        let status_count = IntGaugeVec::new(
            Opts::new(
                "instance_requests_status_count",
                "Number of instance requests per status",
            )
            .namespace(NAMESPACE),
            &["status"],
        )?;

        let capacity_used = IntGaugeVec::new(
            Opts::new(
                "cluster_status_capacity_used",
                "Instances placed per cluster and instance type",
            )
            .namespace(NAMESPACE),
            CAPACITY_LABELS,
        )?;

        let capacity_available = IntGaugeVec::new(
            Opts::new(
                "cluster_status_capacity_available",
                "Instances that can still be placed per cluster and instance type",
            )
            .namespace(NAMESPACE),
            CAPACITY_LABELS,
        )?;

        let capacity_max = IntGaugeVec::new(
            Opts::new(
                "cluster_status_capacity_max",
                "Maximum instances per cluster and instance type",
            )
            .namespace(NAMESPACE),
            CAPACITY_LABELS,
        )?;

        let registry = Registry::new();
        registry.register(Box::new(status_info.clone()))?;
        registry.register(Box::new(status_count.clone()))?;
        registry.register(Box::new(capacity_used.clone()))?;
        registry.register(Box::new(capacity_available.clone()))?;
        registry.register(Box::new(capacity_max.clone()))?;

        Ok(Self {
            registry,
            status_info,
            status_count,
            capacity_used,
            capacity_available,
            capacity_max,
            status_series: Arc::default(),
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Text exposition of every registered metric.
    pub fn render(&self) -> Result<String, MetricsError> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }

    fn lock_status_series(&self) -> MutexGuard<'_, HashMap<InstanceId, String>> {
        self.status_series.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn remove_status_series(&self, instance_id: &InstanceId, cluster_id: &str) {
        for status in METRICS_STATUSES {
            // Absent when the status was never published for this instance.
            let _ = self
                .status_info
                .remove_label_values(&[status.as_str(), instance_id.as_str(), cluster_id]);
        }
    }
}

impl MetricsSink for PrometheusSink {
    fn set_instance_status_info(
        &self,
        status: InstanceStatus,
        instance_id: &InstanceId,
        cluster_id: Option<&ClusterId>,
        value: f64,
    ) -> Result<(), MetricsError> {
        let cluster_id = cluster_id.map(ClusterId::as_str).unwrap_or_default();
        if let Some(previous) = self
            .lock_status_series()
            .insert(instance_id.clone(), cluster_id.to_string())
        {
            if previous != cluster_id {
                self.remove_status_series(instance_id, &previous);
            }
        }
        self.status_info
            .get_metric_with_label_values(&[status.as_str(), instance_id.as_str(), cluster_id])?
            .set(value);
        Ok(())
    }

    fn retain_instance_status_info(&self, live: &HashSet<InstanceId>) -> usize {
        let mut series = self.lock_status_series();
        let before = series.len();
        series.retain(|instance_id, cluster_id| {
            let keep = live.contains(instance_id);
            if !keep {
                self.remove_status_series(instance_id, cluster_id);
            }
            keep
        });
        before - series.len()
    }

    fn set_instance_status_count(
        &self,
        status: InstanceStatus,
        count: i64,
    ) -> Result<(), MetricsError> {
        self.status_count
            .get_metric_with_label_values(&[status.as_str()])?
            .set(count);
        Ok(())
    }

    fn set_capacity_used(&self, labels: CapacityLabels<'_>, count: i64) -> Result<(), MetricsError> {
        self.capacity_used
            .get_metric_with_label_values(&capacity_values(&labels))?
            .set(count);
        Ok(())
    }

    fn set_capacity_available(
        &self,
        labels: CapacityLabels<'_>,
        count: i64,
    ) -> Result<(), MetricsError> {
        self.capacity_available
            .get_metric_with_label_values(&capacity_values(&labels))?
            .set(count);
        Ok(())
    }

    fn set_capacity_max(&self, labels: CapacityLabels<'_>, count: i64) -> Result<(), MetricsError> {
        self.capacity_max
            .get_metric_with_label_values(&capacity_values(&labels))?
            .set(count);
        Ok(())
    }
}
