//! Lookups over the configured cluster list.

use std::collections::HashMap;

use sfm_id::ClusterId;

use crate::ManagedCluster;

/// The operator-curated list of clusters, indexed by cluster id.
///
/// Unknown clusters are treated as unconstrained by every query: they are
/// within limit, schedulable, and have no supported instance type.
#[derive(Debug, Clone, Default)]
pub struct ClusterFleet {
    clusters: Vec<ManagedCluster>,
    index: HashMap<ClusterId, usize>,
}

impl ClusterFleet {
    /// Build a fleet from descriptors. The first entry wins on duplicate ids.
    pub fn new(clusters: Vec<ManagedCluster>) -> Self {
        let mut index = HashMap::with_capacity(clusters.len());
        for (i, cluster) in clusters.iter().enumerate() {
            index.entry(cluster.cluster_id.clone()).or_insert(i);
        }
        Self { clusters, index }
    }

    pub fn find_by_id(&self, cluster_id: &str) -> Option<&ManagedCluster> {
        self.index.get(cluster_id).map(|&i| &self.clusters[i])
    }

    /// Returns true if `count` instances fit within the cluster's limit.
    pub fn is_within_limit(&self, cluster_id: &str, count: u64) -> bool {
        self.find_by_id(cluster_id)
            .map_or(true, |c| count <= u64::from(c.kafka_instance_limit))
    }

    pub fn is_schedulable(&self, cluster_id: &str) -> bool {
        self.find_by_id(cluster_id).map_or(true, |c| c.schedulable)
    }

    /// The raw supported instance type list, or `None` for an unknown cluster.
    ///
    /// An empty string is a configured cluster without an explicit list.
    pub fn supported_instance_type(&self, cluster_id: &str) -> Option<&str> {
        self.find_by_id(cluster_id)
            .map(|c| c.supported_instance_type.as_str())
    }

    pub fn find_cluster_name(&self, cluster_id: &str) -> Option<&str> {
        self.find_by_id(cluster_id).map(|c| c.name.as_str())
    }

    /// All configured clusters, in configuration order.
    pub fn manual_clusters(&self) -> &[ManagedCluster] {
        &self.clusters
    }

    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }

    /// Configured clusters that have no persisted record.
    pub fn missing_from<R>(&self, persisted: &HashMap<ClusterId, R>) -> Vec<ManagedCluster> {
        self.clusters
            .iter()
            .filter(|c| !persisted.contains_key(&c.cluster_id))
            .cloned()
            .collect()
    }

    /// Persisted cluster ids that are no longer configured, sorted.
    pub fn excess_in<R>(&self, persisted: &HashMap<ClusterId, R>) -> Vec<ClusterId> {
        let mut excess: Vec<ClusterId> = persisted
            .keys()
            .filter(|id| !self.index.contains_key(*id))
            .cloned()
            .collect();
        excess.sort();
        excess
    }
}
