//! Cluster usage queries.

use std::collections::HashMap;

use async_trait::async_trait;
use sfm_capacity::UsageSnapshot;
use sfm_id::ClusterId;
use sqlx::{postgres::PgPool, postgres::PgRow, Row};

use crate::services::{ClusterRecord, ClusterService, ServiceError, ServiceResult};

#[derive(Debug)]
struct UsageRow {
    cluster_id: String,
    cloud_provider: String,
    region: String,
    cluster_type: String,
    status: String,
    instance_type: String,
    max_units: i64,
    count: i64,
}

impl<'r> sqlx::FromRow<'r, PgRow> for UsageRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            cluster_id: row.try_get("cluster_id")?,
            cloud_provider: row.try_get("cloud_provider")?,
            region: row.try_get("region")?,
            cluster_type: row.try_get("cluster_type")?,
            status: row.try_get("status")?,
            instance_type: row.try_get("instance_type")?,
            max_units: row.try_get("max_units")?,
            count: row.try_get("count")?,
        })
    }
}

fn invalid(cluster_id: &str, what: impl std::fmt::Display) -> ServiceError {
    ServiceError::InvalidRecord(format!("cluster {cluster_id}: {what}"))
}

impl TryFrom<UsageRow> for UsageSnapshot {
    type Error = ServiceError;

    fn try_from(row: UsageRow) -> Result<Self, Self::Error> {
        Ok(Self {
            cluster_id: ClusterId::parse(&row.cluster_id)
                .map_err(|e| invalid(&row.cluster_id, e))?,
            cloud_provider: row.cloud_provider,
            region: row.region,
            instance_type: row.instance_type,
            count: row.count,
            max_units: row.max_units,
            cluster_type: row
                .cluster_type
                .parse()
                .map_err(|e| invalid(&row.cluster_id, e))?,
            status: row.status.parse().map_err(|e| invalid(&row.cluster_id, e))?,
        })
    }
}

#[derive(Debug)]
struct ClusterRow {
    cluster_id: String,
    cloud_provider: String,
    region: String,
    cluster_type: String,
    status: String,
}

impl<'r> sqlx::FromRow<'r, PgRow> for ClusterRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            cluster_id: row.try_get("cluster_id")?,
            cloud_provider: row.try_get("cloud_provider")?,
            region: row.try_get("region")?,
            cluster_type: row.try_get("cluster_type")?,
            status: row.try_get("status")?,
        })
    }
}

impl TryFrom<ClusterRow> for ClusterRecord {
    type Error = ServiceError;

    fn try_from(row: ClusterRow) -> Result<Self, Self::Error> {
        Ok(Self {
            cluster_id: ClusterId::parse(&row.cluster_id)
                .map_err(|e| invalid(&row.cluster_id, e))?,
            cloud_provider: row.cloud_provider,
            region: row.region,
            cluster_type: row
                .cluster_type
                .parse()
                .map_err(|e| invalid(&row.cluster_id, e))?,
            status: row.status.parse().map_err(|e| invalid(&row.cluster_id, e))?,
        })
    }
}

/// Clusters stored in Postgres.
#[derive(Clone)]
pub struct PgClusterService {
    pool: PgPool,
}

impl PgClusterService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ClusterService for PgClusterService {
    async fn usage_by_cluster_and_instance_type(&self) -> ServiceResult<Vec<UsageSnapshot>> {
        // Every configured (cluster, instance type) pair is reported, including
        // pairs with no instances, so availability is published for empty clusters.
        let rows = sqlx::query_as::<_, UsageRow>(
            r#"
            SELECT c.cluster_id, c.cloud_provider, c.region, c.cluster_type, c.status,
                   cap.instance_type, cap.max_units,
                   COUNT(r.id)::BIGINT AS count
            FROM clusters c
            JOIN cluster_instance_type_capacity cap ON cap.cluster_id = c.cluster_id
            LEFT JOIN instance_requests r
                   ON r.cluster_id = c.cluster_id
                  AND r.instance_type = cap.instance_type
                  AND r.deleted_at IS NULL
                  AND r.status <> 'failed'
            WHERE c.deleted_at IS NULL
            GROUP BY c.cluster_id, c.cloud_provider, c.region, c.cluster_type, c.status,
                     cap.instance_type, cap.max_units
            ORDER BY c.cluster_id, cap.instance_type
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(UsageSnapshot::try_from).collect()
    }

    async fn list_clusters(&self) -> ServiceResult<HashMap<ClusterId, ClusterRecord>> {
        let rows = sqlx::query_as::<_, ClusterRow>(
            r#"
            SELECT cluster_id, cloud_provider, region, cluster_type, status
            FROM clusters
            WHERE deleted_at IS NULL
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let record = ClusterRecord::try_from(row)?;
                Ok((record.cluster_id.clone(), record))
            })
            .collect()
    }
}
