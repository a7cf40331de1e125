//! Instance request storage.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sfm_id::{ClusterId, InstanceId, OrgId, SubscriptionId};
use sqlx::{postgres::PgPool, postgres::PgRow, Row};
use tracing::{debug, info, warn};

use crate::model::{InstanceRequest, InstanceStatus, StatusCount};
use crate::services::{
    InstanceField, InstanceService, QuotaServiceFactory, QuotaType, ServiceError, ServiceResult,
};

const SELECT_COLUMNS: &str = r#"
    SELECT id, organisation_id, owner, cluster_id, instance_type, size_id, status,
           actual_billing_model, desired_billing_model, subscription_id,
           expires_at, created_at
    FROM instance_requests
"#;

/// Raw `instance_requests` row before id and status validation.
#[derive(Debug)]
struct InstanceRow {
    id: String,
    organisation_id: String,
    owner: String,
    cluster_id: Option<String>,
    instance_type: String,
    size_id: String,
    status: String,
    actual_billing_model: String,
    desired_billing_model: String,
    subscription_id: Option<String>,
    expires_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, PgRow> for InstanceRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            organisation_id: row.try_get("organisation_id")?,
            owner: row.try_get("owner")?,
            cluster_id: row.try_get("cluster_id")?,
            instance_type: row.try_get("instance_type")?,
            size_id: row.try_get("size_id")?,
            status: row.try_get("status")?,
            actual_billing_model: row.try_get("actual_billing_model")?,
            desired_billing_model: row.try_get("desired_billing_model")?,
            subscription_id: row.try_get("subscription_id")?,
            expires_at: row.try_get("expires_at")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

fn invalid(id: &str, what: impl std::fmt::Display) -> ServiceError {
    ServiceError::InvalidRecord(format!("instance request {id}: {what}"))
}

impl TryFrom<InstanceRow> for InstanceRequest {
    type Error = ServiceError;

    fn try_from(row: InstanceRow) -> Result<Self, Self::Error> {
        let id = InstanceId::parse(&row.id).map_err(|e| invalid(&row.id, e))?;
        let organisation_id =
            OrgId::parse(&row.organisation_id).map_err(|e| invalid(&row.id, e))?;
        // An empty cluster id means the request has not been placed yet.
        let cluster_id = row
            .cluster_id
            .filter(|c| !c.is_empty())
            .map(|c| ClusterId::parse(&c))
            .transpose()
            .map_err(|e| invalid(&row.id, e))?;
        let subscription_id = row
            .subscription_id
            .filter(|s| !s.is_empty())
            .map(|s| SubscriptionId::parse(&s))
            .transpose()
            .map_err(|e| invalid(&row.id, e))?;
        let status = row.status.parse().map_err(|e| invalid(&row.id, e))?;

        Ok(Self {
            id,
            organisation_id,
            owner: row.owner,
            cluster_id,
            instance_type: row.instance_type,
            size_id: row.size_id,
            status,
            actual_billing_model: row.actual_billing_model,
            desired_billing_model: row.desired_billing_model,
            subscription_id,
            expires_at: row.expires_at,
            created_at: row.created_at,
        })
    }
}

/// Converts rows, skipping the ones that fail validation.
fn valid_requests(rows: Vec<InstanceRow>) -> Vec<InstanceRequest> {
    rows.into_iter()
        .filter_map(|row| {
            let id = row.id.clone();
            match InstanceRequest::try_from(row) {
                Ok(request) => Some(request),
                Err(e) => {
                    warn!(instance_id = %id, error = %e, "Skipping invalid instance request");
                    None
                }
            }
        })
        .collect()
}

fn deletion_bound_statuses() -> Vec<&'static str> {
    vec![
        InstanceStatus::Deprovision.as_str(),
        InstanceStatus::Deleting.as_str(),
    ]
}

/// Instance requests stored in Postgres.
#[derive(Clone)]
pub struct PgInstanceService {
    pool: PgPool,
    quota_factory: Arc<dyn QuotaServiceFactory>,
    quota_type: QuotaType,
}

impl PgInstanceService {
    pub fn new(
        pool: PgPool,
        quota_factory: Arc<dyn QuotaServiceFactory>,
        quota_type: QuotaType,
    ) -> Self {
        Self {
            pool,
            quota_factory,
            quota_type,
        }
    }
}

#[async_trait]
impl InstanceService for PgInstanceService {
    async fn list_active(&self) -> ServiceResult<Vec<InstanceRequest>> {
        let query = format!("{SELECT_COLUMNS} WHERE deleted_at IS NULL ORDER BY created_at");
        let rows = sqlx::query_as::<_, InstanceRow>(&query)
            .fetch_all(&self.pool)
            .await?;

        Ok(valid_requests(rows))
    }

    async fn count_by_status(&self, statuses: &[InstanceStatus]) -> ServiceResult<Vec<StatusCount>> {
        let names: Vec<&str> = statuses.iter().map(InstanceStatus::as_str).collect();
        let rows: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT status, COUNT(*)::BIGINT
            FROM instance_requests
            WHERE deleted_at IS NULL AND status = ANY($1)
            GROUP BY status
            "#,
        )
        .bind(&names)
        .fetch_all(&self.pool)
        .await?;

        let mut counts = Vec::with_capacity(statuses.len());
        for status in statuses {
            let count = rows
                .iter()
                .find(|(name, _)| name == status.as_str())
                .map(|(_, count)| *count)
                .unwrap_or(0);
            counts.push(StatusCount {
                status: *status,
                count,
            });
        }
        Ok(counts)
    }

    async fn update_status(&self, id: &InstanceId, status: InstanceStatus) -> ServiceResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE instance_requests
            SET status = $2, updated_at = now()
            WHERE id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(id.as_str())
        .bind(status.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn update(&self, instance: &InstanceRequest) -> ServiceResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE instance_requests
            SET status = $2,
                actual_billing_model = $3,
                desired_billing_model = $4,
                expires_at = $5,
                updated_at = now()
            WHERE id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(instance.id.as_str())
        .bind(instance.status.as_str())
        .bind(&instance.actual_billing_model)
        .bind(&instance.desired_billing_model)
        .bind(instance.expires_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(ServiceError::NotFound(format!(
                "instance request {}",
                instance.id
            )));
        }
        Ok(())
    }

    async fn update_fields(&self, id: &InstanceId, fields: &[InstanceField]) -> ServiceResult<()> {
        for field in fields {
            match field {
                InstanceField::ExpiresAt(expires_at) => {
                    sqlx::query(
                        r#"
                        UPDATE instance_requests
                        SET expires_at = $2, updated_at = now()
                        WHERE id = $1 AND deleted_at IS NULL
                        "#,
                    )
                    .bind(id.as_str())
                    .bind(*expires_at)
                    .execute(&self.pool)
                    .await?;
                }
            }
        }
        Ok(())
    }

    async fn deprovision_expired(&self) -> ServiceResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE instance_requests
            SET status = $1, updated_at = now()
            WHERE deleted_at IS NULL
              AND expires_at IS NOT NULL
              AND expires_at <= now()
              AND status <> ALL($2)
            "#,
        )
        .bind(InstanceStatus::Deprovision.as_str())
        .bind(deletion_bound_statuses())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            info!(count = result.rows_affected(), "Deprovisioning expired instances");
        }
        Ok(())
    }

    async fn deprovision_for_owners(&self, owners: &[String]) -> ServiceResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE instance_requests
            SET status = $1, updated_at = now()
            WHERE deleted_at IS NULL
              AND owner = ANY($2)
              AND status <> ALL($3)
            "#,
        )
        .bind(InstanceStatus::Deprovision.as_str())
        .bind(owners)
        .bind(deletion_bound_statuses())
        .execute(&self.pool)
        .await?;

        debug!(
            count = result.rows_affected(),
            "Deprovisioning instances of denied owners"
        );
        Ok(())
    }

    async fn is_entitlement_active(&self, instance: &InstanceRequest) -> ServiceResult<bool> {
        let quota_service = self.quota_factory.get_service(self.quota_type)?;
        quota_service.is_entitlement_active(instance).await
    }
}
