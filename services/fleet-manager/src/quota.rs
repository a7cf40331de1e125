//! Quota backends.
//!
//! Only the static quota management list ships with the service. The account
//! management backend is an external system; the factory reports it as
//! unavailable.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use crate::catalogue::{read_yaml, CatalogueError};
use crate::model::InstanceRequest;
use crate::services::{QuotaService, QuotaServiceFactory, QuotaType, ServiceError, ServiceResult};

/// An organisation allowed to create instances.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct AllowedOrganisation {
    pub id: String,
    /// Every user of the organisation is entitled.
    #[serde(default)]
    pub any_user: bool,
    #[serde(default)]
    pub registered_users: Vec<String>,
}

/// Operator-maintained list of entitled organisations and service accounts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct QuotaManagementList {
    #[serde(default)]
    pub registered_users_per_organisation: Vec<AllowedOrganisation>,
    #[serde(default)]
    pub registered_service_accounts: Vec<String>,
}

impl QuotaManagementList {
    pub fn from_yaml_str(input: &str) -> Result<Self, CatalogueError> {
        Ok(serde_yaml::from_str(input)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, CatalogueError> {
        read_yaml(path.as_ref())
    }

    pub fn is_entitled(&self, organisation_id: &str, owner: &str) -> bool {
        if self.registered_service_accounts.iter().any(|sa| sa == owner) {
            return true;
        }

        self.registered_users_per_organisation
            .iter()
            .find(|org| org.id == organisation_id)
            .is_some_and(|org| org.any_user || org.registered_users.iter().any(|u| u == owner))
    }
}

#[async_trait]
impl QuotaService for QuotaManagementList {
    async fn is_entitlement_active(&self, instance: &InstanceRequest) -> ServiceResult<bool> {
        Ok(self.is_entitled(instance.organisation_id.as_str(), &instance.owner))
    }
}

/// Factory over the quota backends available to this process.
#[derive(Clone)]
pub struct DefaultQuotaServiceFactory {
    quota_list: Arc<QuotaManagementList>,
}

impl DefaultQuotaServiceFactory {
    pub fn new(quota_list: QuotaManagementList) -> Self {
        Self {
            quota_list: Arc::new(quota_list),
        }
    }
}

impl QuotaServiceFactory for DefaultQuotaServiceFactory {
    fn get_service(&self, quota_type: QuotaType) -> ServiceResult<Arc<dyn QuotaService>> {
        match quota_type {
            QuotaType::QuotaManagementList => {
                let service: Arc<dyn QuotaService> = self.quota_list.clone();
                Ok(service)
            }
            QuotaType::Ams => Err(ServiceError::Unavailable(format!(
                "quota type {quota_type} has no backend configured"
            ))),
        }
    }
}
