//! Instance type and cloud provider catalogues.
//!
//! Both are loaded once at startup from YAML and are read-only afterwards.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Deserialize;
use sfm_capacity::{LimitLookupError, RegionalLimits};

/// Catalogue loading and lookup errors.
#[derive(Debug, thiserror::Error)]
pub enum CatalogueError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse catalogue: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("instance type {0:?} is not configured")]
    UnknownInstanceType(String),

    #[error("billing model {billing_model:?} is not supported by instance type {instance_type:?}")]
    UnknownBillingModel {
        instance_type: String,
        billing_model: String,
    },

    #[error("size {size_id:?} is not supported by instance type {instance_type:?}")]
    UnknownSize {
        instance_type: String,
        size_id: String,
    },
}

pub(crate) fn read_yaml<T: DeserializeOwned>(path: &Path) -> Result<T, CatalogueError> {
    let contents = std::fs::read_to_string(path).map_err(|source| CatalogueError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(serde_yaml::from_str(&contents)?)
}

/// Commercial terms of an instance type.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BillingModel {
    pub id: String,
    #[serde(default)]
    pub grace_period_days: u32,
    /// Fixed lifespan; when set the entitlement never drives expiry.
    #[serde(default)]
    pub lifespan_seconds: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct InstanceSize {
    pub id: String,
    #[serde(default)]
    pub lifespan_seconds: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct InstanceType {
    pub id: String,
    #[serde(default)]
    pub billing_models: Vec<BillingModel>,
    #[serde(default)]
    pub sizes: Vec<InstanceSize>,
}

/// Supported instance types with their billing models and sizes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct InstanceTypeCatalogue {
    #[serde(default)]
    pub instance_types: Vec<InstanceType>,
}

impl InstanceTypeCatalogue {
    pub fn from_yaml_str(input: &str) -> Result<Self, CatalogueError> {
        Ok(serde_yaml::from_str(input)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, CatalogueError> {
        read_yaml(path.as_ref())
    }

    pub fn instance_type(&self, instance_type: &str) -> Result<&InstanceType, CatalogueError> {
        self.instance_types
            .iter()
            .find(|t| t.id == instance_type)
            .ok_or_else(|| CatalogueError::UnknownInstanceType(instance_type.to_string()))
    }

    pub fn billing_model(
        &self,
        instance_type: &str,
        billing_model: &str,
    ) -> Result<&BillingModel, CatalogueError> {
        self.instance_type(instance_type)?
            .billing_models
            .iter()
            .find(|bm| bm.id == billing_model)
            .ok_or_else(|| CatalogueError::UnknownBillingModel {
                instance_type: instance_type.to_string(),
                billing_model: billing_model.to_string(),
            })
    }

    pub fn instance_size(
        &self,
        instance_type: &str,
        size_id: &str,
    ) -> Result<&InstanceSize, CatalogueError> {
        self.instance_type(instance_type)?
            .sizes
            .iter()
            .find(|s| s.id == size_id)
            .ok_or_else(|| CatalogueError::UnknownSize {
                instance_type: instance_type.to_string(),
                size_id: size_id.to_string(),
            })
    }

    /// Fixed lifespan of an instance: the size's, else the billing model's.
    ///
    /// An unknown billing model contributes no lifespan.
    pub fn effective_lifespan_seconds(
        &self,
        instance_type: &str,
        size_id: &str,
        billing_model: &str,
    ) -> Result<Option<i64>, CatalogueError> {
        let size = self.instance_size(instance_type, size_id)?;
        if size.lifespan_seconds.is_some() {
            return Ok(size.lifespan_seconds);
        }
        Ok(self
            .billing_model(instance_type, billing_model)
            .ok()
            .and_then(|bm| bm.lifespan_seconds))
    }
}

/// Limit for one instance type in a region. `None` means unbounded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct InstanceTypeLimit {
    #[serde(default)]
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Region {
    pub name: String,
    #[serde(default)]
    pub default: bool,
    #[serde(default)]
    pub supported_instance_types: HashMap<String, Option<InstanceTypeLimit>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Provider {
    pub name: String,
    #[serde(default)]
    pub default: bool,
    #[serde(default)]
    pub regions: Vec<Region>,
}

/// Cloud providers, their regions and per-region instance type limits.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ProviderCatalogue {
    #[serde(default)]
    pub providers: Vec<Provider>,
}

impl ProviderCatalogue {
    pub fn from_yaml_str(input: &str) -> Result<Self, CatalogueError> {
        Ok(serde_yaml::from_str(input)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, CatalogueError> {
        read_yaml(path.as_ref())
    }

    pub fn provider(&self, name: &str) -> Option<&Provider> {
        self.providers.iter().find(|p| p.name == name)
    }
}

impl RegionalLimits for ProviderCatalogue {
    fn instance_limit(
        &self,
        region: &str,
        cloud_provider: &str,
        instance_type: &str,
    ) -> Result<Option<i64>, LimitLookupError> {
        let provider = self
            .provider(cloud_provider)
            .ok_or_else(|| LimitLookupError::UnknownProvider(cloud_provider.to_string()))?;

        let region_config = provider
            .regions
            .iter()
            .find(|r| r.name == region)
            .ok_or_else(|| LimitLookupError::UnknownRegion {
                region: region.to_string(),
                cloud_provider: cloud_provider.to_string(),
            })?;

        region_config
            .supported_instance_types
            .get(instance_type)
            .map(|limit| limit.as_ref().and_then(|l| l.limit))
            .ok_or_else(|| LimitLookupError::UnsupportedInstanceType {
                region: region.to_string(),
                instance_type: instance_type.to_string(),
            })
    }
}
