use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use sfm_fleet::ScalingMode;

use crate::db::DbConfig;
use crate::services::QuotaType;

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub log_level: String,
    pub dev_mode: bool,
    pub reconcile_interval: Duration,
    pub scaling_mode: ScalingMode,
    pub cluster_config_file: PathBuf,
    pub instance_types_file: PathBuf,
    pub providers_file: PathBuf,
    pub enable_deny_list: bool,
    pub deny_list_file: Option<PathBuf>,
    pub quota_type: QuotaType,
    pub quota_list_file: Option<PathBuf>,
    pub database: DbConfig,
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| v == "1" || v.to_lowercase() == "true")
        .unwrap_or(false)
}

fn env_path(name: &str, default: &str) -> PathBuf {
    std::env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .into()
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let listen_addr = std::env::var("SFM_LISTEN_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:8080".to_string())
            .parse()
            .context("invalid SFM_LISTEN_ADDR")?;

        let log_level = std::env::var("SFM_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let dev_mode = env_flag("SFM_DEV");

        let reconcile_interval = std::env::var("SFM_RECONCILE_INTERVAL_SECS")
            .ok()
            .map(|s| s.parse::<u64>())
            .transpose()
            .context("invalid SFM_RECONCILE_INTERVAL_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(30));

        let scaling_mode = std::env::var("SFM_SCALING_MODE")
            .ok()
            .map(|s| s.parse::<ScalingMode>())
            .transpose()
            .context("invalid SFM_SCALING_MODE")?
            .unwrap_or_default();

        let quota_type = std::env::var("SFM_QUOTA_TYPE")
            .ok()
            .map(|s| s.parse::<QuotaType>())
            .transpose()
            .context("invalid SFM_QUOTA_TYPE")?
            .unwrap_or_default();

        Ok(Self {
            listen_addr,
            log_level,
            dev_mode,
            reconcile_interval,
            scaling_mode,
            cluster_config_file: env_path(
                "SFM_CLUSTER_CONFIG_FILE",
                "config/dataplane-cluster-configuration.yaml",
            ),
            instance_types_file: env_path(
                "SFM_INSTANCE_TYPES_FILE",
                "config/instance-types-configuration.yaml",
            ),
            providers_file: env_path("SFM_PROVIDERS_FILE", "config/provider-configuration.yaml"),
            enable_deny_list: env_flag("SFM_ENABLE_DENY_LIST"),
            deny_list_file: std::env::var("SFM_DENY_LIST_FILE").ok().map(PathBuf::from),
            quota_type,
            quota_list_file: std::env::var("SFM_QUOTA_LIST_FILE").ok().map(PathBuf::from),
            database: DbConfig::from_env(),
        })
    }
}
