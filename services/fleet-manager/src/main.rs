//! Stream fleet manager
//!
//! Periodically reconciles instance requests against quota entitlement and
//! lifespan policy, and publishes instance status and cluster capacity
//! metrics.

use std::sync::Arc;

use anyhow::{Context, Result};
use sfm_fleet::{FleetConfig, ScalingMode, SharedFleet};
use sfm_fleet_manager::{
    acl::AccessControlList,
    api,
    catalogue::{InstanceTypeCatalogue, ProviderCatalogue},
    config::Config,
    db::Database,
    lifecycle::{Collaborators, InstanceReconciler, ReconcileSettings, ReconcileWorker},
    metrics::PrometheusSink,
    quota::{DefaultQuotaServiceFactory, QuotaManagementList},
    services::{ClusterService, QuotaServiceFactory},
    state::AppState,
};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    // Prefer RUST_LOG, fall back to SFM_LOG_LEVEL
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting stream fleet manager");
    info!(
        listen_addr = %config.listen_addr,
        scaling_mode = %config.scaling_mode,
        quota_type = %config.quota_type,
        "Configuration loaded"
    );

    // Configuration errors are fatal
    let fleet_config = FleetConfig::from_file(config.scaling_mode, &config.cluster_config_file)
        .with_context(|| {
            format!(
                "failed to load cluster configuration from {}",
                config.cluster_config_file.display()
            )
        })?;
    info!(
        clusters = fleet_config.clusters.len(),
        ready_clusters_reconcile = fleet_config.is_ready_clusters_reconcile_enabled(),
        "Fleet configuration loaded"
    );
    let fleet = Arc::new(SharedFleet::new(fleet_config));

    let instance_types = Arc::new(
        InstanceTypeCatalogue::from_file(&config.instance_types_file)
            .context("failed to load instance types")?,
    );
    let providers = Arc::new(
        ProviderCatalogue::from_file(&config.providers_file).context("failed to load providers")?,
    );
    let acl = AccessControlList::load(config.enable_deny_list, config.deny_list_file.as_deref())
        .context("failed to load deny list")?;
    let quota_list = match &config.quota_list_file {
        Some(path) => QuotaManagementList::from_file(path).context("failed to load quota list")?,
        None => QuotaManagementList::default(),
    };

    let quota_factory: Arc<dyn QuotaServiceFactory> =
        Arc::new(DefaultQuotaServiceFactory::new(quota_list));
    quota_factory
        .get_service(config.quota_type)
        .context("quota backend unavailable")?;

    let db = match Database::connect(&config.database).await {
        Ok(db) => db,
        Err(e) => {
            error!(error = %e, "Failed to connect to database");
            return Err(e.into());
        }
    };

    if config.dev_mode {
        info!("Running database migrations (dev mode)");
        if let Err(e) = db.run_migrations().await {
            error!(error = %e, "Failed to run migrations");
            return Err(e.into());
        }
    }

    let cluster_service = Arc::new(db.cluster_service());
    if config.scaling_mode == ScalingMode::Manual {
        report_cluster_drift(&fleet, cluster_service.as_ref()).await;
    }

    let metrics = Arc::new(PrometheusSink::new()?);

    let reconciler = InstanceReconciler::new(
        Collaborators {
            instances: Arc::new(db.instance_service(quota_factory.clone(), config.quota_type)),
            clusters: cluster_service,
            quota_factory,
            metrics: metrics.clone(),
        },
        ReconcileSettings {
            fleet,
            instance_types,
            providers,
            acl,
            quota_type: config.quota_type,
        },
    );
    let worker = ReconcileWorker::new(Arc::new(reconciler), config.reconcile_interval);
    info!(worker_id = %worker.id(), worker_type = worker.worker_type(), "Starting worker");
    let worker_handle = worker.start();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let app = api::create_router(AppState::new(metrics, Some(db)));

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!(addr = %config.listen_addr, "Listening for connections");

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let mut shutdown_rx = shutdown_rx;
                loop {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                    if shutdown_rx.changed().await.is_err() {
                        break;
                    }
                }
                info!("HTTP server shutting down");
            })
            .await
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = server_handle => {
            match result {
                Ok(Ok(())) => info!("Server exited normally"),
                Ok(Err(e)) => error!(error = %e, "Server error"),
                Err(e) => error!(error = %e, "Server task panicked"),
            }
        }
    }

    let _ = shutdown_tx.send(true);

    info!("Waiting for worker to shut down...");
    let shutdown_timeout = std::time::Duration::from_secs(30);
    if tokio::time::timeout(shutdown_timeout, worker_handle.stop())
        .await
        .is_err()
    {
        warn!("Reconcile worker did not shut down in time");
    }

    info!("Fleet manager shutdown complete");
    Ok(())
}

/// Log configured clusters missing from storage and stored clusters missing
/// from configuration.
async fn report_cluster_drift(fleet: &SharedFleet, clusters: &dyn ClusterService) {
    let persisted = match clusters.list_clusters().await {
        Ok(persisted) => persisted,
        Err(e) => {
            warn!(error = %e, "Failed to list clusters, skipping drift report");
            return;
        }
    };

    let snapshot = fleet.snapshot();
    for cluster in snapshot.clusters.missing_from(&persisted) {
        warn!(
            cluster_id = %cluster.cluster_id,
            name = %cluster.name,
            "Configured cluster is not registered"
        );
    }
    for cluster_id in snapshot.clusters.excess_in(&persisted) {
        warn!(cluster_id = %cluster_id, "Registered cluster is not in configuration");
    }
}
