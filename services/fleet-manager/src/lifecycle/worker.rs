//! Background worker running reconciliation passes on an interval.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use super::reconciler::Reconcile;

/// Worker type reported in logs.
pub const GENERAL_INSTANCE_WORKER: &str = "general_instance_worker";

/// Runs one reconciliation pass per tick.
///
/// A tick that fires while a pass is still running is skipped, so passes of
/// one worker never overlap.
pub struct ReconcileWorker {
    id: Uuid,
    worker_type: &'static str,
    reconciler: Arc<dyn Reconcile>,
    interval: Duration,
}

impl ReconcileWorker {
    pub fn new(reconciler: Arc<dyn Reconcile>, interval: Duration) -> Self {
        Self {
            id: Uuid::new_v4(),
            worker_type: GENERAL_INSTANCE_WORKER,
            reconciler,
            interval,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn worker_type(&self) -> &'static str {
        self.worker_type
    }

    /// Spawn the worker loop.
    pub fn start(self) -> WorkerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let id = self.id;
        let task = tokio::spawn(async move { self.run(shutdown_rx).await });
        WorkerHandle {
            id,
            shutdown_tx,
            task,
        }
    }

    /// Run until shutdown is signaled. A pass in progress finishes first.
    #[instrument(skip(self, shutdown), fields(worker_id = %self.id, worker_type = self.worker_type))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.interval.as_secs(),
            "Starting reconcile worker"
        );

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.run_pass().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Reconcile worker shutting down");
                        break;
                    }
                }
            }
        }
    }

    async fn run_pass(&self) {
        let errors = self.reconciler.reconcile().await;
        if errors.is_empty() {
            return;
        }

        warn!(
            error_count = errors.len(),
            "Reconciliation pass finished with errors"
        );
        for e in &errors {
            error!(error = %e, "Reconciliation error");
        }
    }
}

/// Handle to a running worker.
pub struct WorkerHandle {
    id: Uuid,
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Signal shutdown and wait for the loop to exit.
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.task.await {
            error!(worker_id = %self.id, error = %e, "Reconcile worker task failed");
        }
    }
}
