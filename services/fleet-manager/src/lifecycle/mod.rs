//! Instance lifecycle reconciliation.

mod expiry;
mod reconciler;
mod worker;

pub use expiry::{expiry_action, EntitlementCache, ExpiryAction};
pub use reconciler::{
    Collaborators, InstanceFailure, InstanceReconciler, Reconcile, ReconcileError,
    ReconcileSettings, ReconcileStats, Stage,
};
pub use worker::{ReconcileWorker, WorkerHandle, GENERAL_INSTANCE_WORKER};
