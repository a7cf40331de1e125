//! Application state shared across request handlers.

use std::sync::Arc;

use crate::db::Database;
use crate::metrics::PrometheusSink;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    metrics: Arc<PrometheusSink>,
    db: Option<Database>,
}

impl AppState {
    pub fn new(metrics: Arc<PrometheusSink>, db: Option<Database>) -> Self {
        Self {
            inner: Arc::new(AppStateInner { metrics, db }),
        }
    }

    pub fn metrics(&self) -> &PrometheusSink {
        &self.inner.metrics
    }

    /// Database handle, absent when running without persistence.
    pub fn db(&self) -> Option<&Database> {
        self.inner.db.as_ref()
    }
}
