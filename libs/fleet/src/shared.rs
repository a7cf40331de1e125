//! Snapshot holder for the fleet configuration.

use std::sync::{Arc, RwLock};

use crate::FleetConfig;

/// Holds the current fleet configuration as an immutable snapshot.
///
/// Readers take an `Arc` and keep using it for as long as they need a
/// consistent view; a reload swaps in a whole new snapshot and never mutates
/// one that has been handed out.
#[derive(Debug, Default)]
pub struct SharedFleet {
    current: RwLock<Arc<FleetConfig>>,
}

impl SharedFleet {
    pub fn new(config: FleetConfig) -> Self {
        Self {
            current: RwLock::new(Arc::new(config)),
        }
    }

    /// The configuration as of now.
    pub fn snapshot(&self) -> Arc<FleetConfig> {
        let guard = self.current.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }

    /// Replace the configuration, returning the previous snapshot.
    pub fn replace(&self, config: FleetConfig) -> Arc<FleetConfig> {
        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        std::mem::replace(&mut *guard, Arc::new(config))
    }
}
