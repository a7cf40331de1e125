//! Expiry policy driven by quota entitlement.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sfm_id::OrgId;

/// What to do with an instance's expiry timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryAction {
    /// Entitlement is active again; remove the expiry.
    Clear,
    /// Entitlement was lost; expire after the billing model's grace period.
    SetFromGracePeriod,
    Keep,
}

/// Decide the expiry update for an instance without a fixed lifespan.
///
/// An expiry that is already set is never pushed back while the entitlement
/// stays inactive.
pub fn expiry_action(entitlement_active: bool, expires_at: Option<DateTime<Utc>>) -> ExpiryAction {
    match (entitlement_active, expires_at) {
        (true, Some(_)) => ExpiryAction::Clear,
        (false, None) => ExpiryAction::SetFromGracePeriod,
        _ => ExpiryAction::Keep,
    }
}

/// Entitlement results memoized for the duration of one pass.
#[derive(Debug, Default)]
pub struct EntitlementCache {
    entries: HashMap<(OrgId, String), bool>,
}

impl EntitlementCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, organisation_id: &OrgId, billing_model: &str) -> Option<bool> {
        self.entries
            .get(&(organisation_id.clone(), billing_model.to_string()))
            .copied()
    }

    pub fn insert(&mut self, organisation_id: &OrgId, billing_model: &str, active: bool) {
        self.entries
            .insert((organisation_id.clone(), billing_model.to_string()), active);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
