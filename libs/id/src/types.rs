//! Typed ID definitions for fleet manager resources.

use crate::define_id;

// =============================================================================
// Fleet
// =============================================================================

define_id!(ClusterId);

// =============================================================================
// Tenancy
// =============================================================================

define_id!(InstanceId);
define_id!(OrgId);
define_id!(SubscriptionId);
