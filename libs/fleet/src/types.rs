//! Closed enumerations shared by the fleet model and capacity accounting.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::FleetError;

/// Instance types accepted by a cluster whose configuration does not narrow
/// them down.
pub const ALL_INSTANCE_TYPES: &str = "standard,developer";

macro_rules! closed_enum {
    (
        $(#[$meta:meta])*
        $name:ident, $field:literal {
            $( $(#[$vmeta:meta])* $variant:ident => $value:literal, )+
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "&'static str")]
        pub enum $name {
            $( $(#[$vmeta])* $variant, )+
        }

        impl $name {
            /// All values, in declaration order.
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $( Self::$variant => $value, )+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = FleetError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $( $value => Ok(Self::$variant), )+
                    other => Err(FleetError::UnrecognizedValue {
                        field: $field,
                        value: other.to_string(),
                    }),
                }
            }
        }

        impl TryFrom<String> for $name {
            type Error = FleetError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                value.parse()
            }
        }

        impl From<$name> for &'static str {
            fn from(value: $name) -> Self {
                value.as_str()
            }
        }
    };
}

closed_enum! {
    /// Provisioning status of a data plane cluster.
    ClusterStatus, "status" {
        /// Registered but not yet placed; excluded from capacity math.
        Accepted => "cluster_accepted",
        Provisioning => "cluster_provisioning",
        Provisioned => "cluster_provisioned",
        WaitingForFleetshardOperator => "waiting_for_fleetshard_operator",
        Ready => "ready",
        Full => "full",
        Failed => "failed",
        Deprovisioning => "deprovisioning",
        Cleanup => "cleanup",
    }
}

impl Default for ClusterStatus {
    fn default() -> Self {
        Self::Provisioning
    }
}

closed_enum! {
    /// How a cluster is provisioned and reached.
    ProviderKind, "provider_type" {
        /// Clusters created through the managed cluster API.
        Ocm => "ocm",
        AwsEks => "aws_eks",
        /// Pre-existing clusters reached through a kubeconfig context.
        Standalone => "standalone",
    }
}

impl Default for ProviderKind {
    fn default() -> Self {
        Self::Ocm
    }
}

closed_enum! {
    /// Tenancy of a cluster as reported by usage queries.
    ClusterType, "cluster_type" {
        Managed => "managed",
        /// Dedicated to a single tenant; not subject to regional quota.
        Enterprise => "enterprise",
    }
}

closed_enum! {
    /// Strategy used to decide fleet capacity.
    ScalingMode, "scaling_mode" {
        /// Operator-curated cluster list with per-cluster limits.
        Manual => "manual",
        /// Capacity derived from cloud provider quota and dynamic ceilings.
        Auto => "auto",
    }
}

impl Default for ScalingMode {
    fn default() -> Self {
        Self::Manual
    }
}
