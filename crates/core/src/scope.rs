//! Scope partition of the permission/navigation universe.

use serde::{Deserialize, Serialize};

/// Partition a permission, navigation node, or role belongs to.
///
/// Every registry is built for exactly one scope; scopes are never merged at
/// evaluation time. Cross-scope matching is forbidden by construction: a
/// lookup against a snapshot of the wrong scope simply misses (fail-closed).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// Provider-side administration ("system" scope).
    System,
    /// Customer-side administration ("tenant" scope).
    Tenant,
}

impl core::fmt::Display for Scope {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Scope::System => write!(f, "system"),
            Scope::Tenant => write!(f, "tenant"),
        }
    }
}
