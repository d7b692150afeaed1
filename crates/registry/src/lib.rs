//! `sentra-registry` — read-only permission/navigation catalogs.
//!
//! Pure data, no evaluation: this crate defines the typed tables (navigation
//! tree, entity/action definitions, SoD rule catalog, risk weight catalog,
//! workflow definitions) and the immutable [`RegistrySnapshot`] that bundles
//! them per scope. All lookups are exact; nothing here infers, filters, or
//! decides.

pub mod catalog;
pub mod nav;
pub mod slug;
pub mod snapshot;
pub mod workflow_def;

pub use catalog::{ActionPermissionDef, RiskTier, RiskWeight, SodRule};
pub use nav::{NavigationKind, NavigationNode, PageEntry};
pub use slug::PermissionSlug;
pub use snapshot::{RegistrySnapshot, RegistrySnapshotBuilder};
pub use workflow_def::{
    ApprovalType, ApproverSelector, ChangeContext, TriggerCondition, TriggerField, TriggerOperator,
    TriggerValue, WorkflowDefinition, WorkflowStage,
};
