//! `sentra-access` — permission normalization and navigation resolution.
//!
//! Everything in this crate is a pure function over immutable inputs: a
//! normalized permission set and a [`sentra_registry::RegistrySnapshot`].
//! Repeated calls with identical inputs always yield identical decisions,
//! and denial is a return value, never an error.

pub mod location;
pub mod normalize;
pub mod preview;
pub mod resolver;

pub use location::{RequestedLocation, ResolvedLocation};
pub use normalize::{PermissionSet, normalize};
pub use preview::{AccessPreview, AccessWarning, DeniedItem, preview};
pub use resolver::{
    DenyKind, DenyReason, NavigationDecision, SafeLocation, allowed_sub_tabs, allowed_tabs,
    evaluate_navigation, first_allowed_target, resolve_safe_location,
};
