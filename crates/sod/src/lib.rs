//! `sentra-sod` — segregation-of-duties screening.
//!
//! Scans a candidate permission set against a rule catalog of forbidden
//! combinations. A rule fires iff the evaluated set is a superset of its
//! conflicting slugs; partial overlap never fires. Pure function over
//! immutable inputs, safe to call concurrently.

pub mod validate;

pub use validate::{SodConflict, SodValidationResult, enforce_savable, validate};
