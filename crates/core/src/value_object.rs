//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects are immutable and compared by their attribute values; two
/// instances with the same values are the same value. Permission slugs,
/// navigation requirements, and risk weights are all value objects — the
/// engine never tracks their identity, only their content.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
