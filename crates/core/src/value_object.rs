//! Value object marker: equality by value, not identity.

/// Immutable domain value compared by its attributes.
///
/// `Money`, `Percentage` and `Quantity` are the value objects of this
/// workspace; "modifying" one always produces a new value.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
