//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects are immutable and compared by their attributes. To "modify" one,
/// build a new value. `Money`, `PriceBounds` and `MarketSnapshot` are value objects;
/// units, strategies and experiments are entities with identity.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
