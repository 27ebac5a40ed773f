//! Value object trait: equality by value, not identity.
//!
//! Amounts and descriptions carry no identity. Two amounts of `100` are the
//! same amount; they are validated once at construction and never mutated.

/// Marker trait for value objects.
///
/// Value objects are **immutable** and **compared by value**. Construction is
/// the only place their contract is checked, so a value of the type is proof
/// the contract holds:
///
/// ```ignore
/// let amount = Amount::new(100)?;       // strictly positive
/// let memo = Description::new("pix")?;  // 1..=10 characters
/// assert_eq!(amount, Amount::new(100)?);
/// ```
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
