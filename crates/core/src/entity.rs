//! Entity trait: identity + continuity across state changes.

/// Entity marker + minimal interface.
///
/// Accounts keep their identity while their balance moves; committed
/// transactions keep theirs forever.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the entity identifier.
    fn id(&self) -> &Self::Id;
}
