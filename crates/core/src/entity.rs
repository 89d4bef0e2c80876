//! Entity traits: identity and branch ownership.

use crate::id::BranchId;

/// Entity marker + minimal interface.
pub trait Entity {
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    fn id(&self) -> &Self::Id;
}

/// An entity whose rows belong to exactly one branch.
///
/// The branch scoping guard only accepts types implementing this trait, so
/// whether an entity is filtered is decided at compile time. Identity records
/// (users, branches, branch memberships) deliberately do not implement it.
pub trait BranchOwned {
    fn branch_id(&self) -> BranchId;
}

impl<T: BranchOwned + ?Sized> BranchOwned for &T {
    fn branch_id(&self) -> BranchId {
        (**self).branch_id()
    }
}
