//! Branch scoping guard.
//!
//! Every read of a branch-owned entity is filtered to the actor's accessible
//! branches and every write must target one of them. Identity records (users,
//! branches, branch memberships) are exempt: they are what the accessible set
//! is computed from, and scoping them made scope resolution recurse into
//! itself.

use std::cell::{OnceCell, RefCell};
use std::collections::BTreeSet;

use branchledger_core::{BranchId, BranchOwned, DomainError, DomainResult, UserId};

use crate::Actor;

/// Entity families known to the stock core.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum EntityKind {
    User,
    Branch,
    BranchMembership,
    Product,
    Warehouse,
    StockMovement,
    InventoryTransit,
    StockTransfer,
    Store,
    StoreToken,
    ProductStoreMapping,
    ExternalOrder,
    WorkflowInstance,
    WorkflowApproval,
}

impl EntityKind {
    /// Entities never filtered by branch.
    pub const EXEMPT: [EntityKind; 3] = [
        EntityKind::User,
        EntityKind::Branch,
        EntityKind::BranchMembership,
    ];

    pub fn is_branch_scoped(self) -> bool {
        !Self::EXEMPT.contains(&self)
    }
}

/// The set of branches an actor may see and write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BranchScope {
    /// Super-admin: no filtering.
    All,
    Branches(BTreeSet<BranchId>),
}

impl BranchScope {
    /// Scope computed from the actor's own membership fields.
    pub fn for_actor(actor: &Actor) -> Self {
        ScopeResolver::new().resolve(actor, &ActorBranches)
    }

    /// Only the actor's primary branch.
    pub fn primary_only(actor: &Actor) -> Self {
        BranchScope::Branches(BTreeSet::from([actor.branch_id]))
    }

    pub fn allows(&self, branch_id: BranchId) -> bool {
        match self {
            BranchScope::All => true,
            BranchScope::Branches(set) => set.contains(&branch_id),
        }
    }

    /// `None` means unrestricted.
    pub fn branch_ids(&self) -> Option<&BTreeSet<BranchId>> {
        match self {
            BranchScope::All => None,
            BranchScope::Branches(set) => Some(set),
        }
    }

    /// Reads of exempt kinds always pass.
    pub fn ensure_read<T: BranchOwned + ?Sized>(&self, kind: EntityKind, entity: &T) -> DomainResult<()> {
        if !self.applies_to(kind) {
            return Ok(());
        }
        self.ensure_branch(entity.branch_id())
    }

    /// Writes must name a branch drawn from the accessible set.
    pub fn ensure_write(&self, branch_id: BranchId) -> DomainResult<()> {
        self.ensure_branch(branch_id)
    }

    /// Keep only the rows this scope may see.
    pub fn filter<T: BranchOwned>(&self, kind: EntityKind, items: impl IntoIterator<Item = T>) -> Vec<T> {
        let scoped = self.applies_to(kind);
        items
            .into_iter()
            .filter(|item| !scoped || self.allows(item.branch_id()))
            .collect()
    }

    /// Whether reads of `kind` go through this scope at all.
    pub fn applies_to(&self, kind: EntityKind) -> bool {
        kind.is_branch_scoped() && !matches!(self, BranchScope::All)
    }

    fn ensure_branch(&self, branch_id: BranchId) -> DomainResult<()> {
        if self.allows(branch_id) {
            Ok(())
        } else {
            Err(DomainError::CrossBranchAccessDenied)
        }
    }
}

/// Source of branch membership (`currentAccessibleBranchIds` / `isSuperAdmin`).
pub trait BranchContext {
    fn accessible_branch_ids(&self, actor: &Actor) -> BTreeSet<BranchId>;

    fn is_super_admin(&self, actor: &Actor) -> bool;
}

/// Reads membership straight off the [`Actor`].
#[derive(Debug, Default, Clone, Copy)]
pub struct ActorBranches;

impl BranchContext for ActorBranches {
    fn accessible_branch_ids(&self, actor: &Actor) -> BTreeSet<BranchId> {
        std::iter::once(actor.branch_id)
            .chain(actor.additional_branches.iter().copied())
            .collect()
    }

    fn is_super_admin(&self, actor: &Actor) -> bool {
        actor.super_admin
    }
}

thread_local! {
    /// Users whose membership is being loaded on this thread.
    static RESOLVING: RefCell<BTreeSet<UserId>> = const { RefCell::new(BTreeSet::new()) };
}

/// Memoizing scope resolution.
///
/// Re-entrancy is tracked per user on the current thread, not per resolver:
/// if a [`BranchContext`] asks for the same user's scope while that user's
/// membership is being loaded (through this resolver or a fresh one), the
/// inner call gets the primary-branch-only scope instead of recursing.
#[derive(Debug, Default)]
pub struct ScopeResolver {
    resolved: OnceCell<BranchScope>,
}

impl ScopeResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resolve(&self, actor: &Actor, context: &dyn BranchContext) -> BranchScope {
        if let Some(scope) = self.resolved.get() {
            return scope.clone();
        }
        let Some(_guard) = ResolvingGuard::enter(actor.user_id) else {
            tracing::debug!(user_id = %actor.user_id, "re-entrant scope resolution; using primary branch");
            return BranchScope::primary_only(actor);
        };

        let scope = if context.is_super_admin(actor) {
            BranchScope::All
        } else {
            let mut ids = context.accessible_branch_ids(actor);
            ids.insert(actor.branch_id);
            BranchScope::Branches(ids)
        };

        self.resolved.get_or_init(|| scope).clone()
    }
}

/// Marks a user as resolving until dropped, even if the context panics.
struct ResolvingGuard(UserId);

impl ResolvingGuard {
    /// `None` if the user is already resolving on this thread.
    fn enter(user_id: UserId) -> Option<Self> {
        RESOLVING
            .with(|set| set.borrow_mut().insert(user_id))
            .then_some(Self(user_id))
    }
}

impl Drop for ResolvingGuard {
    fn drop(&mut self) {
        RESOLVING.with(|set| {
            set.borrow_mut().remove(&self.0);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use branchledger_core::{TenantId, UserId};

    struct Row(BranchId);

    impl BranchOwned for Row {
        fn branch_id(&self) -> BranchId {
            self.0
        }
    }

    fn actor_in(branch: BranchId) -> Actor {
        Actor::new(UserId::new(), TenantId::new(), branch)
    }

    #[test]
    fn user_scoped_to_one_branch_cannot_touch_another() {
        let a = BranchId::new();
        let b = BranchId::new();
        let scope = BranchScope::for_actor(&actor_in(a));

        assert!(scope.ensure_write(a).is_ok());
        assert_eq!(scope.ensure_write(b), Err(DomainError::CrossBranchAccessDenied));
        assert_eq!(
            scope.ensure_read(EntityKind::Product, &Row(b)),
            Err(DomainError::CrossBranchAccessDenied)
        );
    }

    #[test]
    fn additional_branches_extend_the_scope() {
        let a = BranchId::new();
        let b = BranchId::new();
        let c = BranchId::new();
        let scope = BranchScope::for_actor(&actor_in(a).with_branch(b));

        let visible = scope.filter(EntityKind::Warehouse, vec![Row(a), Row(b), Row(c)]);
        let ids: Vec<_> = visible.iter().map(|r| r.0).collect();
        assert_eq!(ids, vec![a, b]);
    }

    #[test]
    fn super_admin_bypasses_scoping() {
        let scope = BranchScope::for_actor(&actor_in(BranchId::new()).as_super_admin());
        assert_eq!(scope, BranchScope::All);
        assert!(scope.ensure_write(BranchId::new()).is_ok());
        assert!(!scope.applies_to(EntityKind::Product));
    }

    #[test]
    fn identity_entities_are_exempt() {
        let scope = BranchScope::for_actor(&actor_in(BranchId::new()));
        assert!(!scope.applies_to(EntityKind::User));
        assert!(!scope.applies_to(EntityKind::Branch));
        assert!(!scope.applies_to(EntityKind::BranchMembership));
        assert!(scope.applies_to(EntityKind::StockMovement));

        let elsewhere = Row(BranchId::new());
        assert!(scope.ensure_read(EntityKind::BranchMembership, &elsewhere).is_ok());
        assert_eq!(scope.filter(EntityKind::Branch, vec![elsewhere]).len(), 1);
        assert_eq!(
            scope.ensure_read(EntityKind::Product, &Row(BranchId::new())),
            Err(DomainError::CrossBranchAccessDenied)
        );
    }

    struct Reentrant<'r> {
        resolver: &'r ScopeResolver,
        extra: BranchId,
    }

    impl BranchContext for Reentrant<'_> {
        fn accessible_branch_ids(&self, actor: &Actor) -> BTreeSet<BranchId> {
            // Loading memberships triggers another scope lookup for the same user.
            let inner = self.resolver.resolve(actor, self);
            assert_eq!(inner, BranchScope::primary_only(actor));
            BTreeSet::from([self.extra])
        }

        fn is_super_admin(&self, _actor: &Actor) -> bool {
            false
        }
    }

    #[test]
    fn reentrant_resolution_terminates() {
        let primary = BranchId::new();
        let extra = BranchId::new();
        let actor = actor_in(primary);
        let resolver = ScopeResolver::new();
        let ctx = Reentrant {
            resolver: &resolver,
            extra,
        };

        let scope = resolver.resolve(&actor, &ctx);
        assert_eq!(scope, BranchScope::Branches(BTreeSet::from([primary, extra])));
        // memoized
        assert_eq!(resolver.resolve(&actor, &ctx), scope);
    }

    /// Looks memberships up through a brand-new resolver each time, the way
    /// a per-request service context does.
    struct FreshResolverEachCall {
        extra: BranchId,
    }

    impl BranchContext for FreshResolverEachCall {
        fn accessible_branch_ids(&self, actor: &Actor) -> BTreeSet<BranchId> {
            let inner = ScopeResolver::new().resolve(actor, self);
            assert_eq!(inner, BranchScope::primary_only(actor));
            BTreeSet::from([self.extra])
        }

        fn is_super_admin(&self, _actor: &Actor) -> bool {
            false
        }
    }

    #[test]
    fn reentry_through_a_fresh_resolver_terminates() {
        let primary = BranchId::new();
        let extra = BranchId::new();
        let actor = actor_in(primary);
        let ctx = FreshResolverEachCall { extra };

        let scope = ScopeResolver::new().resolve(&actor, &ctx);
        assert_eq!(scope, BranchScope::Branches(BTreeSet::from([primary, extra])));
        // the guard is released afterwards
        assert_eq!(ScopeResolver::new().resolve(&actor, &ctx), scope);
    }

    #[test]
    fn other_users_resolve_normally_while_one_is_in_progress() {
        struct LooksUpColleague {
            colleague: Actor,
        }

        impl BranchContext for LooksUpColleague {
            fn accessible_branch_ids(&self, actor: &Actor) -> BTreeSet<BranchId> {
                if actor.user_id == self.colleague.user_id {
                    return BTreeSet::from([actor.branch_id]);
                }
                let colleague = ScopeResolver::new().resolve(&self.colleague, self);
                colleague.branch_ids().cloned().unwrap_or_default()
            }

            fn is_super_admin(&self, _actor: &Actor) -> bool {
                false
            }
        }

        let colleague = actor_in(BranchId::new());
        let actor = actor_in(BranchId::new());
        let ctx = LooksUpColleague {
            colleague: colleague.clone(),
        };

        let scope = ScopeResolver::new().resolve(&actor, &ctx);
        assert!(scope.allows(colleague.branch_id));
        assert!(scope.allows(actor.branch_id));
    }
}
