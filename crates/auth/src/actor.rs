use branchledger_core::id::Uuid;
use branchledger_core::{BranchId, TenantId, UserId};

use crate::Permission;

/// The resolved identity behind a request or background job.
///
/// Branch membership is carried on the actor so scope checks never need to
/// load it again mid-operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub user_id: UserId,
    pub tenant_id: TenantId,
    /// Primary branch.
    pub branch_id: BranchId,
    pub additional_branches: Vec<BranchId>,
    pub permissions: Vec<Permission>,
    /// Tenant super-admins bypass branch scoping entirely.
    pub super_admin: bool,
}

impl Actor {
    pub fn new(user_id: UserId, tenant_id: TenantId, branch_id: BranchId) -> Self {
        Self {
            user_id,
            tenant_id,
            branch_id,
            additional_branches: Vec::new(),
            permissions: Vec::new(),
            super_admin: false,
        }
    }

    /// Service identity pinned to one branch, holding every capability.
    ///
    /// Webhook ingestion runs as this actor for the store's branch, so scope
    /// checks still confine its writes to that branch.
    pub fn system(tenant_id: TenantId, branch_id: BranchId) -> Self {
        Self::new(UserId::from_uuid(Uuid::nil()), tenant_id, branch_id)
            .with_permission(Permission::WILDCARD)
    }

    pub fn with_branch(mut self, branch_id: BranchId) -> Self {
        if branch_id != self.branch_id && !self.additional_branches.contains(&branch_id) {
            self.additional_branches.push(branch_id);
        }
        self
    }

    pub fn with_permission(mut self, permission: Permission) -> Self {
        self.permissions.push(permission);
        self
    }

    pub fn as_super_admin(mut self) -> Self {
        self.super_admin = true;
        self
    }
}
