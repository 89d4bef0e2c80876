use thiserror::Error;

use branchledger_core::TenantId;

use crate::{Actor, Permission};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("tenant mismatch")]
    TenantMismatch,

    #[error("forbidden: missing permission '{0}'")]
    Forbidden(String),
}

/// Capability check (`actorCan`), run before every mutating operation.
///
/// Pure policy: no IO, no branch logic. Branch access is the scope guard's job.
pub fn authorize(actor: &Actor, required: &Permission) -> Result<(), AuthzError> {
    let granted = actor
        .permissions
        .iter()
        .any(|p| p.is_wildcard() || p.as_str() == required.as_str());

    if granted {
        Ok(())
    } else {
        tracing::debug!(user_id = %actor.user_id, permission = %required, "capability denied");
        Err(AuthzError::Forbidden(required.as_str().to_string()))
    }
}

/// Reject access to rows of another tenant.
pub fn ensure_tenant(actor: &Actor, tenant_id: TenantId) -> Result<(), AuthzError> {
    if actor.tenant_id == tenant_id {
        Ok(())
    } else {
        Err(AuthzError::TenantMismatch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities;
    use branchledger_core::{BranchId, UserId};

    fn actor() -> Actor {
        Actor::new(UserId::new(), TenantId::new(), BranchId::new())
    }

    #[test]
    fn explicit_permission_grants() {
        let a = actor().with_permission(capabilities::TRANSFER_SHIP);
        assert!(authorize(&a, &capabilities::TRANSFER_SHIP).is_ok());
        assert_eq!(
            authorize(&a, &capabilities::TRANSFER_RECEIVE),
            Err(AuthzError::Forbidden("transfer.receive".into()))
        );
    }

    #[test]
    fn wildcard_grants_everything() {
        let a = Actor::system(TenantId::new(), BranchId::new());
        assert!(authorize(&a, &capabilities::WORKFLOW_DECIDE).is_ok());
    }

    #[test]
    fn tenant_mismatch_is_rejected() {
        let a = actor();
        assert_eq!(ensure_tenant(&a, TenantId::new()), Err(AuthzError::TenantMismatch));
        assert!(ensure_tenant(&a, a.tenant_id).is_ok());
    }
}
