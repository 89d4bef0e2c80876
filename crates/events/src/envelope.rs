use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use branchledger_core::{BranchId, TenantId};

use crate::Event;

/// Envelope for an outbound event, carrying tenant and branch scope.
///
/// Subscribers filter on `tenant_id`/`branch_id` before acting; the payload is
/// opaque to the bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope<E> {
    event_id: Uuid,
    tenant_id: TenantId,
    branch_id: BranchId,
    event_type: String,
    occurred_at: DateTime<Utc>,
    payload: E,
}

impl<E> EventEnvelope<E> {
    pub fn new(
        event_id: Uuid,
        tenant_id: TenantId,
        branch_id: BranchId,
        event_type: impl Into<String>,
        occurred_at: DateTime<Utc>,
        payload: E,
    ) -> Self {
        Self {
            event_id,
            tenant_id,
            branch_id,
            event_type: event_type.into(),
            occurred_at,
            payload,
        }
    }

    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    pub fn branch_id(&self) -> BranchId {
        self.branch_id
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    pub fn payload(&self) -> &E {
        &self.payload
    }

    pub fn into_payload(self) -> E {
        self.payload
    }

    /// Whether a subscriber confined to `tenant_id` and `branches` may see it.
    pub fn in_scope(&self, tenant_id: TenantId, branches: &[BranchId]) -> bool {
        self.tenant_id == tenant_id && branches.contains(&self.branch_id)
    }
}

impl EventEnvelope<serde_json::Value> {
    /// Wrap a typed event as a JSON envelope.
    pub fn from_typed<E>(tenant_id: TenantId, branch_id: BranchId, event: &E) -> serde_json::Result<Self>
    where
        E: Event + Serialize,
    {
        Ok(Self::new(
            Uuid::now_v7(),
            tenant_id,
            branch_id,
            event.event_type(),
            event.occurred_at(),
            serde_json::to_value(event)?,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Serialize)]
    struct Shipped {
        qty: u32,
        at: DateTime<Utc>,
    }

    impl Event for Shipped {
        fn event_type(&self) -> &'static str {
            "inventory.transfer.shipped"
        }

        fn occurred_at(&self) -> DateTime<Utc> {
            self.at
        }
    }

    #[test]
    fn typed_events_keep_name_time_and_payload() {
        let at = Utc::now();
        let env = EventEnvelope::from_typed(TenantId::new(), BranchId::new(), &Shipped { qty: 4, at }).unwrap();
        assert_eq!(env.event_type(), "inventory.transfer.shipped");
        assert_eq!(env.occurred_at(), at);
        assert_eq!(env.payload()["qty"], 4);
    }

    #[test]
    fn scope_requires_tenant_and_branch() {
        let (tenant, branch) = (TenantId::new(), BranchId::new());
        let env = EventEnvelope::new(Uuid::now_v7(), tenant, branch, "x", Utc::now(), ());
        assert!(env.in_scope(tenant, &[BranchId::new(), branch]));
        assert!(!env.in_scope(tenant, &[BranchId::new()]));
        assert!(!env.in_scope(TenantId::new(), &[branch]));
    }
}
