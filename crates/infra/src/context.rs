//! Shared service wiring.
//!
//! Every service holds a [`CoreContext`]: the database, the outbound event
//! sink, the audit sink, tenant settings and the branch membership source.
//! Events raised inside a transaction go into an [`Outbox`] and are published
//! only after the transaction committed.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use branchledger_auth::{authorize, ensure_tenant, Actor, ActorBranches, BranchContext, BranchScope, Permission, ScopeResolver};
use branchledger_core::{BranchId, TenantId};
use branchledger_events::{Event, EventEnvelope, EventSink, NullSink};
use branchledger_inventory::PolicyConfig;

use crate::audit::{AuditSink, NullAudit};
use crate::error::ServiceResult;
use crate::settings::{SettingsProvider, StaticSettings};
use crate::storage::{Database, InMemoryDatabase};

#[derive(Clone)]
pub struct CoreContext {
    db: Arc<dyn Database>,
    events: Arc<dyn EventSink>,
    audit: Arc<dyn AuditSink>,
    settings: Arc<dyn SettingsProvider>,
    branches: Arc<dyn BranchContext + Send + Sync>,
}

impl core::fmt::Debug for CoreContext {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CoreContext").finish_non_exhaustive()
    }
}

impl CoreContext {
    /// Fresh in-memory database, no event or audit output, default policy.
    pub fn in_memory() -> Self {
        Self {
            db: Arc::new(InMemoryDatabase::new()),
            events: Arc::new(NullSink),
            audit: Arc::new(NullAudit),
            settings: Arc::new(StaticSettings::default()),
            branches: Arc::new(ActorBranches),
        }
    }

    pub fn with_database(mut self, db: Arc<dyn Database>) -> Self {
        self.db = db;
        self
    }

    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_settings(mut self, settings: Arc<dyn SettingsProvider>) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_branches(mut self, branches: Arc<dyn BranchContext + Send + Sync>) -> Self {
        self.branches = branches;
        self
    }

    pub fn db(&self) -> &(dyn Database + 'static) {
        self.db.as_ref()
    }

    pub fn audit(&self) -> &dyn AuditSink {
        self.audit.as_ref()
    }

    pub fn policy(&self, tenant_id: TenantId) -> PolicyConfig {
        self.settings.policy(tenant_id)
    }

    /// Branch scope for one request.
    pub fn scope(&self, actor: &Actor) -> BranchScope {
        ScopeResolver::new().resolve(actor, self.branches.as_ref())
    }

    /// Publish everything collected during a committed transaction.
    pub(crate) fn publish(&self, outbox: Outbox) {
        if !outbox.envelopes.is_empty() {
            debug!(count = outbox.envelopes.len(), "publishing committed events");
        }
        for envelope in outbox.envelopes {
            self.events.emit(envelope);
        }
    }
}

/// Capability check plus tenant pinning for a tenant-owned row.
pub(crate) fn permit(actor: &Actor, permission: &Permission, tenant_id: TenantId) -> ServiceResult<()> {
    authorize(actor, permission)?;
    ensure_tenant(actor, tenant_id)?;
    Ok(())
}

/// Events waiting for their transaction to commit.
#[derive(Debug, Default)]
pub(crate) struct Outbox {
    envelopes: Vec<EventEnvelope<JsonValue>>,
}

impl Outbox {
    pub(crate) fn push<E>(&mut self, tenant_id: TenantId, branch_id: BranchId, event: &E)
    where
        E: Event + Serialize,
    {
        match EventEnvelope::from_typed(tenant_id, branch_id, event) {
            Ok(envelope) => self.envelopes.push(envelope),
            Err(err) => warn!(
                event_type = event.event_type(),
                error = %err,
                "dropping event that failed to serialize"
            ),
        }
    }
}
