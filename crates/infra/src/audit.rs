//! Audit trail decorator.
//!
//! Services wrap their mutations with [`audited`]. The record is written only
//! after the operation succeeded, and a failing sink is logged and ignored:
//! the audit trail can never block or undo a stock change.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use branchledger_core::{BranchId, TenantId, UserId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub tenant_id: TenantId,
    pub branch_id: BranchId,
    pub actor: UserId,
    /// Dotted action name, e.g. `transfer.ship`.
    pub action: String,
    pub entity_id: String,
    pub at: DateTime<Utc>,
}

pub trait AuditSink: Send + Sync {
    fn record(&self, record: &AuditRecord) -> Result<(), String>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullAudit;

impl AuditSink for NullAudit {
    fn record(&self, _record: &AuditRecord) -> Result<(), String> {
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryAuditLog {
    records: Mutex<Vec<AuditRecord>>,
}

impl InMemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

impl AuditSink for InMemoryAuditLog {
    fn record(&self, record: &AuditRecord) -> Result<(), String> {
        self.records
            .lock()
            .map_err(|_| "audit log lock poisoned".to_string())?
            .push(record.clone());
        Ok(())
    }
}

/// Run `op`; on success hand `describe(&output)` to the sink.
pub fn audited<T, E>(
    sink: &dyn AuditSink,
    op: impl FnOnce() -> Result<T, E>,
    describe: impl FnOnce(&T) -> AuditRecord,
) -> Result<T, E> {
    let out = op()?;
    let record = describe(&out);
    if let Err(err) = sink.record(&record) {
        warn!(action = %record.action, entity_id = %record.entity_id, error = %err, "audit write failed");
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Broken;

    impl AuditSink for Broken {
        fn record(&self, _record: &AuditRecord) -> Result<(), String> {
            Err("disk full".into())
        }
    }

    fn record(action: &str) -> AuditRecord {
        AuditRecord {
            tenant_id: TenantId::new(),
            branch_id: BranchId::new(),
            actor: UserId::new(),
            action: action.into(),
            entity_id: "e-1".into(),
            at: Utc::now(),
        }
    }

    #[test]
    fn audit_failure_does_not_fail_the_operation() {
        let out: Result<u32, ()> = audited(&Broken, || Ok(7), |_| record("stock.adjust"));
        assert_eq!(out, Ok(7));
    }

    #[test]
    fn failed_operations_are_not_audited() {
        let log = InMemoryAuditLog::new();
        let out: Result<u32, &str> = audited(&log, || Err("nope"), |_| record("stock.adjust"));
        assert_eq!(out, Err("nope"));
        assert!(log.records().is_empty());

        let _ = audited::<_, ()>(&log, || Ok(()), |_| record("transfer.ship"));
        assert_eq!(log.records()[0].action, "transfer.ship");
    }
}
