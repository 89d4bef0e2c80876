//! Fire-and-forget event emission.
//!
//! Services emit after their transaction commits. A failing transport must
//! never undo a committed ledger write, so [`EventSink::emit`] has no error
//! channel: implementations log and move on.

use std::sync::Mutex;

use serde::Serialize;
use serde_json::Value as JsonValue;

use branchledger_core::{BranchId, TenantId};

use crate::{Event, EventBus, EventEnvelope};

pub trait EventSink: Send + Sync {
    fn emit(&self, envelope: EventEnvelope<JsonValue>);
}

/// Serialize a typed event and hand it to the sink.
pub fn emit_typed<E>(sink: &dyn EventSink, tenant_id: TenantId, branch_id: BranchId, event: &E)
where
    E: Event + Serialize,
{
    match EventEnvelope::from_typed(tenant_id, branch_id, event) {
        Ok(envelope) => sink.emit(envelope),
        Err(err) => tracing::warn!(
            event_type = event.event_type(),
            error = %err,
            "dropping event that failed to serialize"
        ),
    }
}

/// Adapter publishing envelopes onto an [`EventBus`].
#[derive(Debug)]
pub struct BusSink<B> {
    bus: B,
}

impl<B> BusSink<B> {
    pub fn new(bus: B) -> Self {
        Self { bus }
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }
}

impl<B> EventSink for BusSink<B>
where
    B: EventBus<EventEnvelope<JsonValue>>,
{
    fn emit(&self, envelope: EventEnvelope<JsonValue>) {
        let event_type = envelope.event_type().to_string();
        if let Err(err) = self.bus.publish(envelope) {
            tracing::warn!(%event_type, error = ?err, "event publication failed");
        }
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _envelope: EventEnvelope<JsonValue>) {}
}

/// Keeps emitted envelopes in memory; used by tests to assert on emissions.
#[derive(Debug, Default)]
pub struct RecordingSink {
    seen: Mutex<Vec<EventEnvelope<JsonValue>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn event_types(&self) -> Vec<String> {
        self.seen
            .lock()
            .map(|seen| seen.iter().map(|e| e.event_type().to_string()).collect())
            .unwrap_or_default()
    }

    pub fn take(&self) -> Vec<EventEnvelope<JsonValue>> {
        self.seen
            .lock()
            .map(|mut seen| std::mem::take(&mut *seen))
            .unwrap_or_default()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, envelope: EventEnvelope<JsonValue>) {
        if let Ok(mut seen) = self.seen.lock() {
            seen.push(envelope);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InMemoryEventBus;
    use chrono::{DateTime, Utc};
    use std::sync::Arc;

    #[derive(Debug, Clone, Serialize)]
    struct Pinged {
        at: DateTime<Utc>,
    }

    impl Event for Pinged {
        fn event_type(&self) -> &'static str {
            "test.pinged"
        }

        fn occurred_at(&self) -> DateTime<Utc> {
            self.at
        }
    }

    #[test]
    fn bus_sink_publishes_scoped_envelopes() {
        let bus = Arc::new(InMemoryEventBus::new());
        let sub = bus.subscribe();
        let sink = BusSink::new(bus.clone());
        let tenant = TenantId::new();
        let branch = BranchId::new();

        emit_typed(&sink, tenant, branch, &Pinged { at: Utc::now() });

        let got = sub.drain();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].event_type(), "test.pinged");
        assert_eq!(got[0].tenant_id(), tenant);
        assert_eq!(got[0].branch_id(), branch);
    }
}
