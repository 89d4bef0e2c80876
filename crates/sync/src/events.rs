use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use branchledger_core::Decimal;
use branchledger_events::Event;
use branchledger_inventory::ProductId;

use crate::order::ExternalOrderStatus;
use crate::store::StoreId;

/// Facts published after a webhook was applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoreSyncEvent {
    ProductSynced {
        store_id: StoreId,
        product_id: ProductId,
        external_id: String,
        created: bool,
        occurred_at: DateTime<Utc>,
    },
    ProductUnmapped {
        store_id: StoreId,
        product_id: ProductId,
        external_id: String,
        occurred_at: DateTime<Utc>,
    },
    OrderIngested {
        store_id: StoreId,
        external_id: String,
        lines_posted: usize,
        lines_skipped: usize,
        occurred_at: DateTime<Utc>,
    },
    OrderStatusChanged {
        store_id: StoreId,
        external_id: String,
        status: ExternalOrderStatus,
        stock_released: bool,
        occurred_at: DateTime<Utc>,
    },
    InventoryReconciled {
        store_id: StoreId,
        product_id: ProductId,
        target: Decimal,
        delta: Decimal,
        occurred_at: DateTime<Utc>,
    },
}

impl Event for StoreSyncEvent {
    fn event_type(&self) -> &'static str {
        match self {
            StoreSyncEvent::ProductSynced { .. } => "sync.product.synced",
            StoreSyncEvent::ProductUnmapped { .. } => "sync.product.unmapped",
            StoreSyncEvent::OrderIngested { .. } => "sync.order.ingested",
            StoreSyncEvent::OrderStatusChanged { .. } => "sync.order.status_changed",
            StoreSyncEvent::InventoryReconciled { .. } => "sync.inventory.reconciled",
        }
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            StoreSyncEvent::ProductSynced { occurred_at, .. }
            | StoreSyncEvent::ProductUnmapped { occurred_at, .. }
            | StoreSyncEvent::OrderIngested { occurred_at, .. }
            | StoreSyncEvent::OrderStatusChanged { occurred_at, .. }
            | StoreSyncEvent::InventoryReconciled { occurred_at, .. } => *occurred_at,
        }
    }
}
